#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// One learned destination: traffic matching `dest_addr`/`mask` leaves via
/// `next_hop` on `interface`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoutingTableEntry {
    pub dest_addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub interface: u32,
}

/// A resolved forwarding decision handed back to the host stack.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Route {
    pub dest: Ipv4Addr,
    pub source: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub out_interface: u32,
}

fn mask_matches(addr: Ipv4Addr, net: Ipv4Addr, mask: Ipv4Addr) -> bool {
    u32::from(addr) & u32::from(mask) == u32::from(net) & u32::from(mask)
}

/// The prefix table, keyed by `(dest_addr, mask)`.
///
/// Inserting an existing key replaces the entry wholesale and refreshes its
/// recency; there are never two live entries with the same key. `order`
/// remembers insertion order, which drives both the diagnostic snapshot and
/// the recency tie-break on lookup.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    // `serde_as(as = "Vec<(_, _)>")` spelled out: the serde_as macro cannot
    // see through `cfg_attr`, so the map-as-pair-list rewrite is written
    // directly.
    #[cfg_attr(
        feature = "serde",
        serde(with = "::serde_with::As::<Vec<(::serde_with::Same, ::serde_with::Same)>>")
    )]
    entries: HashMap<(Ipv4Addr, Ipv4Addr), RoutingTableEntry>,
    order: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl RoutingTable {
    pub fn new() -> Self {
        RoutingTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `entry`, replacing any entry with the same `(dest_addr, mask)`.
    pub fn insert(&mut self, entry: RoutingTableEntry) {
        let key = (entry.dest_addr, entry.mask);
        if self.entries.insert(key, entry).is_some() {
            self.order.retain(|k| *k != key);
        }
        self.order.push(key);
    }

    /// Removes the entry for `(dest_addr, mask)`. Absence is not an error.
    pub fn remove(&mut self, dest_addr: Ipv4Addr, mask: Ipv4Addr) -> Option<RoutingTableEntry> {
        let key = (dest_addr, mask);
        let removed = self.entries.remove(&key);
        if removed.is_some() {
            self.order.retain(|k| *k != key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Longest-prefix match for `addr`.
    ///
    /// Among matching entries the most specific mask wins; equally specific
    /// masks fall back to the most recently inserted entry.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&RoutingTableEntry> {
        let mut best: Option<(u32, &RoutingTableEntry)> = None;
        for key in &self.order {
            let entry = &self.entries[key];
            if !mask_matches(addr, entry.dest_addr, entry.mask) {
                continue;
            }
            let specificity = u32::from(entry.mask).count_ones();
            match best {
                Some((current, _)) if specificity < current => {}
                _ => best = Some((specificity, entry)),
            }
        }
        best.map(|(_, entry)| entry)
    }

    /// Snapshot in insertion order. The order carries no meaning beyond
    /// diagnostics.
    pub fn entries(&self) -> Vec<RoutingTableEntry> {
        self.order.iter().map(|key| self.entries[key]).collect()
    }

    /// Drops every entry learned via `interface`. Returns whether anything
    /// was removed.
    pub fn purge_interface(&mut self, interface: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.interface != interface);
        self.order.retain(|key| self.entries.contains_key(key));
        before != self.entries.len()
    }
}
