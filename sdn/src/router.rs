use crate::concepts::interface::Interface;
use crate::concepts::message::{Hello, MessageBody, MessageHeader, Rm, RoutingTuple};
use crate::concepts::packet::{decode_packet, encode_packet, PacketHeader};
use crate::concepts::route::{Route, RoutingTable, RoutingTableEntry};
use crate::feedback::{ConfigError, RouteError};
use crate::framework::{
    Ipv4Layer, Mobility, ProtocolConfig, RoutingSystem, TimerEvent, TraceSink, Transport,
};
use crate::scheduler::{partition, MessageScheduler};
use crate::util::increment;
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

/// hellos describe the 1-hop neighbourhood only
pub const HELLO_TTL: u16 = 1;
/// routing messages are flooded
pub const RM_TTL: u16 = 255;

/// Where the protocol is in its life.
///
/// The order is strict: `Uninitialized` accepts configuration,
/// `initialize` binds sockets, the first interface-up signal starts the
/// timers, and `dispose` is terminal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProtocolState {
    Uninitialized,
    Initialized,
    Running,
    Disposed,
}

impl ProtocolState {
    /// true once sockets exist and queries can be answered
    pub fn is_operational(&self) -> bool {
        matches!(self, ProtocolState::Initialized | ProtocolState::Running)
    }
}

/// The protocol engine of one node.
///
/// Owns the routing table, the send queue and one socket per usable
/// interface. All I/O and time go through the collaborators supplied at
/// construction; the router itself never blocks and never spawns.
pub struct Router<T: RoutingSystem + ?Sized> {
    pub config: ProtocolConfig,
    pub table: RoutingTable,
    pub packet_seqno: u16,
    pub message_seqno: u16,
    pub transport: T::Transport,
    pub clock: T::Clock,
    pub ipv4: T::Ipv4Layer,
    pub mobility: T::Mobility,
    pub trace: T::Trace,
    node_id: u32,
    state: ProtocolState,
    main_interface: Option<u32>,
    main_address: Option<Ipv4Addr>,
    exclusions: HashSet<u32>,
    interfaces: Vec<Interface<T>>,
    scheduler: MessageScheduler<T>,
}

impl<T: RoutingSystem + ?Sized> Router<T> {
    pub fn new(
        node_id: u32,
        config: ProtocolConfig,
        transport: T::Transport,
        clock: T::Clock,
        ipv4: T::Ipv4Layer,
        mobility: T::Mobility,
        trace: T::Trace,
    ) -> Self {
        Self {
            config,
            table: RoutingTable::new(),
            // pre-wrapped so the first emitted value is 0
            packet_seqno: u16::MAX,
            message_seqno: u16::MAX,
            transport,
            clock,
            ipv4,
            mobility,
            trace,
            node_id,
            state: ProtocolState::Uninitialized,
            main_interface: None,
            main_address: None,
            exclusions: HashSet::new(),
            interfaces: Vec::new(),
            scheduler: MessageScheduler::new(),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// the address this node is known by, once selected
    pub fn main_address(&self) -> Option<Ipv4Addr> {
        self.main_address
    }

    /// true if `addr` is the main address or any bound interface address
    pub fn is_own_address(&self, addr: Ipv4Addr) -> bool {
        self.main_address == Some(addr) || self.interfaces.iter().any(|itf| itf.address == addr)
    }

    // region Lifecycle

    /// Selects the node's identity from the address of `interface`.
    /// Fails if the interface has no address; must run before `initialize`.
    pub fn set_main_interface(&mut self, interface: u32) -> Result<(), ConfigError> {
        match self.ipv4.interface_address(interface) {
            Some(addr) => {
                self.main_interface = Some(interface);
                self.main_address = Some(addr);
                Ok(())
            }
            None => Err(ConfigError::NoInterfaceAddress { interface }),
        }
    }

    /// Marks interfaces the protocol must never use: no sockets are bound
    /// on them and routing messages arriving over them are ignored.
    /// Applying the set closes any socket already bound on a newly
    /// excluded interface and purges its table entries.
    pub fn set_interface_exclusions(&mut self, exclusions: HashSet<u32>) {
        let Self {
            transport,
            table,
            trace,
            interfaces,
            ..
        } = self;
        let mut kept = Vec::with_capacity(interfaces.len());
        for itf in interfaces.drain(..) {
            if exclusions.contains(&itf.index) {
                transport.close(itf.socket);
            } else {
                kept.push(itf);
            }
        }
        *interfaces = kept;
        let mut changed = false;
        for &interface in &exclusions {
            changed |= table.purge_interface(interface);
        }
        if changed {
            trace.table_changed(table.len());
        }
        self.exclusions = exclusions;
    }

    /// Binds one broadcast socket per usable interface and readies the
    /// node. Requires a main address; repeated calls are no-ops.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        match self.state {
            ProtocolState::Uninitialized => {}
            ProtocolState::Disposed => {
                return Err(ConfigError::Disposed {
                    operation: "initialize",
                })
            }
            _ => return Ok(()),
        }
        let main = self.main_address.ok_or(ConfigError::NoMainAddress)?;
        for interface in 0..self.ipv4.interface_count() {
            if self.exclusions.contains(&interface) {
                continue;
            }
            let Some(addr) = self.ipv4.interface_address(interface) else {
                continue;
            };
            self.open_socket(interface, addr)?;
        }
        self.state = ProtocolState::Initialized;
        debug!("node {} initialized, main address {main}", self.node_id);
        Ok(())
    }

    fn open_socket(&mut self, interface: u32, addr: Ipv4Addr) -> Result<(), ConfigError> {
        let socket = self
            .transport
            .open(interface, addr, self.config.port)
            .map_err(|source| ConfigError::Socket { interface, source })?;
        self.interfaces.push(Interface {
            index: interface,
            address: addr,
            socket,
        });
        Ok(())
    }

    /// Host signal that `interface` came up. The first signal after
    /// `initialize` arms the hello timer and moves the node to `Running`.
    /// An interface that gained its address late gets its socket here.
    pub fn notify_interface_up(&mut self, interface: u32) {
        if !self.state.is_operational() {
            return;
        }
        if !self.exclusions.contains(&interface)
            && !self.interfaces.iter().any(|itf| itf.index == interface)
        {
            if let Some(addr) = self.ipv4.interface_address(interface) {
                if let Err(e) = self.open_socket(interface, addr) {
                    warn!("interface {interface} up but unusable: {e}");
                }
            }
        }
        if self.state == ProtocolState::Initialized {
            self.scheduler
                .start_hello(&mut self.clock, self.config.hello_interval);
            self.state = ProtocolState::Running;
            debug!("node {} running", self.node_id);
        }
    }

    /// Host signal that `interface` went down: its socket is closed and
    /// every table entry learned through it is dropped.
    pub fn notify_interface_down(&mut self, interface: u32) {
        let Self {
            transport,
            table,
            trace,
            interfaces,
            ..
        } = self;
        let mut kept = Vec::with_capacity(interfaces.len());
        for itf in interfaces.drain(..) {
            if itf.index == interface {
                transport.close(itf.socket);
            } else {
                kept.push(itf);
            }
        }
        *interfaces = kept;
        if table.purge_interface(interface) {
            trace.table_changed(table.len());
        }
    }

    /// Tears the node down: cancels both timers, discards queued messages
    /// unsent, closes every socket and clears the table. Idempotent, and
    /// terminal; nothing fires after this returns.
    pub fn dispose(&mut self) {
        if self.state == ProtocolState::Disposed {
            return;
        }
        let Self {
            transport,
            clock,
            interfaces,
            scheduler,
            table,
            ..
        } = self;
        scheduler.cancel_all(clock);
        for itf in interfaces.drain(..) {
            transport.close(itf.socket);
        }
        table.clear();
        self.state = ProtocolState::Disposed;
        debug!("node {} disposed", self.node_id);
    }

    // endregion

    // region Forwarding

    /// Forwarding query for locally-originated traffic. A miss returns
    /// `RouteError::Unreachable`, which is an ordinary outcome here.
    pub fn route_output(&self, dest: Ipv4Addr) -> Result<Route, RouteError> {
        if !self.state.is_operational() {
            return Err(RouteError::NotInitialized);
        }
        let source = self.main_address.ok_or(RouteError::NotInitialized)?;
        let entry = self.table.lookup(dest).ok_or(RouteError::Unreachable(dest))?;
        Ok(Route {
            dest,
            source,
            next_hop: entry.next_hop,
            out_interface: entry.interface,
        })
    }

    /// Forwarding hook for transit traffic. Exactly one callback runs
    /// before this returns; none of them may block.
    pub fn route_input(
        &self,
        dest: Ipv4Addr,
        on_forward: impl FnOnce(&Route),
        on_local_deliver: impl FnOnce(),
        on_error: impl FnOnce(RouteError),
    ) {
        if self.ipv4.is_local_address(dest) {
            on_local_deliver();
            return;
        }
        match self.route_output(dest) {
            Ok(route) => on_forward(&route),
            Err(e) => on_error(e),
        }
    }

    // endregion

    // region Messaging

    /// increments and returns, wrapping mod 2^16
    pub fn get_packet_sequence_number(&mut self) -> u16 {
        increment(&mut self.packet_seqno);
        self.packet_seqno
    }

    /// increments and returns, wrapping mod 2^16
    pub fn get_message_sequence_number(&mut self) -> u16 {
        increment(&mut self.message_seqno);
        self.message_seqno
    }

    /// Handles one received frame. Malformed input is logged and dropped;
    /// it never propagates out of the router.
    pub fn receive(&mut self, frame: &[u8], from_interface: u32) {
        if !self.state.is_operational() {
            return;
        }
        let (header, messages) = match decode_packet(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("dropping malformed frame on interface {from_interface}: {e}");
                return;
            }
        };
        trace!(
            "rx packet seq {} with {} message(s) on interface {from_interface}",
            header.seqno,
            messages.len()
        );
        self.trace.packet_rx(&header, &messages);
        for message in &messages {
            match &message.body {
                MessageBody::Hello(hello) => {
                    // telemetry only; tables are pushed via rm
                    debug!(
                        "hello from node {} (msg seq {}) on interface {from_interface}",
                        hello.id, message.seqno
                    );
                }
                MessageBody::Rm(rm) => self.process_routing_message(rm, from_interface),
            }
        }
    }

    /// Folds an rm into the table. Tuples pointing back at this node are
    /// skipped, as is the whole message when its interface is excluded.
    pub fn process_routing_message(&mut self, rm: &Rm, from_interface: u32) {
        if self.exclusions.contains(&from_interface) {
            trace!("ignoring routing message on excluded interface {from_interface}");
            return;
        }
        let mut changed = false;
        for tuple in &rm.tuples {
            if self.is_own_address(tuple.next_hop) {
                trace!("skipping tuple for {} via ourselves", tuple.dest_addr);
                continue;
            }
            self.table.insert(RoutingTableEntry {
                dest_addr: tuple.dest_addr,
                mask: tuple.mask,
                next_hop: tuple.next_hop,
                interface: from_interface,
            });
            changed = true;
        }
        if changed {
            self.trace.table_changed(self.table.len());
            trace!("table now holds {} entries", self.table.len());
        }
    }

    fn require_operational(&self, operation: &'static str) -> Result<(), ConfigError> {
        match self.state {
            ProtocolState::Uninitialized => Err(ConfigError::NotInitialized { operation }),
            ProtocolState::Disposed => Err(ConfigError::Disposed { operation }),
            _ => Ok(()),
        }
    }

    /// Queues `message` for emission at most `delay` from now. A pending
    /// flush is reused, so bursts coalesce into as few packets as fit.
    /// Calling this before `initialize` or after `dispose` is misuse and
    /// is reported, not ignored.
    pub fn queue_message(
        &mut self,
        message: MessageHeader,
        delay: Duration,
    ) -> Result<(), ConfigError> {
        self.require_operational("queue_message")?;
        self.scheduler.enqueue(&mut self.clock, message, delay);
        Ok(())
    }

    /// Drains the queue and broadcasts it, splitting into several frames
    /// when the batch exceeds `max_packet_size`. The flush timer lands on
    /// the same path; a flush of an empty queue sends nothing. Misuse
    /// outside the operational states is reported, not ignored.
    pub fn send_queued_messages(&mut self) -> Result<(), ConfigError> {
        self.require_operational("send_queued_messages")?;
        self.flush_queue();
        Ok(())
    }

    fn flush_queue(&mut self) {
        let drained = self.scheduler.drain();
        if drained.is_empty() {
            return;
        }
        for group in partition(drained, self.config.max_packet_size) {
            let seqno = self.get_packet_sequence_number();
            let frame = encode_packet(seqno, &group);
            let header = PacketHeader {
                length: frame.len() as u16,
                seqno,
            };
            let port = self.config.port;
            let Self {
                transport,
                ipv4,
                trace,
                interfaces,
                ..
            } = self;
            for itf in interfaces.iter_mut() {
                let Some(dest) = ipv4.broadcast_address(itf.index) else {
                    continue;
                };
                transport.send_to(&mut itf.socket, &frame, dest, port);
            }
            trace.packet_tx(&header, &group);
            trace!("tx packet seq {seqno}, {} byte(s)", frame.len());
        }
    }

    fn make_hello(&mut self) -> MessageHeader {
        let seqno = self.get_message_sequence_number();
        MessageHeader {
            vtime: self.config.vtime,
            ttl: HELLO_TTL,
            seqno,
            body: MessageBody::Hello(Hello {
                id: self.node_id,
                position: self.mobility.position(),
                velocity: self.mobility.velocity(),
            }),
        }
    }

    /// Re-arms the hello timer, then queues a fresh self-description.
    pub fn hello_timer_expire(&mut self) {
        if self.state != ProtocolState::Running {
            return;
        }
        self.scheduler
            .start_hello(&mut self.clock, self.config.hello_interval);
        let hello = self.make_hello();
        let window = self.config.coalesce_window;
        self.scheduler.enqueue(&mut self.clock, hello, window);
    }

    /// Queues an rm advertising every current table entry. The host picks
    /// the cadence (typically `rm_interval`); an empty table queues
    /// nothing. Calling this before `initialize` or after `dispose` is
    /// misuse and is reported, not ignored.
    pub fn broadcast_routing_table(&mut self) -> Result<(), ConfigError> {
        self.require_operational("broadcast_routing_table")?;
        if self.table.is_empty() {
            return Ok(());
        }
        let tuples: Vec<RoutingTuple> = self
            .table
            .entries()
            .iter()
            .map(|entry| RoutingTuple {
                dest_addr: entry.dest_addr,
                mask: entry.mask,
                next_hop: entry.next_hop,
            })
            .collect();
        let seqno = self.get_message_sequence_number();
        let message = MessageHeader {
            vtime: self.config.vtime,
            ttl: RM_TTL,
            seqno,
            body: MessageBody::Rm(Rm {
                routing_message_size: tuples.len() as u32,
                tuples,
            }),
        };
        let window = self.config.coalesce_window;
        self.scheduler.enqueue(&mut self.clock, message, window);
        Ok(())
    }

    /// Clock callback: dispatches a fired timer. Stale events delivered
    /// outside the operational states are ignored.
    pub fn timer_expired(&mut self, event: TimerEvent) {
        if !self.state.is_operational() {
            return;
        }
        match event {
            TimerEvent::Hello => self.hello_timer_expire(),
            TimerEvent::FlushQueue => self.flush_queue(),
        }
    }

    // endregion

    /// snapshot of the table in insertion order
    pub fn get_routing_table_entries(&self) -> Vec<RoutingTableEntry> {
        self.table.entries()
    }

    /// logs the whole table at debug level
    pub fn dump(&self) {
        debug!("node {} routing table, {} entries", self.node_id, self.table.len());
        for entry in self.table.entries() {
            debug!(
                "  {} mask {} via {} dev {}",
                entry.dest_addr, entry.mask, entry.next_hop, entry.interface
            );
        }
    }
}
