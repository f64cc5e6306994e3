use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::concepts::message::{MessageHeader, Vector3};
use crate::concepts::packet::PacketHeader;

/// The host-facing type hub. A host (simulator or real stack) picks the
/// concrete sockets, timer handles and collaborator implementations; the
/// router drives everything through these types and never does I/O itself.
pub trait RoutingSystem {
    /// A bound per-interface broadcast socket
    type Socket;
    /// Opaque handle to a scheduled timer, kept only for cancellation
    type TimerHandle;
    /// Sends and receives frames on behalf of the router
    type Transport: Transport<Self>;
    /// Schedules timer events back into the router
    type Clock: Clock<Self>;
    /// The host IPv4 stack: interfaces, addresses, locality
    type Ipv4Layer: Ipv4Layer;
    /// Live position/velocity feeding hello construction
    type Mobility: Mobility;
    /// Diagnostic taps; use `()` when no tracing is wanted
    type Trace: TraceSink;
}

/// Identifies which router timer fired. The host clock stores the token at
/// `schedule_after` and hands it back through `Router::timer_expired`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerEvent {
    /// the periodic hello timer
    Hello,
    /// the coalescing flush timer for queued messages
    FlushQueue,
}

pub trait Transport<T: RoutingSystem + ?Sized> {
    /// Binds a broadcast-capable socket to `local` on `interface`.
    fn open(&mut self, interface: u32, local: Ipv4Addr, port: u16) -> io::Result<T::Socket>;
    /// Sends one encoded frame; `dest` is a subnet broadcast address.
    /// Delivery is best effort, the protocol tolerates loss.
    fn send_to(&mut self, socket: &mut T::Socket, frame: &[u8], dest: Ipv4Addr, port: u16);
    fn close(&mut self, socket: T::Socket);
}

pub trait Clock<T: RoutingSystem + ?Sized> {
    /// Schedules `event` to be delivered back to the router after `delay`.
    /// Events scheduled for the same instant fire in scheduling order.
    fn schedule_after(&mut self, delay: Duration, event: TimerEvent) -> T::TimerHandle;
    /// Cancels a pending timer. Cancelling an already-expired handle is a
    /// no-op; after `cancel` returns the event must not be delivered.
    fn cancel(&mut self, timer: T::TimerHandle);
}

pub trait Ipv4Layer {
    fn interface_count(&self) -> u32;
    /// The unicast address assigned to `interface`, if any.
    fn interface_address(&self, interface: u32) -> Option<Ipv4Addr>;
    /// The subnet broadcast address of `interface`, if any.
    fn broadcast_address(&self, interface: u32) -> Option<Ipv4Addr>;
    /// Whether `addr` is one of the host's own addresses.
    fn is_local_address(&self, addr: Ipv4Addr) -> bool;
}

pub trait Mobility {
    fn position(&self) -> Vector3;
    fn velocity(&self) -> Vector3;
}

/// Diagnostic taps fired on protocol activity. Purely observational; the
/// protocol behaves identically with every method left as the default
/// no-op.
pub trait TraceSink {
    fn packet_rx(&mut self, _header: &PacketHeader, _messages: &[MessageHeader]) {}
    fn packet_tx(&mut self, _header: &PacketHeader, _messages: &[MessageHeader]) {}
    fn table_changed(&mut self, _len: usize) {}
}

impl TraceSink for () {}

/// Protocol parameters
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProtocolConfig {
    /// period of the hello self-description broadcast
    pub hello_interval: Duration,
    /// cadence at which a host floods the local table; the router itself
    /// never arms a timer for this
    pub rm_interval: Duration,
    /// how long queued messages wait so a burst coalesces into one packet
    pub coalesce_window: Duration,
    /// upper bound on an emitted frame; oversized batches are split
    pub max_packet_size: usize,
    /// UDP port the protocol speaks on
    pub port: u16,
    /// advertised validity time, transported verbatim in every message
    pub vtime: u8,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            hello_interval: Duration::from_secs(2),
            rm_interval: Duration::from_secs(5),
            coalesce_window: Duration::from_millis(100),
            max_packet_size: 1400,
            port: 65419,
            vtime: 3,
        }
    }
}
