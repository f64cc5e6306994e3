use crate::framework::RoutingSystem;
use std::net::Ipv4Addr;

/// One bound broadcast socket and the interface address it serves.
///
/// Sockets are 1:1 with interface addresses and never shared; the router
/// owns the full set and closes them on interface-down and on disposal.
pub struct Interface<T: RoutingSystem + ?Sized> {
    pub index: u32,
    pub address: Ipv4Addr,
    pub socket: T::Socket,
}
