//! sdn is an I/O free proactive routing protocol core for vehicular
//! ad-hoc networks.
//!
//! Nodes broadcast periodic hello self-descriptions and receive pushed
//! routing-table messages; each node keeps a prefix table answering the
//! host stack's forwarding queries. The crate does no I/O and keeps no
//! threads: sockets, timers and addressing are collaborator traits in
//! [`framework`], so the same core runs under a discrete-event simulator
//! or a real network stack.

pub mod concepts;
pub mod feedback;
pub mod framework;
pub mod router;
pub mod scheduler;
pub mod util;
