use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Failures while decoding a received frame.
///
/// These are recoverable: the router logs the error, drops the frame and
/// keeps running. Arbitrary input must never panic the decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("truncated input: needed {expected} byte(s), {remaining} left")]
    Truncated { expected: usize, remaining: usize },
    /// Only HELLO (1) and RM (2) tags exist on the wire.
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("packet length field says {declared} but frame is {actual} byte(s)")]
    PacketLengthMismatch { declared: u16, actual: usize },
    /// The message size field must cover at least the 8 byte envelope.
    #[error("bad message size field: {declared}")]
    BadMessageSize { declared: u16 },
    #[error("hello body must be 28 byte(s), got {got}")]
    BadHelloSize { got: usize },
    /// An RM body is a 4 byte count followed by whole 12 byte tuples.
    #[error("bad rm body length: {got}")]
    BadRmSize { got: usize },
}

/// Fatal setup misuse, reported synchronously from the offending call.
///
/// The protocol does not attempt to keep running past any of these.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("interface {interface} has no address assigned")]
    NoInterfaceAddress { interface: u32 },
    /// `set_main_interface` must run before `initialize`.
    #[error("no main address selected")]
    NoMainAddress,
    #[error("cannot {operation}: protocol is not initialized")]
    NotInitialized { operation: &'static str },
    /// Disposal is terminal; a disposed router cannot be re-armed.
    #[error("cannot {operation}: protocol is disposed")]
    Disposed { operation: &'static str },
    #[error("could not open socket on interface {interface}")]
    Socket {
        interface: u32,
        #[source]
        source: io::Error,
    },
}

/// Outcomes of a forwarding query.
///
/// `Unreachable` is the normal miss result of a lookup, not a protocol
/// failure; callers decide whether to queue, drop or report upward.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route to {0}")]
    Unreachable(Ipv4Addr),
    #[error("routing table does not exist yet")]
    NotInitialized,
}
