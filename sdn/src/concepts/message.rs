use crate::feedback::DecodeError;
use bytes::{Buf, BufMut};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::net::Ipv4Addr;

/// fixed size of the message envelope on the wire
pub const MSG_HEADER_SIZE: usize = 8;
/// fixed size of a hello body on the wire
pub const HELLO_BODY_SIZE: usize = 28;
/// an rm body starts with a 4 byte tuple count
pub const RM_BODY_MIN_SIZE: usize = 4;
/// each advertised tuple is 3 addresses
pub const RM_TUPLE_SIZE: usize = 12;

/// wire tag of a hello message
pub const MSG_TYPE_HELLO: u8 = 1;
/// wire tag of a routing message
pub const MSG_TYPE_RM: u8 = 2;

/// An IEEE-754 single carried as its raw 32-bit pattern.
///
/// The wire transports the bit pattern, never a converted value, so NaN
/// payloads and negative zero survive a round trip. Holding the raw word
/// keeps equality and hashing well-defined.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FloatWord(u32);

impl FloatWord {
    pub fn from_f32(value: f32) -> Self {
        FloatWord(value.to_bits())
    }
    pub fn to_f32(self) -> f32 {
        f32::from_bits(self.0)
    }
    pub fn from_bits(bits: u32) -> Self {
        FloatWord(bits)
    }
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Debug for FloatWord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.to_f32())
    }
}

/// a three-component vector of transported floats
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vector3 {
    pub x: FloatWord,
    pub y: FloatWord,
    pub z: FloatWord,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 {
            x: FloatWord::from_f32(x),
            y: FloatWord::from_f32(y),
            z: FloatWord::from_f32(z),
        }
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.x.bits());
        buf.put_u32(self.y.bits());
        buf.put_u32(self.z.bits());
    }

    fn decode(buf: &mut &[u8]) -> Self {
        Vector3 {
            x: FloatWord::from_bits(buf.get_u32()),
            y: FloatWord::from_bits(buf.get_u32()),
            z: FloatWord::from_bits(buf.get_u32()),
        }
    }
}

/// Periodic self-description broadcast by every node: who it is, where it
/// is and how it moves. Exactly 28 bytes on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hello {
    pub id: u32,
    pub position: Vector3,
    pub velocity: Vector3,
}

impl Hello {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.id);
        self.position.encode(buf);
        self.velocity.encode(buf);
    }

    fn decode(mut body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() != HELLO_BODY_SIZE {
            return Err(DecodeError::BadHelloSize { got: body.len() });
        }
        Ok(Hello {
            id: body.get_u32(),
            position: Vector3::decode(&mut body),
            velocity: Vector3::decode(&mut body),
        })
    }
}

/// one advertised destination: traffic for `dest_addr`/`mask` goes to `next_hop`
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoutingTuple {
    pub dest_addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
}

impl RoutingTuple {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.dest_addr.into());
        buf.put_u32(self.mask.into());
        buf.put_u32(self.next_hop.into());
    }

    fn decode(buf: &mut &[u8]) -> Self {
        RoutingTuple {
            dest_addr: Ipv4Addr::from(buf.get_u32()),
            mask: Ipv4Addr::from(buf.get_u32()),
            next_hop: Ipv4Addr::from(buf.get_u32()),
        }
    }
}

/// A routing message: a pushed batch of destination/next-hop tuples.
///
/// `routing_message_size` travels verbatim; decode stores whatever the
/// sender wrote and does not cross-check it against the tuple count. The
/// router sets it to the tuple count when it builds one.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rm {
    pub routing_message_size: u32,
    pub tuples: Vec<RoutingTuple>,
}

impl Rm {
    fn serialized_size(&self) -> usize {
        RM_BODY_MIN_SIZE + self.tuples.len() * RM_TUPLE_SIZE
    }

    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.routing_message_size);
        for tuple in &self.tuples {
            tuple.encode(buf);
        }
    }

    fn decode(mut body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() < RM_BODY_MIN_SIZE
            || (body.len() - RM_BODY_MIN_SIZE) % RM_TUPLE_SIZE != 0
        {
            return Err(DecodeError::BadRmSize { got: body.len() });
        }
        let routing_message_size = body.get_u32();
        let mut tuples = Vec::with_capacity(body.len() / RM_TUPLE_SIZE);
        while !body.is_empty() {
            tuples.push(RoutingTuple::decode(&mut body));
        }
        Ok(Rm {
            routing_message_size,
            tuples,
        })
    }
}

/// the decoded payload of a message; the wire tag is derived from the variant
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MessageBody {
    Hello(Hello),
    Rm(Rm),
}

impl MessageBody {
    pub fn tag(&self) -> u8 {
        match self {
            MessageBody::Hello(_) => MSG_TYPE_HELLO,
            MessageBody::Rm(_) => MSG_TYPE_RM,
        }
    }

    pub fn serialized_size(&self) -> usize {
        match self {
            MessageBody::Hello(_) => HELLO_BODY_SIZE,
            MessageBody::Rm(rm) => rm.serialized_size(),
        }
    }
}

/// One protocol message: the 8 byte envelope plus its body.
///
/// Wire order is type, vtime, size, ttl, seqno, body; the size field is
/// always computed from the body on encode, never taken from the caller.
/// `vtime` and `ttl` are transported verbatim.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MessageHeader {
    pub vtime: u8,
    pub ttl: u16,
    pub seqno: u16,
    pub body: MessageBody,
}

impl MessageHeader {
    pub fn serialized_size(&self) -> usize {
        MSG_HEADER_SIZE + self.body.serialized_size()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let size = self.serialized_size();
        debug_assert!(size <= u16::MAX as usize);
        buf.put_u8(self.body.tag());
        buf.put_u8(self.vtime);
        buf.put_u16(size as u16);
        buf.put_u16(self.ttl);
        buf.put_u16(self.seqno);
        match &self.body {
            MessageBody::Hello(hello) => hello.encode(buf),
            MessageBody::Rm(rm) => rm.encode(buf),
        }
    }

    /// Decodes one message and advances `buf` past it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < MSG_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: MSG_HEADER_SIZE,
                remaining: buf.len(),
            });
        }
        let tag = buf.get_u8();
        let vtime = buf.get_u8();
        let size = buf.get_u16();
        let ttl = buf.get_u16();
        let seqno = buf.get_u16();
        if (size as usize) < MSG_HEADER_SIZE {
            return Err(DecodeError::BadMessageSize { declared: size });
        }
        let body_len = size as usize - MSG_HEADER_SIZE;
        if buf.len() < body_len {
            return Err(DecodeError::Truncated {
                expected: body_len,
                remaining: buf.len(),
            });
        }
        let rest: &[u8] = *buf;
        let (body, rest) = rest.split_at(body_len);
        *buf = rest;
        let body = match tag {
            MSG_TYPE_HELLO => MessageBody::Hello(Hello::decode(body)?),
            MSG_TYPE_RM => MessageBody::Rm(Rm::decode(body)?),
            other => return Err(DecodeError::UnknownMessageType(other)),
        };
        Ok(MessageHeader {
            vtime,
            ttl,
            seqno,
            body,
        })
    }
}
