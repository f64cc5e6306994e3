use crate::concepts::message::MessageHeader;
use crate::feedback::DecodeError;
use bytes::{Buf, BufMut};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// fixed size of the packet header on the wire
pub const PKT_HEADER_SIZE: usize = 4;

/// The 4 byte frame header. One UDP datagram carries exactly one packet.
///
/// `length` covers the header itself plus every contained message; a frame
/// whose length field disagrees with its actual size is rejected whole.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PacketHeader {
    pub length: u16,
    pub seqno: u16,
}

impl PacketHeader {
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.length);
        buf.put_u16(self.seqno);
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < PKT_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                expected: PKT_HEADER_SIZE,
                remaining: buf.len(),
            });
        }
        Ok(PacketHeader {
            length: buf.get_u16(),
            seqno: buf.get_u16(),
        })
    }
}

/// Serializes one packet: header plus `messages` in order.
pub fn encode_packet(seqno: u16, messages: &[MessageHeader]) -> Vec<u8> {
    let length = PKT_HEADER_SIZE
        + messages
            .iter()
            .map(MessageHeader::serialized_size)
            .sum::<usize>();
    debug_assert!(length <= u16::MAX as usize);
    let mut frame = Vec::with_capacity(length);
    let header = PacketHeader {
        length: length as u16,
        seqno,
    };
    header.encode(&mut frame);
    for message in messages {
        message.encode(&mut frame);
    }
    frame
}

/// Parses one whole frame.
///
/// The length field must match the frame size exactly and the contained
/// messages must consume every byte after the header; anything else is a
/// `DecodeError` and the frame is rejected as a unit.
pub fn decode_packet(frame: &[u8]) -> Result<(PacketHeader, Vec<MessageHeader>), DecodeError> {
    let mut buf = frame;
    let header = PacketHeader::decode(&mut buf)?;
    if header.length as usize != frame.len() {
        return Err(DecodeError::PacketLengthMismatch {
            declared: header.length,
            actual: frame.len(),
        });
    }
    let mut messages = Vec::new();
    while !buf.is_empty() {
        messages.push(MessageHeader::decode(&mut buf)?);
    }
    Ok((header, messages))
}
