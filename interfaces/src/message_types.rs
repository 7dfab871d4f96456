//! Message Types for the Fronthaul Transport
//!
//! Raw packet layout exchanged with the radio side. Each packet carries
//! one symbol of one antenna:
//!
//! ```text
//! | frame_id: u32 | symbol_id: u16 | ant_id: u16 | payload_len: u32 | payload |
//! ```
//!
//! All header fields are little endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use common::{DimId, FrameId, SymbolId, Tag};

use crate::InterfaceError;

/// Encoded header length in bytes
pub const PACKET_HEADER_LEN: usize = 12;

/// Fronthaul packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Frame the samples belong to
    pub frame_id: FrameId,
    /// Symbol within the frame
    pub symbol_id: SymbolId,
    /// Base-station antenna
    pub ant_id: DimId,
    /// Payload length in bytes
    pub payload_len: u32,
}

impl PacketHeader {
    /// Create a new header
    pub fn new(frame_id: FrameId, symbol_id: SymbolId, ant_id: DimId, payload_len: u32) -> Self {
        Self { frame_id, symbol_id, ant_id, payload_len }
    }

    /// Antenna tag naming this packet
    pub fn tag(&self) -> Tag {
        Tag::frm_sym_ant(self.frame_id, self.symbol_id, self.ant_id)
    }

    /// Append the encoded header to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.frame_id);
        buf.put_u16_le(self.symbol_id);
        buf.put_u16_le(self.ant_id);
        buf.put_u32_le(self.payload_len);
    }

    /// Decode a header from the front of `buf`
    pub fn decode(buf: &mut impl Buf) -> Result<Self, InterfaceError> {
        if buf.remaining() < PACKET_HEADER_LEN {
            return Err(InterfaceError::Truncated {
                expected: PACKET_HEADER_LEN,
                actual: buf.remaining(),
            });
        }
        Ok(Self {
            frame_id: buf.get_u32_le(),
            symbol_id: buf.get_u16_le(),
            ant_id: buf.get_u16_le(),
            payload_len: buf.get_u32_le(),
        })
    }
}

/// A complete fronthaul packet
#[derive(Debug, Clone)]
pub struct RawPacket {
    /// Parsed header
    pub header: PacketHeader,
    /// Sample payload
    pub payload: Bytes,
}

impl RawPacket {
    /// Serialize header and payload into one buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse a buffer produced by [`RawPacket::to_bytes`]
    pub fn parse(mut data: Bytes) -> Result<Self, InterfaceError> {
        let header = PacketHeader::decode(&mut data)?;
        let expected = header.payload_len as usize;
        if data.len() != expected {
            return Err(InterfaceError::Truncated {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { header, payload: data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_parse() {
        let packet = RawPacket {
            header: PacketHeader::new(70_000, 5, 3, 4),
            payload: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_LEN + 4);
        assert_eq!(&bytes[..4], &70_000u32.to_le_bytes());

        let parsed = RawPacket::parse(bytes).unwrap();
        assert_eq!(parsed.header, packet.header);
        assert_eq!(parsed.header.tag().decode(), (70_000, 5, 3));
        assert_eq!(&parsed.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_truncated_packets() {
        let short = Bytes::from_static(&[0u8; 6]);
        assert!(matches!(
            RawPacket::parse(short),
            Err(InterfaceError::Truncated { expected: 12, actual: 6 })
        ));

        let mut buf = BytesMut::new();
        PacketHeader::new(1, 1, 1, 8).encode(&mut buf);
        buf.put_slice(&[0u8; 3]);
        assert!(matches!(
            RawPacket::parse(buf.freeze()),
            Err(InterfaceError::Truncated { expected: 8, actual: 3 })
        ));
    }
}
