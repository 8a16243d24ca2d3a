//! RTP header framing (§4.4.1). Bit-exact RFC 3550 layout, written and read
//! byte-by-byte rather than through compiler bit-fields, per the design note
//! that host-endianness-dependent bit-fields are not portable: see
//! `DESIGN.md` for the rationale this module follows.

use crate::error::{EngineError, Result};

/// Fixed 12-byte RTP header fields (RFC 3550 §5.1), CSRC/extension excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// RTP version; always 2 for packets this crate emits or accepts.
    pub version: u8,
    /// Padding flag: trailing padding bytes are present, the last of which
    /// gives the padding length.
    pub padding: bool,
    /// Extension flag: a profile-specific extension header follows the CSRC list.
    pub extension: bool,
    /// Number of CSRC identifiers following the fixed header.
    pub csrc_count: u8,
    /// Marker bit, profile-defined (commonly: start of talkspurt).
    pub marker: bool,
    /// Payload type, 7 bits.
    pub payload_type: u8,
    /// Sequence number, wraps modulo 2^16.
    pub sequence: u16,
    /// Media clock timestamp, wraps modulo 2^32.
    pub timestamp: u32,
    /// Synchronization source identifier.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Size in bytes of this header including its CSRC list, excluding any extension.
    pub fn header_size(&self) -> usize {
        12 + (self.csrc_count as usize * 4)
    }

    /// Parses the fixed 12-byte header (CSRC list is not validated against
    /// buffer length here; `RtpPacket::parse` does the full-packet bounds check).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(EngineError::InvalidPacket(format!(
                "header needs 12 bytes, got {}",
                data.len()
            )));
        }
        let byte0 = data[0];
        let version = (byte0 >> 6) & 0x03;
        if version != 2 {
            return Err(EngineError::InvalidPacket(format!("unsupported RTP version {version}")));
        }
        let padding = (byte0 & 0x20) != 0;
        let extension = (byte0 & 0x10) != 0;
        let csrc_count = byte0 & 0x0F;

        let byte1 = data[1];
        let marker = (byte1 & 0x80) != 0;
        let payload_type = byte1 & 0x7F;

        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        Ok(RtpHeader {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        })
    }

    /// Writes the fixed 12-byte header (no CSRC list, no extension) into `buffer`.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.len() < 12 {
            return Err(EngineError::BufferTooSmall { needed: 12, available: buffer.len() });
        }
        let byte0 = (self.version << 6)
            | if self.padding { 0x20 } else { 0 }
            | if self.extension { 0x10 } else { 0 }
            | (self.csrc_count & 0x0F);
        let byte1 = if self.marker { 0x80 } else { 0 } | (self.payload_type & 0x7F);

        buffer[0] = byte0;
        buffer[1] = byte1;
        buffer[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buffer[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        Ok(12)
    }
}

/// A parsed RTP packet: header plus a borrowed view of the payload, with no
/// copy of the payload bytes (§3 Packet ownership: "parsed into a borrowed
/// view on the receiver").
#[derive(Debug)]
pub struct RtpPacket<'a> {
    /// The fixed header, decoded.
    pub header: RtpHeader,
    /// Payload bytes, after the header/CSRC list/extension, before any padding.
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parses `data` into a header and a zero-copy payload slice. Fails on any
    /// malformed header, inconsistent CSRC count, or truncated extension/padding
    /// (§4.4.4: "do not mutate session state" on failure — the caller must not
    /// have applied any accounting before this returns `Ok`).
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = RtpHeader::parse(data)?;
        let mut offset = header.header_size();
        if offset > data.len() {
            return Err(EngineError::InvalidPacket("CSRC list exceeds packet length".into()));
        }

        if header.extension {
            if data.len() < offset + 4 {
                return Err(EngineError::InvalidPacket("truncated extension header".into()));
            }
            let ext_len_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_len_words * 4;
            if offset > data.len() {
                return Err(EngineError::InvalidPacket("extension length exceeds packet".into()));
            }
        }

        let payload_end = if header.padding {
            if data.is_empty() || data.len() == offset {
                return Err(EngineError::InvalidPacket("padding flag set but no payload".into()));
            }
            let padding_len = data[data.len() - 1] as usize;
            if padding_len == 0 || padding_len > data.len() - offset {
                return Err(EngineError::InvalidPacket("invalid padding length".into()));
            }
            data.len() - padding_len
        } else {
            data.len()
        };

        Ok(RtpPacket { header, payload: &data[offset..payload_end] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parse() {
        let data = [
            0x80, 96, 0x04, 0xD2, 0x00, 0x00, 0x16, 0x2E, 0xDE, 0xAD, 0xBE, 0xEF,
        ];
        let header = RtpHeader::parse(&data).unwrap();
        assert_eq!(header.version, 2);
        assert!(!header.padding);
        assert!(!header.extension);
        assert_eq!(header.csrc_count, 0);
        assert!(!header.marker);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.sequence, 1234);
        assert_eq!(header.timestamp, 5678);
        assert_eq!(header.ssrc, 0xDEADBEEF);
    }

    #[test]
    fn header_roundtrip() {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: true,
            payload_type: 21,
            sequence: 42,
            timestamp: 12345,
            ssrc: 0xCAFEBABE,
        };
        let mut buffer = [0u8; 12];
        header.encode(&mut buffer).unwrap();
        let parsed = RtpHeader::parse(&buffer).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_bad_version() {
        let mut data = [0u8; 12];
        data[0] = 0x00; // version 0
        assert!(matches!(RtpHeader::parse(&data), Err(EngineError::InvalidPacket(_))));
    }

    #[test]
    fn packet_roundtrip_any_payload() {
        for len in [1usize, 16, 160, 1488] {
            let payload = vec![0xABu8; len];
            let header = RtpHeader {
                version: 2,
                padding: false,
                extension: false,
                csrc_count: 0,
                marker: false,
                payload_type: 0,
                sequence: 7,
                timestamp: 1000,
                ssrc: 0x1,
            };
            let mut buf = vec![0u8; 12 + len];
            header.encode(&mut buf).unwrap();
            buf[12..].copy_from_slice(&payload);
            let parsed = RtpPacket::parse(&buf).unwrap();
            assert_eq!(parsed.header.sequence, 7);
            assert_eq!(parsed.header.timestamp, 1000);
            assert_eq!(parsed.payload, &payload[..]);
        }
    }

    #[test]
    fn truncated_header_is_invalid_packet() {
        let data = [0x80, 0, 0, 0];
        assert!(RtpPacket::parse(&data).is_err());
    }

    #[test]
    fn padding_trims_payload() {
        let header = RtpHeader {
            version: 2,
            padding: true,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 0,
            sequence: 1,
            timestamp: 0,
            ssrc: 0,
        };
        let mut buf = vec![0u8; 12];
        header.encode(&mut buf).unwrap();
        // payload "AB" (2 bytes) followed by 2 padding bytes, last byte = padding length.
        buf.extend_from_slice(&[b'A', b'B', 0x00, 0x02]);
        let parsed = RtpPacket::parse(&buf).unwrap();
        assert_eq!(parsed.payload, b"AB");
    }
}
