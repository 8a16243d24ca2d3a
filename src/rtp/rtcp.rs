//! RTCP packet building and parsing (§4.4.3): Sender Report, Receiver Report,
//! and Goodbye. Written byte-by-byte like `header.rs`, not through `bytes`'s
//! `BufMut`, to keep the whole RTP/RTCP layer on one wire-encoding idiom.

use crate::error::{EngineError, Result};

/// NTP epoch (1900-01-01) offset from the Unix epoch, in seconds.
pub const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// One reception report block, shared by SR and RR (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceptionReport {
    /// SSRC of the source this block describes.
    pub ssrc: u32,
    /// Fraction of packets lost since the last report, Q8 fixed point.
    pub fraction_lost: u8,
    /// Cumulative number of packets lost over the whole session (24-bit signed).
    pub cumulative_lost: i32,
    /// Extended highest sequence number received.
    pub extended_max_seq: u32,
    /// Interarrival jitter estimate, in RTP clock units.
    pub jitter: u32,
    /// Middle 32 bits of the last SR's NTP timestamp, or 0 if none seen.
    pub last_sr: u32,
    /// Delay since the last SR, in units of 1/65536 s, or 0 if none seen.
    pub delay_since_last_sr: u32,
}

impl ReceptionReport {
    const WIRE_SIZE: usize = 24;

    fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        if buffer.len() < Self::WIRE_SIZE {
            return Err(EngineError::BufferTooSmall { needed: Self::WIRE_SIZE, available: buffer.len() });
        }
        buffer[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        buffer[4] = self.fraction_lost;
        let lost_bytes = self.cumulative_lost.to_be_bytes();
        buffer[5..8].copy_from_slice(&lost_bytes[1..4]);
        buffer[8..12].copy_from_slice(&self.extended_max_seq.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.jitter.to_be_bytes());
        buffer[16..20].copy_from_slice(&self.last_sr.to_be_bytes());
        buffer[20..24].copy_from_slice(&self.delay_since_last_sr.to_be_bytes());
        Ok(Self::WIRE_SIZE)
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::WIRE_SIZE {
            return Err(EngineError::InvalidPacket("reception report block truncated".into()));
        }
        let ssrc = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let fraction_lost = data[4];
        // 24-bit signed: sign-extend from bit 23.
        let raw = ((data[5] as u32) << 16) | ((data[6] as u32) << 8) | data[7] as u32;
        let cumulative_lost = if raw & 0x0080_0000 != 0 {
            (raw | 0xFF00_0000) as i32
        } else {
            raw as i32
        };
        let extended_max_seq = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let jitter = u32::from_be_bytes(data[12..16].try_into().unwrap());
        let last_sr = u32::from_be_bytes(data[16..20].try_into().unwrap());
        let delay_since_last_sr = u32::from_be_bytes(data[20..24].try_into().unwrap());
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            cumulative_lost,
            extended_max_seq,
            jitter,
            last_sr,
            delay_since_last_sr,
        })
    }
}

/// RTCP Sender Report (packet type 200), one reception report block (RC=1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    /// SSRC of this report's originator.
    pub ssrc: u32,
    /// NTP timestamp, seconds since 1900-01-01.
    pub ntp_sec: u32,
    /// NTP timestamp, fractional seconds as a 32-bit binary fraction.
    pub ntp_frac: u32,
    /// RTP timestamp corresponding to the NTP time above.
    pub rtp_timestamp: u32,
    /// Sender's cumulative packet count at report time.
    pub packets_sent: u32,
    /// Sender's cumulative octet (payload byte) count at report time.
    pub bytes_sent: u32,
    /// Reception report for the session's remote source, if one exists yet.
    pub report: Option<ReceptionReport>,
}

impl SenderReport {
    /// Builds the NTP `(sec, frac)` pair for `unix_sec`/`subsec_micros` per §4.4.3.
    pub fn ntp_from_unix(unix_sec: u64, subsec_micros: u32) -> (u32, u32) {
        let ntp_sec = (unix_sec + NTP_UNIX_EPOCH_OFFSET) as u32;
        let ntp_frac = (subsec_micros as f64 * 4294.967296) as u32;
        (ntp_sec, ntp_frac)
    }

    /// The middle 32 bits of a full 64-bit NTP timestamp, as used for LSR.
    pub fn mid32(ntp_sec: u32, ntp_frac: u32) -> u32 {
        ((ntp_sec as u32) << 16) | (ntp_frac >> 16)
    }

    /// Serializes this SR into `buffer`. Returns the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        let rc = if self.report.is_some() { 1u8 } else { 0u8 };
        let total = 4 + 24 + if self.report.is_some() { ReceptionReport::WIRE_SIZE } else { 0 };
        if buffer.len() < total {
            return Err(EngineError::BufferTooSmall { needed: total, available: buffer.len() });
        }
        // RFC 3550 §6.4.1: length is the packet's size in 32-bit words minus
        // one, header included. Derived from `total`, not hardcoded, so an
        // attached reception report block is framed correctly (28 bytes -> 6
        // words here, not the 7 a fixed constant would claim).
        let length_words = (total / 4 - 1) as u16;
        buffer[0] = 0x80 | rc;
        buffer[1] = 200;
        buffer[2..4].copy_from_slice(&length_words.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buffer[8..12].copy_from_slice(&self.ntp_sec.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.ntp_frac.to_be_bytes());
        buffer[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buffer[20..24].copy_from_slice(&self.packets_sent.to_be_bytes());
        buffer[24..28].copy_from_slice(&self.bytes_sent.to_be_bytes());
        if let Some(report) = &self.report {
            report.encode(&mut buffer[28..])?;
        }
        Ok(total)
    }

    fn parse(first_byte: u8, data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(EngineError::InvalidPacket("SR body truncated".into()));
        }
        let rc = first_byte & 0x1F;
        let ssrc = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let ntp_sec = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let ntp_frac = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let rtp_timestamp = u32::from_be_bytes(data[12..16].try_into().unwrap());
        let packets_sent = u32::from_be_bytes(data[16..20].try_into().unwrap());
        let bytes_sent = u32::from_be_bytes(data[20..24].try_into().unwrap());
        let report = if rc >= 1 {
            Some(ReceptionReport::parse(&data[24..])?)
        } else {
            None
        };
        Ok(SenderReport { ssrc, ntp_sec, ntp_frac, rtp_timestamp, packets_sent, bytes_sent, report })
    }
}

/// RTCP Receiver Report (packet type 201), one reception report block (RC=1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReport {
    /// SSRC of this report's originator (the receiver, not the media source).
    pub reporter_ssrc: u32,
    /// Reception report describing the remote source being listened to.
    pub report: ReceptionReport,
}

impl ReceiverReport {
    /// Serializes this RR into `buffer`. Returns the number of bytes written.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        let total = 8 + ReceptionReport::WIRE_SIZE;
        if buffer.len() < total {
            return Err(EngineError::BufferTooSmall { needed: total, available: buffer.len() });
        }
        buffer[0] = 0x80 | 1;
        buffer[1] = 201;
        buffer[2..4].copy_from_slice(&7u16.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.reporter_ssrc.to_be_bytes());
        self.report.encode(&mut buffer[8..])?;
        Ok(total)
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 + ReceptionReport::WIRE_SIZE {
            return Err(EngineError::InvalidPacket("RR body truncated".into()));
        }
        let reporter_ssrc = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let report = ReceptionReport::parse(&data[8..])?;
        Ok(ReceiverReport { reporter_ssrc, report })
    }
}

/// RTCP Source Description (packet type 202). This crate emits a single
/// chunk carrying only the mandatory `CNAME` item (§9: "a canonical CNAME is
/// cheap to produce and materially helps real deployments disambiguate
/// sources"); it does not emit or parse the optional NAME/EMAIL/... items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdes {
    /// SSRC of the source this description describes.
    pub ssrc: u32,
    /// Canonical end-point identifier (RFC 3550 §6.5.1).
    pub cname: String,
}

impl Sdes {
    const CNAME_ITEM_TYPE: u8 = 1;

    /// Serializes this SDES into `buffer`, padded to a 4-byte boundary.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        let cname_bytes = self.cname.as_bytes();
        if cname_bytes.len() > 255 {
            return Err(EngineError::InvalidParam("CNAME exceeds 255 bytes".into()));
        }
        // header(4) + ssrc(4) + item type(1) + item len(1) + text + null terminator(1)
        let chunk_len = 4 + 1 + 1 + cname_bytes.len() + 1;
        let total_unpadded = 4 + chunk_len;
        let total = (total_unpadded + 3) / 4 * 4;
        if buffer.len() < total {
            return Err(EngineError::BufferTooSmall { needed: total, available: buffer.len() });
        }
        let length_words = (total / 4 - 1) as u16;
        buffer[0] = 0x80 | 1; // SC = 1 chunk
        buffer[1] = 202;
        buffer[2..4].copy_from_slice(&length_words.to_be_bytes());
        buffer[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buffer[8] = Self::CNAME_ITEM_TYPE;
        buffer[9] = cname_bytes.len() as u8;
        buffer[10..10 + cname_bytes.len()].copy_from_slice(cname_bytes);
        let end_item = 10 + cname_bytes.len();
        buffer[end_item] = 0; // end-of-item-list marker
        for byte in &mut buffer[end_item + 1..total] {
            *byte = 0;
        }
        Ok(total)
    }

    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(EngineError::InvalidPacket("SDES chunk truncated".into()));
        }
        let ssrc = u32::from_be_bytes(data[0..4].try_into().unwrap());
        let item_type = data[4];
        if item_type != Self::CNAME_ITEM_TYPE {
            return Err(EngineError::InvalidPacket("SDES chunk missing CNAME item".into()));
        }
        let len = data[5] as usize;
        if data.len() < 6 + len {
            return Err(EngineError::InvalidPacket("SDES CNAME text truncated".into()));
        }
        let cname = String::from_utf8_lossy(&data[6..6 + len]).into_owned();
        Ok(Sdes { ssrc, cname })
    }
}

/// Reason a BYE's `reason` field gives, or the type-state of having none.
pub type ByeReason = Option<String>;

/// RTCP Goodbye (packet type 203).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bye {
    /// SSRC(s) leaving the session. This crate always emits exactly one.
    pub ssrcs: Vec<u32>,
    /// Optional human-readable reason for leaving.
    pub reason: ByeReason,
}

impl Bye {
    /// Serializes this BYE into `buffer`, padded to a 4-byte boundary.
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize> {
        let reason_bytes = self.reason.as_deref().unwrap_or("").as_bytes();
        let mut body_len = 4 * self.ssrcs.len();
        if !reason_bytes.is_empty() {
            body_len += 1 + reason_bytes.len();
        }
        let padded_body = (body_len + 3) / 4 * 4;
        let total = 4 + padded_body;
        if buffer.len() < total {
            return Err(EngineError::BufferTooSmall { needed: total, available: buffer.len() });
        }
        let length_words = (total / 4 - 1) as u16;
        buffer[0] = 0x80 | (self.ssrcs.len() as u8 & 0x1F);
        buffer[1] = 203;
        buffer[2..4].copy_from_slice(&length_words.to_be_bytes());
        let mut offset = 4;
        for ssrc in &self.ssrcs {
            buffer[offset..offset + 4].copy_from_slice(&ssrc.to_be_bytes());
            offset += 4;
        }
        if !reason_bytes.is_empty() {
            buffer[offset] = reason_bytes.len() as u8;
            offset += 1;
            buffer[offset..offset + reason_bytes.len()].copy_from_slice(reason_bytes);
            offset += reason_bytes.len();
        }
        for byte in &mut buffer[offset..total] {
            *byte = 0;
        }
        Ok(total)
    }

    fn parse(first_byte: u8, data: &[u8]) -> Result<Self> {
        let sc = (first_byte & 0x1F) as usize;
        if data.len() < sc * 4 {
            return Err(EngineError::InvalidPacket("BYE source list truncated".into()));
        }
        let mut ssrcs = Vec::with_capacity(sc);
        let mut offset = 0;
        for _ in 0..sc {
            ssrcs.push(u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }
        let reason = if data.len() > offset {
            let len = data[offset] as usize;
            offset += 1;
            if data.len() < offset + len {
                return Err(EngineError::InvalidPacket("BYE reason truncated".into()));
            }
            Some(String::from_utf8_lossy(&data[offset..offset + len]).into_owned())
        } else {
            None
        };
        Ok(Bye { ssrcs, reason })
    }
}

/// Any RTCP packet this crate can build or parse.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpPacket {
    /// RFC 3550 §6.4.1.
    SenderReport(SenderReport),
    /// RFC 3550 §6.4.2.
    ReceiverReport(ReceiverReport),
    /// RFC 3550 §6.5.
    Sdes(Sdes),
    /// RFC 3550 §6.6.
    Bye(Bye),
}

impl RtcpPacket {
    /// Parses one RTCP packet from `data`, ignoring any compound packets that
    /// may follow it (the session layer loops callers over the buffer itself).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(EngineError::InvalidPacket("RTCP header needs 4 bytes".into()));
        }
        let first_byte = data[0];
        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(EngineError::InvalidPacket(format!("unsupported RTCP version {version}")));
        }
        let packet_type = data[1];
        let body = &data[4..];
        match packet_type {
            200 => Ok(RtcpPacket::SenderReport(SenderReport::parse(first_byte, body)?)),
            201 => Ok(RtcpPacket::ReceiverReport(ReceiverReport::parse(body)?)),
            202 => Ok(RtcpPacket::Sdes(Sdes::parse(body)?)),
            203 => Ok(RtcpPacket::Bye(Bye::parse(first_byte, body)?)),
            other => Err(EngineError::InvalidPacket(format!("unsupported RTCP packet type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sr_roundtrip_no_report() {
        let sr = SenderReport {
            ssrc: 0x1122_3344,
            ntp_sec: 100,
            ntp_frac: 200,
            rtp_timestamp: 9000,
            packets_sent: 50,
            bytes_sent: 8000,
            report: None,
        };
        let mut buf = [0u8; 64];
        let len = sr.encode(&mut buf).unwrap();
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::SenderReport(parsed) => assert_eq!(parsed, sr),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sr_roundtrip_with_report() {
        let report = ReceptionReport {
            ssrc: 42,
            fraction_lost: 10,
            cumulative_lost: -5,
            extended_max_seq: 1000,
            jitter: 7,
            last_sr: 0xAABBCCDD,
            delay_since_last_sr: 13107,
        };
        let sr = SenderReport {
            ssrc: 1,
            ntp_sec: 10,
            ntp_frac: 20,
            rtp_timestamp: 100,
            packets_sent: 5,
            bytes_sent: 800,
            report: Some(report),
        };
        let mut buf = [0u8; 64];
        let len = sr.encode(&mut buf).unwrap();
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::SenderReport(parsed) => assert_eq!(parsed, sr),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rr_roundtrip_negative_cumulative_lost() {
        let rr = ReceiverReport {
            reporter_ssrc: 7,
            report: ReceptionReport {
                ssrc: 99,
                fraction_lost: 3,
                cumulative_lost: -1,
                extended_max_seq: 65600,
                jitter: 42,
                last_sr: 0,
                delay_since_last_sr: 0,
            },
        };
        let mut buf = [0u8; 32];
        let len = rr.encode(&mut buf).unwrap();
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::ReceiverReport(parsed) => assert_eq!(parsed, rr),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn bye_roundtrip_with_reason() {
        let bye = Bye { ssrcs: vec![0xDEAD_BEEF], reason: Some("bye".into()) };
        let mut buf = [0u8; 32];
        let len = bye.encode(&mut buf).unwrap();
        assert_eq!(len % 4, 0);
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::Bye(parsed) => assert_eq!(parsed, bye),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn bye_roundtrip_no_reason() {
        let bye = Bye { ssrcs: vec![1, 2], reason: None };
        let mut buf = [0u8; 32];
        let len = bye.encode(&mut buf).unwrap();
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::Bye(parsed) => assert_eq!(parsed, bye),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sdes_roundtrip_cname() {
        let sdes = Sdes { ssrc: 0x1234_5678, cname: "vocall@host".into() };
        let mut buf = [0u8; 32];
        let len = sdes.encode(&mut buf).unwrap();
        assert_eq!(len % 4, 0);
        match RtcpPacket::parse(&buf[..len]).unwrap() {
            RtcpPacket::Sdes(parsed) => assert_eq!(parsed, sdes),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rtt_from_lsr_dlsr_scenario_s6() {
        // S6: sender A emits SR at NTP T; receiver B echoes LSR=mid32(T),
        // DLSR=200ms later. A recovers rtt_ms in [180, 250].
        let (ntp_sec, ntp_frac) = SenderReport::ntp_from_unix(1_700_000_000, 0);
        let lsr = SenderReport::mid32(ntp_sec, ntp_frac);
        let dlsr = (200u64 * 65536 / 1000) as u32;

        // A's "now" is T + 200ms + a little processing delay.
        let (now_sec, now_frac) = SenderReport::ntp_from_unix(1_700_000_000, 210_000);
        let now_mid = SenderReport::mid32(now_sec, now_frac);

        let rtt_ntp = now_mid.wrapping_sub(lsr).wrapping_sub(dlsr);
        let rtt_ms = (rtt_ntp as u64 * 1000) >> 16;
        assert!((180..=250).contains(&rtt_ms), "rtt_ms = {rtt_ms}");
    }
}
