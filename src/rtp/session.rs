//! Per-SSRC RTP session state (§3, §4.4.2): send-side packet framing and
//! counters, receive-side cycle-aware sequence accounting, RFC 3550 jitter
//! estimation, and SR/RR/BYE generation tied to that state.
//!
//! One `RtpSession` is exclusively owned by one `Pipeline` (§3
//! "Relationships"). Counters are behind a single `parking_lot::Mutex`
//! (§5 "Shared-resource policy": RTP session counters, single mutex),
//! matching the teacher's preference for `parking_lot` over `std::sync`.

use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::rtp::header::{RtpHeader, RtpPacket};
use crate::rtp::rtcp::{ByeReason, Bye, ReceiverReport, ReceptionReport, RtcpPacket, Sdes, SenderReport};

/// Sequence-gap thresholds from RFC 3550 Appendix A.1.
const MAX_DROPOUT: i32 = 3000;
const MAX_MISORDER: i32 = 100;

/// Immutable per-session configuration.
#[derive(Debug, Clone)]
pub struct RtpSessionConfig {
    /// Our SSRC. Chosen randomly at session creation if not pinned by the caller.
    pub ssrc: u32,
    /// Static or negotiated RTP payload type we send with.
    pub payload_type: u8,
    /// Media clock rate in Hz (e.g. 8000 for G.711, 48000 for Opus).
    pub clock_rate: u32,
    /// Starting send sequence number. Randomized by `Default` for anti-spoofing,
    /// as RFC 3550 recommends, but pinned here for deterministic tests.
    pub initial_sequence: u16,
    /// Starting send timestamp. Randomized by `Default`.
    pub initial_timestamp: u32,
}

impl RtpSessionConfig {
    /// Builds a config with a random SSRC/sequence/timestamp, per RFC 3550 §5.1's
    /// recommendation that these be unpredictable. Grounded on the teacher's own
    /// `rand::random()` SSRC seeding (kept over the teacher's `SystemTime` XOR
    /// fallback; see `DESIGN.md`).
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        Self {
            ssrc: rand::random(),
            payload_type,
            clock_rate,
            initial_sequence: rand::random(),
            initial_timestamp: rand::random(),
        }
    }

    /// Validates field ranges the session's invariants depend on.
    pub fn validate(&self) -> Result<()> {
        if self.payload_type > 127 {
            return Err(EngineError::InvalidParam(format!(
                "payload_type {} exceeds 7-bit range",
                self.payload_type
            )));
        }
        if self.clock_rate == 0 {
            return Err(EngineError::InvalidParam("clock_rate must be nonzero".into()));
        }
        Ok(())
    }
}

/// Outcome of `RtpSession::receive_packet`'s sequence-gap classification,
/// per §4.4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePacketOutcome {
    /// Accepted in normal sequence.
    InOrder,
    /// Accepted, but arrived out of order within the acceptable window.
    Reordered,
    /// A large forward jump; treated as a probationary restart, not yet applied.
    ProbationRestart,
    /// Too old relative to `max_seq`; discarded without touching state.
    TooOld,
}

/// Mutable send/receive counters for one SSRC, guarded by one mutex.
#[derive(Debug, Default)]
struct SessionState {
    // --- send side ---
    next_sequence: u16,
    next_timestamp_base: u32,
    packets_sent: u64,
    bytes_sent: u64,

    // --- receive side (RFC 3550 §A.1) ---
    receive_started: bool,
    base_seq: u16,
    max_seq: u16,
    cycles: u32,
    bad_seq: u32,
    packets_received: u64,
    bytes_received: u64,
    packets_reordered: u64,
    packets_duplicate: u64,
    remote_ssrc: Option<u32>,

    // jitter (RFC 3550 §6.4.1), in RTP clock units, Q4 fixed point as specified.
    jitter_q4: u32,
    last_transit: Option<i64>,

    // RTCP round-trip bookkeeping.
    last_sr_mid32: u32,
    last_sr_arrival_ms: u64,
    rtt_ms: Option<u32>,
}

/// Snapshot of session counters for `_get_stats` (§4.6 "Statistics exposed"
/// analog, but for the RTP layer specifically).
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpSessionStats {
    /// Packets sent on this SSRC.
    pub packets_sent: u64,
    /// Payload bytes sent on this SSRC.
    pub bytes_sent: u64,
    /// Packets accepted from the remote SSRC.
    pub packets_received: u64,
    /// Payload bytes accepted from the remote SSRC.
    pub bytes_received: u64,
    /// Packets accepted out of order but within the misorder window.
    pub packets_reordered: u64,
    /// Packets rejected as exact sequence-number duplicates.
    pub packets_duplicate: u64,
    /// `expected = extended_max - base_seq + 1` (I3's left-hand term).
    pub expected: u64,
    /// `max(0, expected - packets_received)`.
    pub lost: u64,
    /// `lost / expected`, 0 if nothing expected yet.
    pub fraction_lost: f32,
    /// RFC 3550 §6.4.1 jitter estimate, RTP clock units.
    pub jitter: u32,
    /// Last RTT computed from a peer's RR LSR/DLSR echo, if any.
    pub rtt_ms: Option<u32>,
}

/// Per-SSRC RTP/RTCP session: send-side framing, receive-side accounting, and
/// SR/RR/BYE construction (§4.4).
pub struct RtpSession {
    config: RtpSessionConfig,
    state: Mutex<SessionState>,
}

impl RtpSession {
    /// Creates a session from validated config. Fails on out-of-range fields
    /// rather than clamping them silently (§7 `InvalidParam`).
    pub fn new(config: RtpSessionConfig) -> Result<Self> {
        config.validate()?;
        let state = SessionState {
            next_sequence: config.initial_sequence,
            next_timestamp_base: config.initial_timestamp,
            bad_seq: (1u32 << 16) + 1,
            ..Default::default()
        };
        Ok(Self { config, state: Mutex::new(state) })
    }

    /// This session's own SSRC.
    pub fn local_ssrc(&self) -> u32 {
        self.config.ssrc
    }

    /// The remote SSRC observed so far, if any packet has been received.
    pub fn remote_ssrc(&self) -> Option<u32> {
        self.state.lock().remote_ssrc
    }

    // ---------------------------------------------------------------
    // Send side (§4.4.1)
    // ---------------------------------------------------------------

    /// Builds one RTP packet carrying `payload` at `timestamp`, advancing the
    /// send sequence number (mod 2^16, I6). Returns the number of bytes
    /// written into `buffer`.
    pub fn create_packet(&self, payload: &[u8], timestamp: u32, marker: bool, buffer: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type: self.config.payload_type,
            sequence: state.next_sequence,
            timestamp,
            ssrc: self.config.ssrc,
        };
        let total = 12 + payload.len();
        if buffer.len() < total {
            return Err(EngineError::BufferTooSmall { needed: total, available: buffer.len() });
        }
        header.encode(&mut buffer[..12])?;
        buffer[12..total].copy_from_slice(payload);

        state.next_sequence = state.next_sequence.wrapping_add(1);
        state.packets_sent += 1;
        state.bytes_sent += payload.len() as u64;
        Ok(total)
    }

    // ---------------------------------------------------------------
    // Receive side (§4.4.2, RFC 3550 §A.1/§A.8)
    // ---------------------------------------------------------------

    /// Validates and accounts for one received RTP packet. `arrival_rtp_units`
    /// is the local arrival time expressed in this session's RTP clock
    /// (`local_time_ms * clock_rate / 1000`, §4.4.2).
    ///
    /// On a changed remote SSRC mid-call (§9 open question), this
    /// implementation accepts the new SSRC and resets receive-side
    /// accounting, matching the common "new talker" interpretation: a
    /// pipeline that wants to reject the switch should compare `remote_ssrc()`
    /// before calling this and drop the packet itself.
    pub fn receive_packet<'a>(
        &self,
        packet: &RtpPacket<'a>,
        arrival_rtp_units: i64,
    ) -> ReceivePacketOutcome {
        let mut state = self.state.lock();
        let seq = packet.header.sequence;
        let ts = packet.header.timestamp;
        let ssrc = packet.header.ssrc;

        if state.remote_ssrc != Some(ssrc) {
            *state = SessionState {
                next_sequence: state.next_sequence,
                next_timestamp_base: state.next_timestamp_base,
                packets_sent: state.packets_sent,
                bytes_sent: state.bytes_sent,
                bad_seq: (1u32 << 16) + 1,
                remote_ssrc: Some(ssrc),
                ..Default::default()
            };
        }

        if !state.receive_started {
            state.receive_started = true;
            state.base_seq = seq;
            state.max_seq = seq;
            state.cycles = 0;
            state.packets_received = 1;
            state.bytes_received = packet.payload.len() as u64;
            state.last_transit = Some(arrival_rtp_units - ts as i64);
            return ReceivePacketOutcome::InOrder;
        }

        let delta = seq.wrapping_sub(state.max_seq) as i16 as i32;

        let outcome = if delta > MAX_DROPOUT {
            state.bad_seq = seq as u32 + 1;
            ReceivePacketOutcome::ProbationRestart
        } else if delta >= 0 {
            if seq < state.max_seq {
                state.cycles = state.cycles.wrapping_add(1 << 16);
            }
            state.max_seq = seq;
            ReceivePacketOutcome::InOrder
        } else if delta < -(MAX_MISORDER) {
            return ReceivePacketOutcome::TooOld;
        } else {
            ReceivePacketOutcome::Reordered
        };

        match outcome {
            ReceivePacketOutcome::InOrder => {}
            ReceivePacketOutcome::Reordered => state.packets_reordered += 1,
            ReceivePacketOutcome::ProbationRestart => {
                state.packets_received += 1;
                state.bytes_received += packet.payload.len() as u64;
                return outcome;
            }
            ReceivePacketOutcome::TooOld => unreachable!(),
        }

        state.packets_received += 1;
        state.bytes_received += packet.payload.len() as u64;

        let transit = arrival_rtp_units - ts as i64;
        if let Some(last_transit) = state.last_transit {
            let d = (transit - last_transit).unsigned_abs() as i64;
            let delta_j = d as i64 - state.jitter_q4 as i64;
            state.jitter_q4 = (state.jitter_q4 as i64 + delta_j / 16).max(0) as u32;
        }
        state.last_transit = Some(transit);

        outcome
    }

    /// A snapshot of every counter, suitable for `_get_stats`.
    pub fn stats(&self) -> RtpSessionStats {
        let state = self.state.lock();
        let expected = Self::expected_locked(&state);
        let lost = expected.saturating_sub(state.packets_received);
        let fraction_lost = if expected > 0 { lost as f32 / expected as f32 } else { 0.0 };
        RtpSessionStats {
            packets_sent: state.packets_sent,
            bytes_sent: state.bytes_sent,
            packets_received: state.packets_received,
            bytes_received: state.bytes_received,
            packets_reordered: state.packets_reordered,
            packets_duplicate: state.packets_duplicate,
            expected,
            lost,
            fraction_lost,
            jitter: state.jitter_q4,
            rtt_ms: state.rtt_ms,
        }
    }

    fn expected_locked(state: &SessionState) -> u64 {
        if !state.receive_started {
            return 0;
        }
        let extended_max = state.cycles as u64 + state.max_seq as u64;
        (extended_max + 1).saturating_sub(state.base_seq as u64)
    }

    // ---------------------------------------------------------------
    // RTCP (§4.4.3)
    // ---------------------------------------------------------------

    /// Builds a Sender Report at `ntp_sec`/`ntp_frac` (caller-supplied wall
    /// clock, since the session itself has no notion of real time), carrying
    /// a reception report for the remote source if one has been seen.
    /// `now_ms` is the local monotonic time used to compute DLSR for the
    /// attached reception report, same clock as `record_sr_received`.
    pub fn build_sender_report(&self, ntp_sec: u32, ntp_frac: u32, rtp_timestamp: u32, now_ms: u64) -> SenderReport {
        let state = self.state.lock();
        let report = state
            .remote_ssrc
            .map(|remote_ssrc| self.reception_report_locked(&state, remote_ssrc, now_ms));
        SenderReport {
            ssrc: self.config.ssrc,
            ntp_sec,
            ntp_frac,
            rtp_timestamp,
            packets_sent: state.packets_sent as u32,
            bytes_sent: state.bytes_sent as u32,
            report,
        }
    }

    /// Builds a Receiver Report describing the remote source, or `None` if no
    /// packet has been received yet (nothing to report). `now_ms` is the
    /// local monotonic time used to compute DLSR.
    pub fn build_receiver_report(&self, now_ms: u64) -> Option<ReceiverReport> {
        let state = self.state.lock();
        let remote_ssrc = state.remote_ssrc?;
        Some(ReceiverReport {
            reporter_ssrc: self.config.ssrc,
            report: self.reception_report_locked(&state, remote_ssrc, now_ms),
        })
    }

    fn reception_report_locked(&self, state: &SessionState, remote_ssrc: u32, now_ms: u64) -> ReceptionReport {
        let expected = Self::expected_locked(state);
        let lost = expected.saturating_sub(state.packets_received);
        let fraction_lost = if expected > 0 { ((lost as f64 / expected as f64) * 256.0) as u8 } else { 0 };
        let cumulative_lost = lost.min(0x007F_FFFF) as i32;
        let extended_max_seq = state.cycles.wrapping_add(state.max_seq as u32);
        let delay_since_last_sr = if state.last_sr_mid32 == 0 {
            0
        } else {
            let elapsed_ms = now_ms.saturating_sub(state.last_sr_arrival_ms);
            ((elapsed_ms * 65536) / 1000) as u32
        };
        ReceptionReport {
            ssrc: remote_ssrc,
            fraction_lost,
            cumulative_lost,
            extended_max_seq,
            jitter: state.jitter_q4,
            last_sr: state.last_sr_mid32,
            delay_since_last_sr,
        }
    }

    /// Records that we parsed a peer's SR at `now_ms` local time, so a
    /// subsequent RR we emit carries the correct LSR/DLSR.
    pub fn record_sr_received(&self, sr: &SenderReport, now_ms: u64) {
        let mut state = self.state.lock();
        state.last_sr_mid32 = SenderReport::mid32(sr.ntp_sec, sr.ntp_frac);
        state.last_sr_arrival_ms = now_ms;
    }

    /// Processes an incoming RTCP packet. For an RR that echoes our own LSR,
    /// computes and records RTT (§4.4.3 "RTT from RR"); for an SR, records
    /// LSR/DLSR bookkeeping for our next RR; BYE is reported to the caller to
    /// act on (e.g. tear down the session).
    pub fn handle_rtcp(&self, packet: &RtcpPacket, now_ntp_mid32: u32, now_ms: u64) {
        match packet {
            RtcpPacket::SenderReport(sr) => {
                if Some(sr.ssrc) == self.remote_ssrc() {
                    self.record_sr_received(sr, now_ms);
                }
            }
            RtcpPacket::ReceiverReport(rr) => {
                if rr.report.ssrc == self.config.ssrc && rr.report.last_sr != 0 {
                    let rtt_ntp = now_ntp_mid32
                        .wrapping_sub(rr.report.last_sr)
                        .wrapping_sub(rr.report.delay_since_last_sr);
                    let rtt_ms = ((rtt_ntp as u64) * 1000) >> 16;
                    self.state.lock().rtt_ms = Some(rtt_ms as u32);
                }
            }
            RtcpPacket::Bye(_) => {}
        }
    }

    /// Builds a BYE for clean shutdown (§6 "RTCP cadence": BYE emitted on
    /// clean shutdown).
    pub fn build_bye(&self, reason: ByeReason) -> Bye {
        Bye { ssrcs: vec![self.config.ssrc], reason }
    }

    /// Builds the SDES this session emits alongside every SR/RR (§9: emitted
    /// unlike the reference, since a CNAME costs little and disambiguates
    /// sources in real deployments). `cname` is caller-supplied since the
    /// session has no notion of hostname/username identity.
    pub fn build_sdes(&self, cname: &str) -> Sdes {
        Sdes { ssrc: self.config.ssrc, cname: cname.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::header::RtpHeader;

    fn session() -> RtpSession {
        RtpSession::new(RtpSessionConfig {
            ssrc: 1,
            payload_type: 0,
            clock_rate: 8000,
            initial_sequence: 1000,
            initial_timestamp: 0,
        })
        .unwrap()
    }

    fn packet<'a>(buf: &'a mut [u8], ssrc: u32, seq: u16, ts: u32) -> RtpPacket<'a> {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 0,
            sequence: seq,
            timestamp: ts,
            ssrc,
        };
        header.encode(&mut buf[..12]).unwrap();
        RtpPacket { header, payload: &buf[12..] }
    }

    #[test]
    fn p1_send_sequence_monotone_mod_2_16() {
        let s = session();
        let mut buf = [0u8; 64];
        let mut seqs = Vec::new();
        for i in 0..10u32 {
            s.create_packet(&[0u8; 4], i * 160, false, &mut buf).unwrap();
            seqs.push(u16::from_be_bytes([buf[2], buf[3]]));
        }
        for w in seqs.windows(2) {
            assert_eq!(w[1], w[0].wrapping_add(1));
        }
    }

    #[test]
    fn p2_send_timestamp_advances_by_frame_size() {
        let s = session();
        let mut buf = [0u8; 64];
        let frame = 160u32;
        for i in 0..5u32 {
            s.create_packet(&[0u8; 4], i * frame, false, &mut buf).unwrap();
            assert_eq!(u32::from_be_bytes(buf[4..8].try_into().unwrap()), i * frame);
        }
    }

    #[test]
    fn receive_accounting_first_packet() {
        let s = session();
        let mut buf = [0u8; 20];
        let p = packet(&mut buf, 99, 500, 8000);
        let outcome = s.receive_packet(&p, 8000);
        assert_eq!(outcome, ReceivePacketOutcome::InOrder);
        let stats = s.stats();
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.lost, 0);
    }

    #[test]
    fn s3_reorder_within_window() {
        let s = session();
        let order = [1u16, 3, 2, 5, 4];
        for (i, &seq) in order.iter().enumerate() {
            let mut buf = [0u8; 20];
            let p = packet(&mut buf, 1, seq, seq as u32 * 160);
            let outcome = s.receive_packet(&p, i as i64 * 160);
            if i == 0 {
                assert_eq!(outcome, ReceivePacketOutcome::InOrder);
            }
        }
        let stats = s.stats();
        assert_eq!(stats.packets_reordered, 2);
        assert_eq!(stats.lost, 0);
    }

    #[test]
    fn sequence_wrap_counts_one_cycle() {
        let s = session();
        let mut buf = [0u8; 20];
        let p1 = packet(&mut buf, 1, 65535, 0);
        s.receive_packet(&p1, 0);
        let mut buf2 = [0u8; 20];
        let p2 = packet(&mut buf2, 1, 0, 160);
        s.receive_packet(&p2, 160);
        let stats = s.stats();
        // extended_max = cycles + max_seq = 65536 + 0; expected = 65536 - 65535 + 1 = 2
        assert_eq!(stats.expected, 2);
        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.lost, 0);
    }

    #[test]
    fn large_forward_jump_is_probation_restart() {
        let s = session();
        let mut buf = [0u8; 20];
        let p1 = packet(&mut buf, 1, 10, 0);
        s.receive_packet(&p1, 0);
        let mut buf2 = [0u8; 20];
        let p2 = packet(&mut buf2, 1, 10 + MAX_DROPOUT as u16 + 5, 160);
        let outcome = s.receive_packet(&p2, 160);
        assert_eq!(outcome, ReceivePacketOutcome::ProbationRestart);
    }

    #[test]
    fn too_old_packet_is_discarded() {
        let s = session();
        let mut buf = [0u8; 20];
        let p1 = packet(&mut buf, 1, 1000, 0);
        s.receive_packet(&p1, 0);
        let mut buf2 = [0u8; 20];
        let p2 = packet(&mut buf2, 1, 1000 - MAX_MISORDER as u16 - 1, 0);
        let outcome = s.receive_packet(&p2, 0);
        assert_eq!(outcome, ReceivePacketOutcome::TooOld);
    }

    #[test]
    fn remote_ssrc_change_resets_receive_accounting() {
        let s = session();
        let mut buf = [0u8; 20];
        s.receive_packet(&packet(&mut buf, 1, 100, 0), 0);
        assert_eq!(s.remote_ssrc(), Some(1));
        let mut buf2 = [0u8; 20];
        let outcome = s.receive_packet(&packet(&mut buf2, 2, 5, 0), 0);
        assert_eq!(outcome, ReceivePacketOutcome::InOrder);
        assert_eq!(s.remote_ssrc(), Some(2));
        assert_eq!(s.stats().packets_received, 1);
    }

    #[test]
    fn bye_carries_local_ssrc() {
        let s = session();
        let bye = s.build_bye(Some("done".into()));
        assert_eq!(bye.ssrcs, vec![s.local_ssrc()]);
    }
}
