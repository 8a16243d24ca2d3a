//! Jitter buffer slot array, put/get state machine, adaptive delay control,
//! and playout-rate recommendation (§4.5.1-§4.5.5).
//!
//! The slot array is guarded by one `parking_lot::Mutex` (§5: "Jitter slot
//! array ... single mutex or equivalent"); `put` (called from `T_ctl` via
//! `receive_packet`) and `get` (called from `T_play`) both take it briefly.
//! Per-slot ownership is logical — a slot is "owned" by the buffer between a
//! `put` and the matching `get` — but the implementation itself is a single
//! lock around the whole array rather than a lock-free per-slot handoff,
//! which the spec explicitly permits (§5).

use parking_lot::Mutex;

use crate::jitter::plc::PlcAlgorithm;

/// Jitter buffer operating mode (§4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterMode {
    /// `target_delay_ms` is fixed at `initial_delay_ms` for the buffer's lifetime.
    Fixed,
    /// `target_delay_ms` tracks observed network jitter (§4.5.4).
    Adaptive,
}

/// Jitter buffer configuration (§4.5.1).
#[derive(Debug, Clone, Copy)]
pub struct JitterConfig {
    /// RTP media clock rate in Hz.
    pub clock_rate: u32,
    /// Frame period in milliseconds; drives `samples_per_frame` and the `get()` cadence.
    pub frame_duration_ms: u32,
    /// `Fixed` or `Adaptive` delay control.
    pub mode: JitterMode,
    /// Lower clamp for `current_delay_ms`/`target_delay_ms`.
    pub min_delay_ms: u32,
    /// Upper clamp for `current_delay_ms`/`target_delay_ms`.
    pub max_delay_ms: u32,
    /// Starting value for `current_delay_ms`/`target_delay_ms`.
    pub initial_delay_ms: u32,
    /// Number of slots in the circular array (`seq mod capacity`).
    pub capacity: usize,
    /// Whether a `LOST` `get()` should request PLC synthesis from the caller.
    pub enable_plc: bool,
    /// Whether `get_playout_rate()` should report anything but `1.0`.
    pub enable_time_stretch: bool,
    /// Desired steady-state occupancy, in frames, for the playout-rate controller (§4.5.5).
    pub target_buffer_level: u32,
    /// Percentile (0-100) of the jitter/delay history used by the
    /// percentile-based adaptive controller (§4.5.4).
    pub jitter_percentile: u8,
    /// Concealment algorithm used when PLC is enabled.
    pub plc_algorithm: PlcAlgorithm,
    /// Consecutive lost frames after which PLC forces pure silence (§4.5.6).
    pub max_consecutive_loss: u32,
}

impl JitterConfig {
    /// `samples_per_frame = clock_rate * frame_duration_ms / 1000` (§4.5.1).
    pub fn samples_per_frame(&self) -> u32 {
        self.clock_rate / 1000 * self.frame_duration_ms
    }

    /// Validates field ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        use crate::error::EngineError;
        if self.capacity == 0 {
            return Err(EngineError::InvalidParam("jitter buffer capacity must be nonzero".into()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(EngineError::InvalidParam("min_delay_ms exceeds max_delay_ms".into()));
        }
        if self.jitter_percentile > 100 {
            return Err(EngineError::InvalidParam("jitter_percentile must be 0-100".into()));
        }
        if self.clock_rate == 0 || self.frame_duration_ms == 0 {
            return Err(EngineError::InvalidParam("clock_rate and frame_duration_ms must be nonzero".into()));
        }
        Ok(())
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            clock_rate: 8000,
            frame_duration_ms: 20,
            mode: JitterMode::Adaptive,
            min_delay_ms: 20,
            max_delay_ms: 200,
            initial_delay_ms: 60,
            capacity: 64,
            enable_plc: true,
            enable_time_stretch: true,
            target_buffer_level: 4,
            jitter_percentile: 95,
            plc_algorithm: PlcAlgorithm::default(),
            max_consecutive_loss: 20,
        }
    }
}

/// Outcome of `JitterBuffer::put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored in its slot.
    Stored,
    /// Arrived after its playout deadline had already passed; discarded (§4.5.2).
    Late,
    /// Exact sequence-number duplicate of the packet already in that slot; discarded.
    Duplicate,
}

/// Outcome of `JitterBuffer::get` (§4.5.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetStatus {
    /// The expected packet was present; `output` holds its payload.
    Ok,
    /// The expected packet was missing; caller should run PLC if enabled.
    Lost,
}

/// One circular-array slot (§3 "Jitter Entry").
#[derive(Clone)]
struct Slot {
    payload: Vec<u8>,
    size: usize,
    timestamp: u32,
    sequence: u16,
    marker: bool,
    present: bool,
}

impl Slot {
    fn empty() -> Self {
        Self { payload: Vec::new(), size: 0, timestamp: 0, sequence: 0, marker: false, present: false }
    }
}

const HISTOGRAM_BINS: usize = 64;
const HISTOGRAM_BIN_WIDTH_MS: f32 = 2.0;
const DELAY_HISTORY_LEN: usize = 128;

struct JitterInner {
    slots: Vec<Slot>,
    first_packet_seen: bool,
    next_seq: u16,
    next_ts: u32,

    current_delay_ms: f32,
    target_delay_ms: f32,
    /// Target produced by the fixed ±10/−5 ms scheme alone (§4.5.4, §9).
    fixed_target_ms: f32,
    min_delay_observed_ms: u32,
    max_delay_observed_ms: u32,

    jitter_histogram: [u32; HISTOGRAM_BINS],
    delay_history: [f32; DELAY_HISTORY_LEN],
    delay_history_len: usize,
    delay_history_pos: usize,
    last_arrival_transit: Option<i64>,
    jitter_ms: f32,
    jitter_max_ms: f32,

    current_stretch_rate: f32,
    accelerate_count: u64,
    decelerate_count: u64,

    packets_received: u64,
    packets_output: u64,
    packets_lost: u64,
    packets_late: u64,
    packets_early: u64,
    packets_duplicate: u64,
    packets_interpolated: u64,
}

/// Statistics exposed by the jitter buffer (§4.5.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterStats {
    /// Packets accepted into a slot.
    pub packets_received: u64,
    /// Frames successfully handed to the decoder.
    pub packets_output: u64,
    /// `get()` calls whose expected packet was missing.
    pub packets_lost: u64,
    /// `put()` calls discarded for arriving after their playout deadline.
    pub packets_late: u64,
    /// Reserved for a future early-arrival policy; always 0 in this implementation
    /// (§4.5.2 defines lateness but not a distinct "early" rejection path).
    pub packets_early: u64,
    /// `put()` calls discarded as exact sequence-number duplicates.
    pub packets_duplicate: u64,
    /// `get()` calls concealed via PLC.
    pub packets_interpolated: u64,
    /// Current target delay, in milliseconds.
    pub current_delay_ms: u32,
    /// Smallest `current_delay_ms` observed.
    pub min_delay_observed_ms: u32,
    /// Largest `current_delay_ms` observed.
    pub max_delay_observed_ms: u32,
    /// `packets_lost / (packets_output + packets_lost)`.
    pub loss_rate: f32,
    /// RFC 3550-style smoothed jitter estimate, in milliseconds.
    pub jitter_ms: f32,
    /// Largest `jitter_ms` observed.
    pub jitter_max_ms: f32,
    /// Percentile (`jitter_percentile`) of the delay history, in milliseconds.
    pub jitter_percentile_ms: f32,
    /// Delay the adaptive controller is steering `current_delay_ms` toward.
    pub target_delay_ms: u32,
    /// Times the playout-rate controller recommended speeding up.
    pub accelerate_count: u64,
    /// Times the playout-rate controller recommended slowing down.
    pub decelerate_count: u64,
    /// Most recently recommended playout rate.
    pub current_stretch_rate: f32,
    /// Frames currently buffered ahead of `next_seq`.
    pub buffer_level: u32,
    /// `true` when `loss_rate` and jitter are within healthy bounds.
    pub buffer_health: bool,
}

/// Reorders, paces, and conceals a single RTP stream for playout (§4.5).
pub struct JitterBuffer {
    config: JitterConfig,
    inner: Mutex<JitterInner>,
}

impl JitterBuffer {
    /// Builds a jitter buffer from validated config.
    pub fn new(config: JitterConfig) -> Result<Self, crate::error::EngineError> {
        config.validate()?;
        let inner = JitterInner {
            slots: vec![Slot::empty(); config.capacity],
            first_packet_seen: false,
            next_seq: 0,
            next_ts: 0,
            current_delay_ms: config.initial_delay_ms as f32,
            target_delay_ms: config.initial_delay_ms as f32,
            fixed_target_ms: config.initial_delay_ms as f32,
            min_delay_observed_ms: config.initial_delay_ms,
            max_delay_observed_ms: config.initial_delay_ms,
            jitter_histogram: [0; HISTOGRAM_BINS],
            delay_history: [0.0; DELAY_HISTORY_LEN],
            delay_history_len: 0,
            delay_history_pos: 0,
            last_arrival_transit: None,
            jitter_ms: 0.0,
            jitter_max_ms: 0.0,
            current_stretch_rate: 1.0,
            accelerate_count: 0,
            decelerate_count: 0,
            packets_received: 0,
            packets_output: 0,
            packets_lost: 0,
            packets_late: 0,
            packets_early: 0,
            packets_duplicate: 0,
            packets_interpolated: 0,
        };
        Ok(Self { config, inner: Mutex::new(inner) })
    }

    fn samples_per_frame(&self) -> u32 {
        self.config.samples_per_frame()
    }

    /// Stores one arriving packet (§4.5.2). `arrival_ms` is the local clock
    /// used for the jitter histogram/delay-history update.
    pub fn put(&self, payload: &[u8], timestamp: u32, sequence: u16, marker: bool, arrival_ms: u64) -> PutOutcome {
        let mut inner = self.inner.lock();

        if !inner.first_packet_seen {
            inner.first_packet_seen = true;
            inner.next_seq = sequence;
            inner.next_ts = timestamp;
        }

        let spf = self.samples_per_frame() as i64;
        let ts_delta = (timestamp as i64).wrapping_sub(inner.next_ts as i64);
        // Reduce to the minimal signed representative, matching mod-2^32 distance.
        let ts_delta = ((ts_delta.wrapping_add(1 << 31)) & 0xFFFF_FFFF) - (1 << 31);
        if ts_delta < -2 * spf {
            inner.packets_late += 1;
            return PutOutcome::Late;
        }

        let slot_idx = (sequence as usize) % self.config.capacity;
        if inner.slots[slot_idx].present && inner.slots[slot_idx].sequence == sequence {
            inner.packets_duplicate += 1;
            return PutOutcome::Duplicate;
        }

        let slot = &mut inner.slots[slot_idx];
        slot.payload.clear();
        slot.payload.extend_from_slice(payload);
        slot.size = payload.len();
        slot.timestamp = timestamp;
        slot.sequence = sequence;
        slot.marker = marker;
        slot.present = true;

        inner.packets_received += 1;

        self.update_jitter_histogram(&mut inner, arrival_ms, timestamp);

        PutOutcome::Stored
    }

    fn update_jitter_histogram(&self, inner: &mut JitterInner, arrival_ms: u64, timestamp: u32) {
        let arrival_rtp = (arrival_ms as i64) * self.config.clock_rate as i64 / 1000;
        let transit = arrival_rtp - timestamp as i64;
        if let Some(last) = inner.last_arrival_transit {
            let d = (transit - last).unsigned_abs() as f32;
            let d_ms = d / self.config.clock_rate as f32 * 1000.0;
            inner.jitter_ms += (d_ms - inner.jitter_ms) / 16.0;
            inner.jitter_max_ms = inner.jitter_max_ms.max(inner.jitter_ms);

            let bin = ((d_ms / HISTOGRAM_BIN_WIDTH_MS) as usize).min(HISTOGRAM_BINS - 1);
            inner.jitter_histogram[bin] += 1;

            inner.delay_history[inner.delay_history_pos] = d_ms;
            inner.delay_history_pos = (inner.delay_history_pos + 1) % DELAY_HISTORY_LEN;
            inner.delay_history_len = (inner.delay_history_len + 1).min(DELAY_HISTORY_LEN);
        }
        inner.last_arrival_transit = Some(transit);
    }

    /// Retrieves the next frame in playout order (§4.5.3). Writes the payload
    /// into `output` (truncated to its length) on `GetStatus::Ok`; on
    /// `GetStatus::Lost`, `output` is left untouched and the caller is
    /// expected to run PLC if `enable_plc` is set.
    pub fn get(&self, output: &mut [u8]) -> (GetStatus, usize) {
        let mut inner = self.inner.lock();
        let spf = self.samples_per_frame();
        let slot_idx = (inner.next_seq as usize) % self.config.capacity;

        let (status, n) = if inner.slots[slot_idx].present && inner.slots[slot_idx].sequence == inner.next_seq {
            let size = inner.slots[slot_idx].size.min(output.len());
            output[..size].copy_from_slice(&inner.slots[slot_idx].payload[..size]);
            inner.slots[slot_idx].present = false;
            inner.packets_output += 1;
            (GetStatus::Ok, size)
        } else {
            inner.packets_lost += 1;
            if self.config.enable_plc {
                inner.packets_interpolated += 1;
            }
            (GetStatus::Lost, 0)
        };

        inner.next_seq = inner.next_seq.wrapping_add(1);
        inner.next_ts = inner.next_ts.wrapping_add(spf);

        self.run_adaptive_delay_control(&mut inner, status);

        (status, n)
    }

    /// Runs both halves of the dual adaptive-delay scheme and reconciles them
    /// by taking the larger target (§4.5.4, §9): the fixed ±10/−5 ms scheme
    /// reacts immediately to loss/overrun, the percentile scheme tracks the
    /// `jitter_percentile` of recent inter-arrival delay. The percentile
    /// scheme may widen `target_delay_ms` beyond what the fixed scheme would
    /// allow, but never narrows it below the fixed scheme's own target.
    fn run_adaptive_delay_control(&self, inner: &mut JitterInner, status: GetStatus) {
        if self.config.mode != JitterMode::Adaptive {
            return;
        }
        let min = self.config.min_delay_ms as f32;
        let max = self.config.max_delay_ms as f32;

        match status {
            GetStatus::Lost => {
                inner.fixed_target_ms = (inner.fixed_target_ms + 10.0).min(max);
            }
            GetStatus::Ok => {
                let occupancy = self.occupancy_locked(inner);
                if occupancy > self.config.capacity as u32 / 2 {
                    inner.fixed_target_ms = (inner.fixed_target_ms - 5.0).max(min);
                }
            }
        }

        let percentile_target_ms = if inner.delay_history_len > 0 {
            let percentile_ms = percentile(
                &inner.delay_history[..inner.delay_history_len],
                self.config.jitter_percentile,
            );
            let frame_ms = self.config.frame_duration_ms as f32;
            ((percentile_ms / frame_ms).ceil() * frame_ms).clamp(min, max)
        } else {
            min
        };

        inner.target_delay_ms = inner.fixed_target_ms.max(percentile_target_ms).clamp(min, max);
        inner.current_delay_ms = inner.target_delay_ms;

        inner.min_delay_observed_ms = inner.min_delay_observed_ms.min(inner.current_delay_ms as u32);
        inner.max_delay_observed_ms = inner.max_delay_observed_ms.max(inner.current_delay_ms as u32);
    }

    fn occupancy_locked(&self, inner: &JitterInner) -> u32 {
        inner.slots.iter().filter(|s| s.present).count() as u32
    }

    /// Playout-rate recommendation for the pipeline's time stretcher (§4.5.5).
    pub fn get_playout_rate(&self) -> f32 {
        if !self.config.enable_time_stretch {
            return 1.0;
        }
        let mut inner = self.inner.lock();
        let occupancy = self.occupancy_locked(&inner) as i32;
        let target = self.config.target_buffer_level as i32;
        const K: f32 = 0.05;

        let rate = if occupancy > target + 1 {
            inner.accelerate_count += 1;
            1.0 + K
        } else if occupancy < target - 1 {
            inner.decelerate_count += 1;
            1.0 - K
        } else {
            1.0
        };
        inner.current_stretch_rate = rate;
        rate
    }

    /// The configured samples-per-frame (`clock_rate * frame_duration_ms /
    /// 1000`), exposed so callers outside this module can size PCM buffers
    /// without duplicating the computation.
    pub fn samples_per_frame_public(&self) -> u32 {
        self.samples_per_frame()
    }

    /// Snapshot of every counter in §4.5.7.
    pub fn stats(&self) -> JitterStats {
        let inner = self.inner.lock();
        let total = inner.packets_output + inner.packets_lost;
        let loss_rate = if total > 0 { inner.packets_lost as f32 / total as f32 } else { 0.0 };
        let percentile_ms = if inner.delay_history_len > 0 {
            percentile(&inner.delay_history[..inner.delay_history_len], self.config.jitter_percentile)
        } else {
            0.0
        };
        JitterStats {
            packets_received: inner.packets_received,
            packets_output: inner.packets_output,
            packets_lost: inner.packets_lost,
            packets_late: inner.packets_late,
            packets_early: inner.packets_early,
            packets_duplicate: inner.packets_duplicate,
            packets_interpolated: inner.packets_interpolated,
            current_delay_ms: inner.current_delay_ms as u32,
            min_delay_observed_ms: inner.min_delay_observed_ms,
            max_delay_observed_ms: inner.max_delay_observed_ms,
            loss_rate,
            jitter_ms: inner.jitter_ms,
            jitter_max_ms: inner.jitter_max_ms,
            jitter_percentile_ms: percentile_ms,
            target_delay_ms: inner.target_delay_ms as u32,
            accelerate_count: inner.accelerate_count,
            decelerate_count: inner.decelerate_count,
            current_stretch_rate: inner.current_stretch_rate,
            buffer_level: self.occupancy_locked(&inner),
            buffer_health: loss_rate < 0.05 && inner.jitter_ms < self.config.frame_duration_ms as f32,
        }
    }
}

/// Nearest-rank percentile over `data`, `p` in `[0, 100]`.
fn percentile(data: &[f32], p: u8) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = ((p as f32 / 100.0) * (sorted.len() - 1) as f32).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(capacity: usize) -> JitterConfig {
        JitterConfig { capacity, ..Default::default() }
    }

    #[test]
    fn p3_get_count_matches_next_seq_advance() {
        let jb = JitterBuffer::new(cfg(16)).unwrap();
        for seq in 0u16..5 {
            jb.put(&[1, 2, 3], seq as u32 * 160, seq, false, seq as u64 * 20);
        }
        let mut out = [0u8; 16];
        let mut get_count = 0u32;
        for _ in 0..5 {
            jb.get(&mut out);
            get_count += 1;
        }
        assert_eq!(jb.stats().packets_output, get_count as u64);
    }

    #[test]
    fn s3_reorder_delivered_in_order() {
        let jb = JitterBuffer::new(cfg(16)).unwrap();
        let order = [1u16, 3, 2, 5, 4];
        for (i, &seq) in order.iter().enumerate() {
            jb.put(&[seq as u8], seq as u32 * 160, seq, false, i as u64 * 8);
        }
        // Must prime next_seq at 1 (the first put), so get() pulls 1..=5 in order.
        let mut out = [0u8; 4];
        let mut statuses = Vec::new();
        for _ in 0..5 {
            let (status, _) = jb.get(&mut out);
            statuses.push(status);
        }
        assert!(statuses.iter().all(|s| matches!(s, GetStatus::Ok)));
        assert_eq!(jb.stats().packets_lost, 0);
    }

    #[test]
    fn duplicate_sequence_is_discarded() {
        let jb = JitterBuffer::new(cfg(16)).unwrap();
        jb.put(&[1], 0, 10, false, 0);
        let outcome = jb.put(&[2], 0, 10, false, 1);
        assert_eq!(outcome, PutOutcome::Duplicate);
        assert_eq!(jb.stats().packets_duplicate, 1);
    }

    #[test]
    fn s4_late_packet_is_discarded_and_counted() {
        let jb = JitterBuffer::new(cfg(16)).unwrap();
        jb.put(&[1], 0, 0, false, 0);
        let mut out = [0u8; 4];
        // Advance next_ts forward by 3 frames.
        jb.get(&mut out);
        jb.put(&[1], 160, 1, false, 20);
        jb.get(&mut out);
        jb.put(&[1], 320, 2, false, 40);
        jb.get(&mut out);
        // Packet for next_ts - 3*spf arrives after that frame was output.
        let outcome = jb.put(&[9], 0, 99, false, 60);
        assert_eq!(outcome, PutOutcome::Late);
        assert_eq!(jb.stats().packets_late, 1);
    }

    #[test]
    fn missing_slot_reports_lost_and_advances() {
        let jb = JitterBuffer::new(cfg(16)).unwrap();
        jb.put(&[1], 0, 0, false, 0);
        // seq 1 never arrives.
        jb.put(&[1], 320, 2, false, 40);
        let mut out = [0u8; 4];
        let (s0, _) = jb.get(&mut out);
        let (s1, _) = jb.get(&mut out);
        let (s2, _) = jb.get(&mut out);
        assert!(matches!(s0, GetStatus::Ok));
        assert!(matches!(s1, GetStatus::Lost));
        assert!(matches!(s2, GetStatus::Ok));
        assert_eq!(jb.stats().packets_lost, 1);
        assert_eq!(jb.stats().packets_interpolated, 1);
    }

    #[test]
    fn capacity_one_buffer_still_satisfies_cadence() {
        let jb = JitterBuffer::new(cfg(1)).unwrap();
        jb.put(&[7], 0, 0, false, 0);
        let mut out = [0u8; 4];
        let (status, n) = jb.get(&mut out);
        assert!(matches!(status, GetStatus::Ok));
        assert_eq!(n, 1);
    }

    #[test]
    fn adaptive_mode_grows_delay_on_loss() {
        let jb = JitterBuffer::new(JitterConfig { mode: JitterMode::Adaptive, ..cfg(16) }).unwrap();
        let before = jb.stats().current_delay_ms;
        let mut out = [0u8; 4];
        jb.get(&mut out); // nothing put -> Lost
        let after = jb.stats().current_delay_ms;
        assert!(after >= before);
    }

    #[test]
    fn playout_rate_is_neutral_at_target_occupancy() {
        let jb = JitterBuffer::new(JitterConfig { target_buffer_level: 100, ..cfg(16) }).unwrap();
        assert_eq!(jb.get_playout_rate(), 1.0);
    }
}
