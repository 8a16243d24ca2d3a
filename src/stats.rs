//! Statistics collector (C9): rolling call-quality metrics shared by the
//! pipeline and external callers, plus E-Model MOS/R-factor estimation.
//!
//! Per §5 "Shared-resource policy" ("Statistics collector | all | stats
//! reader | single mutex; readers see a snapshot") and §9 "Shared mutable
//! counters" ("atomic counters for single-field hot paths and a
//! mutex-guarded snapshot struct for reads"): single-field hot-path
//! increments (device under/overrun, SRTP/parse failures) use
//! `std::sync::atomic`; the aggregate snapshot returned to readers is built
//! from those atomics plus the caller-supplied subsystem snapshots under one
//! `parking_lot::Mutex` so a reader never observes a torn read across
//! multiple counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::jitter::JitterStats;
use crate::rtp::RtpSessionStats;
use crate::transport::TransportStatsSnapshot;

/// Atomically-incremented single-field counters, updated from any thread
/// without taking the collector's mutex (§9).
#[derive(Default)]
struct HotCounters {
    device_underruns: AtomicU64,
    device_overruns: AtomicU64,
    parse_failures: AtomicU64,
    srtp_failures: AtomicU64,
    ssrc_changes: AtomicU64,
}

/// Quality-of-service estimate derived from the simplified ITU-T G.107
/// E-Model (§2 "Rolling metrics, snapshots, E-Model MOS/R-factor").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityEstimate {
    /// Transmission rating factor, `0`-`100` (higher is better).
    pub r_factor: f32,
    /// Mean Opinion Score, `1.0`-`4.5`, derived from `r_factor`.
    pub mos: f32,
}

/// Computes a simplified E-Model R-factor/MOS from one-way delay and loss.
/// Uses the narrowband default `Ie = 0` (no codec-specific impairment table)
/// and the standard ITU-T G.107 `Id` delay-impairment approximation.
pub fn e_model_quality(one_way_delay_ms: f32, loss_percent: f32, codec_impairment: f32) -> QualityEstimate {
    const BASE_R: f32 = 93.2;

    let id = if one_way_delay_ms <= 177.3 {
        0.024 * one_way_delay_ms
    } else {
        0.024 * one_way_delay_ms + 0.11 * (one_way_delay_ms - 177.3)
    };

    // Simplified packet-loss impairment: Ie-eff grows roughly logarithmically
    // with loss percentage, bounded so R never goes negative.
    let ie_eff = codec_impairment + (loss_percent.max(0.0)) * 2.5;

    let r_factor = (BASE_R - id - ie_eff).clamp(0.0, 100.0);

    let mos = if r_factor < 0.0 {
        1.0
    } else if r_factor > 100.0 {
        4.5
    } else {
        1.0 + 0.035 * r_factor + r_factor * (r_factor - 60.0) * (100.0 - r_factor) * 7.0e-6
    };

    QualityEstimate { r_factor, mos: mos.clamp(1.0, 4.5) }
}

/// Full aggregate snapshot returned by `StatsCollector::snapshot` (§2
/// "Rolling metrics, snapshots").
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    /// RTP send/receive session counters.
    pub rtp: RtpSessionStats,
    /// Jitter buffer counters.
    pub jitter: JitterStats,
    /// Transport socket I/O counters.
    pub transport: TransportStatsSnapshot,
    /// Audio backend period misses classified as underrun.
    pub device_underruns: u64,
    /// Audio backend period misses classified as overrun.
    pub device_overruns: u64,
    /// RTP packets dropped for `InvalidPacket` parse failures.
    pub parse_failures: u64,
    /// SRTP unprotect failures (always 0 while SRTP is `NotSupported`).
    pub srtp_failures: u64,
    /// Times the remote SSRC changed mid-call (§4.7.4).
    pub ssrc_changes: u64,
    /// Call duration so far.
    pub call_duration: Duration,
    /// E-Model quality estimate from this snapshot's jitter/RTP counters.
    pub quality: QualityEstimate,
}

/// Shared, write-mostly statistics aggregator.
pub struct StatsCollector {
    hot: HotCounters,
    start: Mutex<Option<std::time::Instant>>,
}

impl StatsCollector {
    /// Builds an empty collector. Call duration starts at zero until
    /// `mark_started` is called (on the pipeline's `Stopped -> Running`
    /// transition).
    pub fn new() -> Self {
        Self { hot: HotCounters::default(), start: Mutex::new(None) }
    }

    /// Marks the call's start time for `call_duration` in future snapshots.
    pub fn mark_started(&self) {
        *self.start.lock() = Some(std::time::Instant::now());
    }

    /// Clears the call's start time; `call_duration` reads zero again.
    pub fn mark_stopped(&self) {
        *self.start.lock() = None;
    }

    /// Increments the device-underrun counter. Safe to call from the audio
    /// backend's capture/playback callback without blocking.
    pub fn record_device_underrun(&self) {
        self.hot.device_underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the device-overrun counter.
    pub fn record_device_overrun(&self) {
        self.hot.device_overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the RTP parse-failure counter (§4.7.4 step 2: "fail-silent
    /// on `InvalidPacket`; increment a counter").
    pub fn record_parse_failure(&self) {
        self.hot.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the SRTP-failure counter.
    pub fn record_srtp_failure(&self) {
        self.hot.srtp_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the SSRC-change counter (§4.7.4 remote-SSRC-change policy).
    pub fn record_ssrc_change(&self) {
        self.hot.ssrc_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets every hot counter and the call start time back to zero
    /// (`_reset_stats`, §6 public API surface).
    pub fn reset(&self) {
        self.hot.device_underruns.store(0, Ordering::Relaxed);
        self.hot.device_overruns.store(0, Ordering::Relaxed);
        self.hot.parse_failures.store(0, Ordering::Relaxed);
        self.hot.srtp_failures.store(0, Ordering::Relaxed);
        self.hot.ssrc_changes.store(0, Ordering::Relaxed);
        *self.start.lock() = None;
    }

    /// Builds a consistent snapshot from the hot counters plus the
    /// caller-supplied subsystem snapshots (`_get_stats`, §6).
    pub fn snapshot(
        &self,
        rtp: RtpSessionStats,
        jitter: JitterStats,
        transport: TransportStatsSnapshot,
        one_way_delay_ms: f32,
        codec_impairment: f32,
    ) -> PipelineStats {
        let call_duration =
            self.start.lock().map(|t| t.elapsed()).unwrap_or_default();
        let quality = e_model_quality(one_way_delay_ms, jitter.loss_rate * 100.0, codec_impairment);
        PipelineStats {
            rtp,
            jitter,
            transport,
            device_underruns: self.hot.device_underruns.load(Ordering::Relaxed),
            device_overruns: self.hot.device_overruns.load(Ordering::Relaxed),
            parse_failures: self.hot.parse_failures.load(Ordering::Relaxed),
            srtp_failures: self.hot.srtp_failures.load(Ordering::Relaxed),
            ssrc_changes: self.hot.ssrc_changes.load(Ordering::Relaxed),
            call_duration,
            quality,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_network_conditions_yield_high_mos() {
        let q = e_model_quality(20.0, 0.0, 0.0);
        assert!(q.mos > 4.0, "mos = {}", q.mos);
    }

    #[test]
    fn heavy_loss_and_delay_degrade_mos() {
        let good = e_model_quality(20.0, 0.0, 0.0);
        let bad = e_model_quality(300.0, 10.0, 5.0);
        assert!(bad.mos < good.mos);
        assert!(bad.mos >= 1.0);
    }

    #[test]
    fn hot_counters_accumulate_and_reset() {
        let stats = StatsCollector::new();
        stats.record_parse_failure();
        stats.record_parse_failure();
        stats.record_ssrc_change();
        let snap = stats.snapshot(
            RtpSessionStats::default(),
            JitterStats::default(),
            TransportStatsSnapshot::default(),
            20.0,
            0.0,
        );
        assert_eq!(snap.parse_failures, 2);
        assert_eq!(snap.ssrc_changes, 1);
        stats.reset();
        let snap2 = stats.snapshot(
            RtpSessionStats::default(),
            JitterStats::default(),
            TransportStatsSnapshot::default(),
            20.0,
            0.0,
        );
        assert_eq!(snap2.parse_failures, 0);
    }

    #[test]
    fn call_duration_is_zero_until_started() {
        let stats = StatsCollector::new();
        let snap = stats.snapshot(
            RtpSessionStats::default(),
            JitterStats::default(),
            TransportStatsSnapshot::default(),
            20.0,
            0.0,
        );
        assert_eq!(snap.call_duration, Duration::ZERO);
        stats.mark_started();
        let snap2 = stats.snapshot(
            RtpSessionStats::default(),
            JitterStats::default(),
            TransportStatsSnapshot::default(),
            20.0,
            0.0,
        );
        assert!(snap2.call_duration >= Duration::ZERO);
    }
}
