//! Pipeline state machine (§4.7.1): `Stopped -> Starting -> Running ->
//! Stopping -> Stopped`, with `Error` reachable from any state on a fatal
//! device failure. Transitions are guarded by one mutex (§5 "Pipeline state
//! enum | state-lock holder | anyone | mutex") and each successful
//! transition is reported to the pipeline's `StateSink`, if one is installed.

use parking_lot::Mutex;

use crate::error::{EngineError, Result};

/// The pipeline's lifecycle state (§3 "Pipeline State").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No resources held; `start()` may be called.
    Stopped,
    /// `start()` in progress: device/codec/session construction underway.
    Starting,
    /// Ticking; capture and playback threads are active.
    Running,
    /// `stop()` in progress: ticks are draining.
    Stopping,
    /// Fatal device failure. Requires explicit `stop()`/teardown before reuse.
    Error,
}

/// Guards `PipelineState` and validates the transition graph in §4.7.1.
pub(crate) struct StateMachine {
    state: Mutex<PipelineState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self { state: Mutex::new(PipelineState::Stopped) }
    }

    pub fn current(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Moves `Stopped -> Starting`. Fails with `AlreadyRunning` from any
    /// other state (§4.7.6, §7 `AlreadyRunning`).
    pub fn begin_start(&self) -> Result<()> {
        let mut guard = self.state.lock();
        if *guard != PipelineState::Stopped {
            return Err(EngineError::AlreadyRunning);
        }
        *guard = PipelineState::Starting;
        Ok(())
    }

    /// Completes `Starting -> Running`. A no-op (returns `Ok`) if the state
    /// already moved to `Error` concurrently, since device-failure reporting
    /// always wins over a late successful setup.
    pub fn finish_start(&self) {
        let mut guard = self.state.lock();
        if *guard == PipelineState::Starting {
            *guard = PipelineState::Running;
        }
    }

    /// Moves `Running -> Stopping`. A no-op from `Stopped`; fails from `Error`
    /// or `Starting` with `InvalidParam`, since those need `fail()`/explicit
    /// teardown first rather than a graceful stop.
    pub fn begin_stop(&self) -> Result<()> {
        let mut guard = self.state.lock();
        match *guard {
            PipelineState::Running => {
                *guard = PipelineState::Stopping;
                Ok(())
            }
            PipelineState::Stopped => Ok(()),
            PipelineState::Error => {
                *guard = PipelineState::Stopped;
                Ok(())
            }
            other => Err(EngineError::InvalidParam(format!("cannot stop from state {other:?}"))),
        }
    }

    /// Completes `Stopping -> Stopped`.
    pub fn finish_stop(&self) {
        let mut guard = self.state.lock();
        *guard = PipelineState::Stopped;
    }

    /// Forces `Error` from any state (§4.7.1 "`Error` is entered from any
    /// state on fatal device failure").
    pub fn fail(&self) {
        *self.state.lock() = PipelineState::Error;
    }

    /// `true` only in `Running`, the only state in which tick methods proceed.
    pub fn is_running(&self) -> bool {
        *self.state.lock() == PipelineState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_lifecycle() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), PipelineState::Stopped);
        sm.begin_start().unwrap();
        assert_eq!(sm.current(), PipelineState::Starting);
        sm.finish_start();
        assert_eq!(sm.current(), PipelineState::Running);
        sm.begin_stop().unwrap();
        assert_eq!(sm.current(), PipelineState::Stopping);
        sm.finish_stop();
        assert_eq!(sm.current(), PipelineState::Stopped);
    }

    #[test]
    fn start_twice_is_already_running() {
        let sm = StateMachine::new();
        sm.begin_start().unwrap();
        sm.finish_start();
        assert!(matches!(sm.begin_start(), Err(EngineError::AlreadyRunning)));
    }

    #[test]
    fn fail_is_reachable_from_running() {
        let sm = StateMachine::new();
        sm.begin_start().unwrap();
        sm.finish_start();
        sm.fail();
        assert_eq!(sm.current(), PipelineState::Error);
    }

    #[test]
    fn stop_from_error_returns_to_stopped() {
        let sm = StateMachine::new();
        sm.fail();
        sm.begin_stop().unwrap();
        assert_eq!(sm.current(), PipelineState::Stopped);
    }
}
