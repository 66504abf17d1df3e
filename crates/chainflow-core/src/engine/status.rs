//! Engine status and the lock-free state shared with controllers

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};

use crate::types::SamplePos;

/// Engine status state machine
///
/// ```text
/// NotReady --start--> Running <--start/stop--> Stopped
///                        |                        |
///                        +--inputs finished--> Finished
/// any setup failure ---------------------------> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineStatus {
    NotReady = 0,
    Stopped = 1,
    Running = 2,
    Finished = 3,
    Error = 4,
}

impl EngineStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineStatus::Stopped,
            2 => EngineStatus::Running,
            3 => EngineStatus::Finished,
            4 => EngineStatus::Error,
            _ => EngineStatus::NotReady,
        }
    }

    /// No further processing happens without a reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, EngineStatus::Finished | EngineStatus::Error)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::NotReady => "not ready",
            EngineStatus::Stopped => "stopped",
            EngineStatus::Running => "running",
            EngineStatus::Finished => "finished",
            EngineStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// State the engine publishes for controller threads
///
/// Written by the engine thread only. All operations use
/// `Ordering::Relaxed`; readers need visibility, not ordering.
#[derive(Debug)]
pub struct EngineAtomics {
    status: AtomicU8,
    /// Global position in frames
    position: AtomicI64,
    /// Xruns seen on realtime devices and proxied rings
    xruns: AtomicU64,
    /// Completed iterations
    iterations: AtomicU64,
}

impl EngineAtomics {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(EngineStatus::NotReady as u8),
            position: AtomicI64::new(0),
            xruns: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: EngineStatus) {
        self.status.store(status as u8, Ordering::Relaxed);
    }

    #[inline]
    pub fn position(&self) -> SamplePos {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_position(&self, position: SamplePos) {
        self.position.store(position, Ordering::Relaxed);
    }

    #[inline]
    pub fn xruns(&self) -> u64 {
        self.xruns.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn add_xruns(&self, count: u64) {
        self.xruns.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn count_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.set_status(EngineStatus::NotReady);
        self.set_position(0);
        self.xruns.store(0, Ordering::Relaxed);
        self.iterations.store(0, Ordering::Relaxed);
    }
}

impl Default for EngineAtomics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_through_atomics() {
        let atomics = EngineAtomics::new();
        assert_eq!(atomics.status(), EngineStatus::NotReady);
        for status in [
            EngineStatus::Stopped,
            EngineStatus::Running,
            EngineStatus::Finished,
            EngineStatus::Error,
        ] {
            atomics.set_status(status);
            assert_eq!(atomics.status(), status);
        }
        atomics.reset();
        assert_eq!(atomics.status(), EngineStatus::NotReady);
    }

    #[test]
    fn test_terminal_states() {
        assert!(EngineStatus::Finished.is_terminal());
        assert!(EngineStatus::Error.is_terminal());
        assert!(!EngineStatus::Stopped.is_terminal());
        assert_eq!(EngineStatus::NotReady.to_string(), "not ready");
    }
}
