//! Controller-side handle to a running engine

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{CommandKind, EngineAtomics, EngineCommand, EngineResult, EngineStatus};
use crate::types::{frames_to_seconds, SamplePos};

/// Poll interval of [`EngineController::wait_for_stop`]
const STATUS_POLL: Duration = Duration::from_millis(5);

/// Sends commands to an [`Engine`](super::Engine) and reads its state
///
/// Owned by one controller thread. Reads go through [`EngineAtomics`] and
/// never block the engine.
pub struct EngineController {
    commands: rtrb::Producer<EngineCommand>,
    atomics: Arc<EngineAtomics>,
    sample_rate: u32,
}

impl EngineController {
    pub(crate) fn new(commands: rtrb::Producer<EngineCommand>, atomics: Arc<EngineAtomics>, sample_rate: u32) -> Self {
        Self {
            commands,
            atomics,
            sample_rate,
        }
    }

    /// Queue a command; `false` if the queue is full and it was dropped
    pub fn send(&mut self, command: EngineCommand) -> bool {
        match self.commands.push(command) {
            Ok(()) => true,
            Err(_) => {
                log::warn!("engine controller: command queue full, dropping {:?}", command);
                false
            }
        }
    }

    /// Queue a command in its numeric `(code, argument)` form
    pub fn send_pair(&mut self, code: u8, argument: f64) -> EngineResult<bool> {
        let kind = CommandKind::from_code(code)?;
        let command = EngineCommand::from_pair(kind, argument)?;
        Ok(self.send(command))
    }

    pub fn status(&self) -> EngineStatus {
        self.atomics.status()
    }

    /// Global position in frames
    pub fn position(&self) -> SamplePos {
        self.atomics.position()
    }

    pub fn position_seconds(&self) -> f64 {
        frames_to_seconds(self.position(), self.sample_rate)
    }

    pub fn xruns(&self) -> u64 {
        self.atomics.xruns()
    }

    pub fn iterations(&self) -> u64 {
        self.atomics.iterations()
    }

    pub fn atomics(&self) -> Arc<EngineAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Block until the engine leaves `Running`; `false` on timeout
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.status() == EngineStatus::Running {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(STATUS_POLL);
        }
        true
    }
}
