//! Engine lifecycle state machine

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of a filtering session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No session
    #[default]
    Stopped,
    /// Establishing the interface
    Starting,
    /// Reading and filtering packets
    Running,
    /// Tearing down on request
    Stopping,
    /// Failed, cleaning up
    Error,
}

impl EngineState {
    /// Whether `self -> to` is a legal transition
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::{Error, Running, Starting, Stopped, Stopping};
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running | Error)
                | (Running, Stopping | Error)
                | (Stopping | Error, Stopped)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Thread-safe holder that refuses illegal transitions
#[derive(Debug, Default)]
pub struct StateMachine {
    current: Mutex<EngineState>,
}

impl StateMachine {
    /// Start in [`EngineState::Stopped`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn get(&self) -> EngineState {
        *self.current.lock()
    }

    /// Move to `to`, returning the previous state
    pub fn transition(&self, to: EngineState) -> Result<EngineState> {
        let mut current = self.current.lock();
        let from = *current;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidState { from, to });
        }
        *current = to;
        tracing::debug!(%from, %to, "Engine state changed");
        Ok(from)
    }
}
