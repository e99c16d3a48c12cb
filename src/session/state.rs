use crate::error::CallError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of the single tracked call.
///
/// `Ended` is only ever published as a transition target; the stored state
/// settles back to `Idle` in the same step.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    #[default]
    Idle,
    Dialing,
    Ringing,
    Active,
    Ended,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Active => "active",
            CallState::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "presence")]
pub enum Presence {
    #[default]
    Offline,
    Online { queues: Vec<String> },
}

/// Point-in-time view of the call for observers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub session_id: Option<String>,
    pub remote: Option<String>,
    pub direction: Option<Direction>,
    pub muted: bool,
    pub elapsed_secs: u64,
    pub formatted_duration: String,
}

/// Last recorded non-fatal error, shared by the connection and the machine.
#[derive(Clone, Default)]
pub struct ErrorSlot(Arc<Mutex<Option<CallError>>>);

impl ErrorSlot {
    pub fn set(&self, error: CallError) {
        *self.0.lock() = Some(error);
    }

    pub fn get(&self) -> Option<CallError> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().take();
    }
}
