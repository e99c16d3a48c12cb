use crate::session::{CallState, ConnectionStatus, Direction};
use serde::{Deserialize, Serialize};

/// SessionEvent is published to observers (the console UI) whenever the
/// observable session state changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Call lifecycle transition
    StateChanged { from: CallState, to: CallState },

    /// Inbound call surfaced and ringing
    IncomingCall {
        session_id: String,
        remote: Option<String>,
    },

    /// Call torn down; duration is the last displayed counter value
    CallEnded {
        session_id: String,
        direction: Direction,
        duration_secs: u64,
    },

    MuteChanged { muted: bool },

    ConnectionChanged { status: ConnectionStatus },

    CredentialRefreshed { subscriber_id: String },

    /// Non-fatal error recorded in the observable error slot
    Error { message: String },
}

/// Type alias for the event sender
pub type EventSender = tokio::sync::broadcast::Sender<SessionEvent>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::broadcast::Receiver<SessionEvent>;

pub fn create_event_sender() -> EventSender {
    tokio::sync::broadcast::channel(64).0
}
