use super::CallHandleRef;
use std::str::FromStr;

/// Call state names reported by the platform on `call.state` updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCallState {
    New,
    Trying,
    Requesting,
    Ringing,
    Early,
    Answering,
    Answered,
    Active,
    Hold,
    Ending,
    Ended,
    Hangup,
    Destroy,
    Unknown(String),
}

impl FromStr for TransportCallState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "new" => Self::New,
            "trying" => Self::Trying,
            "requesting" => Self::Requesting,
            "ringing" => Self::Ringing,
            "early" => Self::Early,
            "answering" => Self::Answering,
            "answered" => Self::Answered,
            "active" => Self::Active,
            "hold" | "held" => Self::Hold,
            "ending" => Self::Ending,
            "ended" => Self::Ended,
            "hangup" => Self::Hangup,
            "destroy" | "destroyed" => Self::Destroy,
            other => Self::Unknown(other.to_string()),
        })
    }
}

impl TransportCallState {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Active | Self::Answered)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ending | Self::Ended | Self::Hangup | Self::Destroy)
    }
}

/// Per-call notifications from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged(TransportCallState),
    Destroy,
    RoomJoined,
    RoomEnded,
    /// Anything else the platform emits; logged and ignored.
    Other(String),
}

impl CallEvent {
    /// Map a raw platform event name (and state payload for state events).
    pub fn from_raw(name: &str, state: Option<&str>) -> Self {
        match name {
            "call.state" | "state-changed" | "call.state_changed" => {
                let state = state
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| TransportCallState::Unknown(String::new()));
                CallEvent::StateChanged(state)
            }
            "destroy" => CallEvent::Destroy,
            "room.joined" => CallEvent::RoomJoined,
            "room.ended" => CallEvent::RoomEnded,
            other => CallEvent::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CallEvent::StateChanged(_) => "call.state",
            CallEvent::Destroy => "destroy",
            CallEvent::RoomJoined => "room.joined",
            CallEvent::RoomEnded => "room.ended",
            CallEvent::Other(name) => name,
        }
    }
}

/// Connection-level notifications from the platform.
pub enum ClientEvent {
    CallReceived(CallHandleRef),
    Ready,
    Error(String),
    SocketClosed,
    Other(String),
}

impl ClientEvent {
    pub fn name(&self) -> &str {
        match self {
            ClientEvent::CallReceived(_) => "call.received",
            ClientEvent::Ready => "ready",
            ClientEvent::Error(_) => "error",
            ClientEvent::SocketClosed => "socket.close",
            ClientEvent::Other(name) => name,
        }
    }
}

impl std::fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientEvent::CallReceived(call) => write!(f, "CallReceived({})", call.id()),
            ClientEvent::Error(message) => write!(f, "Error({})", message),
            other => write!(f, "{}", other.name()),
        }
    }
}

pub type ClientEventSender = tokio::sync::mpsc::UnboundedSender<ClientEvent>;
pub type ClientEventReceiver = tokio::sync::mpsc::UnboundedReceiver<ClientEvent>;
pub type CallEventSender = tokio::sync::mpsc::UnboundedSender<CallEvent>;
pub type CallEventReceiver = tokio::sync::mpsc::UnboundedReceiver<CallEvent>;
