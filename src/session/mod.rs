use crate::config::SessionConfig;
use crate::error::CallError;
use crate::event::{create_event_sender, EventReceiver, EventSender};
use crate::microphone::{GrantedMicrophone, MicrophoneAccess};
use crate::signaling::SignalingTransport;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;

pub mod connection;
pub mod duration;
pub mod machine;
pub mod refresh;
pub mod state;
#[cfg(test)]
mod tests;

pub use connection::{ConnectOptions, ConnectionLink, SignalingConnection};
pub use duration::{format_duration, DurationTracker};
pub use machine::{CallSessionStateMachine, DialOptions};
pub use refresh::{retry_policy, ExponentialBackoff, NoRetry, RetryPolicy, TokenRefreshScheduler};
pub use state::{CallSnapshot, CallState, ConnectionStatus, Direction, ErrorSlot, Presence};

/// Everything one console owns: the connection, the call it tracks and the
/// timers behind them. Built at startup and torn down with [`Session::shutdown`].
pub struct Session {
    connection: SignalingConnection,
    calls: CallSessionStateMachine,
    events: EventSender,
    errors: ErrorSlot,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn connection(&self) -> &SignalingConnection {
        &self.connection
    }

    pub fn calls(&self) -> &CallSessionStateMachine {
        &self.calls
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn last_error(&self) -> Option<CallError> {
        self.errors.get()
    }

    pub fn clear_error(&self) {
        self.errors.clear();
    }

    pub async fn shutdown(&self) {
        info!("session shutting down");
        self.connection.disconnect().await;
        self.calls.duration().stop();
    }
}

pub struct SessionBuilder {
    pub config: Option<SessionConfig>,
    pub transport: Option<Arc<dyn SignalingTransport>>,
    pub microphone: Option<Arc<dyn MicrophoneAccess>>,
    pub events: Option<EventSender>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            microphone: None,
            events: None,
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn SignalingTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn microphone(mut self, microphone: Arc<dyn MicrophoneAccess>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn event_sender(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<Session> {
        let config = self.config.unwrap_or_default();
        let transport = self
            .transport
            .ok_or_else(|| anyhow!("a signaling transport is required"))?;
        let microphone = self
            .microphone
            .unwrap_or_else(|| Arc::new(GrantedMicrophone));
        let events = self.events.unwrap_or_else(create_event_sender);
        let errors = ErrorSlot::default();
        let link = Arc::new(ConnectionLink::default());

        let calls = CallSessionStateMachine::new(
            link.clone(),
            microphone,
            events.clone(),
            errors.clone(),
            config.audio_sink.clone(),
        );
        let scheduler = TokenRefreshScheduler::new(retry_policy(&config.retry));
        let connection = SignalingConnection::new(
            transport,
            link,
            calls.clone(),
            scheduler,
            config,
            events.clone(),
            errors.clone(),
        );
        Ok(Session {
            connection,
            calls,
            events,
            errors,
        })
    }
}
