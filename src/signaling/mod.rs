//! Seam to the hosted real-time communications platform.
//!
//! The platform itself is not reimplemented here. A [`SignalingTransport`]
//! opens an authenticated [`SignalingClient`], which surfaces connection
//! events and creates or receives [`CallHandle`]s.
use crate::credential::Credential;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod event;
#[cfg(test)]
pub mod testing;

pub use event::{
    CallEvent, CallEventReceiver, CallEventSender, ClientEvent, ClientEventReceiver,
    ClientEventSender, TransportCallState,
};

pub type CallHandleRef = Arc<dyn CallHandle>;
pub type SignalingClientRef = Arc<dyn SignalingClient>;

/// Parameters for a new outbound call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialRequest {
    pub to: String,
    /// Identifier of the element or device that renders remote audio
    pub audio_sink: Option<String>,
    pub audio: bool,
    pub video: bool,
    /// Forwarded to the outbound webhook as call-scope variables
    pub user_variables: HashMap<String, String>,
}

impl DialRequest {
    pub fn audio_only(to: String) -> Self {
        Self {
            to,
            audio_sink: None,
            audio: true,
            video: false,
            user_variables: HashMap::new(),
        }
    }
}

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a new client session authenticated with `credential`.
    async fn connect(&self, credential: &Credential) -> Result<SignalingClientRef>;
}

#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Connection-level event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<ClientEventReceiver>;
    /// Create an outbound call. No media flows until [`CallHandle::start`].
    async fn dial(&self, request: DialRequest) -> Result<CallHandleRef>;
    async fn online(&self, queues: &[String]) -> Result<()>;
    async fn offline(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait CallHandle: Send + Sync {
    fn id(&self) -> String;
    fn remote(&self) -> Option<String>;
    /// Per-call event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<CallEventReceiver>;
    async fn start(&self) -> Result<()>;
    async fn answer(&self) -> Result<()>;
    async fn hangup(&self) -> Result<()>;
    async fn audio_mute(&self) -> Result<()>;
    async fn audio_unmute(&self) -> Result<()>;
    async fn send_digits(&self, digits: &str) -> Result<()>;
}
