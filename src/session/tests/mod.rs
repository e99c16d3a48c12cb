use crate::config::SessionConfig;
use crate::credential::{Credential, Line, LineKind};
use crate::event::{EventReceiver, SessionEvent};
use crate::microphone::testing::FakeMicrophone;
use crate::session::{ConnectOptions, Session};
use crate::signaling::testing::{FakeCall, FakeClient, FakeTransport};
use crate::signaling::CallEvent;
use crate::signaling::TransportCallState;
use std::sync::Arc;
use std::time::Duration;

mod connection_test;

pub(super) fn credential(token: &str) -> Credential {
    Credential::new(
        token.to_string(),
        "sub-1".to_string(),
        None,
        vec![
            Line {
                id: "north".to_string(),
                kind: LineKind::Group,
                name: "North".to_string(),
                phone_number: "+15550001000".to_string(),
                subscriber_id: None,
                is_default: false,
            },
            Line {
                id: "direct-a1".to_string(),
                kind: LineKind::Direct,
                name: "Personal Line".to_string(),
                phone_number: "+15550002000".to_string(),
                subscriber_id: Some("ds1".to_string()),
                is_default: false,
            },
        ],
    )
}

pub(super) struct Harness {
    pub session: Session,
    pub transport: Arc<FakeTransport>,
    pub microphone: Arc<FakeMicrophone>,
}

impl Harness {
    pub fn new(microphone: FakeMicrophone) -> Self {
        Self::with_config(microphone, SessionConfig::default())
    }

    pub fn with_config(microphone: FakeMicrophone, config: SessionConfig) -> Self {
        let transport = FakeTransport::new();
        let microphone = Arc::new(microphone);
        let session = Session::builder()
            .config(config)
            .transport(transport.clone())
            .microphone(microphone.clone())
            .build()
            .unwrap();
        Self {
            session,
            transport,
            microphone,
        }
    }

    pub async fn connected() -> Self {
        let harness = Self::new(FakeMicrophone::default());
        harness
            .session
            .connection()
            .connect(credential("tok-1"), ConnectOptions::default())
            .await
            .unwrap();
        harness
    }

    pub fn client(&self) -> Arc<FakeClient> {
        self.transport.last_client().unwrap()
    }

    /// Dial and let the far end answer.
    pub async fn active_outbound(&self) -> Arc<FakeCall> {
        self.session
            .calls()
            .dial("4155551212", Default::default())
            .await
            .unwrap();
        let call = self.client().last_call().unwrap();
        call.emit(CallEvent::StateChanged(TransportCallState::Answered));
        settle().await;
        call
    }
}

/// Let spawned listeners drain their queues.
pub(super) async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub(super) fn drain(rx: &mut EventReceiver) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
