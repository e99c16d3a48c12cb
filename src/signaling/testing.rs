//! Recording fake of the signaling platform for session tests.
use super::{
    CallEvent, CallEventReceiver, CallEventSender, CallHandle, CallHandleRef, ClientEvent,
    ClientEventReceiver, ClientEventSender, DialRequest, SignalingClient, SignalingClientRef,
    SignalingTransport,
};
use crate::credential::Credential;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakeTransport {
    pub credentials: Mutex<Vec<Credential>>,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
    pub fail_connect: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn last_client(&self) -> Option<Arc<FakeClient>> {
        self.clients.lock().last().cloned()
    }
}

#[async_trait]
impl SignalingTransport for FakeTransport {
    async fn connect(&self, credential: &Credential) -> Result<SignalingClientRef> {
        self.credentials.lock().push(credential.clone());
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("websocket handshake refused"));
        }
        let client = Arc::new(FakeClient::new(credential.clone()));
        self.clients.lock().push(client.clone());
        Ok(client)
    }
}

pub struct FakeClient {
    pub credential: Credential,
    events_tx: ClientEventSender,
    events_rx: Mutex<Option<ClientEventReceiver>>,
    pub dials: Mutex<Vec<DialRequest>>,
    pub calls: Mutex<Vec<Arc<FakeCall>>>,
    pub presence: Mutex<Vec<String>>,
    pub disconnects: AtomicUsize,
    /// How long the platform takes to create a dialed call
    pub dial_delay: Mutex<Duration>,
    pub fail_dial: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_presence: AtomicBool,
}

impl FakeClient {
    fn new(credential: Credential) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            credential,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            dials: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            presence: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            dial_delay: Mutex::new(Duration::ZERO),
            fail_dial: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_presence: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: ClientEvent) {
        self.events_tx.send(event).ok();
    }

    /// Surface an inbound call from `remote`.
    pub fn ring(&self, id: &str, remote: &str) -> Arc<FakeCall> {
        let call = Arc::new(FakeCall::new(id, Some(remote.to_string())));
        self.emit(ClientEvent::CallReceived(call.clone()));
        call
    }

    pub fn last_call(&self) -> Option<Arc<FakeCall>> {
        self.calls.lock().last().cloned()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingClient for FakeClient {
    fn take_events(&self) -> Option<ClientEventReceiver> {
        self.events_rx.lock().take()
    }

    async fn dial(&self, request: DialRequest) -> Result<CallHandleRef> {
        self.dials.lock().push(request.clone());
        let delay = *self.dial_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(anyhow!("dial rejected"));
        }
        let id = format!("out-{}", self.calls.lock().len() + 1);
        let call = Arc::new(FakeCall::new(&id, Some(request.to)));
        call.fail_start
            .store(self.fail_start.load(Ordering::SeqCst), Ordering::SeqCst);
        self.calls.lock().push(call.clone());
        Ok(call)
    }

    async fn online(&self, queues: &[String]) -> Result<()> {
        if self.fail_presence.load(Ordering::SeqCst) {
            return Err(anyhow!("presence update rejected"));
        }
        self.presence.lock().push(format!("online:{}", queues.join(",")));
        Ok(())
    }

    async fn offline(&self) -> Result<()> {
        if self.fail_presence.load(Ordering::SeqCst) {
            return Err(anyhow!("presence update rejected"));
        }
        self.presence.lock().push("offline".to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.emit(ClientEvent::SocketClosed);
        Ok(())
    }
}

pub struct FakeCall {
    id: String,
    remote: Option<String>,
    events_tx: CallEventSender,
    events_rx: Mutex<Option<CallEventReceiver>>,
    pub ops: Mutex<Vec<String>>,
    pub fail_start: AtomicBool,
    pub fail_answer: AtomicBool,
    pub fail_hangup: AtomicBool,
    pub fail_mute: AtomicBool,
}

impl FakeCall {
    pub fn new(id: &str, remote: Option<String>) -> Self {
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            id: id.to_string(),
            remote,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            ops: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            fail_hangup: AtomicBool::new(false),
            fail_mute: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: CallEvent) {
        self.events_tx.send(event).ok();
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    fn record(&self, op: &str, fail: &AtomicBool) -> Result<()> {
        self.ops.lock().push(op.to_string());
        if fail.load(Ordering::SeqCst) {
            return Err(anyhow!("{} failed", op));
        }
        Ok(())
    }
}

#[async_trait]
impl CallHandle for FakeCall {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn remote(&self) -> Option<String> {
        self.remote.clone()
    }

    fn take_events(&self) -> Option<CallEventReceiver> {
        self.events_rx.lock().take()
    }

    async fn start(&self) -> Result<()> {
        self.record("start", &self.fail_start)
    }

    async fn answer(&self) -> Result<()> {
        self.record("answer", &self.fail_answer)
    }

    async fn hangup(&self) -> Result<()> {
        self.record("hangup", &self.fail_hangup)
    }

    async fn audio_mute(&self) -> Result<()> {
        self.record("mute", &self.fail_mute)
    }

    async fn audio_unmute(&self) -> Result<()> {
        self.record("unmute", &self.fail_mute)
    }

    async fn send_digits(&self, digits: &str) -> Result<()> {
        self.ops.lock().push(format!("digits:{}", digits));
        Ok(())
    }
}
