use super::machine::CallSessionStateMachine;
use super::refresh::{RefreshFuture, RefreshJob, TokenRefreshScheduler};
use super::state::{CallState, ConnectionStatus, ErrorSlot, Presence};
use crate::config::SessionConfig;
use crate::credential::{Credential, CredentialProvider};
use crate::error::{CallError, CallResult};
use crate::event::{EventSender, SessionEvent};
use crate::signaling::{ClientEvent, ClientEventReceiver, SignalingClientRef, SignalingTransport};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct LinkState {
    status: ConnectionStatus,
    client: Option<SignalingClientRef>,
    credential: Option<Credential>,
    presence: Presence,
    /// Bumped on every connect attempt and teardown
    epoch: u64,
}

/// The connection state the call machine needs to see.
#[derive(Default)]
pub struct ConnectionLink {
    state: RwLock<LinkState>,
}

impl ConnectionLink {
    pub fn status(&self) -> ConnectionStatus {
        self.state.read().status
    }

    pub fn presence(&self) -> Presence {
        self.state.read().presence.clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.state.read().credential.clone()
    }

    /// Client and credential, only while connected.
    pub fn connected(&self) -> Option<(SignalingClientRef, Credential)> {
        let state = self.state.read();
        if state.status != ConnectionStatus::Connected {
            return None;
        }
        Some((state.client.clone()?, state.credential.clone()?))
    }

    /// Client, credential and the epoch they belong to, only while connected.
    pub(crate) fn connected_at(&self) -> Option<(SignalingClientRef, Credential, u64)> {
        let state = self.state.read();
        if state.status != ConnectionStatus::Connected {
            return None;
        }
        Some((state.client.clone()?, state.credential.clone()?, state.epoch))
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.state.read().epoch == epoch
    }
}

#[derive(Clone, Default)]
pub struct ConnectOptions {
    /// Issues replacement credentials; without one the token is never renewed
    pub refresher: Option<Arc<dyn CredentialProvider>>,
}

struct ConnectionInner {
    transport: Arc<dyn SignalingTransport>,
    link: Arc<ConnectionLink>,
    machine: CallSessionStateMachine,
    scheduler: TokenRefreshScheduler,
    session: SessionConfig,
    events: EventSender,
    errors: ErrorSlot,
}

/// Owns the single client session with the signaling platform.
#[derive(Clone)]
pub struct SignalingConnection {
    inner: Arc<ConnectionInner>,
}

impl SignalingConnection {
    pub(crate) fn new(
        transport: Arc<dyn SignalingTransport>,
        link: Arc<ConnectionLink>,
        machine: CallSessionStateMachine,
        scheduler: TokenRefreshScheduler,
        session: SessionConfig,
        events: EventSender,
        errors: ErrorSlot,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                link,
                machine,
                scheduler,
                session,
                events,
                errors,
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.link.status()
    }

    pub fn presence(&self) -> Presence {
        self.inner.link.presence()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.inner.link.credential()
    }

    pub fn refresh_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    /// Connect with `credential`. Does nothing while already connecting or
    /// connected.
    pub async fn connect(&self, credential: Credential, options: ConnectOptions) -> CallResult<()> {
        let epoch = {
            let mut link = self.inner.link.state.write();
            if link.status != ConnectionStatus::Disconnected {
                debug!(status = ?link.status, "connect ignored, connection already exists");
                return Ok(());
            }
            link.status = ConnectionStatus::Connecting;
            link.epoch += 1;
            link.epoch
        };
        self.emit_status(ConnectionStatus::Connecting);
        info!(subscriber_id = credential.subscriber_id, epoch, "connecting to signaling platform");

        let client = match self.inner.transport.connect(&credential).await {
            Ok(client) => client,
            Err(e) => {
                error!(epoch, "signaling connect failed: {}", e);
                let still_current = {
                    let mut link = self.inner.link.state.write();
                    let current = link.epoch == epoch;
                    if current {
                        link.status = ConnectionStatus::Disconnected;
                    }
                    current
                };
                if still_current {
                    self.emit_status(ConnectionStatus::Disconnected);
                }
                return Err(self.record_error(CallError::transport(e)));
            }
        };

        let client_events = client.take_events();
        let superseded = {
            let mut link = self.inner.link.state.write();
            if link.epoch != epoch || link.status != ConnectionStatus::Connecting {
                true
            } else {
                link.status = ConnectionStatus::Connected;
                link.client = Some(client.clone());
                link.credential = Some(credential.clone());
                false
            }
        };
        if superseded {
            // disconnect() ran while the handshake was in flight
            warn!(epoch, "connection superseded during connect, closing it");
            client.disconnect().await.ok();
            return Err(CallError::ConnectionRequired);
        }

        if let Some(rx) = client_events {
            self.dispatch(epoch, rx);
        }
        self.emit_status(ConnectionStatus::Connected);
        info!(subscriber_id = credential.subscriber_id, epoch, "signaling connected");

        if let Some(refresher) = options.refresher {
            let delay = self
                .inner
                .session
                .refresh_delay_for(credential.expires_in(Utc::now()));
            debug!(epoch, delay_secs = delay.as_secs(), "credential renewal armed");
            self.schedule_refresh(refresher, delay);
        }
        Ok(())
    }

    /// Hang up any live call, close the client and stop the refresh timer.
    /// Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let client = {
            let mut link = self.inner.link.state.write();
            let was = link.status;
            link.epoch += 1;
            link.status = ConnectionStatus::Disconnected;
            link.presence = Presence::Offline;
            link.credential = None;
            let client = link.client.take();
            if was == ConnectionStatus::Disconnected && client.is_none() {
                drop(link);
                self.inner.scheduler.cancel();
                debug!("disconnect ignored, already disconnected");
                return;
            }
            client
        };

        if let Err(e) = self.inner.machine.hangup().await {
            warn!("hangup during disconnect failed: {}", e);
        }
        if let Some(client) = client {
            if let Err(e) = client.disconnect().await {
                warn!("signaling disconnect failed: {}", e);
            }
        }
        self.inner.scheduler.cancel();
        self.emit_status(ConnectionStatus::Disconnected);
        info!("signaling disconnected");
    }

    /// Make this client eligible for pooled and queued calls.
    pub async fn go_online(&self, queues: &[String]) -> CallResult<()> {
        let (client, _) = self
            .inner
            .link
            .connected()
            .ok_or(CallError::ConnectionRequired)?;
        if let Err(e) = client.online(queues).await {
            warn!(?queues, "going online failed: {}", e);
            return Err(self.record_error(CallError::transport(e)));
        }
        self.inner.link.state.write().presence = Presence::Online {
            queues: queues.to_vec(),
        };
        info!(?queues, "presence online");
        Ok(())
    }

    pub async fn go_offline(&self) -> CallResult<()> {
        let (client, _) = self
            .inner
            .link
            .connected()
            .ok_or(CallError::ConnectionRequired)?;
        if let Err(e) = client.offline().await {
            warn!("going offline failed: {}", e);
            return Err(self.record_error(CallError::transport(e)));
        }
        self.inner.link.state.write().presence = Presence::Offline;
        info!("presence offline");
        Ok(())
    }

    fn dispatch(&self, epoch: u64, mut rx: ClientEventReceiver) {
        let connection = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !connection.inner.link.is_current(epoch) {
                    break;
                }
                match event {
                    ClientEvent::CallReceived(call) => connection.inner.machine.on_incoming(call),
                    ClientEvent::Ready => info!(epoch, "signaling client ready"),
                    ClientEvent::Error(message) => {
                        warn!(epoch, "signaling client error: {}", message);
                        connection.record_error(CallError::TransportFailure(message));
                    }
                    ClientEvent::SocketClosed => {
                        connection.on_socket_closed(epoch);
                        break;
                    }
                    ClientEvent::Other(name) => {
                        debug!(epoch, event = name, "ignoring client event");
                    }
                }
            }
            debug!(epoch, "client event dispatcher finished");
        });
    }

    /// The platform dropped us. Local state is released without transport
    /// calls and the connection stays down until reconnected.
    fn on_socket_closed(&self, epoch: u64) {
        {
            let mut link = self.inner.link.state.write();
            if link.epoch != epoch {
                return;
            }
            link.epoch += 1;
            link.status = ConnectionStatus::Disconnected;
            link.presence = Presence::Offline;
            link.client = None;
        }
        warn!(epoch, "signaling socket closed");
        self.inner.scheduler.cancel();
        self.inner.machine.release("socket closed");
        self.record_error(CallError::TransportFailure("socket closed".to_string()));
        self.emit_status(ConnectionStatus::Disconnected);
    }

    fn schedule_refresh(&self, refresher: Arc<dyn CredentialProvider>, delay: Duration) {
        let connection = self.clone();
        let job: RefreshJob = Arc::new(move || -> RefreshFuture {
            let connection = connection.clone();
            let refresher = refresher.clone();
            Box::pin(async move { connection.refresh(refresher).await })
        });
        self.inner.scheduler.schedule(job, delay);
    }

    /// Obtain a new credential and rebuild the client with it.
    ///
    /// The transport is torn down and rebuilt, so a call in progress does
    /// not survive the refresh.
    async fn refresh(&self, refresher: Arc<dyn CredentialProvider>) -> CallResult<()> {
        let credential = match refresher.issue().await {
            Ok(credential) => credential,
            Err(e) => {
                error!("credential refresh failed, connection keeps the stale token: {}", e);
                return Err(self.record_error(CallError::refresh(e)));
            }
        };

        let call_state = self.inner.machine.state();
        if call_state != CallState::Idle {
            warn!(%call_state, "refreshing credential during a live call, the call will be dropped");
        }

        let subscriber_id = credential.subscriber_id.clone();
        self.disconnect().await;
        let options = ConnectOptions {
            refresher: Some(refresher),
        };
        if let Err(e) = self.connect(credential, options).await {
            error!("reconnect after credential refresh failed: {}", e);
            return Err(self.record_error(CallError::refresh(e)));
        }
        info!(subscriber_id, "credential refreshed");
        self.emit(SessionEvent::CredentialRefreshed { subscriber_id });
        Ok(())
    }

    fn emit_status(&self, status: ConnectionStatus) {
        self.emit(SessionEvent::ConnectionChanged { status });
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.events.send(event).ok();
    }

    fn record_error(&self, error: CallError) -> CallError {
        self.inner.errors.set(error.clone());
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        error
    }
}
