use super::{credential, drain, settle, Harness};
use crate::config::{RetryConfig, SessionConfig};
use crate::credential::{Credential, CredentialProvider};
use crate::error::CallError;
use crate::event::SessionEvent;
use crate::microphone::testing::FakeMicrophone;
use crate::session::{CallState, ConnectOptions, ConnectionStatus, DialOptions, Presence};
use crate::signaling::ClientEvent;
use async_trait::async_trait;
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Refresher {}

    #[async_trait]
    impl CredentialProvider for Refresher {
        async fn issue(&self) -> anyhow::Result<Credential>;
    }
}

fn issuing_refresher() -> (Arc<MockRefresher>, Arc<AtomicUsize>) {
    let issued = Arc::new(AtomicUsize::new(1));
    let counter = issued.clone();
    let mut refresher = MockRefresher::new();
    refresher.expect_issue().returning(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(credential(&format!("tok-{}", n)))
    });
    (Arc::new(refresher), issued)
}

fn refresh_window() -> Duration {
    SessionConfig::default().refresh_delay() + Duration::from_secs(1)
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_creates_one_transport() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    connection
        .connect(credential("tok-1"), ConnectOptions::default())
        .await
        .unwrap();
    connection
        .connect(credential("tok-other"), ConnectOptions::default())
        .await
        .unwrap();

    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(connection.status(), ConnectionStatus::Connected);
    assert_eq!(connection.credential().unwrap().token, "tok-1");
    assert!(!connection.refresh_pending());
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_leaves_disconnected() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    harness.transport.fail_connect.store(true, Ordering::SeqCst);

    let result = connection
        .connect(credential("tok-1"), ConnectOptions::default())
        .await;
    assert!(matches!(result, Err(CallError::TransportFailure(_))));
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    assert!(harness.session.last_error().is_some());

    harness.transport.fail_connect.store(false, Ordering::SeqCst);
    connection
        .connect(credential("tok-1"), ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_hangs_up_and_is_idempotent() {
    let harness = Harness::connected().await;
    let connection = harness.session.connection();
    let call = harness.active_outbound().await;
    let client = harness.client();

    connection.disconnect().await;
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    assert_eq!(call.ops(), vec!["start", "hangup"]);
    assert_eq!(client.disconnect_count(), 1);
    assert_eq!(harness.session.calls().state(), CallState::Idle);
    assert!(!harness.session.calls().duration().is_running());
    assert!(connection.credential().is_none());

    connection.disconnect().await;
    settle().await;
    assert_eq!(client.disconnect_count(), 1);
    // our own teardown closes the socket; that is not an error
    assert!(harness.session.last_error().is_none());

    let result = harness
        .session
        .calls()
        .dial("4155551212", DialOptions::default())
        .await;
    assert_eq!(result, Err(CallError::ConnectionRequired));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reconnects_with_new_credential() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let mut events = harness.session.subscribe();
    let (refresher, _) = issuing_refresher();

    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();
    assert!(connection.refresh_pending());
    let first = harness.client();

    tokio::time::sleep(Duration::from_secs(2800)).await;
    assert_eq!(harness.transport.connect_count(), 1);

    tokio::time::sleep(Duration::from_secs(81)).await;
    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(first.disconnect_count(), 1);
    assert_eq!(harness.transport.credentials.lock()[1].token, "tok-2");
    assert_eq!(connection.credential().unwrap().token, "tok-2");
    assert_eq!(connection.status(), ConnectionStatus::Connected);
    assert!(connection.refresh_pending());
    assert!(drain(&mut events).contains(&SessionEvent::CredentialRefreshed {
        subscriber_id: "sub-1".to_string(),
    }));

    // Self-perpetuating, one refresh per window
    tokio::time::sleep(refresh_window()).await;
    assert_eq!(harness.transport.connect_count(), 3);
    assert_eq!(connection.credential().unwrap().token, "tok-3");
    assert!(harness.session.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_is_recorded_without_retry() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let mut refresher = MockRefresher::new();
    refresher
        .expect_issue()
        .times(1)
        .returning(|| Err(anyhow::anyhow!("401 Unauthorized")));

    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(Arc::new(refresher)),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(refresh_window() * 3).await;
    assert!(matches!(
        harness.session.last_error(),
        Some(CallError::RefreshFailure(_))
    ));
    // degraded: still on the stale token, nothing rescheduled
    assert_eq!(connection.status(), ConnectionStatus::Connected);
    assert_eq!(connection.credential().unwrap().token, "tok-1");
    assert_eq!(harness.transport.connect_count(), 1);
    assert!(!connection.refresh_pending());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failure_with_backoff_retries() {
    let config = SessionConfig {
        retry: RetryConfig::Backoff {
            max_attempts: 2,
            base_ms: 1000,
            max_ms: None,
        },
        ..Default::default()
    };
    let harness = Harness::with_config(FakeMicrophone::default(), config);
    let connection = harness.session.connection();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let mut refresher = MockRefresher::new();
    refresher.expect_issue().returning(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow::anyhow!("timeout"))
        } else {
            Ok(credential("tok-2"))
        }
    });

    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(Arc::new(refresher)),
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(refresh_window() + Duration::from_secs(5)).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(connection.credential().unwrap().token, "tok-2");
    assert_eq!(harness.transport.connect_count(), 2);
    assert!(connection.refresh_pending());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_mid_call_drops_the_call() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let (refresher, _) = issuing_refresher();
    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();
    let call = harness.active_outbound().await;

    tokio::time::sleep(refresh_window()).await;
    assert_eq!(call.ops(), vec!["start", "hangup"]);
    assert_eq!(harness.session.calls().state(), CallState::Idle);
    assert!(!harness.session.calls().duration().is_running());
    assert_eq!(connection.status(), ConnectionStatus::Connected);
    assert_eq!(harness.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_presence() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let queues = vec!["dispatch".to_string(), "overflow".to_string()];
    assert_eq!(
        connection.go_online(&queues).await,
        Err(CallError::ConnectionRequired)
    );
    assert_eq!(connection.go_offline().await, Err(CallError::ConnectionRequired));

    connection
        .connect(credential("tok-1"), ConnectOptions::default())
        .await
        .unwrap();
    let client = harness.client();
    connection.go_online(&queues).await.unwrap();
    assert_eq!(
        connection.presence(),
        Presence::Online {
            queues: queues.clone()
        }
    );
    connection.go_offline().await.unwrap();
    assert_eq!(connection.presence(), Presence::Offline);
    assert_eq!(
        *client.presence.lock(),
        vec!["online:dispatch,overflow".to_string(), "offline".to_string()]
    );

    client.fail_presence.store(true, Ordering::SeqCst);
    let result = connection.go_online(&queues).await;
    assert!(matches!(result, Err(CallError::TransportFailure(_))));
    assert_eq!(connection.presence(), Presence::Offline);
    assert_eq!(connection.status(), ConnectionStatus::Connected);

    client.fail_presence.store(false, Ordering::SeqCst);
    connection.go_online(&queues).await.unwrap();
    connection.disconnect().await;
    assert_eq!(connection.presence(), Presence::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_socket_closed_releases_call() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let (refresher, _) = issuing_refresher();
    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();
    let call = harness.client().ring("in-1", "+14155551212");
    settle().await;
    assert_eq!(harness.session.calls().state(), CallState::Ringing);

    harness.client().emit(ClientEvent::SocketClosed);
    settle().await;
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    assert_eq!(harness.session.calls().state(), CallState::Idle);
    assert!(call.ops().is_empty());
    assert!(!connection.refresh_pending());
    assert_eq!(
        harness.session.last_error(),
        Some(CallError::TransportFailure("socket closed".to_string()))
    );

    // manual reconnect is possible
    connection
        .connect(credential("tok-1"), ConnectOptions::default())
        .await
        .unwrap();
    assert_eq!(harness.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_client_events() {
    let harness = Harness::connected().await;
    let connection = harness.session.connection();
    let client = harness.client();

    client.emit(ClientEvent::Ready);
    client.emit(ClientEvent::Other("signalwire.authorization.state".to_string()));
    settle().await;
    assert!(harness.session.last_error().is_none());

    client.emit(ClientEvent::Error("ice gathering failed".to_string()));
    settle().await;
    assert_eq!(
        harness.session.last_error(),
        Some(CallError::TransportFailure("ice gathering failed".to_string()))
    );
    assert_eq!(connection.status(), ConnectionStatus::Connected);

    harness.session.clear_error();
    assert!(harness.session.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_everything_down() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let (refresher, issued) = issuing_refresher();
    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();
    let call = harness.active_outbound().await;

    harness.session.shutdown().await;
    assert_eq!(connection.status(), ConnectionStatus::Disconnected);
    assert!(!connection.refresh_pending());
    assert_eq!(call.ops(), vec!["start", "hangup"]);

    tokio::time::sleep(refresh_window() * 2).await;
    assert_eq!(issued.load(Ordering::SeqCst), 1);
    assert_eq!(harness.transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_dial_leaves_no_call() {
    let harness = Harness::connected().await;
    let connection = harness.session.connection();
    let client = harness.client();
    *client.dial_delay.lock() = Duration::from_secs(1);

    let dialing = {
        let calls = harness.session.calls().clone();
        tokio::spawn(async move { calls.dial("4155551212", DialOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    connection.disconnect().await;

    assert_eq!(dialing.await.unwrap(), Err(CallError::ConnectionRequired));
    let calls = harness.session.calls();
    assert_eq!(calls.state(), CallState::Idle);
    assert!(calls.snapshot().session_id.is_none());
    assert_eq!(client.last_call().unwrap().ops(), vec!["hangup"]);

    connection
        .connect(credential("tok-2"), ConnectOptions::default())
        .await
        .unwrap();
    calls.dial("4155551212", DialOptions::default()).await.unwrap();
    assert_eq!(calls.state(), CallState::Dialing);
    assert_eq!(harness.client().last_call().unwrap().ops(), vec!["start"]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_during_dial_leaves_no_call() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let (refresher, _) = issuing_refresher();
    connection
        .connect(
            credential("tok-1"),
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();
    let first = harness.client();
    *first.dial_delay.lock() = Duration::from_secs(2);

    // the platform is still creating the call when the renewal fires
    tokio::time::sleep(Duration::from_secs(2879)).await;
    let dialing = {
        let calls = harness.session.calls().clone();
        tokio::spawn(async move { calls.dial("4155551212", DialOptions::default()).await })
    };

    assert_eq!(dialing.await.unwrap(), Err(CallError::ConnectionRequired));
    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(connection.credential().unwrap().token, "tok-2");
    let calls = harness.session.calls();
    assert_eq!(calls.state(), CallState::Idle);
    assert_eq!(first.last_call().unwrap().ops(), vec!["hangup"]);

    calls.dial("4155551212", DialOptions::default()).await.unwrap();
    assert_eq!(calls.state(), CallState::Dialing);
    assert_eq!(harness.client().last_call().unwrap().ops(), vec!["start"]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_follows_credential_expiry() {
    let harness = Harness::new(FakeMicrophone::default());
    let connection = harness.session.connection();
    let (refresher, _) = issuing_refresher();
    let mut short_lived = credential("tok-1");
    short_lived.expires_at = Some(chrono::Utc::now().timestamp() + 600);

    connection
        .connect(
            short_lived,
            ConnectOptions {
                refresher: Some(refresher),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(470)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(connection.credential().unwrap().token, "tok-2");
}
