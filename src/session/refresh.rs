use crate::config::RetryConfig;
use crate::error::CallResult;
use parking_lot::Mutex;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type RefreshFuture = BoxFuture<'static, CallResult<()>>;
pub type RefreshJob = Arc<dyn Fn() -> RefreshFuture + Send + Sync>;

/// Decides whether a failed refresh is attempted again, and when.
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the zero-based index of the attempt that just failed.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// A failed refresh leaves the connection degraded until reconnected by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        // up to 10% jitter so many consoles do not hit the token endpoint together
        let jitter_ms = delay.as_millis() as u64 / 10;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        Some((delay + Duration::from_millis(jitter)).min(self.max))
    }
}

pub fn retry_policy(config: &RetryConfig) -> Arc<dyn RetryPolicy> {
    match config {
        RetryConfig::None => Arc::new(NoRetry),
        RetryConfig::Backoff {
            max_attempts,
            base_ms,
            max_ms,
        } => Arc::new(ExponentialBackoff {
            max_attempts: *max_attempts,
            base: Duration::from_millis(*base_ms),
            max: Duration::from_millis(max_ms.unwrap_or(60_000)),
        }),
    }
}

struct Pending {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    pending: Mutex<Option<Pending>>,
    next_generation: AtomicU64,
    policy: Arc<dyn RetryPolicy>,
}

/// Single pending credential refresh timer.
///
/// Scheduling always cancels the previous timer. A timer that fires detaches
/// itself before running the job, so the job may freely cancel or reschedule
/// (the reconnect it performs does both) without cancelling itself.
#[derive(Clone)]
pub struct TokenRefreshScheduler {
    inner: Arc<Inner>,
}

impl Default for TokenRefreshScheduler {
    fn default() -> Self {
        Self::new(Arc::new(NoRetry))
    }
}

impl TokenRefreshScheduler {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                policy,
            }),
        }
    }

    pub fn schedule(&self, job: RefreshJob, delay: Duration) {
        self.arm(job, delay, 0);
    }

    fn arm(&self, job: RefreshJob, delay: Duration, attempt: u32) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        {
            let mut pending = self.inner.pending.lock();
            if let Some(previous) = pending.take() {
                debug!(generation = previous.generation, "replacing pending refresh");
                previous.token.cancel();
            }
            *pending = Some(Pending {
                generation,
                token: token.clone(),
            });
        }
        debug!(
            generation,
            attempt,
            delay_secs = delay.as_secs(),
            "credential refresh scheduled"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }
            if !scheduler.detach(generation) {
                return;
            }
            info!(generation, attempt, "refreshing credential");
            if let Err(e) = job().await {
                match scheduler.inner.policy.next_delay(attempt) {
                    Some(retry_in) => {
                        warn!(
                            attempt,
                            retry_in_ms = retry_in.as_millis() as u64,
                            "credential refresh failed, retrying: {}",
                            e
                        );
                        scheduler.arm(job, retry_in, attempt + 1);
                    }
                    None => {
                        warn!(attempt, "credential refresh failed, giving up: {}", e);
                    }
                }
            }
        });
    }

    fn detach(&self, generation: u64) -> bool {
        let mut pending = self.inner.pending.lock();
        match pending.as_ref() {
            Some(current) if current.generation == generation => {
                pending.take();
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.inner.pending.lock().take() {
            debug!(generation = previous.generation, "credential refresh cancelled");
            previous.token.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.lock().is_some()
    }
}
