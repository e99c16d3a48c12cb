use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Ticker {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    elapsed: AtomicU64,
    ticker: Mutex<Option<Ticker>>,
    next_generation: AtomicU64,
}

/// Once-per-second counter for the active call.
///
/// Each `start` gets a fresh generation; a tick from a superseded ticker is
/// discarded under the same lock `stop` takes, so a stopped tracker never
/// reads anything but zero.
#[derive(Clone)]
pub struct DurationTracker {
    inner: Arc<Inner>,
}

impl Inner {
    fn tick(&self, generation: u64) -> bool {
        let ticker = self.ticker.lock();
        match ticker.as_ref() {
            Some(current) if current.generation == generation => {
                self.elapsed.fetch_add(1, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

impl Default for DurationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                elapsed: AtomicU64::new(0),
                ticker: Mutex::new(None),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Reset to zero and start counting. Restarts if already running.
    pub fn start(&self) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        {
            let mut ticker = self.inner.ticker.lock();
            if let Some(previous) = ticker.take() {
                previous.token.cancel();
            }
            self.inner.elapsed.store(0, Ordering::SeqCst);
            *ticker = Some(Ticker {
                generation,
                token: token.clone(),
            });
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if !inner.tick(generation) {
                            break;
                        }
                    }
                }
            }
            debug!(generation, "duration ticker stopped");
        });
    }

    /// Stop counting and reset to zero. Safe to call when not running.
    pub fn stop(&self) {
        let mut ticker = self.inner.ticker.lock();
        if let Some(previous) = ticker.take() {
            previous.token.cancel();
        }
        self.inner.elapsed.store(0, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.ticker.lock().is_some()
    }

    pub fn elapsed(&self) -> u64 {
        self.inner.elapsed.load(Ordering::SeqCst)
    }

    pub fn formatted(&self) -> String {
        format_duration(self.elapsed())
    }
}

/// `mm:ss` with unbounded minutes.
pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
