//! Process watchdog
//!
//! Both execution contexts feed their handle on every loop iteration; the
//! monitor notices a context that has gone quiet past the deadline. Losing
//! liveness is the one condition the gateway does not try to recover from
//! — the supervisor (systemd, container runtime) restarts a killed
//! process, whereas a wedged pipeline would silently drop traffic forever.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

/// Feed point for one execution context
#[derive(Clone)]
pub struct WatchdogHandle {
    last_feed_ms: Arc<AtomicU64>,
    epoch: Instant,
}

impl WatchdogHandle {
    /// Record liveness; call once per loop iteration
    pub fn feed(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_feed_ms.store(elapsed, Ordering::Relaxed);
    }
}

struct Registered {
    name: String,
    last_feed_ms: Arc<AtomicU64>,
}

/// Liveness monitor over the registered execution contexts
pub struct Watchdog {
    timeout: Duration,
    epoch: Instant,
    contexts: Mutex<Vec<Registered>>,
}

impl Watchdog {
    /// Create a watchdog with the given per-context deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            epoch: Instant::now(),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Register an execution context and get its feed handle
    pub fn register(&self, name: impl Into<String>) -> WatchdogHandle {
        let last_feed_ms = Arc::new(AtomicU64::new(self.epoch.elapsed().as_millis() as u64));
        self.contexts.lock().push(Registered {
            name: name.into(),
            last_feed_ms: last_feed_ms.clone(),
        });
        WatchdogHandle {
            last_feed_ms,
            epoch: self.epoch,
        }
    }

    /// Check all contexts once; returns the first starved context's name
    pub fn check(&self) -> Option<String> {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let deadline_ms = self.timeout.as_millis() as u64;
        let contexts = self.contexts.lock();
        for ctx in contexts.iter() {
            let last = ctx.last_feed_ms.load(Ordering::Relaxed);
            if now_ms.saturating_sub(last) > deadline_ms {
                return Some(ctx.name.clone());
            }
        }
        None
    }

    /// Poll until a context starves; returns its name
    ///
    /// The caller decides what "fatal" means — the gateway aborts the
    /// process, tests just observe the return.
    pub async fn run(self: Arc<Self>) -> String {
        let poll = (self.timeout / 4).max(Duration::from_millis(100));
        loop {
            tokio::time::sleep(poll).await;
            if let Some(starved) = self.check() {
                error!(context = %starved, timeout = ?self.timeout, "watchdog deadline missed");
                return starved;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fed_context_passes() {
        let wd = Watchdog::new(Duration::from_millis(50));
        let handle = wd.register("rx");
        handle.feed();
        assert!(wd.check().is_none());
    }

    #[test]
    fn starved_context_is_named() {
        let wd = Watchdog::new(Duration::from_millis(10));
        let _rx = wd.register("rx");
        let publish = wd.register("publish");
        std::thread::sleep(Duration::from_millis(30));
        publish.feed();
        assert_eq!(wd.check().as_deref(), Some("rx"));
    }

    #[tokio::test]
    async fn run_returns_on_starvation() {
        let wd = Arc::new(Watchdog::new(Duration::from_millis(50)));
        let _handle = wd.register("rx");
        let starved = tokio::time::timeout(Duration::from_secs(2), wd.run())
            .await
            .expect("watchdog never fired");
        assert_eq!(starved, "rx");
    }

    #[tokio::test]
    async fn continuous_feeding_keeps_run_alive() {
        let wd = Arc::new(Watchdog::new(Duration::from_millis(50)));
        let handle = wd.register("rx");

        let feeder = tokio::spawn(async move {
            for _ in 0..10 {
                handle.feed();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let fired = tokio::time::timeout(Duration::from_millis(80), wd.clone().run()).await;
        assert!(fired.is_err(), "watchdog fired while being fed");
        feeder.await.unwrap();
    }
}
