//! Counts work that has been spawned but not yet finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    idle: Notify,
}

/// Cloneable in-flight counter with an idle wait.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    inner: Arc<Inner>,
}

/// Decrements the tracker when dropped, including on panic unwind.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one unit of work. Hold the guard until it is done.
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Wait until no work is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_when_nothing_entered() {
        let tracker = InFlightTracker::new();
        tracker.wait_idle().await;
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn guard_drop_releases_waiters() {
        let tracker = InFlightTracker::new();
        let guard = tracker.enter();
        let second = tracker.enter();
        assert_eq!(tracker.count(), 2);

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracker.count(), 0);
    }
}
