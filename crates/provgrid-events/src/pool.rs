//! Bounded asynchronous notification pool.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use prov_core::BoxFuture;

use crate::event::{EventHandler, MonitorEvent};
use crate::tracker::InFlightTracker;

/// Runs notifications on background tasks, at most `pool_size` at a time.
///
/// Cloning shares the same permits, handlers and in-flight tracker.
#[derive(Clone)]
pub struct NotificationPool {
    permits: Arc<Semaphore>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    in_flight: InFlightTracker,
}

impl NotificationPool {
    pub fn new(pool_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            handlers: Arc::new(RwLock::new(Vec::new())),
            in_flight: InFlightTracker::new(),
        }
    }

    /// Register a handler for every subsequently published event.
    pub fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fan `event` out to every registered handler. Returns immediately.
    pub fn publish(&self, event: MonitorEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if handlers.is_empty() {
            debug!(kind = event.kind(), "no event handlers registered");
            return;
        }

        self.submit(Box::pin(async move {
            for handler in &handlers {
                if let Err(e) = handler.fire(&event).await {
                    warn!(kind = event.kind(), error = %e, "event handler failed");
                }
            }
        }));
    }

    /// Run an arbitrary notification on the pool. Returns immediately.
    pub fn submit(&self, notification: BoxFuture<'static, ()>) {
        let guard = self.in_flight.enter();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let _guard = guard;
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            notification.await;
        });
    }

    /// Notifications submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.in_flight.count()
    }

    /// Wait until every submitted notification has finished.
    pub async fn wait_idle(&self) {
        self.in_flight.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use prov_core::{RequestType, ServiceElement};

    use crate::event::ProvisionFailureEvent;

    #[derive(Default)]
    struct Recording {
        kinds: Mutex<Vec<&'static str>>,
    }

    impl EventHandler for Recording {
        fn fire<'a>(&'a self, event: &'a MonitorEvent) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.kinds.lock().unwrap().push(event.kind());
                Ok(())
            })
        }
    }

    struct Failing;

    impl EventHandler for Failing {
        fn fire<'a>(&'a self, _event: &'a MonitorEvent) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async { Err(anyhow::anyhow!("listener exploded")) })
        }
    }

    fn failure() -> MonitorEvent {
        MonitorEvent::ProvisionFailure(ProvisionFailureEvent::new(
            "m1",
            Arc::new(ServiceElement::new("d", "s", "c")),
            RequestType::Provision,
            "no capacity",
        ))
    }

    #[tokio::test]
    async fn publish_reaches_every_handler() {
        let pool = NotificationPool::new(2);
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        pool.register(a.clone());
        pool.register(b.clone());
        assert_eq!(pool.handler_count(), 2);

        pool.publish(failure());
        pool.wait_idle().await;

        assert_eq!(*a.kinds.lock().unwrap(), vec!["provision_failure"]);
        assert_eq!(*b.kinds.lock().unwrap(), vec!["provision_failure"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_others() {
        let pool = NotificationPool::new(1);
        let recording = Arc::new(Recording::default());
        pool.register(Arc::new(Failing));
        pool.register(recording.clone());

        pool.publish(failure());
        pool.wait_idle().await;

        assert_eq!(recording.kinds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_without_handlers_is_noop() {
        let pool = NotificationPool::new(1);
        pool.publish(failure());
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        let pool = NotificationPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit(Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        pool.wait_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.pending(), 0);
    }
}
