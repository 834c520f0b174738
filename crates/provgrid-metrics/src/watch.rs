//! Stop-watch style timing sinks.
//!
//! Counters are atomics; the sample window used for percentiles sits
//! behind a mutex and is bounded.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Samples kept per watch for percentile computation.
const DEFAULT_WINDOW: usize = 1024;

/// Point-in-time statistics for one watch, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchStats {
    pub name: String,
    /// Lifetime number of recordings.
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p99_ms: f64,
}

/// Records elapsed times under a name.
#[derive(Debug)]
pub struct Watch {
    name: String,
    count: AtomicU64,
    total_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
    window: usize,
    samples: Mutex<VecDeque<u64>>,
}

impl Watch {
    pub fn new(name: &str) -> Self {
        Self::with_window(name, DEFAULT_WINDOW)
    }

    pub fn with_window(name: &str, window: usize) -> Self {
        Self {
            name: name.to_string(),
            count: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
            window: window.max(1),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one elapsed time.
    pub async fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);

        let mut samples = self.samples.lock().await;
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(us);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> WatchStats {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_us.load(Ordering::Relaxed);
        let samples: Vec<u64> = self.samples.lock().await.iter().copied().collect();
        let (p50, p99) = compute_percentiles(&samples);

        let (min, max, mean) = if count == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                self.min_us.load(Ordering::Relaxed) as f64 / 1000.0,
                self.max_us.load(Ordering::Relaxed) as f64 / 1000.0,
                total as f64 / count as f64 / 1000.0,
            )
        };

        WatchStats {
            name: self.name.clone(),
            count,
            mean_ms: mean,
            min_ms: min,
            max_ms: max,
            p50_ms: p50,
            p99_ms: p99,
        }
    }

    /// Clear every counter and the sample window.
    pub async fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_us.store(0, Ordering::Relaxed);
        self.min_us.store(u64::MAX, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
        self.samples.lock().await.clear();
    }
}

/// Named watches shared across the monitor.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: RwLock<HashMap<String, Arc<Watch>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the watch called `name`, creating it on first use.
    pub async fn watch(&self, name: &str) -> Arc<Watch> {
        if let Some(w) = self.watches.read().await.get(name) {
            return w.clone();
        }
        let mut watches = self.watches.write().await;
        watches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(watch = %name, "watch registered");
                Arc::new(Watch::new(name))
            })
            .clone()
    }

    /// Statistics for every watch, sorted by name.
    pub async fn snapshot(&self) -> Vec<WatchStats> {
        let watches: Vec<Arc<Watch>> = self.watches.read().await.values().cloned().collect();
        let mut stats = Vec::with_capacity(watches.len());
        for w in watches {
            stats.push(w.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Log watch statistics every `interval` until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "watch reporter started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    for s in self.snapshot().await {
                        info!(
                            watch = %s.name,
                            count = s.count,
                            mean_ms = s.mean_ms,
                            p99_ms = s.p99_ms,
                            "watch stats"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!("watch reporter shutting down");
                    break;
                }
            }
        }
    }
}

/// P50 and P99 in milliseconds from microsecond samples. `(0.0, 0.0)` if empty.
fn compute_percentiles(samples: &[u64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50).ceil() as usize - 1;
    let p99_idx = (sorted.len() as f64 * 0.99).ceil() as usize - 1;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    (p50, p99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_watch_reports_zeros() {
        let watch = Watch::new("provision");
        let stats = watch.stats().await;
        assert_eq!(stats.count, 0);
        assert_eq!(stats.min_ms, 0.0);
        assert_eq!(stats.p99_ms, 0.0);
    }

    #[tokio::test]
    async fn records_min_max_mean() {
        let watch = Watch::new("provision");
        watch.record(Duration::from_millis(10)).await;
        watch.record(Duration::from_millis(20)).await;
        watch.record(Duration::from_millis(30)).await;

        let stats = watch.stats().await;
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 30.0);
        assert_eq!(stats.mean_ms, 20.0);
        assert_eq!(stats.p50_ms, 20.0);
        assert_eq!(stats.p99_ms, 30.0);
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let watch = Watch::with_window("w", 2);
        watch.record(Duration::from_millis(100)).await;
        watch.record(Duration::from_millis(1)).await;
        watch.record(Duration::from_millis(2)).await;

        let stats = watch.stats().await;
        assert_eq!(stats.count, 3);
        // Lifetime max survives, percentiles only see the window.
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.p99_ms, 2.0);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let watch = Watch::new("w");
        watch.record(Duration::from_millis(5)).await;
        watch.reset().await;
        assert_eq!(watch.stats().await, Watch::new("w").stats().await);
    }

    #[tokio::test]
    async fn registry_returns_same_watch() {
        let registry = WatchRegistry::new();
        let a = registry.watch("provision").await;
        let b = registry.watch("provision").await;
        assert!(Arc::ptr_eq(&a, &b));

        a.record(Duration::from_millis(1)).await;
        registry.watch("allocation").await;

        let names: Vec<String> = registry.snapshot().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["allocation", "provision"]);
    }

    #[test]
    fn percentiles_single_sample() {
        assert_eq!(compute_percentiles(&[5000]), (5.0, 5.0));
    }
}
