//! provgrid-metrics — timing sinks for the provisioning core.
//!
//! Every provisioning attempt records its wall-clock duration into a
//! shared [`Watch`]. Watches live in a [`WatchRegistry`] so the daemon
//! can log them periodically and render them for scraping.
//!
//! # Architecture
//!
//! ```text
//! WatchRegistry
//!   ├── watch(name) → Arc<Watch> (get or create)
//!   ├── snapshot() → Vec<WatchStats>
//!   └── run() → periodic stats logging
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain
//! ```

pub mod prometheus;
pub mod watch;

pub use prometheus::render_prometheus;
pub use watch::{Watch, WatchRegistry, WatchStats};
