//! provgrid-events — notification fan-out off the provisioning path.
//!
//! Provision tasks never call event handlers or failure listeners on
//! their own thread. They hand the notification to a
//! [`NotificationPool`], which runs it on a bounded set of background
//! tasks and logs (but otherwise ignores) whatever the handler returns.
//!
//! # Architecture
//!
//! ```text
//! NotificationPool
//!   ├── Semaphore (pool_size concurrent notifications)
//!   ├── registered EventHandlers ← publish(MonitorEvent)
//!   ├── submit(future) for listener callbacks
//!   └── InFlightTracker (wait_idle for shutdown and tests)
//! ```

pub mod event;
pub mod pool;
pub mod tracker;

pub use event::{EventHandler, MonitorEvent, ProvisionFailureEvent};
pub use pool::NotificationPool;
pub use tracker::{InFlightGuard, InFlightTracker};
