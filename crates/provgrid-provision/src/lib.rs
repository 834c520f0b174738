//! provgrid-provision — turning provision requests into running instances.
//!
//! Requests arrive from a deployment manager, wait in one of two pending
//! queues, and are matched to a cybernode by the resource selector. Each
//! match becomes a provision task: one attempt against one node, ending
//! in exactly one [`ProvisionOutcome`].
//!
//! # Architecture
//!
//! ```text
//! ServiceProvisioner
//!   ├── submit() ──→ PendingManager (provision-pending)
//!   ├── dispatch() ─┐                PendingManager (failed-pending)
//!   ├── run() ──────┴→ process_pending()
//!   │                    └── ResourceSelector::get_next()
//!   │                          └── ProvisionTask (worker Semaphore)
//!   │                                ├── Instantiator::instantiate() × attempts
//!   │                                └── classify() → ProvisionOutcome
//!   │                                      ├── Success → listeners, ServiceProvisioned
//!   │                                      ├── Transient → back to origin queue slot
//!   │                                      ├── Uninstantiable → listener, never retried
//!   │                                      └── BadNode → drop node, redispatch
//!   └── NotificationPool (failure events + failed() callbacks)
//! ```

pub mod error;
pub mod outcome;
pub mod pending;
pub mod provisioner;
pub mod request;
mod task;

pub use error::{ProvisionError, ProvisionResult};
pub use outcome::{Classification, Failure, ProvisionOutcome, classify};
pub use pending::{PendingEntry, PendingKind, PendingManager};
pub use provisioner::{ALLOCATION_WATCH, Dispatch, Origin, PROVISION_WATCH, ServiceProvisioner};
pub use request::{
    DeploymentHandle, ProvisionListener, ProvisionRequest, RequestId, ServiceProvisionListener,
};
