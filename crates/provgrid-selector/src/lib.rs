//! provgrid-selector — the pool of cybernodes a monitor may provision to.
//!
//! # Architecture
//!
//! ```text
//! ResourceSelector (one lock over the candidate list)
//!   └── ServiceResource (selection bookkeeping)
//!       └── Arc<InstantiatorResource> (own lock over counters)
//!           ├── capacity / in-process count / deployed instances
//!           └── Arc<dyn Instantiator> (remote handle)
//! ```
//!
//! `get_next` reserves one in-process slot on the candidate it returns,
//! under the selector lock, so concurrent selections never over-commit a
//! node. The caller releases the reservation with
//! [`InstantiatorResource::decrement_provision_counter`] once its attempt
//! is over.

pub mod resource;
pub mod selector;

pub use resource::InstantiatorResource;
pub use selector::{
    LeastActiveSelector, ResourceSelector, RoundRobinSelector, ServiceResource, selector_for,
};
