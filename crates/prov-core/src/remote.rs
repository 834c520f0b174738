//! The remote capability a cybernode exposes to the provisioner.
//!
//! The transport behind it (RMI, gRPC, in-process) is the implementor's
//! business; the provisioner only sees the boxed future.

use std::future::Future;
use std::pin::Pin;

use crate::fault::InstantiateError;
use crate::types::{InstantiationEvent, ServiceBeanInstance};

/// Boxed, sendable future used by capability traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one `instantiate` call.
///
/// `Ok(None)` means the node declined without error (for example while it
/// is tearing down an unrelated service).
pub type InstantiateFuture<'a> =
    BoxFuture<'a, Result<Option<ServiceBeanInstance>, InstantiateError>>;

/// A compute node able to host service instances.
pub trait Instantiator: Send + Sync {
    /// Instantiate the service described by `event`.
    fn instantiate<'a>(&'a self, event: &'a InstantiationEvent) -> InstantiateFuture<'a>;
}
