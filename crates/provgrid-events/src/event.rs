//! Events emitted by a provision monitor.

use std::fmt;
use std::sync::Arc;

use prov_core::{
    BoxFuture, InstantiateError, RequestType, ServiceBeanInstance, ServiceElement, epoch_secs,
};

/// A provisioning attempt failed.
#[derive(Debug, Clone)]
pub struct ProvisionFailureEvent {
    /// Monitor that made the attempt.
    pub source: String,
    pub element: Arc<ServiceElement>,
    pub request_type: RequestType,
    /// Human-readable reason.
    pub reason: String,
    /// The remote fault, when there was one.
    pub cause: Option<InstantiateError>,
    /// Node the attempt was made against.
    pub node: Option<String>,
    /// Whether the request will be tried again.
    pub resubmitted: bool,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

impl ProvisionFailureEvent {
    pub fn new(
        source: &str,
        element: Arc<ServiceElement>,
        request_type: RequestType,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source: source.to_string(),
            element,
            request_type,
            reason: reason.into(),
            cause: None,
            node: None,
            resubmitted: false,
            timestamp: epoch_secs(),
        }
    }

    pub fn with_cause(mut self, cause: InstantiateError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn resubmitted(mut self, resubmitted: bool) -> Self {
        self.resubmitted = resubmitted;
        self
    }
}

/// Everything the monitor tells its event handlers about.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    ProvisionFailure(ProvisionFailureEvent),
    ServiceProvisioned {
        instance: ServiceBeanInstance,
        request_type: RequestType,
    },
    /// A node left the candidate pool.
    ResourceDropped {
        node: String,
        address: String,
        reason: String,
        /// Instances that were running on the node.
        orphaned: Vec<ServiceBeanInstance>,
    },
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::ProvisionFailure(_) => "provision_failure",
            MonitorEvent::ServiceProvisioned { .. } => "service_provisioned",
            MonitorEvent::ResourceDropped { .. } => "resource_dropped",
        }
    }
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEvent::ProvisionFailure(e) => write!(
                f,
                "provision of {} failed: {} (resubmitted: {})",
                e.element.qualified_name(),
                e.reason,
                e.resubmitted
            ),
            MonitorEvent::ServiceProvisioned { instance, .. } => write!(
                f,
                "{} provisioned on {} as {}",
                instance.service, instance.node_name, instance.id
            ),
            MonitorEvent::ResourceDropped { node, reason, .. } => {
                write!(f, "node {node} dropped: {reason}")
            }
        }
    }
}

/// Receives monitor events on the notification pool.
pub trait EventHandler: Send + Sync {
    fn fire<'a>(&'a self, event: &'a MonitorEvent) -> BoxFuture<'a, anyhow::Result<()>>;
}
