//! Domain types shared by every provgrid crate.
//!
//! These are immutable value types once constructed. A `ServiceElement`
//! is usually wrapped in an `Arc` and shared by every request created
//! for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of a deployment (operational string).
pub type DeploymentName = String;

/// Identifier of a deployed service instance.
pub type InstanceId = String;

// ── Service definition ─────────────────────────────────────────────

/// Immutable descriptor of a deployable service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceElement {
    /// Service name, unique within its deployment.
    pub name: String,
    /// Deployment (operational string) this service belongs to.
    pub deployment: DeploymentName,
    /// Component to instantiate on the target (class / bundle reference).
    pub component: String,
    /// Number of instances the deployment wants running.
    pub planned: u32,
    /// Maximum instances of this service on a single node.
    pub max_per_node: Option<u32>,
    /// Resource requirements the target node must satisfy.
    pub requirements: ResourceRequirements,
    /// Opaque configuration handed to the instantiated service.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl ServiceElement {
    /// Create a definition with no requirements and one planned instance.
    pub fn new(deployment: &str, name: &str, component: &str) -> Self {
        Self {
            name: name.to_string(),
            deployment: deployment.to_string(),
            component: component.to_string(),
            planned: 1,
            max_per_node: None,
            requirements: ResourceRequirements::default(),
            config: HashMap::new(),
        }
    }

    /// `{deployment}/{name}`, the key for per-service bookkeeping.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.deployment, self.name)
    }
}

/// Requirements a candidate node must meet to host a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    /// Labels the node must carry with exactly these values.
    #[serde(default)]
    pub required_labels: HashMap<String, String>,
}

impl ResourceRequirements {
    /// Whether `labels` satisfy every required label.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.required_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
    }
}

// ── Requests and results ───────────────────────────────────────────

/// Why a provision request was created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// A new instance for a deployment.
    Provision,
    /// Moving a running instance off its current node.
    Relocate,
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestType::Provision => f.write_str("provision"),
            RequestType::Relocate => f.write_str("relocate"),
        }
    }
}

/// A running service instance, as reported by the node that created it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceBeanInstance {
    pub id: InstanceId,
    /// Qualified name of the service (`{deployment}/{name}`).
    pub service: String,
    /// Name of the node hosting the instance.
    pub node_name: String,
    /// Address of the node hosting the instance.
    pub host_address: String,
    /// Unix timestamp (seconds) of instantiation.
    pub instantiated_at: u64,
}

/// The message sent to a node's `instantiate` operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstantiationEvent {
    /// Monotonically increasing per provisioner instance.
    pub sequence: u64,
    /// Name of the monitor issuing the request.
    pub source: String,
    /// Token the node handed back when it registered; echoed for correlation.
    pub handback: Option<String>,
    pub request_type: RequestType,
    pub element: ServiceElement,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_joins_deployment_and_service() {
        let elem = ServiceElement::new("billing", "ledger", "ledger-svc");
        assert_eq!(elem.qualified_name(), "billing/ledger");
        assert_eq!(elem.planned, 1);
    }

    #[test]
    fn requirements_match_all_labels() {
        let mut req = ResourceRequirements::default();
        req.required_labels
            .insert("zone".to_string(), "a".to_string());

        let mut labels = HashMap::new();
        assert!(!req.matches(&labels));

        labels.insert("zone".to_string(), "b".to_string());
        assert!(!req.matches(&labels));

        labels.insert("zone".to_string(), "a".to_string());
        labels.insert("arch".to_string(), "x86_64".to_string());
        assert!(req.matches(&labels));
    }

    #[test]
    fn empty_requirements_match_anything() {
        assert!(ResourceRequirements::default().matches(&HashMap::new()));
    }

    #[test]
    fn request_type_serializes_snake_case() {
        let json = serde_json::to_string(&RequestType::Relocate).unwrap();
        assert_eq!(json, "\"relocate\"");
        assert_eq!(RequestType::Provision.to_string(), "provision");
    }
}
