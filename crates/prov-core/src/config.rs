//! provmond.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::fault::{CauseKind, FaultTaxonomy};
use crate::types::{ResourceRequirements, ServiceElement};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub peers: PeersConfig,
    /// Simulated nodes for standalone mode.
    #[serde(default)]
    pub cybernodes: Vec<CybernodeConfig>,
    /// Deployments loaded at startup.
    #[serde(default)]
    pub deployments: Vec<DeploymentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    pub name: String,
    pub address: String,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            name: "provmond".to_string(),
            address: "127.0.0.1:1099".to_string(),
        }
    }
}

/// Candidate selection policy for the resource selector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectorPolicy {
    #[default]
    RoundRobin,
    LeastActive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Maximum concurrently executing provision tasks.
    pub worker_pool_size: usize,
    /// Immediate instantiate attempts against one node before giving up.
    pub instantiate_attempts: u32,
    /// Pause after a node declines before the next immediate attempt.
    #[serde(with = "duration_str")]
    pub retry_pause: Duration,
    /// Upper bound between pending-queue traversals when nothing wakes the loop.
    #[serde(with = "duration_str")]
    pub pending_interval: Duration,
    pub selector: SelectorPolicy,
    pub faults: FaultsConfig,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
            instantiate_attempts: 3,
            retry_pause: Duration::from_secs(1),
            pending_interval: Duration::from_secs(5),
            selector: SelectorPolicy::default(),
            faults: FaultsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultsConfig {
    /// Root-cause kinds that mark a node as unreliable.
    pub non_retryable: Vec<CauseKind>,
}

impl Default for FaultsConfig {
    fn default() -> Self {
        let mut non_retryable: Vec<CauseKind> =
            FaultTaxonomy::default().non_retryable().copied().collect();
        non_retryable.sort_by_key(|k| k.as_str());
        Self { non_retryable }
    }
}

impl FaultsConfig {
    pub fn taxonomy(&self) -> FaultTaxonomy {
        FaultTaxonomy::new(self.non_retryable.iter().copied())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum concurrently running notification tasks.
    pub pool_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { pool_size: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    /// How often peers are polled while waiting on the initial-load barrier.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CybernodeConfig {
    pub name: String,
    pub address: String,
    /// Maximum services this node hosts.
    pub capacity: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub component: String,
    #[serde(default = "default_planned")]
    pub planned: u32,
    pub max_per_node: Option<u32>,
    #[serde(default)]
    pub required_labels: HashMap<String, String>,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_planned() -> u32 {
    1
}

impl DeploymentConfig {
    /// Build the immutable service definitions for this deployment.
    pub fn service_elements(&self) -> Vec<Arc<ServiceElement>> {
        self.services
            .iter()
            .map(|s| {
                Arc::new(ServiceElement {
                    name: s.name.clone(),
                    deployment: self.name.clone(),
                    component: s.component.clone(),
                    planned: s.planned,
                    max_per_node: s.max_per_node,
                    requirements: ResourceRequirements {
                        required_labels: s.required_labels.clone(),
                    },
                    config: s.config.clone(),
                })
            })
            .collect()
    }
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the provisioner cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.provisioning.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.provisioning.instantiate_attempts == 0 {
            return Err(ConfigError::Invalid(
                "provisioning.instantiate_attempts must be at least 1".to_string(),
            ));
        }
        if self.events.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "events.pool_size must be at least 1".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for node in &self.cybernodes {
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate cybernode name: {}",
                    node.name
                )));
            }
        }

        for deployment in &self.deployments {
            let mut services = std::collections::HashSet::new();
            for svc in &deployment.services {
                if !services.insert(svc.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "duplicate service {} in deployment {}",
                        svc.name, deployment.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Parse a duration string such as `"1s"`, `"500ms"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let invalid = || ConfigError::Duration(s.to_string());

    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => return Err(invalid()),
    };
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let secs = |scale: u64| {
        value
            .checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(invalid()),
    }
}

fn format_duration(d: &Duration) -> String {
    let ms = d.as_millis();
    if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_defaults() {
        let config = MonitorConfig::parse("").unwrap();
        assert_eq!(config.monitor.name, "provmond");
        assert_eq!(config.provisioning.worker_pool_size, 16);
        assert_eq!(config.provisioning.instantiate_attempts, 3);
        assert_eq!(config.provisioning.retry_pause, Duration::from_secs(1));
        assert_eq!(config.provisioning.pending_interval, Duration::from_secs(5));
        assert_eq!(config.provisioning.selector, SelectorPolicy::RoundRobin);
        assert_eq!(config.peers.poll_interval, Duration::from_secs(1));
        assert_eq!(config.events.pool_size, 8);
        assert_eq!(
            config.provisioning.faults.taxonomy(),
            FaultTaxonomy::default()
        );
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[monitor]
name = "monitor-1"
address = "10.0.0.1:1099"

[provisioning]
worker_pool_size = 4
retry_pause = "250ms"
selector = "least_active"

[provisioning.faults]
non_retryable = ["permission_denied", "timeout"]

[peers]
poll_interval = "2s"

[[cybernodes]]
name = "node-a"
address = "10.0.0.10"
capacity = 4
labels = { zone = "a" }

[[deployments]]
name = "billing"

[[deployments.services]]
name = "ledger"
component = "ledger-svc"
planned = 2
max_per_node = 1
required_labels = { zone = "a" }
"#;
        let config = MonitorConfig::parse(toml_str).unwrap();
        assert_eq!(config.monitor.name, "monitor-1");
        assert_eq!(config.provisioning.worker_pool_size, 4);
        assert_eq!(config.provisioning.instantiate_attempts, 3);
        assert_eq!(config.provisioning.retry_pause, Duration::from_millis(250));
        assert_eq!(config.provisioning.selector, SelectorPolicy::LeastActive);
        assert_eq!(config.peers.poll_interval, Duration::from_secs(2));

        let taxonomy = config.provisioning.faults.taxonomy();
        assert!(!taxonomy.is_retryable(&crate::FaultCause::new(CauseKind::Timeout, "t")));
        assert!(taxonomy.is_retryable(&crate::FaultCause::new(CauseKind::Security, "s")));

        assert_eq!(config.cybernodes[0].labels.get("zone").unwrap(), "a");

        let elems = config.deployments[0].service_elements();
        assert_eq!(elems.len(), 1);
        assert_eq!(elems[0].qualified_name(), "billing/ledger");
        assert_eq!(elems[0].planned, 2);
        assert_eq!(elems[0].max_per_node, Some(1));
        assert_eq!(
            elems[0].requirements.required_labels.get("zone").unwrap(),
            "a"
        );
    }

    #[test]
    fn unknown_cause_kind_is_rejected() {
        let toml_str = r#"
[provisioning.faults]
non_retryable = ["cosmic_rays"]
"#;
        assert!(matches!(
            MonitorConfig::parse(toml_str),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let toml_str = r#"
[provisioning]
retry_pause = "soon"
"#;
        assert!(MonitorConfig::parse(toml_str).is_err());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let toml_str = r#"
[provisioning]
worker_pool_size = 0
"#;
        assert!(matches!(
            MonitorConfig::parse(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_cybernode_is_rejected() {
        let toml_str = r#"
[[cybernodes]]
name = "a"
address = "10.0.0.1"
capacity = 1

[[cybernodes]]
name = "a"
address = "10.0.0.2"
capacity = 1
"#;
        assert!(matches!(
            MonitorConfig::parse(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn oversized_duration_is_rejected() {
        assert!(matches!(
            parse_duration("307445734561825861m"),
            Err(ConfigError::Duration(_))
        ));
        assert!(matches!(
            parse_duration("99999999999999999h"),
            Err(ConfigError::Duration(_))
        ));

        let toml_str = r#"
[provisioning]
retry_pause = "99999999999999999h"
"#;
        assert!(MonitorConfig::parse(toml_str).is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = MonitorConfig::default();
        config.provisioning.retry_pause = Duration::from_millis(1500);
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("1500ms"));

        let parsed = MonitorConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.provisioning.retry_pause, Duration::from_millis(1500));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provmond.toml");
        std::fs::write(&path, "[monitor]\nname = \"m2\"\naddress = \"x:1\"\n").unwrap();

        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.monitor.name, "m2");
    }

    #[test]
    fn from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provmond.toml");
        std::fs::write(&path, "[events]\npool_size = 0\n").unwrap();

        assert!(matches!(
            MonitorConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));
    }
}
