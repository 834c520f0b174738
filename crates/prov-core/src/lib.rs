//! prov-core — shared vocabulary for the provgrid provisioning core.
//!
//! Everything here is value data or a narrow capability trait. The
//! provisioning, selection, event and peer crates all build on it.
//!
//! - **`types`** — service definitions, deployed instances, instantiation events
//! - **`fault`** — the closed fault model returned by remote instantiate calls
//!   and the retryable/non-retryable root-cause taxonomy
//! - **`remote`** — the `Instantiator` capability exposed by a cybernode
//! - **`config`** — `provmond.toml` parsing

pub mod config;
pub mod fault;
pub mod remote;
pub mod types;

pub use config::{
    ConfigError, ConfigResult, CybernodeConfig, DeploymentConfig, EventsConfig, FaultsConfig,
    MonitorConfig, MonitorSection, PeersConfig, ProvisioningConfig, SelectorPolicy, ServiceConfig,
    parse_duration,
};
pub use fault::{CauseKind, FaultCause, FaultTaxonomy, InstantiateError};
pub use remote::{BoxFuture, InstantiateFuture, Instantiator};
pub use types::*;
