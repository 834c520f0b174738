//! Provisioner error types.

use thiserror::Error;

/// Errors returned by provisioner operations.
///
/// Failed provisioning attempts are not errors; they are reported through
/// outcomes, events and listener callbacks.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("deployment not active: {0}")]
    DeploymentInactive(String),

    #[error("resource already registered: {0}")]
    DuplicateResource(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("instance {instance} not found on {node}")]
    InstanceNotFound { node: String, instance: String },
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
