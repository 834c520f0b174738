//! What a single provisioning attempt amounted to.

use std::fmt;

use prov_core::{FaultTaxonomy, InstantiateError, ServiceBeanInstance};

/// Reason and underlying fault of a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub reason: String,
    pub cause: Option<InstantiateError>,
}

impl Failure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cause: None,
        }
    }

    fn from_error(err: InstantiateError) -> Self {
        Self {
            reason: err.reason(),
            cause: Some(err),
        }
    }
}

/// Result of one provision task. Exactly one per task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisionOutcome {
    Success(ServiceBeanInstance),
    /// Worth trying again later; the node stays in the pool.
    TransientFailure(Failure),
    /// The service definition cannot run anywhere. Never retried.
    UninstantiableFailure(Failure),
    /// The node is unreliable. It has been dropped and the request goes
    /// straight to another candidate.
    BadNodeFailure(Failure),
}

impl ProvisionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProvisionOutcome::Success(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ProvisionOutcome::Success(_) => None,
            ProvisionOutcome::TransientFailure(f)
            | ProvisionOutcome::UninstantiableFailure(f)
            | ProvisionOutcome::BadNodeFailure(f) => Some(f),
        }
    }
}

impl fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionOutcome::Success(i) => write!(f, "provisioned {} on {}", i.id, i.node_name),
            ProvisionOutcome::TransientFailure(x) => write!(f, "transient failure: {}", x.reason),
            ProvisionOutcome::UninstantiableFailure(x) => {
                write!(f, "uninstantiable: {}", x.reason)
            }
            ProvisionOutcome::BadNodeFailure(x) => write!(f, "bad node: {}", x.reason),
        }
    }
}

/// An outcome plus whether the node it ran against must be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub outcome: ProvisionOutcome,
    pub drop_node: bool,
}

/// The node returned nothing on every immediate attempt.
pub fn declined(attempts: u32) -> Classification {
    Classification {
        outcome: ProvisionOutcome::TransientFailure(Failure::new(format!(
            "node declined {attempts} attempts, assuming no capacity"
        ))),
        drop_node: false,
    }
}

/// Map a remote fault onto an outcome.
///
/// A non-retryable root cause always drops the node. A definition-level
/// fault stays uninstantiable even then, so the request is not retried
/// elsewhere.
pub fn classify(err: InstantiateError, taxonomy: &FaultTaxonomy) -> Classification {
    let non_retryable = err
        .root_cause()
        .is_some_and(|cause| !taxonomy.is_retryable(cause));

    match err {
        InstantiateError::UnknownEvent(_) => Classification {
            outcome: ProvisionOutcome::BadNodeFailure(Failure::from_error(err)),
            drop_node: true,
        },
        InstantiateError::Instantiation {
            uninstantiable: true,
            ..
        }
        | InstantiateError::Unexpected(_) => Classification {
            outcome: ProvisionOutcome::UninstantiableFailure(Failure::from_error(err)),
            drop_node: non_retryable,
        },
        InstantiateError::Remote { .. } | InstantiateError::Instantiation { .. } => {
            if non_retryable {
                Classification {
                    outcome: ProvisionOutcome::BadNodeFailure(Failure::from_error(err)),
                    drop_node: true,
                }
            } else {
                Classification {
                    outcome: ProvisionOutcome::TransientFailure(Failure::from_error(err)),
                    drop_node: false,
                }
            }
        }
    }
}
