//! Remote fault model.
//!
//! A node's `instantiate` call fails with exactly one [`InstantiateError`]
//! variant. Communication faults carry a [`FaultCause`] describing the
//! root cause; the [`FaultTaxonomy`] decides whether that root cause is
//! transient (retryable) or means the node can no longer be trusted.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed list of root-cause kinds a remote fault can carry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    ConnectionReset,
    ConnectionRefused,
    Timeout,
    Io,
    UnknownHost,
    NoSuchObject,
    PermissionDenied,
    Security,
    Marshalling,
    Other,
}

impl CauseKind {
    pub const ALL: [CauseKind; 10] = [
        CauseKind::ConnectionReset,
        CauseKind::ConnectionRefused,
        CauseKind::Timeout,
        CauseKind::Io,
        CauseKind::UnknownHost,
        CauseKind::NoSuchObject,
        CauseKind::PermissionDenied,
        CauseKind::Security,
        CauseKind::Marshalling,
        CauseKind::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CauseKind::ConnectionReset => "connection_reset",
            CauseKind::ConnectionRefused => "connection_refused",
            CauseKind::Timeout => "timeout",
            CauseKind::Io => "io",
            CauseKind::UnknownHost => "unknown_host",
            CauseKind::NoSuchObject => "no_such_object",
            CauseKind::PermissionDenied => "permission_denied",
            CauseKind::Security => "security",
            CauseKind::Marshalling => "marshalling",
            CauseKind::Other => "other",
        }
    }
}

impl fmt::Display for CauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CauseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CauseKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown fault cause kind: {s}"))
    }
}

/// The root cause of a remote fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultCause {
    pub kind: CauseKind,
    pub message: String,
}

impl FaultCause {
    pub fn new(kind: CauseKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Failure of a single remote `instantiate` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstantiateError {
    /// The node did not recognise the instantiation event.
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// The call did not complete (transport or remote-object fault).
    #[error("remote fault: {cause}")]
    Remote { cause: FaultCause },

    /// The node ran the instantiation and it failed.
    ///
    /// `uninstantiable` is set when the node judged the service definition
    /// itself defective, so no other node would do better.
    #[error("instantiation failed: {reason}")]
    Instantiation {
        reason: String,
        uninstantiable: bool,
        cause: Option<FaultCause>,
    },

    /// Anything the node raised that fits none of the above.
    #[error("unexpected fault: {0}")]
    Unexpected(String),
}

impl InstantiateError {
    pub fn remote(kind: CauseKind, message: impl Into<String>) -> Self {
        InstantiateError::Remote {
            cause: FaultCause::new(kind, message),
        }
    }

    pub fn uninstantiable(reason: impl Into<String>) -> Self {
        InstantiateError::Instantiation {
            reason: reason.into(),
            uninstantiable: true,
            cause: None,
        }
    }

    /// Root cause used for retryability classification, if the fault has one.
    pub fn root_cause(&self) -> Option<&FaultCause> {
        match self {
            InstantiateError::Remote { cause } => Some(cause),
            InstantiateError::Instantiation { cause, .. } => cause.as_ref(),
            InstantiateError::UnknownEvent(_) | InstantiateError::Unexpected(_) => None,
        }
    }

    /// Human-readable reason, preferring the root cause where present.
    pub fn reason(&self) -> String {
        match self {
            InstantiateError::Remote { cause } => cause.to_string(),
            InstantiateError::Instantiation { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Which root causes are transient.
///
/// Anything listed in `non_retryable` marks the node as unreliable;
/// everything else is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultTaxonomy {
    non_retryable: HashSet<CauseKind>,
}

impl FaultTaxonomy {
    pub fn new(non_retryable: impl IntoIterator<Item = CauseKind>) -> Self {
        Self {
            non_retryable: non_retryable.into_iter().collect(),
        }
    }

    pub fn is_retryable(&self, cause: &FaultCause) -> bool {
        !self.non_retryable.contains(&cause.kind)
    }

    pub fn non_retryable(&self) -> impl Iterator<Item = &CauseKind> {
        self.non_retryable.iter()
    }
}

impl Default for FaultTaxonomy {
    fn default() -> Self {
        Self::new([
            CauseKind::ConnectionRefused,
            CauseKind::UnknownHost,
            CauseKind::NoSuchObject,
            CauseKind::PermissionDenied,
            CauseKind::Security,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_taxonomy_splits_transient_from_permanent() {
        let taxonomy = FaultTaxonomy::default();

        for kind in [
            CauseKind::ConnectionReset,
            CauseKind::Timeout,
            CauseKind::Io,
            CauseKind::Marshalling,
            CauseKind::Other,
        ] {
            assert!(taxonomy.is_retryable(&FaultCause::new(kind, "x")), "{kind}");
        }

        for kind in [
            CauseKind::ConnectionRefused,
            CauseKind::UnknownHost,
            CauseKind::NoSuchObject,
            CauseKind::PermissionDenied,
            CauseKind::Security,
        ] {
            assert!(!taxonomy.is_retryable(&FaultCause::new(kind, "x")), "{kind}");
        }
    }

    #[test]
    fn custom_taxonomy() {
        let taxonomy = FaultTaxonomy::new([CauseKind::Timeout]);
        assert!(!taxonomy.is_retryable(&FaultCause::new(CauseKind::Timeout, "slow")));
        assert!(taxonomy.is_retryable(&FaultCause::new(CauseKind::PermissionDenied, "no")));
    }

    #[test]
    fn cause_kind_parses_its_own_name() {
        for kind in CauseKind::ALL {
            assert_eq!(kind.as_str().parse::<CauseKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<CauseKind>().is_err());
    }

    #[test]
    fn root_cause_per_variant() {
        let remote = InstantiateError::remote(CauseKind::ConnectionReset, "reset by peer");
        assert_eq!(remote.root_cause().unwrap().kind, CauseKind::ConnectionReset);
        assert_eq!(remote.reason(), "connection_reset: reset by peer");

        assert!(InstantiateError::uninstantiable("bad bundle").root_cause().is_none());
        assert!(InstantiateError::UnknownEvent("seq 4".into()).root_cause().is_none());
        assert!(InstantiateError::Unexpected("boom".into()).root_cause().is_none());

        let with_cause = InstantiateError::Instantiation {
            reason: "denied".into(),
            uninstantiable: false,
            cause: Some(FaultCause::new(CauseKind::Security, "policy")),
        };
        assert_eq!(with_cause.root_cause().unwrap().kind, CauseKind::Security);
    }
}
