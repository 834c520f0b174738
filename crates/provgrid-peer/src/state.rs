//! Peer identity and the initial-load state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PeerError, PeerResult};

/// Where a monitor is in loading its configured deployments.
///
/// Ordered; a monitor only ever moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    InitialDeploymentsPending,
    LoadingInitialDeployments,
    LoadedInitialDeployments,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::InitialDeploymentsPending => "initial_deployments_pending",
            LoadState::LoadingInitialDeployments => "loading_initial_deployments",
            LoadState::LoadedInitialDeployments => "loaded_initial_deployments",
        }
    }

    /// A peer in this state does not hold up our own initial load.
    pub fn is_settled(&self) -> bool {
        *self != LoadState::LoadingInitialDeployments
    }

    /// Move to `next`. Staying put or going back is an error.
    pub fn advance(&mut self, next: LoadState) -> PeerResult<()> {
        if next <= *self {
            return Err(PeerError::IllegalTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a monitor tells its peers about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub address: String,
    pub load_state: LoadState,
}

impl PeerInfo {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            load_state: LoadState::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let mut state = LoadState::default();
        state.advance(LoadState::LoadingInitialDeployments).unwrap();
        assert!(state.advance(LoadState::InitialDeploymentsPending).is_err());
        assert!(state.advance(LoadState::LoadingInitialDeployments).is_err());
        state.advance(LoadState::LoadedInitialDeployments).unwrap();
        assert_eq!(state, LoadState::LoadedInitialDeployments);
    }

    #[test]
    fn pending_may_skip_straight_to_loaded() {
        let mut state = LoadState::InitialDeploymentsPending;
        state.advance(LoadState::LoadedInitialDeployments).unwrap();
        assert_eq!(state, LoadState::LoadedInitialDeployments);
    }

    #[test]
    fn only_loading_is_unsettled() {
        assert!(LoadState::InitialDeploymentsPending.is_settled());
        assert!(!LoadState::LoadingInitialDeployments.is_settled());
        assert!(LoadState::LoadedInitialDeployments.is_settled());
    }

    #[test]
    fn illegal_transition_message() {
        let mut state = LoadState::LoadedInitialDeployments;
        let err = state.advance(LoadState::InitialDeploymentsPending).unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal load state transition: loaded_initial_deployments -> initial_deployments_pending"
        );
    }

    #[test]
    fn peer_info_serializes_snake_case() {
        let info = PeerInfo::new("m1", "10.0.0.1:1099");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"load_state\":\"initial_deployments_pending\""));
        let back: PeerInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
