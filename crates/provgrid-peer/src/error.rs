//! Peer coordination error types.

use thiserror::Error;

use crate::state::LoadState;

#[derive(Debug, Error)]
pub enum PeerError {
    /// Load states only move forward.
    #[error("illegal load state transition: {from} -> {to}")]
    IllegalTransition { from: LoadState, to: LoadState },

    #[error("peer {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    /// The initial deployments could not be loaded.
    #[error("initial load failed: {0}")]
    LoadFailed(String),
}

pub type PeerResult<T> = Result<T, PeerError>;
