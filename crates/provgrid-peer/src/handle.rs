//! The peer capability and this monitor's own peer.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use prov_core::BoxFuture;

use crate::error::PeerResult;
use crate::state::{LoadState, PeerInfo};

/// A reachable provision monitor.
pub trait PeerHandle: Send + Sync {
    fn address(&self) -> &str;

    /// Current snapshot of the peer. Fails with
    /// [`PeerError::Unreachable`](crate::PeerError::Unreachable) when the
    /// peer cannot be contacted.
    fn get_peer_info(&self) -> BoxFuture<'_, PeerResult<PeerInfo>>;
}

/// This monitor's own peer state, served to other monitors.
#[derive(Debug)]
pub struct LocalPeer {
    address: String,
    info: Mutex<PeerInfo>,
}

impl LocalPeer {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            address: address.to_string(),
            info: Mutex::new(PeerInfo::new(name, address)),
        }
    }

    pub fn info(&self) -> PeerInfo {
        self.lock().clone()
    }

    pub fn load_state(&self) -> LoadState {
        self.lock().load_state
    }

    pub fn advance(&self, next: LoadState) -> PeerResult<()> {
        let mut info = self.lock();
        let from = info.load_state;
        info.load_state.advance(next)?;
        info!(peer = %info.name, %from, to = %next, "load state advanced");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, PeerInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerHandle for LocalPeer {
    fn address(&self) -> &str {
        &self.address
    }

    fn get_peer_info(&self) -> BoxFuture<'_, PeerResult<PeerInfo>> {
        let info = self.info();
        Box::pin(async move { Ok(info) })
    }
}
