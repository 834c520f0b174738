//! Initial-load barrier.
//!
//! Before loading its configured deployments a monitor waits until no
//! known peer is in the middle of loading its own, so two monitors never
//! race to become primary for the same deployment at startup.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, PeerResult};
use crate::handle::{LocalPeer, PeerHandle};
use crate::state::LoadState;

/// Result of polling one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPoll {
    pub address: String,
    /// `None` when the peer could not be reached.
    pub load_state: Option<LoadState>,
}

impl PeerPoll {
    /// Unreachable peers are assumed crashed or not yet started.
    pub fn is_ready(&self) -> bool {
        self.load_state.is_none_or(|s| s.is_settled())
    }
}

/// How the initial load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialLoad {
    /// Loaded; carries the loader's count.
    Loaded(usize),
    /// Shutdown arrived while waiting on peers.
    Interrupted,
}

pub struct PeerCoordinator {
    local: Arc<LocalPeer>,
    peers: RwLock<Vec<Arc<dyn PeerHandle>>>,
    poll_interval: Duration,
}

impl PeerCoordinator {
    pub fn new(local: Arc<LocalPeer>, poll_interval: Duration) -> Self {
        Self {
            local,
            peers: RwLock::new(Vec::new()),
            poll_interval,
        }
    }

    pub fn local(&self) -> &Arc<LocalPeer> {
        &self.local
    }

    /// Add a discovered peer. Ignores ourselves and known addresses.
    pub fn add_peer(&self, peer: Arc<dyn PeerHandle>) -> bool {
        if peer.address() == self.local.address() {
            return false;
        }
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.iter().any(|p| p.address() == peer.address()) {
            return false;
        }
        info!(peer = %peer.address(), "peer added");
        peers.push(peer);
        true
    }

    pub fn remove_peer(&self, address: &str) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        let before = peers.len();
        peers.retain(|p| p.address() != address);
        let removed = peers.len() != before;
        if removed {
            info!(peer = %address, "peer removed");
        }
        removed
    }

    /// Addresses of the known peers.
    pub fn peers(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.address().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn PeerHandle>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask every known peer for its state.
    pub async fn poll_peers(&self) -> Vec<PeerPoll> {
        let mut polls = Vec::new();
        for peer in self.snapshot() {
            let load_state = match peer.get_peer_info().await {
                Ok(info) => Some(info.load_state),
                Err(e) => {
                    debug!(
                        peer = %peer.address(),
                        error = %e,
                        "peer unreachable, treating as ready"
                    );
                    None
                }
            };
            polls.push(PeerPoll {
                address: peer.address().to_string(),
                load_state,
            });
        }
        polls
    }

    /// Poll peers every `poll_interval` until none is loading. Returns
    /// `false` if shutdown arrived first.
    pub async fn wait_for_peers(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let polls = self.poll_peers().await;
            let busy: Vec<&str> = polls
                .iter()
                .filter(|p| !p.is_ready())
                .map(|p| p.address.as_str())
                .collect();
            if busy.is_empty() {
                debug!(peers = polls.len(), "all peers settled");
                return true;
            }
            info!(?busy, "waiting for peers to finish loading");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => return false,
            }
        }
    }

    /// Wait on the barrier, then run `loader` between the loading and
    /// loaded transitions.
    ///
    /// The local peer reaches the loaded state even when `loader` fails,
    /// so peers waiting on us are not held up.
    pub async fn load_initial_deployments<F, Fut>(
        &self,
        mut shutdown: watch::Receiver<bool>,
        loader: F,
    ) -> PeerResult<InitialLoad>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<usize>>,
    {
        if !self.wait_for_peers(&mut shutdown).await {
            info!("initial load interrupted by shutdown");
            return Ok(InitialLoad::Interrupted);
        }

        self.local.advance(LoadState::LoadingInitialDeployments)?;
        let result = loader().await;
        self.local.advance(LoadState::LoadedInitialDeployments)?;

        match result {
            Ok(count) => {
                info!(count, "initial deployments loaded");
                Ok(InitialLoad::Loaded(count))
            }
            Err(e) => {
                error!(error = %e, "initial deployments failed to load");
                Err(PeerError::LoadFailed(format!("{e:#}")))
            }
        }
    }

    /// Run [`load_initial_deployments`](Self::load_initial_deployments) on
    /// its own task.
    pub fn spawn_initial_load<F, Fut>(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
        loader: F,
    ) -> JoinHandle<PeerResult<InitialLoad>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<usize>> + Send,
    {
        tokio::spawn(async move {
            let result = self.load_initial_deployments(shutdown, loader).await;
            if let Err(e) = &result {
                warn!(error = %e, "initial load task finished with error");
            }
            result
        })
    }
}
