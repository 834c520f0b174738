//! provgrid-peer — coordination between redundant provision monitors.
//!
//! Each monitor moves through a one-way initial-load state machine:
//!
//! ```text
//! InitialDeploymentsPending → LoadingInitialDeployments → LoadedInitialDeployments
//! ```
//!
//! Before loading its own configured deployments a monitor polls every
//! known peer and waits until none of them is loading. Peers that cannot
//! be reached count as ready.
//!
//! # Architecture
//!
//! ```text
//! PeerCoordinator
//!   ├── LocalPeer (our PeerInfo, served through PeerHandle)
//!   ├── peers: Vec<Arc<dyn PeerHandle>>
//!   ├── wait_for_peers() ← polls every poll_interval
//!   └── load_initial_deployments(loader)
//! ```

pub mod coordinator;
pub mod error;
pub mod handle;
pub mod state;

pub use coordinator::{InitialLoad, PeerCoordinator, PeerPoll};
pub use error::{PeerError, PeerResult};
pub use handle::{LocalPeer, PeerHandle};
pub use state::{LoadState, PeerInfo};
