//! Pending managers: ordered queues of requests waiting for a node.
//!
//! Entries are keyed by a queue index. A request taken out for dispatch
//! and later resubmitted with its index goes back to the same position,
//! so one flaky request cannot push everything behind it further back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::request::{ProvisionRequest, RequestId};

/// Which of the two queues this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKind {
    /// Fresh requests.
    Provision,
    /// Requests that were dispatched directly and then failed.
    Failed,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingKind::Provision => f.write_str("provision-pending"),
            PendingKind::Failed => f.write_str("failed-pending"),
        }
    }
}

/// A queued request and its position.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub request: ProvisionRequest,
    pub index: u64,
}

#[derive(Debug, Default)]
struct PendingQueue {
    entries: BTreeMap<u64, ProvisionRequest>,
    next_index: u64,
}

#[derive(Debug)]
pub struct PendingManager {
    kind: PendingKind,
    queue: Mutex<PendingQueue>,
}

impl PendingManager {
    pub fn new(kind: PendingKind) -> Self {
        Self {
            kind,
            queue: Mutex::new(PendingQueue::default()),
        }
    }

    pub fn get_type(&self) -> PendingKind {
        self.kind
    }

    /// Enqueue a request and return its index.
    ///
    /// With `Some(index)` the request takes that slot (replacing whatever is
    /// there); with `None` it goes to the back.
    pub fn add_provision_request(&self, request: ProvisionRequest, index: Option<u64>) -> u64 {
        let mut queue = self.lock();
        let index = match index {
            Some(i) => {
                if i >= queue.next_index {
                    queue.next_index = i + 1;
                }
                i
            }
            None => {
                let i = queue.next_index;
                queue.next_index += 1;
                i
            }
        };

        debug!(
            queue = %self.kind,
            index,
            request = request.id(),
            service = %request.element().qualified_name(),
            depth = queue.entries.len() + 1,
            "request queued"
        );
        queue.entries.insert(index, request);
        index
    }

    /// Remove a request (cancellation). Returns whether it was queued.
    pub fn remove_provision_request(&self, request_id: RequestId) -> bool {
        let mut queue = self.lock();
        let before = queue.entries.len();
        queue.entries.retain(|_, r| r.id() != request_id);
        let removed = queue.entries.len() != before;
        if removed {
            debug!(queue = %self.kind, request = request_id, "request removed");
        }
        removed
    }

    /// Remove every request belonging to `deployment`. Returns their ids.
    pub fn remove_deployment(&self, deployment: &str) -> Vec<RequestId> {
        let mut queue = self.lock();
        let mut removed = Vec::new();
        queue.entries.retain(|_, r| {
            let keep = r.deployment().name() != deployment;
            if !keep {
                removed.push(r.id());
            }
            keep
        });
        removed
    }

    /// Take the entry at `index` for dispatch, if it still holds `request_id`.
    pub fn take(&self, index: u64, request_id: RequestId) -> Option<ProvisionRequest> {
        let mut queue = self.lock();
        match queue.entries.get(&index) {
            Some(r) if r.id() == request_id => queue.entries.remove(&index),
            _ => None,
        }
    }

    /// Snapshot in queue order.
    pub fn entries(&self) -> Vec<PendingEntry> {
        self.lock()
            .entries
            .iter()
            .map(|(&index, request)| PendingEntry {
                request: request.clone(),
                index,
            })
            .collect()
    }

    pub fn index_of(&self, request_id: RequestId) -> Option<u64> {
        self.lock()
            .entries
            .iter()
            .find(|(_, r)| r.id() == request_id)
            .map(|(&i, _)| i)
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.index_of(request_id).is_some()
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn lock(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
