//! One registered cybernode and its provisioning bookkeeping.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use prov_core::{Instantiator, ServiceBeanInstance, ServiceElement};

/// Counters guarded by the resource's own lock.
#[derive(Debug, Default)]
struct ResourceState {
    /// Provision attempts reserved or running against this node.
    in_process: u32,
    /// Instances this monitor has deployed on the node.
    deployed: Vec<ServiceBeanInstance>,
}

/// A cybernode able to instantiate services, plus what we know about its load.
pub struct InstantiatorResource {
    name: String,
    address: String,
    /// Token the node handed back on registration.
    handback: Option<String>,
    labels: HashMap<String, String>,
    /// Maximum services hosted at once.
    capacity: u32,
    handle: Arc<dyn Instantiator>,
    state: Mutex<ResourceState>,
}

impl InstantiatorResource {
    pub fn new(
        name: &str,
        address: &str,
        capacity: u32,
        handle: Arc<dyn Instantiator>,
    ) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            handback: None,
            labels: HashMap::new(),
            capacity,
            handle,
            state: Mutex::new(ResourceState::default()),
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_handback(mut self, handback: impl Into<String>) -> Self {
        self.handback = Some(handback.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn handback(&self) -> Option<&str> {
        self.handback.as_deref()
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn instantiator(&self) -> &Arc<dyn Instantiator> {
        &self.handle
    }

    // ── Counters ─────────────────────────────────────────────────────

    pub fn increment_provision_counter(&self) {
        let mut state = self.lock();
        state.in_process += 1;
    }

    /// Release one in-process reservation. Never goes below zero.
    pub fn decrement_provision_counter(&self) {
        let mut state = self.lock();
        state.in_process = state.in_process.saturating_sub(1);
    }

    pub fn in_process_count(&self) -> u32 {
        self.lock().in_process
    }

    /// Number of deployed instances on this node.
    pub fn service_count(&self) -> u32 {
        self.lock().deployed.len() as u32
    }

    /// Deployed plus in-process.
    pub fn load(&self) -> u32 {
        let state = self.lock();
        state.deployed.len() as u32 + state.in_process
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.capacity
    }

    /// Whether this node may host one more instance of `element`.
    ///
    /// Checks capacity, required labels and the per-node instance limit.
    pub fn can_provision(&self, element: &ServiceElement) -> bool {
        let state = self.lock();
        self.admits(&state, element)
    }

    /// Reserve a slot if [`can_provision`](Self::can_provision) holds.
    ///
    /// The check and the increment happen under one lock acquisition.
    pub fn try_reserve(&self, element: &ServiceElement) -> bool {
        let mut state = self.lock();
        if !self.admits(&state, element) {
            return false;
        }
        state.in_process += 1;
        true
    }

    fn admits(&self, state: &ResourceState, element: &ServiceElement) -> bool {
        if !element.requirements.matches(&self.labels) {
            return false;
        }
        if state.deployed.len() as u32 + state.in_process >= self.capacity {
            return false;
        }
        match element.max_per_node {
            Some(limit) => {
                let service = element.qualified_name();
                let hosted = state
                    .deployed
                    .iter()
                    .filter(|i| i.service == service)
                    .count() as u32;
                hosted < limit
            }
            None => true,
        }
    }

    // ── Deployed instances ──────────────────────────────────────────

    pub fn add_deployed_service(&self, instance: ServiceBeanInstance) {
        let mut state = self.lock();
        debug!(
            node = %self.name,
            instance = %instance.id,
            service = %instance.service,
            "instance attached"
        );
        state.deployed.push(instance);
    }

    /// Detach an instance. Returns it if it was present.
    pub fn remove_deployed_service(&self, instance_id: &str) -> Option<ServiceBeanInstance> {
        let mut state = self.lock();
        let idx = state.deployed.iter().position(|i| i.id == instance_id)?;
        Some(state.deployed.remove(idx))
    }

    /// Snapshot of deployed instances.
    pub fn deployed_services(&self) -> Vec<ServiceBeanInstance> {
        self.lock().deployed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResourceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for InstantiatorResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("InstantiatorResource")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("capacity", &self.capacity)
            .field("in_process", &state.in_process)
            .field("deployed", &state.deployed.len())
            .finish()
    }
}
