//! Candidate selection over the registered cybernodes.
//!
//! Both selectors keep their candidates in a single `Mutex`-guarded list.
//! Lock order is selector first, then the resource's own lock; resources
//! never reach back into the selector.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use prov_core::{SelectorPolicy, ServiceElement};

use crate::resource::InstantiatorResource;

/// The selector's wrapper around a resource.
///
/// Handed out by value; the `Arc` inside is shared with the pool.
#[derive(Debug, Clone)]
pub struct ServiceResource {
    resource: Arc<InstantiatorResource>,
    /// Selection sequence at which this entry was last returned (0 = never).
    last_selected: u64,
}

impl ServiceResource {
    fn new(resource: Arc<InstantiatorResource>) -> Self {
        Self {
            resource,
            last_selected: 0,
        }
    }

    pub fn resource(&self) -> &Arc<InstantiatorResource> {
        &self.resource
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub fn last_selected(&self) -> u64 {
        self.last_selected
    }
}

/// Live pool of cybernodes a provisioner may pick from.
pub trait ResourceSelector: Send + Sync {
    /// Add a resource. Returns `false` if one with the same name is present.
    fn add_resource(&self, resource: Arc<InstantiatorResource>) -> bool;

    /// Pick a candidate able to host `element` whose name is not in
    /// `excluding`, reserving one in-process slot on it.
    fn get_next(
        &self,
        element: &ServiceElement,
        excluding: &HashSet<String>,
    ) -> Option<ServiceResource>;

    /// Permanently remove a resource. Idempotent: only the first call for a
    /// name returns the removed resource.
    fn drop_service_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>>;

    fn get_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>>;

    /// Snapshot of the pool in registration order.
    fn resources(&self) -> Vec<ServiceResource>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, name: &str) -> bool {
        self.get_resource(name).is_some()
    }
}

/// Build the selector for a configured policy.
pub fn selector_for(policy: SelectorPolicy) -> Arc<dyn ResourceSelector> {
    match policy {
        SelectorPolicy::RoundRobin => Arc::new(RoundRobinSelector::new()),
        SelectorPolicy::LeastActive => Arc::new(LeastActiveSelector::new()),
    }
}

/// State shared by both policies.
#[derive(Debug, Default)]
struct Pool {
    entries: Vec<ServiceResource>,
    /// Number of successful selections so far.
    selections: u64,
    /// Round-robin start position.
    cursor: usize,
}

impl Pool {
    fn add(&mut self, resource: Arc<InstantiatorResource>) -> bool {
        if self.entries.iter().any(|e| e.name() == resource.name()) {
            return false;
        }
        info!(
            node = %resource.name(),
            address = %resource.address(),
            capacity = resource.capacity(),
            "resource added to pool"
        );
        self.entries.push(ServiceResource::new(resource));
        true
    }

    fn remove(&mut self, name: &str) -> Option<Arc<InstantiatorResource>> {
        let idx = self.entries.iter().position(|e| e.name() == name)?;
        let removed = self.entries.remove(idx);
        if self.cursor > idx {
            self.cursor -= 1;
        }
        info!(node = %name, remaining = self.entries.len(), "resource dropped from pool");
        Some(removed.resource)
    }

    fn get(&self, name: &str) -> Option<Arc<InstantiatorResource>> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .map(|e| e.resource.clone())
    }

    fn mark_selected(&mut self, idx: usize) -> ServiceResource {
        self.selections += 1;
        let entry = &mut self.entries[idx];
        entry.last_selected = self.selections;
        debug!(node = %entry.name(), selection = self.selections, "candidate selected");
        entry.clone()
    }
}

fn lock(pool: &Mutex<Pool>) -> MutexGuard<'_, Pool> {
    pool.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Round robin ────────────────────────────────────────────────────

/// Walks the pool in registration order, starting after the last pick.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    pool: Mutex<Pool>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceSelector for RoundRobinSelector {
    fn add_resource(&self, resource: Arc<InstantiatorResource>) -> bool {
        lock(&self.pool).add(resource)
    }

    fn get_next(
        &self,
        element: &ServiceElement,
        excluding: &HashSet<String>,
    ) -> Option<ServiceResource> {
        let mut pool = lock(&self.pool);
        let count = pool.entries.len();

        for offset in 0..count {
            let idx = (pool.cursor + offset) % count;
            let entry = &pool.entries[idx];
            if excluding.contains(entry.name()) {
                continue;
            }
            if entry.resource.try_reserve(element) {
                pool.cursor = (idx + 1) % count;
                return Some(pool.mark_selected(idx));
            }
        }
        None
    }

    fn drop_service_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>> {
        lock(&self.pool).remove(name)
    }

    fn get_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>> {
        lock(&self.pool).get(name)
    }

    fn resources(&self) -> Vec<ServiceResource> {
        lock(&self.pool).entries.clone()
    }

    fn len(&self) -> usize {
        lock(&self.pool).entries.len()
    }
}

// ── Least active ───────────────────────────────────────────────────

/// Prefers the node with the lowest load; ties go to the node picked
/// longest ago.
#[derive(Debug, Default)]
pub struct LeastActiveSelector {
    pool: Mutex<Pool>,
}

impl LeastActiveSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceSelector for LeastActiveSelector {
    fn add_resource(&self, resource: Arc<InstantiatorResource>) -> bool {
        lock(&self.pool).add(resource)
    }

    fn get_next(
        &self,
        element: &ServiceElement,
        excluding: &HashSet<String>,
    ) -> Option<ServiceResource> {
        let mut pool = lock(&self.pool);

        let mut ranked: Vec<(u32, u64, usize)> = pool
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !excluding.contains(e.name()))
            .map(|(idx, e)| (e.resource.load(), e.last_selected, idx))
            .collect();
        ranked.sort_unstable();

        for (_, _, idx) in ranked {
            if pool.entries[idx].resource.try_reserve(element) {
                return Some(pool.mark_selected(idx));
            }
        }
        None
    }

    fn drop_service_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>> {
        lock(&self.pool).remove(name)
    }

    fn get_resource(&self, name: &str) -> Option<Arc<InstantiatorResource>> {
        lock(&self.pool).get(name)
    }

    fn resources(&self) -> Vec<ServiceResource> {
        lock(&self.pool).entries.clone()
    }

    fn len(&self) -> usize {
        lock(&self.pool).entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::{instance, resource};

    fn elem() -> ServiceElement {
        ServiceElement::new("deploy", "svc", "svc-impl")
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    fn both() -> Vec<Arc<dyn ResourceSelector>> {
        vec![
            Arc::new(RoundRobinSelector::new()),
            Arc::new(LeastActiveSelector::new()),
        ]
    }

    #[test]
    fn empty_pool_returns_none() {
        for sel in both() {
            assert!(sel.is_empty());
            assert!(sel.get_next(&elem(), &none()).is_none());
        }
    }

    #[test]
    fn duplicate_add_is_rejected() {
        for sel in both() {
            assert!(sel.add_resource(Arc::new(resource("a", 1))));
            assert!(!sel.add_resource(Arc::new(resource("a", 1))));
            assert_eq!(sel.len(), 1);
        }
    }

    #[test]
    fn get_next_reserves_a_slot() {
        for sel in both() {
            sel.add_resource(Arc::new(resource("a", 2)));
            let picked = sel.get_next(&elem(), &none()).unwrap();
            assert_eq!(picked.resource().in_process_count(), 1);
            assert_eq!(picked.last_selected(), 1);
        }
    }

    #[test]
    fn full_nodes_are_skipped() {
        for sel in both() {
            sel.add_resource(Arc::new(resource("a", 1)));
            sel.add_resource(Arc::new(resource("b", 1)));

            let first = sel.get_next(&elem(), &none()).unwrap();
            let second = sel.get_next(&elem(), &none()).unwrap();
            assert_ne!(first.name(), second.name());
            assert!(sel.get_next(&elem(), &none()).is_none());
        }
    }

    #[test]
    fn excluded_nodes_are_skipped() {
        for sel in both() {
            sel.add_resource(Arc::new(resource("a", 5)));
            sel.add_resource(Arc::new(resource("b", 5)));

            let excluding: HashSet<String> = ["a".to_string()].into_iter().collect();
            for _ in 0..3 {
                let picked = sel.get_next(&elem(), &excluding).unwrap();
                assert_eq!(picked.name(), "b");
            }

            let all: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
            assert!(sel.get_next(&elem(), &all).is_none());
        }
    }

    #[test]
    fn drop_is_idempotent() {
        for sel in both() {
            sel.add_resource(Arc::new(resource("a", 5)));
            sel.add_resource(Arc::new(resource("b", 5)));

            assert!(sel.drop_service_resource("a").is_some());
            assert!(sel.drop_service_resource("a").is_none());
            assert_eq!(sel.len(), 1);
            assert!(!sel.contains("a"));

            for _ in 0..4 {
                assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "b");
            }
        }
    }

    #[test]
    fn round_robin_cycles_through_nodes() {
        let sel = RoundRobinSelector::new();
        for name in ["a", "b", "c"] {
            sel.add_resource(Arc::new(resource(name, 10)));
        }

        let picks: Vec<String> = (0..6)
            .map(|_| sel.get_next(&elem(), &none()).unwrap().name().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn round_robin_survives_drop_of_earlier_entry() {
        let sel = RoundRobinSelector::new();
        for name in ["a", "b", "c"] {
            sel.add_resource(Arc::new(resource(name, 10)));
        }

        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "a");
        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "b");
        sel.drop_service_resource("a");
        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "c");
        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "b");
    }

    #[test]
    fn least_active_prefers_lowest_load() {
        let sel = LeastActiveSelector::new();
        let a = Arc::new(resource("a", 10));
        let b = Arc::new(resource("b", 10));
        a.add_deployed_service(instance("i-1", "deploy/other", "a"));
        a.add_deployed_service(instance("i-2", "deploy/other", "a"));
        sel.add_resource(a);
        sel.add_resource(b.clone());

        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "b");
        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "b");
        // Both at load 2 now; "a" was never selected so it wins the tie.
        assert_eq!(sel.get_next(&elem(), &none()).unwrap().name(), "a");
        assert_eq!(b.in_process_count(), 2);
    }

    #[test]
    fn concurrent_selection_never_overcommits() {
        use std::thread;

        let sel: Arc<dyn ResourceSelector> = Arc::new(RoundRobinSelector::new());
        let a = Arc::new(resource("a", 25));
        let b = Arc::new(resource("b", 25));
        sel.add_resource(a.clone());
        sel.add_resource(b.clone());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sel = sel.clone();
                thread::spawn(move || {
                    (0..20)
                        .filter(|_| sel.get_next(&elem(), &HashSet::new()).is_some())
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 50);
        assert_eq!(a.in_process_count(), 25);
        assert_eq!(b.in_process_count(), 25);
    }

    #[test]
    fn selector_for_policy() {
        let sel = selector_for(SelectorPolicy::LeastActive);
        sel.add_resource(Arc::new(resource("a", 1)));
        assert!(sel.get_next(&elem(), &none()).is_some());
    }
}
