//! In-process cybernodes for standalone mode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use prov_core::{
    CybernodeConfig, InstantiateError, InstantiateFuture, InstantiationEvent, Instantiator,
    ServiceBeanInstance, epoch_secs,
};

/// A cybernode that hosts services in memory.
///
/// Declines (returns no instance) when full and rejects services with an
/// empty component as uninstantiable.
#[derive(Debug)]
pub struct SimulatedNode {
    name: String,
    address: String,
    capacity: u32,
    hosted: Mutex<u32>,
    next_id: AtomicU64,
}

impl SimulatedNode {
    pub fn new(config: &CybernodeConfig) -> Self {
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            capacity: config.capacity,
            hosted: Mutex::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn hosted(&self) -> u32 {
        *self.hosted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget one hosted instance.
    pub fn terminate(&self) {
        let mut hosted = self.hosted.lock().unwrap_or_else(PoisonError::into_inner);
        *hosted = hosted.saturating_sub(1);
    }

    fn admit(
        &self,
        event: &InstantiationEvent,
    ) -> Result<Option<ServiceBeanInstance>, InstantiateError> {
        if event.element.component.is_empty() {
            return Err(InstantiateError::uninstantiable(format!(
                "{} has no component",
                event.element.qualified_name()
            )));
        }

        let mut hosted = self.hosted.lock().unwrap_or_else(PoisonError::into_inner);
        if *hosted >= self.capacity {
            debug!(node = %self.name, hosted = *hosted, "node full, declining");
            return Ok(None);
        }
        *hosted += 1;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Some(ServiceBeanInstance {
            id: format!("{}-{id}", self.name),
            service: event.element.qualified_name(),
            node_name: self.name.clone(),
            host_address: self.address.clone(),
            instantiated_at: epoch_secs(),
        }))
    }
}

impl Instantiator for SimulatedNode {
    fn instantiate<'a>(&'a self, event: &'a InstantiationEvent) -> InstantiateFuture<'a> {
        Box::pin(async move { self.admit(event) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use prov_core::{RequestType, ServiceElement};

    fn node(capacity: u32) -> SimulatedNode {
        SimulatedNode::new(&CybernodeConfig {
            name: "sim-1".to_string(),
            address: "127.0.0.1:7001".to_string(),
            capacity,
            labels: HashMap::new(),
        })
    }

    fn event(component: &str) -> InstantiationEvent {
        InstantiationEvent {
            sequence: 1,
            source: "provmond".to_string(),
            handback: None,
            request_type: RequestType::Provision,
            element: ServiceElement::new("shop", "cart", component),
        }
    }

    #[tokio::test]
    async fn hosts_until_full() {
        let n = node(1);
        let first = n.instantiate(&event("cart-svc")).await.unwrap().unwrap();
        assert_eq!(first.id, "sim-1-1");
        assert_eq!(first.service, "shop/cart");
        assert_eq!(first.host_address, "127.0.0.1:7001");

        assert!(n.instantiate(&event("cart-svc")).await.unwrap().is_none());
        n.terminate();
        assert!(n.instantiate(&event("cart-svc")).await.unwrap().is_some());
        assert_eq!(n.hosted(), 1);
    }

    #[tokio::test]
    async fn empty_component_is_uninstantiable() {
        let n = node(4);
        let err = n.instantiate(&event("")).await.unwrap_err();
        assert!(matches!(
            err,
            InstantiateError::Instantiation {
                uninstantiable: true,
                ..
            }
        ));
        assert_eq!(n.hosted(), 0);
    }
}
