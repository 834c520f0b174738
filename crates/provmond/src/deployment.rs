//! Deployments loaded from configuration.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use prov_core::{DeploymentConfig, ServiceBeanInstance, ServiceElement};
use provgrid_provision::{
    DeploymentHandle, ProvisionListener, ProvisionRequest, ServiceProvisionListener,
};

/// Owns one deployment's service definitions and tracks what got placed.
pub struct DeploymentManager {
    name: String,
    elements: Vec<Arc<ServiceElement>>,
    active: AtomicBool,
    instances: Mutex<Vec<ServiceBeanInstance>>,
    failures: AtomicUsize,
    uninstantiable: AtomicUsize,
}

impl DeploymentManager {
    pub fn from_config(config: &DeploymentConfig) -> Arc<Self> {
        Arc::new(Self {
            name: config.name.clone(),
            elements: config.service_elements(),
            active: AtomicBool::new(true),
            instances: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            uninstantiable: AtomicUsize::new(0),
        })
    }

    /// One request per planned instance of every service.
    pub fn requests(self: &Arc<Self>) -> Vec<ProvisionRequest> {
        self.elements
            .iter()
            .flat_map(|element| {
                (0..element.planned).map(move |_| {
                    ProvisionRequest::new(element.clone(), self.clone(), self.clone())
                        .with_listener(self.clone())
                })
            })
            .collect()
    }

    /// Mark inactive; queued and unstarted requests are then discarded.
    pub fn undeploy(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!(deployment = %self.name, "deployment undeployed");
    }

    pub fn instances(&self) -> Vec<ServiceBeanInstance> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn uninstantiable_count(&self) -> usize {
        self.uninstantiable.load(Ordering::Relaxed)
    }
}

impl DeploymentHandle for DeploymentManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl ProvisionListener for DeploymentManager {
    fn service_provisioned(
        &self,
        instance: &ServiceBeanInstance,
        node: &str,
    ) -> anyhow::Result<()> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instance.clone());
        info!(deployment = %self.name, service = %instance.service, %node, "instance recorded");
        Ok(())
    }
}

impl ServiceProvisionListener for DeploymentManager {
    fn succeeded(&self, _instance: &ServiceBeanInstance) -> anyhow::Result<()> {
        Ok(())
    }

    fn failed(&self, element: &ServiceElement, resubmitted: bool) -> anyhow::Result<()> {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if !resubmitted {
            warn!(service = %element.qualified_name(), "provisioning abandoned");
        }
        Ok(())
    }

    fn uninstantiable(&self, request: &ProvisionRequest) -> anyhow::Result<()> {
        self.uninstantiable.fetch_add(1, Ordering::Relaxed);
        warn!(
            service = %request.element().qualified_name(),
            "service cannot be instantiated on any node"
        );
        Ok(())
    }
}
