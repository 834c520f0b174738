//! Provision requests and the callbacks their originators supply.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use prov_core::{RequestType, ServiceBeanInstance, ServiceElement};

/// Process-unique request identifier.
pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// The deployment (operational string) a request belongs to.
pub trait DeploymentHandle: Send + Sync {
    fn name(&self) -> &str;

    /// `false` once the deployment is undeployed; its requests are then discarded.
    fn is_active(&self) -> bool;
}

/// Told about every instance provisioned for a request. Usually the
/// deployment manager itself.
pub trait ProvisionListener: Send + Sync {
    fn service_provisioned(
        &self,
        instance: &ServiceBeanInstance,
        node: &str,
    ) -> anyhow::Result<()>;
}

/// Optional callbacks from whoever asked for the service.
///
/// Errors are logged and otherwise ignored.
pub trait ServiceProvisionListener: Send + Sync {
    fn succeeded(&self, instance: &ServiceBeanInstance) -> anyhow::Result<()>;

    fn failed(&self, element: &ServiceElement, resubmitted: bool) -> anyhow::Result<()>;

    fn uninstantiable(&self, request: &ProvisionRequest) -> anyhow::Result<()>;
}

/// A desired service instance. Immutable; cloning shares everything.
#[derive(Clone)]
pub struct ProvisionRequest {
    id: RequestId,
    element: Arc<ServiceElement>,
    request_type: RequestType,
    deployment: Arc<dyn DeploymentHandle>,
    success_listener: Arc<dyn ProvisionListener>,
    listener: Option<Arc<dyn ServiceProvisionListener>>,
    /// Nodes this request must not be placed on.
    excluded_nodes: Arc<HashSet<String>>,
}

impl ProvisionRequest {
    /// A request for a new instance.
    pub fn new(
        element: Arc<ServiceElement>,
        deployment: Arc<dyn DeploymentHandle>,
        success_listener: Arc<dyn ProvisionListener>,
    ) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            element,
            request_type: RequestType::Provision,
            deployment,
            success_listener,
            listener: None,
            excluded_nodes: Arc::new(HashSet::new()),
        }
    }

    /// A request to move an instance off `from_node`.
    pub fn relocate(
        element: Arc<ServiceElement>,
        deployment: Arc<dyn DeploymentHandle>,
        success_listener: Arc<dyn ProvisionListener>,
        from_node: &str,
    ) -> Self {
        let mut request = Self::new(element, deployment, success_listener);
        request.request_type = RequestType::Relocate;
        request.excluded_nodes = Arc::new([from_node.to_string()].into_iter().collect());
        request
    }

    pub fn with_listener(mut self, listener: Arc<dyn ServiceProvisionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn element(&self) -> &Arc<ServiceElement> {
        &self.element
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn deployment(&self) -> &Arc<dyn DeploymentHandle> {
        &self.deployment
    }

    pub fn success_listener(&self) -> &Arc<dyn ProvisionListener> {
        &self.success_listener
    }

    pub fn listener(&self) -> Option<&Arc<dyn ServiceProvisionListener>> {
        self.listener.as_ref()
    }

    pub fn excluded_nodes(&self) -> &HashSet<String> {
        &self.excluded_nodes
    }
}

impl fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("id", &self.id)
            .field("service", &self.element.qualified_name())
            .field("request_type", &self.request_type)
            .field("deployment", &self.deployment.name())
            .field("excluded_nodes", &self.excluded_nodes)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    /// Deployment handle + success listener recording what it was told.
    #[derive(Default)]
    pub(crate) struct TestDeployment {
        pub inactive: AtomicBool,
        pub provisioned: Mutex<Vec<(String, String)>>,
    }

    impl DeploymentHandle for TestDeployment {
        fn name(&self) -> &str {
            "deploy"
        }

        fn is_active(&self) -> bool {
            !self.inactive.load(Ordering::SeqCst)
        }
    }

    impl ProvisionListener for TestDeployment {
        fn service_provisioned(
            &self,
            instance: &ServiceBeanInstance,
            node: &str,
        ) -> anyhow::Result<()> {
            self.provisioned
                .lock()
                .unwrap()
                .push((instance.id.clone(), node.to_string()));
            Ok(())
        }
    }

    pub(crate) fn request_for(deployment: &Arc<TestDeployment>, service: &str) -> ProvisionRequest {
        ProvisionRequest::new(
            Arc::new(ServiceElement::new("deploy", service, "impl")),
            deployment.clone(),
            deployment.clone(),
        )
    }

    #[test]
    fn ids_are_unique() {
        let d = Arc::new(TestDeployment::default());
        let a = request_for(&d, "s");
        let b = request_for(&d, "s");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn relocate_excludes_current_node() {
        let d = Arc::new(TestDeployment::default());
        let req = ProvisionRequest::relocate(
            Arc::new(ServiceElement::new("deploy", "s", "impl")),
            d.clone(),
            d,
            "node-a",
        );
        assert_eq!(req.request_type(), RequestType::Relocate);
        assert!(req.excluded_nodes().contains("node-a"));
        assert!(req.listener().is_none());
    }

    #[test]
    fn debug_shows_service() {
        let d = Arc::new(TestDeployment::default());
        let req = request_for(&d, "ledger");
        let dbg = format!("{req:?}");
        assert!(dbg.contains("deploy/ledger"));
    }
}
