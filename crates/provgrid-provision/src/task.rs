//! Provision task: one attempt to place one request on one node.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use prov_core::InstantiationEvent;
use provgrid_events::MonitorEvent;
use provgrid_selector::InstantiatorResource;

use crate::outcome::{Classification, ProvisionOutcome, classify, declined};
use crate::provisioner::{Origin, ProvisionContext};
use crate::request::ProvisionRequest;

pub(crate) struct ProvisionTask {
    ctx: Arc<ProvisionContext>,
    request: ProvisionRequest,
    /// Candidate chosen by the selector. One in-process slot is reserved on it.
    resource: Arc<InstantiatorResource>,
    origin: Option<Origin>,
}

impl ProvisionTask {
    pub(crate) fn new(
        ctx: Arc<ProvisionContext>,
        request: ProvisionRequest,
        resource: Arc<InstantiatorResource>,
        origin: Option<Origin>,
    ) -> Self {
        Self {
            ctx,
            request,
            resource,
            origin,
        }
    }

    pub(crate) async fn run(self) {
        let id = self.request.id();
        let service = self.request.element().qualified_name();
        let node = self.resource.name().to_string();

        if self.ctx.is_cancelled(id) || !self.request.deployment().is_active() {
            self.resource.decrement_provision_counter();
            info!(request = id, %service, %node, "request withdrawn before execution");
            self.ctx.release(id);
            return;
        }

        let started = Instant::now();
        let Classification { outcome, drop_node } = self.attempt().await;
        let elapsed = started.elapsed();

        if drop_node {
            let reason = outcome
                .failure()
                .map(|f| f.reason.clone())
                .unwrap_or_default();
            self.ctx.drop_resource(&node, &reason);
        }

        self.resource.decrement_provision_counter();
        self.ctx.provision_watch.record(elapsed).await;

        match outcome {
            ProvisionOutcome::Success(instance) => {
                self.ctx.allocation_watch.record(elapsed).await;
                info!(
                    request = id,
                    %service,
                    %node,
                    instance = %instance.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "service provisioned"
                );

                if let Err(e) = self
                    .request
                    .success_listener()
                    .service_provisioned(&instance, &node)
                {
                    warn!(request = id, %service, error = %e, "provision listener failed");
                }
                if let Some(listener) = self.request.listener() {
                    if let Err(e) = listener.succeeded(&instance) {
                        warn!(request = id, %service, error = %e, "service listener failed");
                    }
                }

                self.ctx.notifications.publish(MonitorEvent::ServiceProvisioned {
                    instance,
                    request_type: self.request.request_type(),
                });
                self.ctx.release(id);
                self.ctx.wake();
            }

            ProvisionOutcome::TransientFailure(failure) => {
                let resubmitted = self.ctx.resubmit(self.request.clone(), self.origin);
                self.ctx.notify_failure(&self.request, failure, &node, resubmitted);
            }

            ProvisionOutcome::UninstantiableFailure(failure) => {
                if let Some(listener) = self.request.listener() {
                    if let Err(e) = listener.uninstantiable(&self.request) {
                        warn!(request = id, %service, error = %e, "service listener failed");
                    }
                }
                self.ctx.notify_failure(&self.request, failure, &node, false);
                self.ctx.release(id);
                self.ctx.wake();
            }

            ProvisionOutcome::BadNodeFailure(failure) => {
                self.ctx.notify_failure(&self.request, failure, &node, true);
                let excluding: HashSet<String> = [node].into_iter().collect();
                self.ctx.dispatch_from(self.request, self.origin, &excluding);
            }
        }
    }

    /// Call the node up to `attempts` times, pausing after each empty answer.
    async fn attempt(&self) -> Classification {
        let event = InstantiationEvent {
            sequence: self.ctx.next_sequence(),
            source: self.ctx.source.clone(),
            handback: self.resource.handback().map(str::to_string),
            request_type: self.request.request_type(),
            element: self.request.element().as_ref().clone(),
        };
        let attempts = self.ctx.attempts;

        for attempt in 1..=attempts {
            match self.resource.instantiator().instantiate(&event).await {
                Ok(Some(instance)) => {
                    self.resource.add_deployed_service(instance.clone());
                    return Classification {
                        outcome: ProvisionOutcome::Success(instance),
                        drop_node: false,
                    };
                }
                Ok(None) => {
                    debug!(
                        node = %self.resource.name(),
                        sequence = event.sequence,
                        attempt,
                        attempts,
                        "node returned no instance"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.ctx.retry_pause).await;
                    }
                }
                Err(err) => {
                    debug!(node = %self.resource.name(), error = %err, "instantiate failed");
                    return classify(err, &self.ctx.taxonomy);
                }
            }
        }

        declined(attempts)
    }
}
