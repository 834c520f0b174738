//! The service provisioner and its dispatch loop.
//!
//! Takes requests off the pending queues, asks the selector for a
//! candidate and hands each match to a provision task on the worker pool.
//! Requests without a candidate stay queued until the next traversal.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore, watch};
use tracing::{debug, info, warn};

use prov_core::{FaultTaxonomy, ProvisioningConfig, ServiceBeanInstance};
use provgrid_events::{InFlightTracker, MonitorEvent, NotificationPool, ProvisionFailureEvent};
use provgrid_metrics::{Watch, WatchRegistry};
use provgrid_selector::{InstantiatorResource, ResourceSelector, selector_for};

use crate::error::{ProvisionError, ProvisionResult};
use crate::outcome::Failure;
use crate::pending::{PendingKind, PendingManager};
use crate::request::{ProvisionRequest, RequestId};
use crate::task::ProvisionTask;

/// Watch fed with every attempt's duration.
pub const PROVISION_WATCH: &str = "provision";
/// Watch fed with the duration of successful attempts only.
pub const ALLOCATION_WATCH: &str = "allocation";

/// Queue and position a request was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub kind: PendingKind,
    pub index: u64,
}

/// What `dispatch` did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A task was started against `node`.
    Dispatched { node: String },
    /// No candidate; the request waits in a queue.
    Queued { kind: PendingKind, index: u64 },
    /// Cancelled, or its deployment is no longer active.
    Discarded,
}

/// Requests currently out of the queues, and cancellations against them.
#[derive(Debug, Default)]
struct Ledger {
    in_hand: HashSet<RequestId>,
    cancelled: HashSet<RequestId>,
}

/// State shared between the provisioner and its tasks.
pub(crate) struct ProvisionContext {
    pub(crate) source: String,
    pub(crate) attempts: u32,
    pub(crate) retry_pause: Duration,
    pub(crate) taxonomy: FaultTaxonomy,
    pub(crate) selector: Arc<dyn ResourceSelector>,
    pub(crate) pending: Arc<PendingManager>,
    pub(crate) failed: Arc<PendingManager>,
    pub(crate) notifications: NotificationPool,
    pub(crate) provision_watch: Arc<Watch>,
    pub(crate) allocation_watch: Arc<Watch>,
    workers: Arc<Semaphore>,
    sequence: AtomicU64,
    ledger: Mutex<Ledger>,
    tasks: InFlightTracker,
    wake: Notify,
}

impl ProvisionContext {
    pub(crate) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, kind: PendingKind) -> &PendingManager {
        match kind {
            PendingKind::Provision => &self.pending,
            PendingKind::Failed => &self.failed,
        }
    }

    pub(crate) fn is_cancelled(&self, id: RequestId) -> bool {
        self.ledger().cancelled.contains(&id)
    }

    /// Forget a request that is finished with.
    pub(crate) fn release(&self, id: RequestId) {
        let mut ledger = self.ledger();
        ledger.in_hand.remove(&id);
        ledger.cancelled.remove(&id);
    }

    /// Put a request back in a queue. Requests that came from a queue go
    /// back to their own slot; others go to the back of `fallback`.
    fn requeue(
        &self,
        request: ProvisionRequest,
        origin: Option<Origin>,
        fallback: PendingKind,
    ) -> (PendingKind, u64) {
        let id = request.id();
        let (kind, index) = match origin {
            Some(o) => (o.kind, self.queue(o.kind).add_provision_request(request, Some(o.index))),
            None => (fallback, self.queue(fallback).add_provision_request(request, None)),
        };
        self.ledger().in_hand.remove(&id);
        (kind, index)
    }

    /// Resubmit after a transient failure. Returns `false` if the request
    /// was cancelled or its deployment went away instead.
    pub(crate) fn resubmit(&self, request: ProvisionRequest, origin: Option<Origin>) -> bool {
        let id = request.id();
        if self.is_cancelled(id) || !request.deployment().is_active() {
            debug!(request = id, "not resubmitting withdrawn request");
            self.release(id);
            return false;
        }
        let (kind, index) = self.requeue(request, origin, PendingKind::Failed);
        debug!(request = id, queue = %kind, index, "request resubmitted");
        true
    }

    /// Find a candidate for a request that is in hand, start a task on it
    /// or queue the request.
    pub(crate) fn dispatch_from(
        self: &Arc<Self>,
        request: ProvisionRequest,
        origin: Option<Origin>,
        excluding: &HashSet<String>,
    ) -> Dispatch {
        let id = request.id();
        let service = request.element().qualified_name();

        if self.is_cancelled(id) {
            debug!(request = id, %service, "discarding cancelled request");
            self.release(id);
            return Dispatch::Discarded;
        }
        if !request.deployment().is_active() {
            info!(
                request = id,
                %service,
                deployment = %request.deployment().name(),
                "discarding request for inactive deployment"
            );
            self.release(id);
            return Dispatch::Discarded;
        }

        let mut exclude = request.excluded_nodes().clone();
        exclude.extend(excluding.iter().cloned());

        match self.selector.get_next(request.element(), &exclude) {
            Some(candidate) => {
                let node = candidate.name().to_string();
                debug!(request = id, %service, %node, "request dispatched");
                let task = ProvisionTask::new(
                    self.clone(),
                    request,
                    candidate.resource().clone(),
                    origin,
                );
                self.spawn(task);
                Dispatch::Dispatched { node }
            }
            None => {
                let (kind, index) = self.requeue(request, origin, PendingKind::Provision);
                debug!(request = id, %service, queue = %kind, index, "no candidate available");
                Dispatch::Queued { kind, index }
            }
        }
    }

    fn spawn(&self, task: ProvisionTask) {
        let guard = self.tasks.enter();
        let workers = self.workers.clone();
        tokio::spawn(async move {
            let _guard = guard;
            // The worker semaphore is never closed.
            let _permit = workers.acquire_owned().await.ok();
            task.run().await;
        });
    }

    /// Remove a node from the candidate pool and announce it once.
    pub(crate) fn drop_resource(&self, node: &str, reason: &str) {
        let Some(resource) = self.selector.drop_service_resource(node) else {
            return;
        };
        let orphaned = resource.deployed_services();
        warn!(%node, %reason, orphaned = orphaned.len(), "node dropped from candidate pool");
        self.notifications.publish(MonitorEvent::ResourceDropped {
            node: node.to_string(),
            address: resource.address().to_string(),
            reason: reason.to_string(),
            orphaned,
        });
    }

    /// Publish a failure event and, off-thread, tell the request's listener.
    pub(crate) fn notify_failure(
        &self,
        request: &ProvisionRequest,
        failure: Failure,
        node: &str,
        resubmitted: bool,
    ) {
        let element = request.element().clone();
        warn!(
            request = request.id(),
            service = %element.qualified_name(),
            %node,
            reason = %failure.reason,
            resubmitted,
            "provision attempt failed"
        );

        let mut event = ProvisionFailureEvent::new(
            &self.source,
            element.clone(),
            request.request_type(),
            failure.reason,
        )
        .with_node(node)
        .resubmitted(resubmitted);
        if let Some(cause) = failure.cause {
            event = event.with_cause(cause);
        }
        self.notifications.publish(MonitorEvent::ProvisionFailure(event));

        if let Some(listener) = request.listener().cloned() {
            self.notifications.submit(Box::pin(async move {
                if let Err(e) = listener.failed(&element, resubmitted) {
                    warn!(
                        service = %element.qualified_name(),
                        error = %e,
                        "service listener failed"
                    );
                }
            }));
        }
    }
}

/// Front door of the provisioning core.
pub struct ServiceProvisioner {
    ctx: Arc<ProvisionContext>,
    pending_interval: Duration,
    watches: Arc<WatchRegistry>,
}

impl ServiceProvisioner {
    /// Build a provisioner named `source` with its own selector and queues.
    pub async fn new(
        source: &str,
        config: &ProvisioningConfig,
        notifications: NotificationPool,
        watches: Arc<WatchRegistry>,
    ) -> Self {
        let provision_watch = watches.watch(PROVISION_WATCH).await;
        let allocation_watch = watches.watch(ALLOCATION_WATCH).await;

        let ctx = ProvisionContext {
            source: source.to_string(),
            attempts: config.instantiate_attempts.max(1),
            retry_pause: config.retry_pause,
            taxonomy: config.faults.taxonomy(),
            selector: selector_for(config.selector),
            pending: Arc::new(PendingManager::new(PendingKind::Provision)),
            failed: Arc::new(PendingManager::new(PendingKind::Failed)),
            notifications,
            provision_watch,
            allocation_watch,
            workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            sequence: AtomicU64::new(0),
            ledger: Mutex::new(Ledger::default()),
            tasks: InFlightTracker::new(),
            wake: Notify::new(),
        };

        info!(
            source,
            workers = config.worker_pool_size,
            attempts = ctx.attempts,
            selector = ?config.selector,
            "service provisioner created"
        );

        Self {
            ctx: Arc::new(ctx),
            pending_interval: config.pending_interval,
            watches,
        }
    }

    pub fn source(&self) -> &str {
        &self.ctx.source
    }

    pub fn selector(&self) -> &Arc<dyn ResourceSelector> {
        &self.ctx.selector
    }

    /// Queue of fresh requests.
    pub fn pending(&self) -> &Arc<PendingManager> {
        &self.ctx.pending
    }

    /// Queue of requests that failed after a direct dispatch.
    pub fn failed(&self) -> &Arc<PendingManager> {
        &self.ctx.failed
    }

    pub fn notifications(&self) -> &NotificationPool {
        &self.ctx.notifications
    }

    pub fn watches(&self) -> &Arc<WatchRegistry> {
        &self.watches
    }

    /// Requests waiting in either queue.
    pub fn queued(&self) -> usize {
        self.ctx.pending.size() + self.ctx.failed.size()
    }

    /// Provision tasks started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.ctx.tasks.count()
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Add a discovered node to the candidate pool.
    pub fn register_resource(&self, resource: Arc<InstantiatorResource>) -> ProvisionResult<()> {
        let name = resource.name().to_string();
        if !self.ctx.selector.add_resource(resource) {
            return Err(ProvisionError::DuplicateResource(name));
        }
        self.ctx.wake();
        Ok(())
    }

    /// Remove a node that left. Returns the instances it was hosting.
    pub fn deregister_resource(&self, node: &str) -> ProvisionResult<Vec<ServiceBeanInstance>> {
        let resource = self
            .ctx
            .selector
            .get_resource(node)
            .ok_or_else(|| ProvisionError::ResourceNotFound(node.to_string()))?;
        let orphaned = resource.deployed_services();
        self.ctx.drop_resource(node, "deregistered");
        Ok(orphaned)
    }

    /// Detach an undeployed instance from its node's bookkeeping.
    pub fn release_instance(
        &self,
        node: &str,
        instance_id: &str,
    ) -> ProvisionResult<ServiceBeanInstance> {
        let resource = self
            .ctx
            .selector
            .get_resource(node)
            .ok_or_else(|| ProvisionError::ResourceNotFound(node.to_string()))?;
        let instance = resource.remove_deployed_service(instance_id).ok_or_else(|| {
            ProvisionError::InstanceNotFound {
                node: node.to_string(),
                instance: instance_id.to_string(),
            }
        })?;
        debug!(%node, instance = %instance_id, "instance released");
        self.ctx.wake();
        Ok(instance)
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Queue a request for the dispatch loop. Returns its queue index.
    pub fn submit(&self, request: ProvisionRequest) -> ProvisionResult<u64> {
        if !request.deployment().is_active() {
            return Err(ProvisionError::DeploymentInactive(
                request.deployment().name().to_string(),
            ));
        }
        let index = self.ctx.pending.add_provision_request(request, None);
        self.ctx.wake();
        Ok(index)
    }

    /// Try to place a request right away, bypassing the queues.
    pub fn dispatch(&self, request: ProvisionRequest) -> Dispatch {
        self.ctx.ledger().in_hand.insert(request.id());
        self.ctx.dispatch_from(request, None, &HashSet::new())
    }

    /// Withdraw a request. Queued requests are removed; a dispatched one
    /// that has not started executing is skipped. Returns `false` if the
    /// request is unknown or already finished.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut ledger = self.ctx.ledger();
        if self.ctx.pending.remove_provision_request(id)
            || self.ctx.failed.remove_provision_request(id)
        {
            ledger.cancelled.remove(&id);
            info!(request = id, "queued request cancelled");
            return true;
        }
        if ledger.in_hand.contains(&id) {
            ledger.cancelled.insert(id);
            info!(request = id, "dispatched request marked cancelled");
            return true;
        }
        false
    }

    /// Drop every queued request of a deployment. Returns how many.
    pub fn remove_deployment(&self, deployment: &str) -> usize {
        let mut ledger = self.ctx.ledger();
        let mut ids = self.ctx.pending.remove_deployment(deployment);
        ids.extend(self.ctx.failed.remove_deployment(deployment));
        for id in &ids {
            ledger.cancelled.remove(id);
        }
        let removed = ids.len();
        if removed > 0 {
            info!(%deployment, removed, "queued requests removed");
        }
        removed
    }

    /// One traversal of both queues, fresh requests first. Returns how many
    /// requests were handed to tasks.
    pub fn process_pending(&self) -> usize {
        let mut dispatched = 0;

        for kind in [PendingKind::Provision, PendingKind::Failed] {
            let queue = self.ctx.queue(kind);
            for entry in queue.entries() {
                let id = entry.request.id();

                let request = {
                    let mut ledger = self.ctx.ledger();
                    if ledger.cancelled.remove(&id) {
                        queue.remove_provision_request(id);
                        continue;
                    }
                    let Some(request) = queue.take(entry.index, id) else {
                        continue;
                    };
                    ledger.in_hand.insert(id);
                    request
                };

                let origin = Origin {
                    kind,
                    index: entry.index,
                };
                if let Dispatch::Dispatched { .. } =
                    self.ctx.dispatch_from(request, Some(origin), &HashSet::new())
                {
                    dispatched += 1;
                }
            }
        }

        dispatched
    }

    /// Run the dispatch loop until `shutdown` flips.
    ///
    /// Traverses the queues whenever something may have changed (a new
    /// request or node, a finished task) and at least every
    /// `pending_interval`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.ctx.source,
            interval_secs = self.pending_interval.as_secs(),
            "dispatch loop started"
        );

        loop {
            let dispatched = self.process_pending();
            if dispatched > 0 {
                debug!(dispatched, queued = self.queued(), "pending traversal");
            }

            tokio::select! {
                _ = self.ctx.wake.notified() => {}
                _ = tokio::time::sleep(self.pending_interval) => {}
                _ = shutdown.changed() => {
                    info!("dispatch loop shutting down");
                    break;
                }
            }
        }
    }

    /// Wait until no provision task or notification is in flight.
    pub async fn wait_idle(&self) {
        loop {
            self.ctx.tasks.wait_idle().await;
            self.ctx.notifications.wait_idle().await;
            if self.ctx.tasks.count() == 0 && self.ctx.notifications.pending() == 0 {
                return;
            }
        }
    }
}
