//! Standalone mode: the whole provisioning stack in one process, with
//! simulated cybernodes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use prov_core::{BoxFuture, MonitorConfig};
use provgrid_events::{EventHandler, MonitorEvent, NotificationPool};
use provgrid_metrics::{WatchRegistry, render_prometheus};
use provgrid_peer::{InitialLoad, LocalPeer, PeerCoordinator};
use provgrid_provision::{DeploymentHandle, ServiceProvisioner};
use provgrid_selector::InstantiatorResource;

use crate::deployment::DeploymentManager;
use crate::local_node::SimulatedNode;

/// Logs every monitor event.
struct LogEventHandler;

impl EventHandler for LogEventHandler {
    fn fire<'a>(&'a self, event: &'a MonitorEvent) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match event {
                MonitorEvent::ProvisionFailure(e) => {
                    warn!(kind = event.kind(), node = ?e.node, "{event}")
                }
                MonitorEvent::ResourceDropped { orphaned, .. } => {
                    warn!(kind = event.kind(), orphaned = orphaned.len(), "{event}")
                }
                MonitorEvent::ServiceProvisioned { .. } => info!(kind = event.kind(), "{event}"),
            }
            Ok(())
        })
    }
}

pub async fn run(config: MonitorConfig, report_interval: Duration) -> anyhow::Result<()> {
    info!(
        monitor = %config.monitor.name,
        address = %config.monitor.address,
        "provision monitor starting in standalone mode"
    );

    // ── Provisioning core ──────────────────────────────────────

    let watches = Arc::new(WatchRegistry::new());
    let notifications = NotificationPool::new(config.events.pool_size);
    notifications.register(Arc::new(LogEventHandler));

    let provisioner = Arc::new(
        ServiceProvisioner::new(
            &config.monitor.name,
            &config.provisioning,
            notifications,
            watches.clone(),
        )
        .await,
    );

    let mut nodes: HashMap<String, Arc<SimulatedNode>> = HashMap::new();
    for node in &config.cybernodes {
        let sim = Arc::new(SimulatedNode::new(node));
        let resource =
            InstantiatorResource::new(&node.name, &node.address, node.capacity, sim.clone())
                .with_labels(node.labels.clone())
                .with_handback(format!("{}@{}", config.monitor.name, node.name));
        provisioner.register_resource(Arc::new(resource))?;
        nodes.insert(node.name.clone(), sim);
    }
    info!(nodes = nodes.len(), "simulated cybernodes registered");

    let deployments: Vec<Arc<DeploymentManager>> = config
        .deployments
        .iter()
        .map(DeploymentManager::from_config)
        .collect();

    let coordinator = Arc::new(PeerCoordinator::new(
        Arc::new(LocalPeer::new(&config.monitor.name, &config.monitor.address)),
        config.peers.poll_interval,
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let dispatch_handle = {
        let provisioner = provisioner.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { provisioner.run(shutdown).await })
    };

    let report_handle = {
        let watches = watches.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { watches.run(report_interval, shutdown).await })
    };

    let load_handle = {
        let provisioner = provisioner.clone();
        let deployments = deployments.clone();
        coordinator
            .clone()
            .spawn_initial_load(shutdown_rx.clone(), move || async move {
                let mut submitted = 0;
                for deployment in &deployments {
                    for request in deployment.requests() {
                        provisioner.submit(request)?;
                        submitted += 1;
                    }
                }
                Ok(submitted)
            })
    };

    // ── Run until Ctrl-C ───────────────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    match load_handle.await {
        Ok(Ok(InitialLoad::Loaded(count))) => debug!(count, "initial load had completed"),
        Ok(Ok(InitialLoad::Interrupted)) => info!("initial load never ran"),
        Ok(Err(e)) => error!(error = %e, "initial load failed"),
        Err(e) => error!(error = %e, "initial load task panicked"),
    }
    let _ = dispatch_handle.await;
    let _ = report_handle.await;

    // ── Undeploy ───────────────────────────────────────────────

    for deployment in &deployments {
        deployment.undeploy();
        provisioner.remove_deployment(deployment.name());
    }
    provisioner.wait_idle().await;

    for deployment in &deployments {
        for instance in deployment.instances() {
            match provisioner.release_instance(&instance.node_name, &instance.id) {
                Ok(_) => {
                    if let Some(node) = nodes.get(&instance.node_name) {
                        node.terminate();
                    }
                }
                Err(e) => debug!(instance = %instance.id, error = %e, "instance not released"),
            }
        }
        info!(
            deployment = %deployment.name(),
            instances = deployment.instances().len(),
            failures = deployment.failures(),
            uninstantiable = deployment.uninstantiable_count(),
            "deployment summary"
        );
    }
    provisioner.notifications().wait_idle().await;

    let hosted: u32 = nodes.values().map(|n| n.hosted()).sum();
    debug!(hosted, "instances left on simulated nodes");
    let stats = render_prometheus(&watches.snapshot().await);
    debug!("final watch stats:\n{stats}");

    info!("provision monitor stopped");
    Ok(())
}
