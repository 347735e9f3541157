//! Standalone mode — every subsystem in one process.
//!
//! The daemon:
//! 1. Opens the deployment archive under the data directory
//! 2. Brings every configured service up on blue
//! 3. Logs every domain event from the event bus
//! 4. Runs the autoscaler loop
//! 5. Serves the REST API until Ctrl-C

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use cutover_core::{CutoverConfig, Event, EventBus, ScalingPolicy, ServiceId};
use cutover_fleet::{Autoscaler, FleetManager, SimulatedProvider};
use cutover_orchestrator::Orchestrator;
use cutover_routing::RoutingController;
use cutover_state::StateStore;

/// How often fleet managers poll the provider while awaiting convergence.
const FLEET_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Options {
    pub config: CutoverConfig,
    pub port: u16,
    pub data_dir: PathBuf,
    pub autoscale_interval: u64,
    pub convergence_polls: u32,
}

pub async fn run(opts: Options) -> anyhow::Result<()> {
    info!(services = opts.config.services.len(), "cutover daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&opts.data_dir)?;
    let db_path = opts.data_dir.join("cutover.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "deployment archive opened");

    let config = Arc::new(opts.config);
    let events = EventBus::default();

    let provider = Arc::new(SimulatedProvider::new(opts.convergence_polls));
    let fleets = FleetManager::new(provider, events.clone(), FLEET_POLL_INTERVAL);
    info!(convergence_polls = opts.convergence_polls, "simulated compute provider initialized");

    let routing = Arc::new(RoutingController::from_config(&config)?);
    info!(
        production = config.load_balancer.production.port,
        test = config.load_balancer.test.port,
        "listeners initialized"
    );

    let policies = scaling_policies(&config)?;
    let orchestrator = Orchestrator::new(config, fleets.clone(), routing, store, events.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let event_handle = tokio::spawn(log_events(events.subscribe(), shutdown_rx.clone()));

    orchestrator.bootstrap().await?;
    info!("services bootstrapped");

    let mut autoscaler = Autoscaler::new(fleets, policies);
    let autoscale_shutdown = shutdown_rx.clone();
    let autoscale_interval = Duration::from_secs(opts.autoscale_interval);
    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(autoscale_interval, autoscale_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = cutover_api::build_router(orchestrator);
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = autoscale_handle.await;
    let _ = event_handle.await;

    info!("cutover daemon stopped");
    Ok(())
}

/// Autoscaling parameters of every service that has them.
pub fn scaling_policies(config: &CutoverConfig) -> anyhow::Result<HashMap<ServiceId, ScalingPolicy>> {
    let mut policies = HashMap::new();
    for service in config.services.keys() {
        if let Some(policy) = config.scaling_for(service)? {
            policies.insert(service.clone(), policy);
        }
    }
    Ok(policies)
}

/// Log every event published on the bus until shutdown.
pub async fn log_events(mut events: broadcast::Receiver<Event>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}

fn log_event(event: &Event) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    match event {
        Event::StateChanged {
            deployment_id,
            service,
            from,
            to,
        } => info!(deployment = %deployment_id, %service, %from, %to, "event: state changed"),
        Event::HealthGate {
            deployment_id,
            status,
            verdict,
            ..
        } => info!(deployment = %deployment_id, %status, %verdict, "event: health gate"),
        Event::RollbackTriggered {
            deployment_id,
            reason,
            ..
        } => warn!(deployment = %deployment_id, %reason, "event: rollback triggered"),
        Event::ScaleAction {
            target_group,
            from,
            to,
            reason,
            ..
        } => info!(%target_group, from, to, %reason, "event: scale action"),
    }
    tracing::trace!(%payload, "event payload");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_services_are_autoscaled() {
        let policies = scaling_policies(&CutoverConfig::scaffold()).unwrap();
        assert_eq!(policies.len(), 2);
        let backend = &policies["backend"];
        assert_eq!((backend.min, backend.max), (1, 2));
        assert_eq!(backend.scale_in_cooldown, Duration::from_secs(60));
    }

    #[test]
    fn services_without_autoscaling_are_skipped() {
        let mut config = CutoverConfig::scaffold();
        if let Some(frontend) = config.services.get_mut("frontend") {
            frontend.autoscaling = None;
        }
        let policies = scaling_policies(&config).unwrap();
        assert!(policies.contains_key("backend"));
        assert!(!policies.contains_key("frontend"));
    }

    #[tokio::test]
    async fn event_logger_stops_on_shutdown() {
        let bus = EventBus::default();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(log_events(bus.subscribe(), rx));

        bus.publish(Event::RollbackTriggered {
            deployment_id: "d-1".to_string(),
            service: "backend".to_string(),
            reason: "health".to_string(),
        });
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn event_logger_stops_when_bus_closes() {
        let bus = EventBus::default();
        let (_tx, rx) = watch::channel(false);
        let handle = tokio::spawn(log_events(bus.subscribe(), rx));
        drop(bus);
        handle.await.unwrap();
    }
}
