//! Health poller — background task per fleet that aggregates instance health.
//!
//! Each poll asks the compute provider what is running, folds instance
//! health into a fleet status, writes it back to the [`FleetManager`], and
//! publishes a [`HealthSample`] on a watch channel for the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cutover_core::{HealthStatus, TargetGroupId};
use cutover_fleet::FleetManager;

use crate::gate::aggregate;

/// One aggregated observation of a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSample {
    pub status: HealthStatus,
    pub healthy: u32,
    pub running: u32,
    pub desired: u32,
}

impl HealthSample {
    fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            healthy: 0,
            running: 0,
            desired: 0,
        }
    }
}

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    samples: watch::Receiver<HealthSample>,
}

/// Runs health polling for any number of fleets.
#[derive(Clone)]
pub struct HealthPoller {
    fleets: FleetManager,
    interval: Duration,
    /// Active monitors: target group → slot.
    monitors: Arc<RwLock<HashMap<TargetGroupId, MonitorSlot>>>,
}

impl HealthPoller {
    pub fn new(fleets: FleetManager, interval: Duration) -> Self {
        Self {
            fleets,
            interval,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start polling a fleet, or return the receiver of the existing poller.
    pub async fn start(&self, target_group: &TargetGroupId) -> watch::Receiver<HealthSample> {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.get(target_group) {
            return slot.samples.clone();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sample_tx, sample_rx) = watch::channel(HealthSample::unknown());
        let fleets = self.fleets.clone();
        let interval = self.interval;
        let tg = target_group.clone();

        let handle = tokio::spawn(async move {
            run_poll_loop(&tg, fleets, interval, sample_tx, shutdown_rx).await;
        });

        monitors.insert(
            target_group.clone(),
            MonitorSlot {
                handle,
                shutdown_tx,
                samples: sample_rx.clone(),
            },
        );
        info!(%target_group, "health poller started");
        sample_rx
    }

    pub async fn stop(&self, target_group: &TargetGroupId) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(target_group) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%target_group, "health poller stopped");
        }
    }

    /// Stop all pollers (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (tg, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(target_group = %tg, "health poller stopped");
        }
    }

    pub async fn is_polling(&self, target_group: &TargetGroupId) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(target_group)
    }
}

async fn run_poll_loop(
    target_group: &TargetGroupId,
    fleets: FleetManager,
    interval: Duration,
    samples: watch::Sender<HealthSample>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%target_group, "health loop starting");

    loop {
        let sample = poll_once(target_group, &fleets).await;
        fleets.record_health(target_group, sample.status).await;
        if samples.send(sample).is_err() {
            debug!(%target_group, "no health subscribers left");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(%target_group, "health loop shutting down");
                break;
            }
        }
    }
}

async fn poll_once(target_group: &TargetGroupId, fleets: &FleetManager) -> HealthSample {
    let desired = fleets
        .get(target_group)
        .await
        .map(|f| f.desired)
        .unwrap_or(0);

    match fleets.observe(target_group).await {
        Ok(observation) => {
            let healthy = observation
                .instances
                .iter()
                .filter(|i| i.status == HealthStatus::Healthy)
                .count() as u32;
            HealthSample {
                status: aggregate(desired, observation.running, &observation.instances),
                healthy,
                running: observation.running,
                desired,
            }
        }
        Err(e) => {
            warn!(%target_group, error = %e, "health poll failed");
            HealthSample {
                desired,
                ..HealthSample::unknown()
            }
        }
    }
}
