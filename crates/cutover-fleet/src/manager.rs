//! Fleet manager — tracks every fleet and drives the compute provider.
//!
//! The manager is the only component that changes a fleet's desired count.
//! Health pollers write aggregated health back through
//! [`FleetManager::record_health`]; they never scale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};

use cutover_core::{
    Color, Event, EventBus, Fleet, FleetShape, HealthStatus, ServiceId, TargetGroupId,
};

use crate::error::{FleetError, FleetResult};
use crate::provider::{ComputeProvider, FleetObservation, FleetSpec};

/// Cloneable handle over all tracked fleets.
#[derive(Clone)]
pub struct FleetManager {
    provider: Arc<dyn ComputeProvider>,
    /// Tracked fleets: target group → fleet.
    fleets: Arc<RwLock<HashMap<TargetGroupId, Fleet>>>,
    events: EventBus,
    poll_interval: Duration,
}

impl FleetManager {
    pub fn new(provider: Arc<dyn ComputeProvider>, events: EventBus, poll_interval: Duration) -> Self {
        Self {
            provider,
            fleets: Arc::new(RwLock::new(HashMap::new())),
            events,
            poll_interval,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ComputeProvider> {
        &self.provider
    }

    /// Create a fleet for `service` in `color` and request `desired` instances.
    ///
    /// Fails if that color already has a fleet for the service.
    pub async fn provision(
        &self,
        service: &str,
        color: Color,
        image: &str,
        shape: FleetShape,
        desired: u32,
    ) -> FleetResult<Fleet> {
        let target_group = TargetGroupId::for_fleet(service, color);
        {
            let fleets = self.fleets.read().await;
            if fleets.contains_key(&target_group) {
                return Err(FleetError::AlreadyExists(target_group));
            }
        }

        let spec = FleetSpec {
            service: service.to_string(),
            color,
            target_group: target_group.clone(),
            image: image.to_string(),
            shape,
        };
        self.provider.create_fleet(&spec).await?;

        {
            let mut fleets = self.fleets.write().await;
            fleets.insert(
                target_group.clone(),
                Fleet {
                    service: service.to_string(),
                    color,
                    target_group: target_group.clone(),
                    image: image.to_string(),
                    desired: 0,
                    running: 0,
                    health: HealthStatus::Unknown,
                    frozen: false,
                },
            );
        }
        info!(%service, %color, %image, %target_group, "fleet created");

        self.scale_to(&target_group, desired, "provision").await?;
        self.get(&target_group)
            .await
            .ok_or(FleetError::NotFound(target_group))
    }

    /// Set a fleet's desired count. Returns `false` when it already had that
    /// count, in which case nothing is sent to the provider.
    pub async fn scale_to(&self, target_group: &TargetGroupId, desired: u32, reason: &str) -> FleetResult<bool> {
        let (service, current, frozen) = {
            let fleets = self.fleets.read().await;
            let fleet = fleets
                .get(target_group)
                .ok_or_else(|| FleetError::NotFound(target_group.clone()))?;
            (fleet.service.clone(), fleet.desired, fleet.frozen)
        };

        if current == desired {
            debug!(%target_group, desired, "scale is a no-op");
            return Ok(false);
        }
        if frozen && desired > current {
            debug!(%target_group, from = current, to = desired, "fleet is frozen, scale-out ignored");
            return Ok(false);
        }

        self.provider.set_desired_count(target_group, desired).await?;

        {
            let mut fleets = self.fleets.write().await;
            if let Some(fleet) = fleets.get_mut(target_group) {
                fleet.desired = desired;
            }
        }

        info!(%target_group, from = current, to = desired, %reason, "fleet scaled");
        self.events.publish(Event::ScaleAction {
            service,
            target_group: target_group.clone(),
            from: current,
            to: desired,
            reason: reason.to_string(),
        });
        Ok(true)
    }

    /// Cancel any pending scale-out: freeze the fleet against the autoscaler
    /// and request zero instances.
    pub async fn cancel_scale_out(&self, target_group: &TargetGroupId) -> FleetResult<()> {
        {
            let mut fleets = self.fleets.write().await;
            let fleet = fleets
                .get_mut(target_group)
                .ok_or_else(|| FleetError::NotFound(target_group.clone()))?;
            fleet.frozen = true;
        }
        self.scale_to(target_group, 0, "cancel").await?;
        Ok(())
    }

    /// Ask the provider what is running and record the running count.
    pub async fn observe(&self, target_group: &TargetGroupId) -> FleetResult<FleetObservation> {
        let observation = self.provider.describe(target_group).await?;
        let mut fleets = self.fleets.write().await;
        if let Some(fleet) = fleets.get_mut(target_group) {
            fleet.running = observation.running;
        }
        Ok(observation)
    }

    /// Poll until the fleet runs its desired count.
    ///
    /// A fleet with desired count 0 can never become running and fails fast.
    pub async fn await_running(&self, target_group: &TargetGroupId, timeout: Duration) -> FleetResult<Fleet> {
        let desired = self
            .get(target_group)
            .await
            .ok_or_else(|| FleetError::NotFound(target_group.clone()))?
            .desired;
        if desired == 0 {
            return Err(FleetError::Empty(target_group.clone()));
        }

        let poll = async {
            loop {
                let observation = self.observe(target_group).await?;
                if let Some(detail) = observation.failed {
                    return Err(FleetError::StartFailed {
                        target_group: target_group.clone(),
                        detail,
                    });
                }
                if observation.running >= desired {
                    return self
                        .get(target_group)
                        .await
                        .ok_or_else(|| FleetError::NotFound(target_group.clone()));
                }
                debug!(%target_group, running = observation.running, desired, "waiting for fleet");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                target_group: target_group.clone(),
                goal: "reach its desired count",
                waited: timeout,
            }),
        }
    }

    /// Poll until no instance of the fleet is running.
    pub async fn await_drained(&self, target_group: &TargetGroupId, timeout: Duration) -> FleetResult<()> {
        let poll = async {
            loop {
                let observation = self.observe(target_group).await?;
                if observation.running == 0 {
                    return Ok(());
                }
                debug!(%target_group, running = observation.running, "waiting for fleet to drain");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Timeout {
                target_group: target_group.clone(),
                goal: "drain",
                waited: timeout,
            }),
        }
    }

    /// Store the aggregated health computed by a health poller.
    pub async fn record_health(&self, target_group: &TargetGroupId, health: HealthStatus) {
        let mut fleets = self.fleets.write().await;
        if let Some(fleet) = fleets.get_mut(target_group) {
            if fleet.health != health {
                debug!(%target_group, from = %fleet.health, to = %health, "fleet health changed");
            }
            fleet.health = health;
        }
    }

    /// Delete the fleet at the provider and stop tracking it.
    pub async fn destroy(&self, target_group: &TargetGroupId) -> FleetResult<()> {
        self.provider.delete_fleet(target_group).await?;
        let mut fleets = self.fleets.write().await;
        fleets.remove(target_group);
        info!(%target_group, "fleet destroyed");
        Ok(())
    }

    pub async fn get(&self, target_group: &TargetGroupId) -> Option<Fleet> {
        let fleets = self.fleets.read().await;
        fleets.get(target_group).cloned()
    }

    pub async fn fleet_for(&self, service: &str, color: Color) -> Option<Fleet> {
        self.get(&TargetGroupId::for_fleet(service, color)).await
    }

    /// All fleets of a service, blue first.
    pub async fn for_service(&self, service: &str) -> Vec<Fleet> {
        let fleets = self.fleets.read().await;
        let mut out: Vec<Fleet> = fleets
            .values()
            .filter(|f| f.service == service)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.color);
        out
    }

    pub async fn list(&self) -> Vec<Fleet> {
        let fleets = self.fleets.read().await;
        let mut out: Vec<Fleet> = fleets.values().cloned().collect();
        out.sort_by(|a, b| a.target_group.cmp(&b.target_group));
        out
    }

    /// Desired counts per target group, for comparing before/after snapshots.
    pub async fn desired_counts(&self) -> HashMap<TargetGroupId, u32> {
        let fleets = self.fleets.read().await;
        fleets
            .iter()
            .map(|(tg, f)| (tg.clone(), f.desired))
            .collect()
    }

    pub async fn services(&self) -> Vec<ServiceId> {
        let fleets = self.fleets.read().await;
        let mut out: Vec<ServiceId> = fleets.values().map(|f| f.service.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}
