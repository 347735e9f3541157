//! Autoscaler — utilization-driven fleet scaling.
//!
//! Asks the compute provider for each fleet's utilization, compares it with
//! the service's target, and scales through the [`FleetManager`]. Scale-in
//! and scale-out cooldowns are tracked independently per target group.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use cutover_core::{Fleet, ScalingPolicy, ServiceId, TargetGroupId};

use crate::manager::FleetManager;

/// A scaling decision for a single fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Scale to the specified instance count.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Per-fleet cooldown tracking.
#[derive(Default)]
struct ScaleState {
    last_scale_out: Option<Instant>,
    last_scale_in: Option<Instant>,
}

fn cooled_down(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_none_or(|t| now.duration_since(t) >= cooldown)
}

pub struct Autoscaler {
    fleets: FleetManager,
    policies: HashMap<ServiceId, ScalingPolicy>,
    scale_states: HashMap<TargetGroupId, ScaleState>,
}

impl Autoscaler {
    pub fn new(fleets: FleetManager, policies: HashMap<ServiceId, ScalingPolicy>) -> Self {
        Self {
            fleets,
            policies,
            scale_states: HashMap::new(),
        }
    }

    /// Decide whether `fleet` should change size given its current
    /// utilization in percent.
    pub fn evaluate(&mut self, fleet: &Fleet, policy: &ScalingPolicy, utilization: f64) -> ScaleDecision {
        if fleet.frozen || fleet.desired == 0 {
            return ScaleDecision::NoChange;
        }

        let now = Instant::now();
        let state = self
            .scale_states
            .entry(fleet.target_group.clone())
            .or_default();
        let target = policy.target_utilization;
        let current = fleet.desired;

        if utilization > target * 1.1 && cooled_down(state.last_scale_out, policy.scale_out_cooldown, now) {
            let desired = ((current as f64) * (utilization / target)).ceil() as u32;
            let clamped = desired.min(policy.max);
            if clamped > current {
                state.last_scale_out = Some(now);
                debug!(
                    target_group = %fleet.target_group,
                    from = current,
                    to = clamped,
                    utilization,
                    target,
                    "scaling out"
                );
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        if utilization < target * 0.5
            && current > policy.min
            && cooled_down(state.last_scale_in, policy.scale_in_cooldown, now)
        {
            let desired = ((current as f64) * (utilization / target)).ceil().max(1.0) as u32;
            let clamped = desired.max(policy.min);
            if clamped < current {
                state.last_scale_in = Some(now);
                debug!(
                    target_group = %fleet.target_group,
                    from = current,
                    to = clamped,
                    utilization,
                    target,
                    "scaling in"
                );
                return ScaleDecision::ScaleTo(clamped);
            }
        }

        ScaleDecision::NoChange
    }

    /// Evaluate every tracked fleet whose service has autoscaling configured
    /// and apply the resulting decisions.
    pub async fn evaluate_all(&mut self) -> Vec<(TargetGroupId, ScaleDecision)> {
        let mut decisions = Vec::new();

        for fleet in self.fleets.list().await {
            let Some(policy) = self.policies.get(&fleet.service).cloned() else {
                continue;
            };
            if fleet.frozen || fleet.desired == 0 {
                continue;
            }

            let utilization = match self.fleets.provider().utilization(&fleet.target_group).await {
                Ok(Some(u)) => u,
                Ok(None) => continue,
                Err(e) => {
                    warn!(target_group = %fleet.target_group, error = %e, "utilization unavailable");
                    continue;
                }
            };

            let decision = self.evaluate(&fleet, &policy, utilization);
            if let ScaleDecision::ScaleTo(target) = &decision
                && let Err(e) = self.fleets.scale_to(&fleet.target_group, *target, "autoscale").await
            {
                warn!(
                    target_group = %fleet.target_group,
                    target,
                    error = %e,
                    "scaling action failed"
                );
            }

            decisions.push((fleet.target_group.clone(), decision));
        }

        decisions
    }

    /// Run the autoscaler loop until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), services = self.policies.len(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.evaluate_all().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cutover_core::{Color, EventBus, FleetShape, HealthStatus};

    use crate::simulated::SimulatedProvider;

    fn policy() -> ScalingPolicy {
        ScalingPolicy {
            min: 1,
            max: 4,
            target_utilization: 40.0,
            scale_in_cooldown: Duration::from_secs(60),
            scale_out_cooldown: Duration::from_secs(60),
        }
    }

    fn fleet(desired: u32) -> Fleet {
        Fleet {
            service: "api".to_string(),
            color: Color::Blue,
            target_group: TargetGroupId::for_fleet("api", Color::Blue),
            image: "api:v1".to_string(),
            desired,
            running: desired,
            health: HealthStatus::Healthy,
            frozen: false,
        }
    }

    fn scaler() -> Autoscaler {
        let manager = FleetManager::new(
            Arc::new(SimulatedProvider::default()),
            EventBus::default(),
            Duration::from_millis(10),
        );
        Autoscaler::new(manager, HashMap::new())
    }

    #[tokio::test(start_paused = true)]
    async fn scale_out_above_target() {
        let mut scaler = scaler();
        // 80% against a 40% target doubles the fleet.
        assert_eq!(scaler.evaluate(&fleet(1), &policy(), 80.0), ScaleDecision::ScaleTo(2));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_out_respects_max() {
        let mut scaler = scaler();
        assert_eq!(scaler.evaluate(&fleet(2), &policy(), 400.0), ScaleDecision::ScaleTo(4));
    }

    #[tokio::test(start_paused = true)]
    async fn scale_in_respects_min() {
        let mut scaler = scaler();
        assert_eq!(scaler.evaluate(&fleet(3), &policy(), 1.0), ScaleDecision::ScaleTo(1));
        assert_eq!(scaler.evaluate(&fleet(1), &policy(), 1.0), ScaleDecision::NoChange);
    }

    #[tokio::test(start_paused = true)]
    async fn no_change_near_target() {
        let mut scaler = scaler();
        assert_eq!(scaler.evaluate(&fleet(2), &policy(), 42.0), ScaleDecision::NoChange);
    }

    #[tokio::test(start_paused = true)]
    async fn frozen_fleet_is_never_scaled() {
        let mut scaler = scaler();
        let mut f = fleet(1);
        f.frozen = true;
        assert_eq!(scaler.evaluate(&f, &policy(), 99.0), ScaleDecision::NoChange);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_are_independent() {
        let mut scaler = scaler();
        assert_eq!(scaler.evaluate(&fleet(1), &policy(), 80.0), ScaleDecision::ScaleTo(2));

        // Scale-out is cooling down, scale-in is not.
        assert_eq!(scaler.evaluate(&fleet(2), &policy(), 160.0), ScaleDecision::NoChange);
        assert_eq!(scaler.evaluate(&fleet(2), &policy(), 5.0), ScaleDecision::ScaleTo(1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(scaler.evaluate(&fleet(1), &policy(), 80.0), ScaleDecision::ScaleTo(2));
    }

    #[tokio::test(start_paused = true)]
    async fn evaluate_all_scales_through_manager() {
        let provider = Arc::new(SimulatedProvider::default());
        let manager = FleetManager::new(provider.clone(), EventBus::default(), Duration::from_millis(10));
        let shape = FleetShape {
            memory_mib: 512,
            cpu_units: 256,
        };
        let blue = manager
            .provision("api", Color::Blue, "api:v1", shape.clone(), 1)
            .await
            .unwrap();
        manager
            .provision("web", Color::Blue, "web:v1", shape, 1)
            .await
            .unwrap();
        provider.set_utilization(&blue.target_group, 90.0);

        let policies = HashMap::from([("api".to_string(), policy())]);
        let mut scaler = Autoscaler::new(manager.clone(), policies);
        let decisions = scaler.evaluate_all().await;

        // Only `api` has a policy; `web` is skipped.
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].1, ScaleDecision::ScaleTo(3));
        assert_eq!(manager.get(&blue.target_group).await.unwrap().desired, 3);
        assert_eq!(provider.desired_count(&blue.target_group), Some(3));
    }
}
