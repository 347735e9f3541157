//! In-process compute provider.
//!
//! Instances converge on the desired count only after a configurable number
//! of `describe` polls, which reproduces the eventual consistency of a real
//! provider. Faults are injected per image or per target group so tests and
//! the standalone daemon can exercise every failure path.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use cutover_core::{HealthStatus, InstanceHealth, TargetGroupId};

use crate::provider::{ComputeProvider, FleetObservation, FleetSpec, ProviderError, ProviderFuture};

/// Behaviour injected for every fleet running a given image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFault {
    /// Instances never start; the provider reports a placement failure.
    FailToStart,
    /// Instances start but report unhealthy.
    Unhealthy,
    /// Scale-down requests are accepted but instances never stop.
    StuckOnScaleDown,
}

#[derive(Debug)]
struct SimFleet {
    spec: FleetSpec,
    desired: u32,
    running: u32,
    polls_since_change: u32,
    health_override: Option<HealthStatus>,
    utilization: Option<f64>,
}

#[derive(Debug, Default)]
struct SimInner {
    fleets: HashMap<TargetGroupId, SimFleet>,
    faults: HashMap<String, ImageFault>,
    unavailable: bool,
}

/// Compute provider that keeps all instances in memory.
#[derive(Debug)]
pub struct SimulatedProvider {
    inner: Mutex<SimInner>,
    /// Number of `describe` calls after a change before `running` catches up.
    convergence_polls: u32,
}

impl SimulatedProvider {
    pub fn new(convergence_polls: u32) -> Self {
        Self {
            inner: Mutex::new(SimInner::default()),
            convergence_polls,
        }
    }

    /// Inject a fault for every fleet running `image`.
    pub fn inject(&self, image: &str, fault: ImageFault) {
        let mut inner = self.inner.lock().expect("simulated provider lock");
        inner.faults.insert(image.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        let mut inner = self.inner.lock().expect("simulated provider lock");
        inner.faults.clear();
    }

    /// Force the health every instance of a fleet reports. `None` restores the default.
    pub fn set_health(&self, target_group: &TargetGroupId, health: Option<HealthStatus>) {
        let mut inner = self.inner.lock().expect("simulated provider lock");
        if let Some(fleet) = inner.fleets.get_mut(target_group) {
            fleet.health_override = health;
        }
    }

    pub fn set_utilization(&self, target_group: &TargetGroupId, percent: f64) {
        let mut inner = self.inner.lock().expect("simulated provider lock");
        if let Some(fleet) = inner.fleets.get_mut(target_group) {
            fleet.utilization = Some(percent);
        }
    }

    /// Make every call fail with `Unavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut inner = self.inner.lock().expect("simulated provider lock");
        inner.unavailable = unavailable;
    }

    /// Desired count the provider last accepted, if the fleet exists.
    pub fn desired_count(&self, target_group: &TargetGroupId) -> Option<u32> {
        let inner = self.inner.lock().expect("simulated provider lock");
        inner.fleets.get(target_group).map(|f| f.desired)
    }

    pub fn has_fleet(&self, target_group: &TargetGroupId) -> bool {
        let inner = self.inner.lock().expect("simulated provider lock");
        inner.fleets.contains_key(target_group)
    }

    fn check_available(inner: &SimInner) -> Result<(), ProviderError> {
        if inner.unavailable {
            return Err(ProviderError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ComputeProvider for SimulatedProvider {
    fn create_fleet<'a>(&'a self, spec: &'a FleetSpec) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("simulated provider lock");
            Self::check_available(&inner)?;
            if inner.fleets.contains_key(&spec.target_group) {
                return Err(ProviderError::Rejected(format!(
                    "target group {} already exists",
                    spec.target_group
                )));
            }
            inner.fleets.insert(
                spec.target_group.clone(),
                SimFleet {
                    spec: spec.clone(),
                    desired: 0,
                    running: 0,
                    polls_since_change: 0,
                    health_override: None,
                    utilization: None,
                },
            );
            debug!(target_group = %spec.target_group, image = %spec.image, "simulated fleet created");
            Ok(())
        })
    }

    fn set_desired_count<'a>(
        &'a self,
        target_group: &'a TargetGroupId,
        count: u32,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("simulated provider lock");
            Self::check_available(&inner)?;
            let fleet = inner
                .fleets
                .get_mut(target_group)
                .ok_or_else(|| ProviderError::UnknownTargetGroup(target_group.clone()))?;
            if fleet.desired != count {
                fleet.desired = count;
                fleet.polls_since_change = 0;
            }
            Ok(())
        })
    }

    fn describe<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, FleetObservation> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("simulated provider lock");
            Self::check_available(&inner)?;
            let fault = inner
                .fleets
                .get(target_group)
                .and_then(|f| inner.faults.get(&f.spec.image).copied());
            let convergence = self.convergence_polls;
            let fleet = inner
                .fleets
                .get_mut(target_group)
                .ok_or_else(|| ProviderError::UnknownTargetGroup(target_group.clone()))?;

            if fault == Some(ImageFault::FailToStart) && fleet.desired > 0 {
                fleet.running = 0;
                return Ok(FleetObservation {
                    running: 0,
                    instances: Vec::new(),
                    failed: Some(format!("image {} failed to start", fleet.spec.image)),
                });
            }

            fleet.polls_since_change = fleet.polls_since_change.saturating_add(1);
            if fleet.polls_since_change >= convergence {
                let stuck = fault == Some(ImageFault::StuckOnScaleDown) && fleet.desired < fleet.running;
                if !stuck {
                    fleet.running = fleet.desired;
                }
            }

            let status = fleet.health_override.unwrap_or(match fault {
                Some(ImageFault::Unhealthy) => HealthStatus::Unhealthy,
                _ => HealthStatus::Healthy,
            });
            let instances = (0..fleet.running)
                .map(|i| InstanceHealth {
                    id: format!("{target_group}-{i}"),
                    status,
                })
                .collect();

            Ok(FleetObservation {
                running: fleet.running,
                instances,
                failed: None,
            })
        })
    }

    fn delete_fleet<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().expect("simulated provider lock");
            Self::check_available(&inner)?;
            inner.fleets.remove(target_group);
            debug!(%target_group, "simulated fleet deleted");
            Ok(())
        })
    }

    fn utilization<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, Option<f64>> {
        Box::pin(async move {
            let inner = self.inner.lock().expect("simulated provider lock");
            Self::check_available(&inner)?;
            Ok(inner.fleets.get(target_group).and_then(|f| f.utilization))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::{Color, FleetShape};

    fn spec(image: &str) -> FleetSpec {
        FleetSpec {
            service: "api".to_string(),
            color: Color::Green,
            target_group: TargetGroupId::for_fleet("api", Color::Green),
            image: image.to_string(),
            shape: FleetShape {
                memory_mib: 512,
                cpu_units: 256,
            },
        }
    }

    #[tokio::test]
    async fn converges_after_configured_polls() {
        let provider = SimulatedProvider::new(2);
        let s = spec("api:v2");
        provider.create_fleet(&s).await.unwrap();
        provider.set_desired_count(&s.target_group, 3).await.unwrap();

        let first = provider.describe(&s.target_group).await.unwrap();
        assert_eq!(first.running, 0);

        let second = provider.describe(&s.target_group).await.unwrap();
        assert_eq!(second.running, 3);
        assert!(second.instances.iter().all(|i| i.status == HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn fail_to_start_is_reported() {
        let provider = SimulatedProvider::default();
        provider.inject("api:broken", ImageFault::FailToStart);
        let s = spec("api:broken");
        provider.create_fleet(&s).await.unwrap();
        provider.set_desired_count(&s.target_group, 1).await.unwrap();

        let obs = provider.describe(&s.target_group).await.unwrap();
        assert!(obs.failed.is_some());
        assert_eq!(obs.running, 0);
    }

    #[tokio::test]
    async fn unhealthy_image_reports_unhealthy_instances() {
        let provider = SimulatedProvider::default();
        provider.inject("api:sick", ImageFault::Unhealthy);
        let s = spec("api:sick");
        provider.create_fleet(&s).await.unwrap();
        provider.set_desired_count(&s.target_group, 2).await.unwrap();

        let obs = provider.describe(&s.target_group).await.unwrap();
        assert_eq!(obs.running, 2);
        assert!(obs.instances.iter().all(|i| i.status == HealthStatus::Unhealthy));
    }

    #[tokio::test]
    async fn stuck_scale_down_keeps_instances() {
        let provider = SimulatedProvider::default();
        provider.inject("api:sticky", ImageFault::StuckOnScaleDown);
        let s = spec("api:sticky");
        provider.create_fleet(&s).await.unwrap();
        provider.set_desired_count(&s.target_group, 2).await.unwrap();
        provider.describe(&s.target_group).await.unwrap();

        provider.set_desired_count(&s.target_group, 0).await.unwrap();
        let obs = provider.describe(&s.target_group).await.unwrap();
        assert_eq!(obs.running, 2);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let provider = SimulatedProvider::default();
        let s = spec("api:v1");
        provider.create_fleet(&s).await.unwrap();
        assert!(matches!(
            provider.create_fleet(&s).await,
            Err(ProviderError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let provider = SimulatedProvider::default();
        provider.set_unavailable(true);
        let s = spec("api:v1");
        assert!(matches!(
            provider.create_fleet(&s).await,
            Err(ProviderError::Unavailable(_))
        ));
    }
}
