//! Rollback manager — puts a service back on its last stable configuration.

use std::sync::Arc;

use tracing::{debug, info};

use cutover_fleet::{FleetError, FleetManager};
use cutover_routing::RoutingController;
use cutover_state::{DeploymentRecord, DeploymentState};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::machine::{Trigger, transition};

/// Only ever invoked by the orchestrator's drivers.
#[derive(Clone)]
pub struct RollbackManager {
    fleets: FleetManager,
    routing: Arc<RoutingController>,
}

impl RollbackManager {
    pub fn new(fleets: FleetManager, routing: Arc<RoutingController>) -> Self {
        Self { fleets, routing }
    }

    /// Revert a deployment and mark it ROLLED_BACK.
    ///
    /// Production goes back to the stable fleet and the service leaves the
    /// test listener in one routing step. The candidate is frozen, scaled to
    /// zero, and deleted. The stable fleet is not touched. Returns `false`
    /// when the record was already rolled back.
    pub async fn revert(&self, record: &mut DeploymentRecord) -> OrchestratorResult<bool> {
        if matches!(record.state, DeploymentState::RolledBack { .. }) {
            debug!(deployment = %record.id, "already rolled back");
            return Ok(false);
        }
        let next = transition(&record.state, &Trigger::Reverted)?;

        self.routing
            .restore(&record.service, &record.stable.target_group)?;

        let candidate = &record.candidate.target_group;
        match self.fleets.cancel_scale_out(candidate).await {
            Ok(()) => self.fleets.destroy(candidate).await?,
            Err(FleetError::NotFound(_)) => {
                debug!(deployment = %record.id, %candidate, "no candidate fleet to remove");
            }
            Err(e) => return Err(OrchestratorError::Fleet(e)),
        }

        record.enter(next);
        info!(
            deployment = %record.id,
            service = %record.service,
            live = %record.stable.target_group,
            "deployment rolled back"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cutover_core::{Color, CutoverConfig, EventBus, FleetShape, ListenerKind};
    use cutover_fleet::SimulatedProvider;

    fn shape() -> FleetShape {
        FleetShape {
            memory_mib: 512,
            cpu_units: 256,
        }
    }

    async fn setup() -> (RollbackManager, FleetManager, Arc<RoutingController>, DeploymentRecord) {
        let fleets = FleetManager::new(
            Arc::new(SimulatedProvider::default()),
            EventBus::default(),
            Duration::from_millis(10),
        );
        let routing = Arc::new(RoutingController::from_config(&CutoverConfig::scaffold()).unwrap());

        let blue = fleets
            .provision("backend", Color::Blue, "api:v1", shape(), 1)
            .await
            .unwrap();
        routing
            .attach(ListenerKind::Production, "backend", &blue.target_group)
            .unwrap();
        let green = fleets
            .provision("backend", Color::Green, "api:v2", shape(), 1)
            .await
            .unwrap();
        routing
            .attach(ListenerKind::Test, "backend", &green.target_group)
            .unwrap();

        let mut record = DeploymentRecord::new("d-1", "backend", "api:v2", "api:v1", Color::Blue);
        record.enter(DeploymentState::Provisioning);
        record.enter(DeploymentState::Validating);
        record.enter(DeploymentState::RollingBack {
            reason: "health".to_string(),
        });

        (RollbackManager::new(fleets.clone(), routing.clone()), fleets, routing, record)
    }

    #[tokio::test]
    async fn revert_restores_stable_configuration() {
        let (rollback, fleets, routing, mut record) = setup().await;

        assert!(rollback.revert(&mut record).await.unwrap());

        assert!(matches!(record.state, DeploymentState::RolledBack { .. }));
        assert_eq!(routing.live_target("backend").unwrap().as_str(), "backend-blue");
        assert!(routing.summary("backend").test.is_none());
        assert!(fleets.fleet_for("backend", Color::Green).await.is_none());
        assert_eq!(fleets.fleet_for("backend", Color::Blue).await.unwrap().desired, 1);
    }

    #[tokio::test]
    async fn revert_is_idempotent() {
        let (rollback, fleets, routing, mut record) = setup().await;

        rollback.revert(&mut record).await.unwrap();
        let once = (record.clone(), routing.snapshot(), fleets.desired_counts().await);

        assert!(!rollback.revert(&mut record).await.unwrap());
        let twice = (record.clone(), routing.snapshot(), fleets.desired_counts().await);

        assert_eq!(once.0, twice.0);
        assert_eq!(*once.1, *twice.1);
        assert_eq!(once.2, twice.2);
    }

    #[tokio::test]
    async fn revert_without_candidate_fleet() {
        let (rollback, fleets, _routing, mut record) = setup().await;
        fleets
            .destroy(&record.candidate.target_group)
            .await
            .unwrap();
        assert!(rollback.revert(&mut record).await.unwrap());
    }

    #[tokio::test]
    async fn revert_requires_rolling_back_state() {
        let (rollback, _fleets, _routing, mut record) = setup().await;
        record.enter(DeploymentState::Stable);
        assert!(matches!(
            rollback.revert(&mut record).await,
            Err(OrchestratorError::Transition(_))
        ));
    }
}
