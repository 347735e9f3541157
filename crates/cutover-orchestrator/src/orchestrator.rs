//! Orchestrator handle — request validation and per-service drivers.
//!
//! Each service owns a slot guarded by its own mutex. Submitting a
//! deployment takes the slot, checks that nothing is in flight, and spawns
//! a [`Driver`] that owns the new record until it reaches a terminal state.
//! Services never share a lock, so their machines run fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{info, warn};

use cutover_core::{
    Color, CutoverConfig, DeploymentId, EventBus, Fleet, ListenerKind, ServiceId, TargetGroupId,
};
use cutover_fleet::FleetManager;
use cutover_health::{ApprovalError, ApprovalGate};
use cutover_routing::{RoutingController, RoutingSummary};
use cutover_state::{ApprovalDecision, DeploymentRecord, DeploymentState, StateStore};

use crate::driver::Driver;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::machine::accepts_rollback;
use crate::rollback::RollbackManager;

/// Per-service bookkeeping shared by the handle and the service's driver.
pub(crate) struct ServiceSlot {
    /// Color of the fleet the next deployment treats as stable.
    pub(crate) live: Color,
    /// Image the live fleet runs.
    pub(crate) image: String,
    pub(crate) active: Option<DeploymentId>,
    /// Fleets left behind by a failed scale-down.
    pub(crate) retained: Vec<TargetGroupId>,
}

#[derive(Clone)]
struct DeploymentHandle {
    service: ServiceId,
    record: watch::Receiver<DeploymentRecord>,
    rollback: Arc<watch::Sender<bool>>,
}

pub(crate) struct Shared {
    pub(crate) config: Arc<CutoverConfig>,
    pub(crate) fleets: FleetManager,
    pub(crate) routing: Arc<RoutingController>,
    pub(crate) approvals: ApprovalGate,
    pub(crate) rollback: RollbackManager,
    pub(crate) store: StateStore,
    pub(crate) events: EventBus,
    pub(crate) services: HashMap<ServiceId, Arc<Mutex<ServiceSlot>>>,
    /// Latest deployment of each service.
    deployments: RwLock<HashMap<DeploymentId, DeploymentHandle>>,
}

/// Point-in-time view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: ServiceId,
    /// State of the service's latest deployment, `stable` if it never had one.
    #[serde(flatten)]
    pub state: DeploymentState,
    pub deployment_id: Option<DeploymentId>,
    /// Color behind the production default action.
    pub live_color: Option<Color>,
    /// Color being rolled out, while a deployment is in flight.
    pub candidate_color: Option<Color>,
    pub live_image: String,
    pub routing: RoutingSummary,
    pub fleets: Vec<Fleet>,
    pub retained: Vec<TargetGroupId>,
}

/// Cloneable handle to the deployment orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<CutoverConfig>,
        fleets: FleetManager,
        routing: Arc<RoutingController>,
        store: StateStore,
        events: EventBus,
    ) -> Self {
        let services = config
            .services
            .iter()
            .map(|(id, svc)| {
                let slot = ServiceSlot {
                    live: Color::Blue,
                    image: svc.image.clone(),
                    active: None,
                    retained: Vec::new(),
                };
                (id.clone(), Arc::new(Mutex::new(slot)))
            })
            .collect();

        let rollback = RollbackManager::new(fleets.clone(), routing.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                fleets,
                routing,
                approvals: ApprovalGate::new(),
                rollback,
                store,
                events,
                services,
                deployments: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Bring every configured service up on blue and route production to it.
    ///
    /// Records left non-terminal by a previous process are closed as failed
    /// first; their fleets did not survive the restart.
    pub async fn bootstrap(&self) -> OrchestratorResult<()> {
        for mut record in self.shared.store.list_unfinished()? {
            warn!(deployment = %record.id, state = %record.state, "closing interrupted deployment");
            record.enter(DeploymentState::Failed {
                reason: "interrupted by restart".to_string(),
            });
            self.shared.store.put_record(&record)?;
        }

        for (service, svc) in &self.shared.config.services {
            let policy = self.shared.config.policy_for(service)?;
            let bootstrap_err = |detail: String| OrchestratorError::Bootstrap {
                service: service.clone(),
                detail,
            };

            let fleet = self
                .shared
                .fleets
                .provision(service, Color::Blue, &svc.image, svc.shape(), svc.desired_count)
                .await
                .map_err(|e| bootstrap_err(e.to_string()))?;
            self.shared
                .fleets
                .await_running(&fleet.target_group, policy.provisioning_timeout)
                .await
                .map_err(|e| bootstrap_err(e.to_string()))?;
            self.shared
                .routing
                .attach(ListenerKind::Production, service, &fleet.target_group)
                .map_err(|e| bootstrap_err(e.to_string()))?;

            info!(%service, image = %svc.image, desired = svc.desired_count, "service live on blue");
        }
        Ok(())
    }

    /// Start a deployment of `image` for `service`.
    pub async fn submit(&self, service: &str, image: &str) -> OrchestratorResult<DeploymentId> {
        let slot = self
            .shared
            .services
            .get(service)
            .ok_or_else(|| OrchestratorError::UnknownService(service.to_string()))?;
        let mut slot = slot.lock().await;
        if let Some(active) = &slot.active {
            return Err(OrchestratorError::Conflict {
                service: service.to_string(),
                active: active.clone(),
            });
        }

        let policy = self.shared.config.policy_for(service)?;
        let shape = self
            .shared
            .config
            .service(service)
            .map(|s| s.shape())
            .ok_or_else(|| OrchestratorError::UnknownService(service.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let record = DeploymentRecord::new(&id, service, image, &slot.image, slot.live);
        let (tx, record_rx) = watch::channel(record.clone());
        let (rollback_tx, rollback_rx) = watch::channel(false);

        {
            let mut deployments = self.shared.deployments.write().await;
            deployments.retain(|_, h| h.service != service);
            deployments.insert(
                id.clone(),
                DeploymentHandle {
                    service: service.to_string(),
                    record: record_rx,
                    rollback: Arc::new(rollback_tx),
                },
            );
        }
        slot.active = Some(id.clone());

        let mut driver = Driver::new(self.shared.clone(), record, tx, rollback_rx, policy, shape);
        driver.start().await;
        drop(slot);

        info!(deployment = %id, %service, %image, "deployment submitted");
        tokio::spawn(driver.run());
        Ok(id)
    }

    /// Record the approval decision for a deployment awaiting it.
    pub async fn decide(&self, deployment_id: &str, decision: ApprovalDecision) -> OrchestratorResult<()> {
        let handle = self
            .handle(deployment_id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(deployment_id.to_string()))?;
        let (state, decided) = {
            let record = handle.record.borrow();
            (record.state.clone(), record.decision.is_some())
        };
        if decided {
            return Err(OrchestratorError::DuplicateDecision(deployment_id.to_string()));
        }
        if state != DeploymentState::AwaitingApproval {
            return Err(OrchestratorError::WrongState {
                deployment_id: deployment_id.to_string(),
                state: state.name().to_string(),
            });
        }

        let approve = decision == ApprovalDecision::Approve;
        self.shared
            .approvals
            .record(deployment_id, approve)
            .map_err(|e| match e {
                ApprovalError::DuplicateDecision(id) => OrchestratorError::DuplicateDecision(id),
                ApprovalError::NotRequested(id) | ApprovalError::Closed(id) => {
                    OrchestratorError::WrongState {
                        deployment_id: id,
                        state: state.name().to_string(),
                    }
                }
            })
    }

    /// Ask a deployment to roll back. A no-op once the deployment is
    /// terminal or past the point of no return; returns the record as it
    /// stood when the request was made.
    pub async fn rollback(&self, deployment_id: &str) -> OrchestratorResult<DeploymentRecord> {
        let Some(handle) = self.handle(deployment_id).await else {
            return match self.shared.store.get_record(deployment_id)? {
                Some(record) if record.is_terminal() => Ok(record),
                _ => Err(OrchestratorError::NotFound(deployment_id.to_string())),
            };
        };

        let record = handle.record.borrow().clone();
        if record.is_terminal() {
            info!(deployment = %deployment_id, state = %record.state, "rollback ignored, deployment finished");
        } else if !accepts_rollback(&record.state) {
            info!(deployment = %deployment_id, state = %record.state, "rollback ignored, cutover is final");
        } else {
            handle.rollback.send_replace(true);
            info!(deployment = %deployment_id, state = %record.state, "rollback requested");
        }
        Ok(record)
    }

    pub async fn status(&self, service: &str) -> OrchestratorResult<ServiceStatus> {
        let slot = self
            .shared
            .services
            .get(service)
            .ok_or_else(|| OrchestratorError::UnknownService(service.to_string()))?;

        let latest = {
            let deployments = self.shared.deployments.read().await;
            deployments
                .values()
                .find(|h| h.service == service)
                .map(|h| h.record.borrow().clone())
        };
        let (image, retained) = {
            let slot = slot.lock().await;
            (slot.image.clone(), slot.retained.clone())
        };

        let live_color = self.shared.routing.live_target(service).and_then(|tg| {
            [Color::Blue, Color::Green]
                .into_iter()
                .find(|c| TargetGroupId::for_fleet(service, *c) == tg)
        });
        let candidate_color = latest
            .as_ref()
            .filter(|r| !r.is_terminal())
            .map(|r| r.candidate.color)
            .filter(|c| Some(*c) != live_color);

        Ok(ServiceStatus {
            service: service.to_string(),
            state: latest
                .as_ref()
                .map(|r| r.state.clone())
                .unwrap_or(DeploymentState::Stable),
            deployment_id: latest.map(|r| r.id),
            live_color,
            candidate_color,
            live_image: image,
            routing: self.shared.routing.summary(service),
            fleets: self.shared.fleets.for_service(service).await,
            retained,
        })
    }

    /// Status of every configured service, in service-id order.
    pub async fn statuses(&self) -> OrchestratorResult<Vec<ServiceStatus>> {
        let mut out = Vec::with_capacity(self.shared.config.services.len());
        for service in self.shared.config.services.keys() {
            out.push(self.status(service).await?);
        }
        Ok(out)
    }

    /// Current record of a deployment, live or archived.
    pub async fn deployment(&self, deployment_id: &str) -> OrchestratorResult<DeploymentRecord> {
        if let Some(handle) = self.handle(deployment_id).await {
            return Ok(handle.record.borrow().clone());
        }
        self.shared
            .store
            .get_record(deployment_id)?
            .ok_or_else(|| OrchestratorError::NotFound(deployment_id.to_string()))
    }

    /// Every recorded deployment of a service, oldest first.
    pub fn history(&self, service: &str) -> OrchestratorResult<Vec<DeploymentRecord>> {
        if !self.shared.services.contains_key(service) {
            return Err(OrchestratorError::UnknownService(service.to_string()));
        }
        Ok(self.shared.store.list_for_service(service)?)
    }

    /// Watch a live deployment's record.
    pub async fn subscribe(&self, deployment_id: &str) -> OrchestratorResult<watch::Receiver<DeploymentRecord>> {
        self.handle(deployment_id)
            .await
            .map(|h| h.record)
            .ok_or_else(|| OrchestratorError::NotFound(deployment_id.to_string()))
    }

    /// Wait until a deployment reaches a terminal state.
    pub async fn wait_for_terminal(&self, deployment_id: &str) -> OrchestratorResult<DeploymentRecord> {
        let Some(handle) = self.handle(deployment_id).await else {
            return self.deployment(deployment_id).await;
        };
        let mut rx = handle.record;
        // A driver that vanished leaves the last published record behind.
        let finished = rx.wait_for(|r| r.is_terminal()).await.map(|r| r.clone());
        Ok(finished.unwrap_or_else(|_| rx.borrow().clone()))
    }

    pub fn config(&self) -> &CutoverConfig {
        &self.shared.config
    }

    pub fn fleets(&self) -> &FleetManager {
        &self.shared.fleets
    }

    pub fn routing(&self) -> &Arc<RoutingController> {
        &self.shared.routing
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    async fn handle(&self, deployment_id: &str) -> Option<DeploymentHandle> {
        self.shared.deployments.read().await.get(deployment_id).cloned()
    }
}
