//! Orchestrator error types.
//!
//! Request-validation errors (`NotFound`, `Conflict`, `WrongState`,
//! `DuplicateDecision`) are returned synchronously and never mutate state.
//! Failures of a running deployment are recorded on the record as a
//! `DeploymentFailure` instead.

use thiserror::Error;

use cutover_core::{ConfigError, DeploymentId, ServiceId};
use cutover_fleet::FleetError;
use cutover_routing::RoutingError;
use cutover_state::StateError;

use crate::machine::InvalidTransition;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("unknown service: {0}")]
    UnknownService(ServiceId),

    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    #[error("service {service} already has deployment {active} in flight")]
    Conflict {
        service: ServiceId,
        active: DeploymentId,
    },

    #[error("deployment {deployment_id} is {state}, not awaiting approval")]
    WrongState {
        deployment_id: DeploymentId,
        state: String,
    },

    #[error("deployment {0} already has a decision")]
    DuplicateDecision(DeploymentId),

    #[error("service {service} failed to start: {detail}")]
    Bootstrap { service: ServiceId, detail: String },

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("fleet error: {0}")]
    Fleet(#[from] FleetError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
