//! cutover-api — REST API for the deployment orchestrator.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/services` | Status of every service |
//! | GET | `/api/v1/services/{service}` | Status of one service |
//! | POST | `/api/v1/services/{service}/deployments` | Start a deployment |
//! | GET | `/api/v1/services/{service}/history` | Recorded deployments |
//! | GET | `/api/v1/deployments/{id}` | Deployment record |
//! | POST | `/api/v1/deployments/{id}/decision` | Approve or reject promotion |
//! | POST | `/api/v1/deployments/{id}/rollback` | Request a rollback |
//! | GET | `/api/v1/listeners/{listener}/route?path=` | Resolve a request path |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use cutover_orchestrator::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

/// Build the complete API router.
pub fn build_router(orchestrator: Orchestrator) -> Router {
    let state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{service}", get(handlers::get_service))
        .route("/services/{service}/deployments", post(handlers::submit_deployment))
        .route("/services/{service}/history", get(handlers::service_history))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/decision", post(handlers::decide))
        .route("/deployments/{id}/rollback", post(handlers::rollback))
        .route("/listeners/{listener}/route", get(handlers::resolve_route))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
