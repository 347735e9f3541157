//! cutover-orchestrator — blue-green deployment state machine.
//!
//! Every service runs at most one deployment at a time. A deployment is
//! driven by its own task through the states of [`transition`]:
//!
//! - **`machine`** — the pure transition function and its triggers
//! - **`driver`** — per-deployment task: provisioning, health validation,
//!   approval, traffic shift, termination window, scale-down
//! - **`rollback`** — puts routing and fleets back on the stable color
//! - **`orchestrator`** — the public handle: submit, decide, rollback, status
//!
//! Drivers are the only writers of their records. Everybody else observes
//! records through watch channels or the archive.

mod driver;
pub mod error;
pub mod machine;
pub mod orchestrator;
pub mod rollback;

pub use error::{OrchestratorError, OrchestratorResult};
pub use machine::{InvalidTransition, Trigger, accepts_rollback, transition};
pub use orchestrator::{Orchestrator, ServiceStatus};
pub use rollback::RollbackManager;
