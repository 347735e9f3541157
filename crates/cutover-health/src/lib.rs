//! cutover-health — health and approval gating for candidate fleets.
//!
//! # Architecture
//!
//! ```text
//! HealthPoller
//!   └── Per-fleet background task
//!       ├── FleetManager::observe() → instance health
//!       ├── aggregate() → HealthStatus
//!       ├── FleetManager::record_health()
//!       └── watch::Sender<HealthSample>
//!
//! HealthGate   (owned by the orchestrator)
//!   └── record(sample) → Pending | Passed | Failed
//!
//! ApprovalGate
//!   ├── request(id, wait) → ApprovalTicket (countdown)
//!   └── record(id, decision)   at most once
//! ```
//!
//! Pollers only write aggregated results. They never touch routing or a
//! fleet's desired count.

pub mod approval;
pub mod gate;
pub mod monitor;

pub use approval::{ApprovalError, ApprovalGate, ApprovalOutcome, ApprovalResult, ApprovalTicket};
pub use gate::{GateVerdict, HealthGate, aggregate};
pub use monitor::{HealthPoller, HealthSample};
