//! cutover-fleet — fleet tracking and scaling.
//!
//! A fleet is one color's instance group for a service. The
//! [`FleetManager`] tracks desired/running counts and aggregated health for
//! every fleet and issues scale commands to an external [`ComputeProvider`].
//! Scale operations are eventually consistent, so callers await confirmation
//! with [`FleetManager::await_running`] / [`FleetManager::await_drained`].
//!
//! # Autoscaling
//!
//! ```text
//! utilization = provider.utilization(fleet)      (percent)
//! target      = autoscaling.target_utilization
//!
//! if utilization > target * 1.1 and scale-out cooldown elapsed:
//!     ScaleTo(min(ceil(desired * utilization / target), max))
//!
//! if utilization < target * 0.5 and scale-in cooldown elapsed:
//!     ScaleTo(max(ceil(desired * utilization / target), min))
//! ```
//!
//! Fleets frozen by a rollback or already scaled to zero are never touched.

pub mod autoscale;
pub mod error;
pub mod manager;
pub mod provider;
pub mod simulated;

pub use autoscale::{Autoscaler, ScaleDecision};
pub use error::{FleetError, FleetResult};
pub use manager::FleetManager;
pub use provider::{ComputeProvider, FleetObservation, FleetSpec, ProviderError, ProviderFuture};
pub use simulated::{ImageFault, SimulatedProvider};
