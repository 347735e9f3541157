//! Compute provider seam.
//!
//! The provider owns the real instances (containers, tasks, VMs). cutover
//! only ever asks it to create a fleet, change a fleet's desired count,
//! describe what is actually running, and delete a fleet. Every call may
//! complete before the instances themselves converge.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use cutover_core::{Color, FleetShape, InstanceHealth, ServiceId, TargetGroupId};

/// Boxed future returned by [`ComputeProvider`] methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("unknown target group: {0}")]
    UnknownTargetGroup(TargetGroupId),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Everything the provider needs to create a fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSpec {
    pub service: ServiceId,
    pub color: Color,
    pub target_group: TargetGroupId,
    pub image: String,
    pub shape: FleetShape,
}

/// Point-in-time view of a fleet as the provider sees it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FleetObservation {
    pub running: u32,
    pub instances: Vec<InstanceHealth>,
    /// Set when the provider has given up placing instances (e.g. image pull failure).
    pub failed: Option<String>,
}

/// External compute backend behind every fleet.
pub trait ComputeProvider: Send + Sync {
    /// Register a fleet (and its target group) with zero instances.
    fn create_fleet<'a>(&'a self, spec: &'a FleetSpec) -> ProviderFuture<'a, ()>;

    /// Ask for `count` instances. Returns once the request is accepted.
    fn set_desired_count<'a>(
        &'a self,
        target_group: &'a TargetGroupId,
        count: u32,
    ) -> ProviderFuture<'a, ()>;

    /// Observe running instances and their health.
    fn describe<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, FleetObservation>;

    /// Remove the fleet and its target group.
    fn delete_fleet<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, ()>;

    /// Average utilisation in percent, if the provider reports one.
    fn utilization<'a>(&'a self, target_group: &'a TargetGroupId) -> ProviderFuture<'a, Option<f64>>;
}
