//! Fleet manager error types.

use std::time::Duration;

use thiserror::Error;

use cutover_core::TargetGroupId;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("fleet not found: {0}")]
    NotFound(TargetGroupId),

    #[error("fleet already exists: {0}")]
    AlreadyExists(TargetGroupId),

    #[error("fleet {0} has desired count 0 and can never become running")]
    Empty(TargetGroupId),

    #[error("fleet {target_group} failed to start: {detail}")]
    StartFailed {
        target_group: TargetGroupId,
        detail: String,
    },

    #[error("timed out after {waited:?} waiting for fleet {target_group} to {goal}")]
    Timeout {
        target_group: TargetGroupId,
        goal: &'static str,
        waited: Duration,
    },

    #[error("compute provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type FleetResult<T> = Result<T, FleetError>;
