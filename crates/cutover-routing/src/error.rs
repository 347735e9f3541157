use thiserror::Error;

use cutover_core::{ConfigError, ListenerKind, PathPattern, ServiceId, TargetGroupId};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("service not registered with the load balancer: {0}")]
    UnknownService(ServiceId),

    #[error("{listener} listener already has a rule at priority {priority} for {pattern} (owned by {owner})")]
    DuplicateRule {
        listener: ListenerKind,
        priority: u32,
        pattern: PathPattern,
        owner: ServiceId,
    },

    #[error("path pattern {pattern} is already routed for service {owner}")]
    OverlappingPattern { pattern: PathPattern, owner: ServiceId },

    #[error("service {service} is already attached to the {listener} listener")]
    AlreadyAttached {
        listener: ListenerKind,
        service: ServiceId,
    },

    #[error("service {service} is not attached to the {listener} listener")]
    NotAttached {
        listener: ListenerKind,
        service: ServiceId,
    },

    #[error("target group {0} has no healthy instances")]
    NoHealthyTargets(TargetGroupId),

    #[error("target group {0} is the production default action and cannot be detached")]
    DefaultResponsibility(TargetGroupId),

    #[error("{listener} listener forwards {service} to {actual}, not {expected}")]
    TargetMismatch {
        listener: ListenerKind,
        service: ServiceId,
        expected: TargetGroupId,
        actual: TargetGroupId,
    },

    #[error("{0} listener is unavailable")]
    Unavailable(ListenerKind),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

pub type RoutingResult<T> = Result<T, RoutingError>;
