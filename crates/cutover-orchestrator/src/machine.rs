//! The deployment state machine as a pure transition function.
//!
//! ```text
//! STABLE ─deploy─▶ PROVISIONING ─running─▶ VALIDATING ─healthy─▶ AWAITING_APPROVAL
//!                       │                      │                      │
//!                    failed               unhealthy /            approved / expired(proceed)
//!                       ▼                  routing                    ▼
//!                    FAILED                    ▼               SHIFTING ─swapped─▶ TERMINATION_WAIT
//!                                        ROLLING_BACK ◀── rejected / expired(rollback) / swap failed
//!                                              │                                   │
//!                                          reverted                             elapsed
//!                                              ▼                                   ▼
//!                                        ROLLED_BACK                 TERMINATING ─▶ STABLE
//! ```
//!
//! A rollback request is accepted from every in-flight state up to and
//! including TERMINATION_WAIT. Once TERMINATING is entered the cutover is
//! irreversible.

use thiserror::Error;

use cutover_core::TimeoutPolicy;
use cutover_state::DeploymentState;

/// Everything that can move a deployment forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    DeployRequested,
    InstancesRunning,
    ProvisioningFailed { reason: String },
    HealthPassed,
    HealthFailed { reason: String },
    /// A routing mutation was rejected after retries.
    RoutingFailed { reason: String },
    Approved,
    Rejected,
    ApprovalExpired { policy: TimeoutPolicy },
    SwapConfirmed,
    TerminationWindowElapsed,
    ScaleDownConfirmed,
    ScaleDownFailed,
    RollbackRequested,
    Reverted,
    RevertFailed { reason: String },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::DeployRequested => "deploy_requested",
            Trigger::InstancesRunning => "instances_running",
            Trigger::ProvisioningFailed { .. } => "provisioning_failed",
            Trigger::HealthPassed => "health_passed",
            Trigger::HealthFailed { .. } => "health_failed",
            Trigger::RoutingFailed { .. } => "routing_failed",
            Trigger::Approved => "approved",
            Trigger::Rejected => "rejected",
            Trigger::ApprovalExpired { .. } => "approval_expired",
            Trigger::SwapConfirmed => "swap_confirmed",
            Trigger::TerminationWindowElapsed => "termination_window_elapsed",
            Trigger::ScaleDownConfirmed => "scale_down_confirmed",
            Trigger::ScaleDownFailed => "scale_down_failed",
            Trigger::RollbackRequested => "rollback_requested",
            Trigger::Reverted => "reverted",
            Trigger::RevertFailed { .. } => "revert_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no transition from {from} on {trigger}")]
pub struct InvalidTransition {
    pub from: String,
    pub trigger: &'static str,
}

/// Whether a rollback request is honoured in `state`.
pub fn accepts_rollback(state: &DeploymentState) -> bool {
    matches!(
        state,
        DeploymentState::Provisioning
            | DeploymentState::Validating
            | DeploymentState::AwaitingApproval
            | DeploymentState::Shifting
            | DeploymentState::TerminationWait
    )
}

/// Compute the next state.
pub fn transition(state: &DeploymentState, trigger: &Trigger) -> Result<DeploymentState, InvalidTransition> {
    use DeploymentState as S;

    let next = match (state, trigger) {
        (S::Stable | S::RolledBack { .. } | S::Failed { .. }, Trigger::DeployRequested) => S::Provisioning,

        (S::Provisioning, Trigger::InstancesRunning) => S::Validating,
        (S::Provisioning, Trigger::ProvisioningFailed { reason }) => S::Failed {
            reason: reason.clone(),
        },

        (S::Validating, Trigger::HealthPassed) => S::AwaitingApproval,
        (S::Validating, Trigger::HealthFailed { reason }) => S::RollingBack {
            reason: reason.clone(),
        },
        (S::Validating | S::Shifting, Trigger::RoutingFailed { reason }) => S::RollingBack {
            reason: reason.clone(),
        },

        (S::AwaitingApproval, Trigger::Approved) => S::Shifting,
        (S::AwaitingApproval, Trigger::Rejected) => S::RollingBack {
            reason: "approval rejected".to_string(),
        },
        (S::AwaitingApproval, Trigger::ApprovalExpired { policy }) => match policy {
            TimeoutPolicy::Proceed => S::Shifting,
            TimeoutPolicy::Rollback => S::RollingBack {
                reason: "approval timed out".to_string(),
            },
        },

        (S::Shifting, Trigger::SwapConfirmed) => S::TerminationWait,
        (S::TerminationWait, Trigger::TerminationWindowElapsed) => S::Terminating,
        (S::Terminating, Trigger::ScaleDownConfirmed | Trigger::ScaleDownFailed) => S::Stable,

        (s, Trigger::RollbackRequested) if accepts_rollback(s) => S::RollingBack {
            reason: "rollback requested".to_string(),
        },

        (S::RollingBack { reason }, Trigger::Reverted) => S::RolledBack {
            reason: reason.clone(),
        },
        (S::RollingBack { reason }, Trigger::RevertFailed { reason: why }) => S::Failed {
            reason: format!("{reason}; revert failed: {why}"),
        },

        (s, t) => {
            return Err(InvalidTransition {
                from: s.name().to_string(),
                trigger: t.name(),
            });
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState as S;

    fn step(state: S, trigger: Trigger) -> S {
        transition(&state, &trigger).unwrap()
    }

    #[test]
    fn happy_path() {
        let mut s = S::Stable;
        for t in [
            Trigger::DeployRequested,
            Trigger::InstancesRunning,
            Trigger::HealthPassed,
            Trigger::Approved,
            Trigger::SwapConfirmed,
            Trigger::TerminationWindowElapsed,
            Trigger::ScaleDownConfirmed,
        ] {
            s = step(s, t);
        }
        assert_eq!(s, S::Stable);
    }

    #[test]
    fn provisioning_failure_is_terminal() {
        let s = step(
            S::Provisioning,
            Trigger::ProvisioningFailed {
                reason: "image pull".to_string(),
            },
        );
        assert!(matches!(s, S::Failed { .. }));
        assert!(s.is_terminal());
        // A new deployment may start from a failed one.
        assert_eq!(step(s, Trigger::DeployRequested), S::Provisioning);
    }

    #[test]
    fn approval_timeout_follows_policy() {
        assert!(matches!(
            step(
                S::AwaitingApproval,
                Trigger::ApprovalExpired {
                    policy: TimeoutPolicy::Rollback
                }
            ),
            S::RollingBack { .. }
        ));
        assert_eq!(
            step(
                S::AwaitingApproval,
                Trigger::ApprovalExpired {
                    policy: TimeoutPolicy::Proceed
                }
            ),
            S::Shifting
        );
    }

    #[test]
    fn rollback_accepted_until_termination() {
        for s in [
            S::Provisioning,
            S::Validating,
            S::AwaitingApproval,
            S::Shifting,
            S::TerminationWait,
        ] {
            assert!(matches!(
                step(s, Trigger::RollbackRequested),
                S::RollingBack { .. }
            ));
        }
        assert!(transition(&S::Terminating, &Trigger::RollbackRequested).is_err());
        assert!(transition(&S::Stable, &Trigger::RollbackRequested).is_err());
    }

    #[test]
    fn reverted_keeps_reason() {
        let s = step(
            S::RollingBack {
                reason: "health".to_string(),
            },
            Trigger::Reverted,
        );
        assert_eq!(
            s,
            S::RolledBack {
                reason: "health".to_string()
            }
        );
    }

    #[test]
    fn scale_down_failure_still_reaches_stable() {
        assert_eq!(step(S::Terminating, Trigger::ScaleDownFailed), S::Stable);
    }

    #[test]
    fn invalid_transition_names_both_sides() {
        let err = transition(&S::Validating, &Trigger::SwapConfirmed).unwrap_err();
        assert_eq!(err.to_string(), "no transition from validating on swap_confirmed");
    }

    #[test]
    fn deploy_while_in_flight_is_invalid() {
        assert!(transition(&S::Shifting, &Trigger::DeployRequested).is_err());
    }
}
