//! Deployment record types.
//!
//! A [`DeploymentRecord`] is created when a deployment is requested, mutated
//! only by the service's orchestrator driver, and archived once its state is
//! terminal.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cutover_core::{Color, DeploymentId, ServiceId, TargetGroupId, epoch_secs};

// ── State ─────────────────────────────────────────────────────────

/// Orchestrator state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeploymentState {
    /// No deployment in flight; also the terminal state of a successful one.
    Stable,
    Provisioning,
    Validating,
    AwaitingApproval,
    Shifting,
    TerminationWait,
    Terminating,
    RollingBack { reason: String },
    RolledBack { reason: String },
    Failed { reason: String },
}

impl DeploymentState {
    pub fn name(&self) -> &'static str {
        match self {
            DeploymentState::Stable => "stable",
            DeploymentState::Provisioning => "provisioning",
            DeploymentState::Validating => "validating",
            DeploymentState::AwaitingApproval => "awaiting_approval",
            DeploymentState::Shifting => "shifting",
            DeploymentState::TerminationWait => "termination_wait",
            DeploymentState::Terminating => "terminating",
            DeploymentState::RollingBack { .. } => "rolling_back",
            DeploymentState::RolledBack { .. } => "rolled_back",
            DeploymentState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Stable
                | DeploymentState::RolledBack { .. }
                | DeploymentState::Failed { .. }
        )
    }

    /// Outcome a record in this state carries.
    pub fn outcome(&self) -> Outcome {
        match self {
            DeploymentState::Stable => Outcome::Succeeded,
            DeploymentState::RolledBack { .. } => Outcome::RolledBack,
            DeploymentState::Failed { .. } => Outcome::Failed,
            _ => Outcome::Pending,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Succeeded,
    RolledBack,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

// ── Failures ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProvisioningFailure,
    HealthCheckFailure,
    ApprovalTimeout,
    ApprovalRejected,
    TrafficShiftFailure,
    TerminationFailure,
    RollbackRequested,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::ProvisioningFailure => "provisioning failure",
            FailureKind::HealthCheckFailure => "health check failure",
            FailureKind::ApprovalTimeout => "approval timeout",
            FailureKind::ApprovalRejected => "approval rejected",
            FailureKind::TrafficShiftFailure => "traffic shift failure",
            FailureKind::TerminationFailure => "termination failure",
            FailureKind::RollbackRequested => "rollback requested",
        })
    }
}

/// Why a deployment attempt left the happy path, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} in {state} (deployment {deployment_id}): {detail}")]
pub struct DeploymentFailure {
    pub kind: FailureKind,
    pub deployment_id: DeploymentId,
    /// Name of the state the failure occurred in.
    pub state: String,
    pub detail: String,
}

// ── Record ────────────────────────────────────────────────────────

/// One of the two fleets a deployment references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetRef {
    pub color: Color,
    pub target_group: TargetGroupId,
}

impl FleetRef {
    pub fn new(service: &str, color: Color) -> Self {
        Self {
            color,
            target_group: TargetGroupId::for_fleet(service, color),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: String,
    pub to: String,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub service: ServiceId,
    /// Image the candidate fleet runs.
    pub image: String,
    /// Image of the fleet that was live when the deployment started.
    pub previous_image: String,
    /// Live fleet at request time; the rollback target.
    pub stable: FleetRef,
    pub candidate: FleetRef,
    pub state: DeploymentState,
    pub outcome: Outcome,
    /// Unix seconds at which an undecided approval expires.
    pub approval_deadline: Option<u64>,
    /// Unix seconds at which the old fleet is retired.
    pub termination_deadline: Option<u64>,
    pub decision: Option<ApprovalDecision>,
    pub failure: Option<DeploymentFailure>,
    /// Non-fatal problems, e.g. resources retained after a failed scale-down.
    pub warnings: Vec<String>,
    pub history: Vec<StateChange>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DeploymentRecord {
    /// A fresh record for a deployment away from the currently live color.
    pub fn new(
        id: &str,
        service: &str,
        image: &str,
        previous_image: &str,
        live: Color,
    ) -> Self {
        let now = epoch_secs();
        Self {
            id: id.to_string(),
            service: service.to_string(),
            image: image.to_string(),
            previous_image: previous_image.to_string(),
            stable: FleetRef::new(service, live),
            candidate: FleetRef::new(service, live.other()),
            state: DeploymentState::Stable,
            outcome: Outcome::Pending,
            approval_deadline: None,
            termination_deadline: None,
            decision: None,
            failure: None,
            warnings: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Composite key for the deployments table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.service, self.id)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal() && self.outcome != Outcome::Pending
    }

    /// Move to `next`, recording the change. The caller has already checked
    /// the transition is legal.
    pub fn enter(&mut self, next: DeploymentState) {
        let now = epoch_secs();
        self.history.push(StateChange {
            from: self.state.name().to_string(),
            to: next.name().to_string(),
            at: now,
        });
        self.outcome = next.outcome();
        self.state = next;
        self.updated_at = now;
    }

    /// Attach a failure observed in the current state.
    pub fn fail(&mut self, kind: FailureKind, detail: impl Into<String>) -> DeploymentFailure {
        let failure = DeploymentFailure {
            kind,
            deployment_id: self.id.clone(),
            state: self.state.name().to_string(),
            detail: detail.into(),
        };
        self.failure = Some(failure.clone());
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_targets_the_other_color() {
        let rec = DeploymentRecord::new("d-1", "frontend", "web:v2", "web:v1", Color::Blue);
        assert_eq!(rec.stable.target_group.as_str(), "frontend-blue");
        assert_eq!(rec.candidate.color, Color::Green);
        assert_eq!(rec.candidate.target_group.as_str(), "frontend-green");
        assert_eq!(rec.outcome, Outcome::Pending);
        assert!(!rec.is_terminal());
        assert_eq!(rec.table_key(), "frontend/d-1");
    }

    #[test]
    fn enter_records_history_and_outcome() {
        let mut rec = DeploymentRecord::new("d-1", "api", "api:v2", "api:v1", Color::Green);
        rec.enter(DeploymentState::Provisioning);
        rec.enter(DeploymentState::Failed {
            reason: "image pull".to_string(),
        });

        assert_eq!(rec.history.len(), 2);
        assert_eq!(rec.history[0].from, "stable");
        assert_eq!(rec.history[1].to, "failed");
        assert_eq!(rec.outcome, Outcome::Failed);
        assert!(rec.is_terminal());
    }

    #[test]
    fn failure_carries_id_and_state() {
        let mut rec = DeploymentRecord::new("d-9", "api", "api:v2", "api:v1", Color::Blue);
        rec.enter(DeploymentState::Shifting);
        let failure = rec.fail(FailureKind::TrafficShiftFailure, "listener unavailable");

        assert_eq!(failure.deployment_id, "d-9");
        assert_eq!(failure.state, "shifting");
        assert_eq!(
            failure.to_string(),
            "traffic shift failure in shifting (deployment d-9): listener unavailable"
        );
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_value(DeploymentState::RolledBack {
            reason: "health".to_string(),
        })
        .unwrap();
        assert_eq!(json["state"], "rolled_back");
        assert_eq!(json["reason"], "health");
    }

    #[test]
    fn terminal_states() {
        assert!(DeploymentState::Stable.is_terminal());
        assert!(!DeploymentState::TerminationWait.is_terminal());
        assert!(
            !DeploymentState::RollingBack {
                reason: String::new()
            }
            .is_terminal()
        );
    }
}
