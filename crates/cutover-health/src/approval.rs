//! Approval gate — time-bounded, single-decision promotion approvals.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use cutover_core::DeploymentId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no approval requested for deployment {0}")]
    NotRequested(DeploymentId),

    #[error("deployment {0} already has a decision")]
    DuplicateDecision(DeploymentId),

    #[error("approval window for deployment {0} is closed")]
    Closed(DeploymentId),
}

pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// How an approval countdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// `true` to approve, `false` to reject.
    Decided(bool),
    Expired,
    /// The request was cancelled before a decision or expiry.
    Cancelled,
}

struct Pending {
    tx: Option<oneshot::Sender<bool>>,
    decided: bool,
}

/// Countdown handed to the waiting orchestrator.
pub struct ApprovalTicket {
    rx: oneshot::Receiver<bool>,
    deadline: Instant,
}

impl ApprovalTicket {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for a decision or the deadline, whichever comes first.
    pub async fn wait(self) -> ApprovalOutcome {
        match tokio::time::timeout_at(self.deadline, self.rx).await {
            Ok(Ok(approved)) => ApprovalOutcome::Decided(approved),
            Ok(Err(_)) => ApprovalOutcome::Cancelled,
            Err(_) => ApprovalOutcome::Expired,
        }
    }
}

#[derive(Default)]
pub struct ApprovalGate {
    pending: Mutex<HashMap<DeploymentId, Pending>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the approval countdown for a deployment.
    pub fn request(&self, deployment_id: &str, wait: Duration) -> ApprovalTicket {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("approval lock");
        pending.insert(
            deployment_id.to_string(),
            Pending {
                tx: Some(tx),
                decided: false,
            },
        );
        info!(deployment = %deployment_id, wait_secs = wait.as_secs(), "approval requested");
        ApprovalTicket {
            rx,
            deadline: Instant::now() + wait,
        }
    }

    /// Record the one allowed decision for a deployment.
    pub fn record(&self, deployment_id: &str, approve: bool) -> ApprovalResult<()> {
        let mut pending = self.pending.lock().expect("approval lock");
        let slot = pending
            .get_mut(deployment_id)
            .ok_or_else(|| ApprovalError::NotRequested(deployment_id.to_string()))?;
        if slot.decided {
            return Err(ApprovalError::DuplicateDecision(deployment_id.to_string()));
        }
        let tx = slot
            .tx
            .take()
            .ok_or_else(|| ApprovalError::Closed(deployment_id.to_string()))?;
        if tx.send(approve).is_err() {
            return Err(ApprovalError::Closed(deployment_id.to_string()));
        }
        slot.decided = true;
        info!(deployment = %deployment_id, approve, "approval decision recorded");
        Ok(())
    }

    /// Stop accepting decisions but remember whether one was made, so a
    /// late second decision is still reported as a duplicate.
    pub fn close(&self, deployment_id: &str) {
        let mut pending = self.pending.lock().expect("approval lock");
        if let Some(slot) = pending.get_mut(deployment_id) {
            slot.tx = None;
            debug!(deployment = %deployment_id, decided = slot.decided, "approval window closed");
        }
    }

    /// Drop a request; a waiting ticket resolves to `Cancelled`.
    pub fn cancel(&self, deployment_id: &str) {
        let mut pending = self.pending.lock().expect("approval lock");
        if pending.remove(deployment_id).is_some() {
            debug!(deployment = %deployment_id, "approval request cancelled");
        }
    }

    pub fn is_pending(&self, deployment_id: &str) -> bool {
        let pending = self.pending.lock().expect("approval lock");
        pending
            .get(deployment_id)
            .is_some_and(|p| !p.decided && p.tx.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn decision_resolves_ticket() {
        let gate = ApprovalGate::new();
        let ticket = gate.request("d-1", Duration::from_secs(1800));
        assert!(gate.is_pending("d-1"));

        gate.record("d-1", true).unwrap();
        assert_eq!(ticket.wait().await, ApprovalOutcome::Decided(true));
    }

    #[tokio::test(start_paused = true)]
    async fn second_decision_is_rejected() {
        let gate = ApprovalGate::new();
        let _ticket = gate.request("d-1", Duration::from_secs(60));
        gate.record("d-1", false).unwrap();
        assert_eq!(
            gate.record("d-1", true),
            Err(ApprovalError::DuplicateDecision("d-1".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expires_without_decision() {
        let gate = ApprovalGate::new();
        let ticket = gate.request("d-1", Duration::from_secs(60));
        assert_eq!(ticket.wait().await, ApprovalOutcome::Expired);
    }

    #[tokio::test]
    async fn unknown_deployment_is_not_requested() {
        let gate = ApprovalGate::new();
        assert_eq!(
            gate.record("d-404", true),
            Err(ApprovalError::NotRequested("d-404".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_still_reports_duplicates() {
        let gate = ApprovalGate::new();
        let ticket = gate.request("d-1", Duration::from_secs(60));
        gate.record("d-1", true).unwrap();
        assert_eq!(ticket.wait().await, ApprovalOutcome::Decided(true));

        gate.close("d-1");
        assert_eq!(
            gate.record("d-1", false),
            Err(ApprovalError::DuplicateDecision("d-1".to_string()))
        );

        gate.cancel("d-1");
        assert_eq!(
            gate.record("d-1", false),
            Err(ApprovalError::NotRequested("d-1".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_without_decision_is_closed() {
        let gate = ApprovalGate::new();
        let ticket = gate.request("d-1", Duration::from_secs(60));
        assert_eq!(ticket.wait().await, ApprovalOutcome::Expired);

        gate.close("d-1");
        assert_eq!(
            gate.record("d-1", true),
            Err(ApprovalError::Closed("d-1".to_string()))
        );
        assert!(!gate.is_pending("d-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_ticket() {
        let gate = ApprovalGate::new();
        let ticket = gate.request("d-1", Duration::from_secs(60));
        gate.cancel("d-1");
        assert_eq!(ticket.wait().await, ApprovalOutcome::Cancelled);
        assert!(!gate.is_pending("d-1"));
    }
}
