//! Per-deployment driver task.
//!
//! The driver is the only writer of its deployment record. It runs one
//! phase per state, turns what happened into a [`Trigger`], and applies the
//! transition. Every applied transition is published on the record's watch
//! channel, checkpointed to the store, and emitted as an event.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cutover_core::{
    DeploymentPolicy, Event, FleetShape, HealthStatus, ListenerKind, TargetGroupId, TimeoutPolicy,
    epoch_secs,
};
use cutover_fleet::{FleetError, FleetResult};
use cutover_health::{
    ApprovalOutcome, ApprovalTicket, GateVerdict, HealthGate, HealthPoller, HealthSample,
};
use cutover_state::{ApprovalDecision, DeploymentFailure, DeploymentRecord, DeploymentState, FailureKind};

use crate::machine::{Trigger, transition};
use crate::orchestrator::Shared;

/// Resolves once a rollback has been requested. Never resolves if the
/// requesting side has gone away.
async fn rollback_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    record: DeploymentRecord,
    tx: watch::Sender<DeploymentRecord>,
    rollback_rx: watch::Receiver<bool>,
    policy: DeploymentPolicy,
    shape: FleetShape,
    poller: HealthPoller,
    samples: Option<watch::Receiver<HealthSample>>,
    ticket: Option<ApprovalTicket>,
    /// Outgoing fleet that could not be scaled down.
    retained: Option<TargetGroupId>,
    /// Production was left on the candidate by a revert that gave up.
    adopted: bool,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        record: DeploymentRecord,
        tx: watch::Sender<DeploymentRecord>,
        rollback_rx: watch::Receiver<bool>,
        policy: DeploymentPolicy,
        shape: FleetShape,
    ) -> Self {
        let poller = HealthPoller::new(shared.fleets.clone(), policy.health.poll_interval);
        Self {
            shared,
            record,
            tx,
            rollback_rx,
            policy,
            shape,
            poller,
            samples: None,
            ticket: None,
            retained: None,
            adopted: false,
        }
    }

    /// Apply the deploy request. Called while the submitter still holds
    /// the service slot, so the record is PROVISIONING before anyone can
    /// observe it.
    pub(crate) async fn start(&mut self) {
        self.apply(Trigger::DeployRequested).await;
    }

    pub(crate) async fn run(mut self) {
        loop {
            let state = self.record.state.clone();
            let trigger = match state {
                DeploymentState::Provisioning => self.provision().await,
                DeploymentState::Validating => self.validate().await,
                DeploymentState::AwaitingApproval => self.await_approval().await,
                DeploymentState::Shifting => self.shift().await,
                DeploymentState::TerminationWait => self.termination_wait().await,
                DeploymentState::Terminating => self.terminate().await,
                DeploymentState::RollingBack { .. } => match self.roll_back().await {
                    Some(trigger) => trigger,
                    None => continue,
                },
                _ => break,
            };
            self.apply(trigger).await;
        }

        debug!(deployment = %self.record.id, state = %self.record.state, "driver finished");
    }

    // ── Phases ────────────────────────────────────────────────────

    async fn provision(&mut self) -> Trigger {
        let fleets = self.shared.fleets.clone();
        let service = self.record.service.clone();
        let candidate = self.record.candidate.target_group.clone();

        // The candidate matches the live fleet's current size.
        let desired = match fleets.fleet_for(&service, self.record.stable.color).await {
            Some(live) => live.desired,
            None => self
                .shared
                .config
                .service(&service)
                .map(|s| s.desired_count)
                .unwrap_or(1),
        };

        if let Err(e) = fleets
            .provision(
                &service,
                self.record.candidate.color,
                &self.record.image,
                self.shape.clone(),
                desired,
            )
            .await
        {
            return self.provisioning_failed(e).await;
        }

        let timeout = self.policy.provisioning_timeout;
        let result = tokio::select! {
            biased;
            _ = rollback_requested(&mut self.rollback_rx) => None,
            r = fleets.await_running(&candidate, timeout) => Some(r),
        };
        match result {
            None => self.rollback_signal(),
            Some(Ok(fleet)) => {
                info!(deployment = %self.record.id, %candidate, running = fleet.running, "candidate running");
                Trigger::InstancesRunning
            }
            Some(Err(e)) => self.provisioning_failed(e).await,
        }
    }

    async fn provisioning_failed(&mut self, e: FleetError) -> Trigger {
        let failure = self.record.fail(FailureKind::ProvisioningFailure, e.to_string());
        warn!(%failure, "provisioning failed");
        // No routing was touched; only the candidate has to go.
        if !matches!(e, FleetError::AlreadyExists(_)) {
            self.discard_candidate().await;
        }
        Trigger::ProvisioningFailed {
            reason: failure.detail,
        }
    }

    async fn validate(&mut self) -> Trigger {
        let service = self.record.service.clone();
        let candidate = self.record.candidate.target_group.clone();

        if let Err(e) = self.shared.routing.attach(ListenerKind::Test, &service, &candidate) {
            let failure = self.record.fail(FailureKind::TrafficShiftFailure, e.to_string());
            warn!(%failure, "test listener attach failed");
            return Trigger::RoutingFailed {
                reason: failure.detail,
            };
        }

        let mut samples = self.poller.start(&candidate).await;
        self.samples = Some(samples.clone());
        let mut gate = HealthGate::new(
            self.policy.health.observation_window,
            self.policy.health.validation_timeout,
        );
        let deadline = gate.deadline();

        enum Wake {
            Sample(bool),
            Deadline,
            Rollback,
        }

        loop {
            let wake = tokio::select! {
                biased;
                _ = rollback_requested(&mut self.rollback_rx) => Wake::Rollback,
                r = samples.changed() => Wake::Sample(r.is_ok()),
                _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
            };
            let status = match wake {
                Wake::Rollback => return self.rollback_signal(),
                Wake::Sample(true) => samples.borrow_and_update().status,
                Wake::Sample(false) => {
                    let failure = self
                        .record
                        .fail(FailureKind::HealthCheckFailure, "health poller stopped");
                    return Trigger::HealthFailed {
                        reason: failure.detail,
                    };
                }
                Wake::Deadline => samples.borrow().status,
            };

            match gate.record(status) {
                GateVerdict::Pending => continue,
                GateVerdict::Passed => {
                    self.publish_gate(status, "passed");
                    if self.policy.require_approval {
                        self.ticket = Some(
                            self.shared
                                .approvals
                                .request(&self.record.id, self.policy.approval_wait),
                        );
                        self.record.approval_deadline =
                            Some(epoch_secs() + self.policy.approval_wait.as_secs());
                    }
                    return Trigger::HealthPassed;
                }
                GateVerdict::Failed(reason) => {
                    self.publish_gate(status, "failed");
                    let failure = self.record.fail(FailureKind::HealthCheckFailure, reason);
                    warn!(%failure, "health gate failed");
                    return Trigger::HealthFailed {
                        reason: failure.detail,
                    };
                }
            }
        }
    }

    async fn await_approval(&mut self) -> Trigger {
        let Some(ticket) = self.ticket.take() else {
            info!(deployment = %self.record.id, "approval not required");
            return Trigger::Approved;
        };

        let outcome = tokio::select! {
            biased;
            _ = rollback_requested(&mut self.rollback_rx) => None,
            outcome = ticket.wait() => Some(outcome),
        };

        let trigger = match outcome {
            None | Some(ApprovalOutcome::Cancelled) => self.rollback_signal(),
            Some(ApprovalOutcome::Decided(true)) => {
                self.record.decision = Some(ApprovalDecision::Approve);
                Trigger::Approved
            }
            Some(ApprovalOutcome::Decided(false)) => {
                self.record.decision = Some(ApprovalDecision::Reject);
                self.record
                    .fail(FailureKind::ApprovalRejected, "promotion rejected");
                Trigger::Rejected
            }
            Some(ApprovalOutcome::Expired) => {
                let policy = self.policy.approval_timeout;
                let detail = format!(
                    "no decision within {:?}",
                    self.policy.approval_wait
                );
                match policy {
                    TimeoutPolicy::Rollback => {
                        self.record.fail(FailureKind::ApprovalTimeout, detail);
                    }
                    TimeoutPolicy::Proceed => {
                        warn!(deployment = %self.record.id, "approval expired, proceeding");
                        self.record
                            .warnings
                            .push(format!("approval timeout: {detail}; proceeded by policy"));
                    }
                }
                Trigger::ApprovalExpired { policy }
            }
        };
        self.shared.approvals.close(&self.record.id);
        trigger
    }

    async fn shift(&mut self) -> Trigger {
        let routing = self.shared.routing.clone();
        let service = self.record.service.clone();
        let candidate = self.record.candidate.target_group.clone();
        let outgoing = self.record.stable.target_group.clone();
        let attempts = self.policy.shift_attempts.max(1);
        let mut backoff = self.policy.shift_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let healthy = self.samples.as_ref().map(|s| s.borrow().healthy).unwrap_or(0);
            match routing.promote(&service, &candidate, &outgoing, healthy) {
                Ok(()) => return Trigger::SwapConfirmed,
                Err(e) => {
                    warn!(deployment = %self.record.id, attempt, attempts, error = %e, "traffic shift rejected");
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                let rolled_back = tokio::select! {
                    biased;
                    _ = rollback_requested(&mut self.rollback_rx) => true,
                    _ = tokio::time::sleep(backoff) => false,
                };
                if rolled_back {
                    return self.rollback_signal();
                }
                backoff = backoff.saturating_mul(2);
            }
        }

        let failure = self.record.fail(
            FailureKind::TrafficShiftFailure,
            format!("gave up after {attempts} attempts: {last_error}"),
        );
        Trigger::RoutingFailed {
            reason: failure.detail,
        }
    }

    async fn termination_wait(&mut self) -> Trigger {
        let wait = self.policy.termination_wait;
        self.record.termination_deadline = Some(epoch_secs() + wait.as_secs());
        self.publish();

        let rolled_back = tokio::select! {
            biased;
            _ = rollback_requested(&mut self.rollback_rx) => true,
            _ = tokio::time::sleep(wait) => false,
        };
        if rolled_back {
            self.rollback_signal()
        } else {
            Trigger::TerminationWindowElapsed
        }
    }

    async fn terminate(&mut self) -> Trigger {
        let fleets = self.shared.fleets.clone();
        let service = self.record.service.clone();
        let outgoing = self.record.stable.target_group.clone();

        if let Err(e) = self.shared.routing.detach(ListenerKind::Test, &service, &outgoing) {
            warn!(deployment = %self.record.id, error = %e, "test listener detach failed");
            self.record.warnings.push(format!("test listener detach failed: {e}"));
        }

        let result: FleetResult<()> = async {
            fleets.cancel_scale_out(&outgoing).await?;
            fleets.await_drained(&outgoing, self.policy.drain_timeout).await?;
            fleets.destroy(&outgoing).await
        }
        .await;

        match result {
            Ok(()) => Trigger::ScaleDownConfirmed,
            Err(e) => {
                let failure = DeploymentFailure {
                    kind: FailureKind::TerminationFailure,
                    deployment_id: self.record.id.clone(),
                    state: self.record.state.name().to_string(),
                    detail: format!("{e}; {outgoing} retained for manual cleanup"),
                };
                warn!(%failure, "old fleet not scaled down");
                self.record.warnings.push(failure.to_string());
                self.retained = Some(outgoing);
                Trigger::ScaleDownFailed
            }
        }
    }

    /// Revert through the rollback manager. Returns `None` once the record
    /// is rolled back, or the trigger to apply when reverting kept failing.
    async fn roll_back(&mut self) -> Option<Trigger> {
        let attempts = self.policy.shift_attempts.max(1);
        let mut backoff = self.policy.shift_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let from = self.record.state.name();
            match self.shared.rollback.revert(&mut self.record).await {
                Ok(_) => {
                    self.settle().await;
                    self.commit(from);
                    return None;
                }
                Err(e) => {
                    error!(deployment = %self.record.id, attempt, error = %e, "revert failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }
        self.reconcile().await;
        Some(Trigger::RevertFailed { reason: last_error })
    }

    /// After a revert gave up, keep whichever fleet production actually
    /// forwards to and remove the other one. A fleet that cannot be removed
    /// is retained for manual cleanup.
    async fn reconcile(&mut self) {
        let service = self.record.service.clone();
        let candidate = self.record.candidate.target_group.clone();
        let stable = self.record.stable.target_group.clone();

        let live = self.shared.routing.live_target(&service);
        self.adopted = live.as_ref() == Some(&candidate);
        let leftover = if self.adopted { stable } else { candidate };
        warn!(
            deployment = %self.record.id,
            live = ?live,
            %leftover,
            "revert gave up, reconciling fleets with production"
        );

        if self.shared.routing.summary(&service).test.as_ref() == Some(&leftover) {
            if let Err(e) = self.shared.routing.detach(ListenerKind::Test, &service, &leftover) {
                warn!(deployment = %self.record.id, %leftover, error = %e, "test listener detach failed");
                self.record
                    .warnings
                    .push(format!("{leftover} retained for manual cleanup: {e}"));
                self.retained = Some(leftover);
                return;
            }
        }

        let fleets = &self.shared.fleets;
        let result: FleetResult<()> = async {
            fleets.cancel_scale_out(&leftover).await?;
            fleets.destroy(&leftover).await
        }
        .await;
        match result {
            Ok(()) | Err(FleetError::NotFound(_)) => {}
            Err(e) => {
                warn!(deployment = %self.record.id, %leftover, error = %e, "leftover fleet not removed");
                self.record
                    .warnings
                    .push(format!("{leftover} retained for manual cleanup: {e}"));
                self.retained = Some(leftover);
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn rollback_signal(&mut self) -> Trigger {
        self.record
            .fail(FailureKind::RollbackRequested, "rollback requested by operator");
        Trigger::RollbackRequested
    }

    /// Scale the candidate to zero and delete it, logging failures.
    async fn discard_candidate(&mut self) {
        let fleets = &self.shared.fleets;
        let candidate = &self.record.candidate.target_group;
        let result: FleetResult<()> = async {
            fleets.cancel_scale_out(candidate).await?;
            fleets.destroy(candidate).await
        }
        .await;
        match result {
            Ok(()) | Err(FleetError::NotFound(_)) => {}
            Err(e) => {
                warn!(deployment = %self.record.id, %candidate, error = %e, "candidate cleanup failed");
                self.record
                    .warnings
                    .push(format!("candidate {candidate} not removed: {e}"));
            }
        }
    }

    fn publish_gate(&self, status: HealthStatus, verdict: &str) {
        self.shared.events.publish(Event::HealthGate {
            deployment_id: self.record.id.clone(),
            service: self.record.service.clone(),
            target_group: self.record.candidate.target_group.clone(),
            status,
            verdict: verdict.to_string(),
        });
    }

    /// Apply a trigger; terminal states settle the service slot first.
    async fn apply(&mut self, trigger: Trigger) {
        let from = self.record.state.name();
        let next = match transition(&self.record.state, &trigger) {
            Ok(next) => next,
            Err(e) => {
                error!(deployment = %self.record.id, error = %e, "invalid transition");
                DeploymentState::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let DeploymentState::RollingBack { reason } = &next {
            self.shared.events.publish(Event::RollbackTriggered {
                deployment_id: self.record.id.clone(),
                service: self.record.service.clone(),
                reason: reason.clone(),
            });
        }

        self.record.enter(next);
        if self.record.is_terminal() {
            self.settle().await;
        }
        self.commit(from);
    }

    /// Release everything the deployment holds and hand the service slot
    /// back before the terminal state becomes visible.
    async fn settle(&mut self) {
        self.poller.stop_all().await;
        self.samples = None;
        self.ticket = None;
        self.shared.approvals.cancel(&self.record.id);

        let Some(slot) = self.shared.services.get(&self.record.service) else {
            return;
        };
        let mut slot = slot.lock().await;
        if self.record.state == DeploymentState::Stable || self.adopted {
            slot.live = self.record.candidate.color;
            slot.image = self.record.image.clone();
        }
        if let Some(retained) = self.retained.take() {
            slot.retained.push(retained);
        }
        slot.active = None;
    }

    fn commit(&mut self, from: &str) {
        let to = self.record.state.name();
        info!(
            deployment = %self.record.id,
            service = %self.record.service,
            %from,
            %to,
            "deployment state changed"
        );
        self.shared.events.publish(Event::StateChanged {
            deployment_id: self.record.id.clone(),
            service: self.record.service.clone(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self.publish();
    }

    /// Publish the record to watchers and checkpoint it.
    fn publish(&mut self) {
        self.tx.send_replace(self.record.clone());
        if let Err(e) = self.shared.store.put_record(&self.record) {
            warn!(deployment = %self.record.id, error = %e, "record checkpoint failed");
        }
    }
}
