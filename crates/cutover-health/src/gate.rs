//! Health aggregation and the debounced promotion gate.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use cutover_core::{HealthStatus, InstanceHealth};

/// Fold per-instance health into a single fleet status.
///
/// A fleet with nothing desired or nothing reporting is `Unknown`, so an
/// empty fleet can never pass the gate.
pub fn aggregate(desired: u32, running: u32, instances: &[InstanceHealth]) -> HealthStatus {
    if desired == 0 || instances.is_empty() {
        return HealthStatus::Unknown;
    }
    if instances.iter().any(|i| i.status == HealthStatus::Unhealthy) {
        return HealthStatus::Unhealthy;
    }
    let healthy = instances
        .iter()
        .filter(|i| i.status == HealthStatus::Healthy)
        .count() as u32;
    if running >= desired && healthy >= desired {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

/// Result of feeding one sample to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Pending,
    Passed,
    Failed(String),
}

/// Requires a status to hold for a full observation window before deciding.
#[derive(Debug)]
pub struct HealthGate {
    window: Duration,
    timeout: Duration,
    started: Instant,
    healthy_since: Option<Instant>,
    unhealthy_since: Option<Instant>,
}

impl HealthGate {
    pub fn new(window: Duration, timeout: Duration) -> Self {
        Self {
            window,
            timeout,
            started: Instant::now(),
            healthy_since: None,
            unhealthy_since: None,
        }
    }

    /// Feed the latest aggregated status.
    pub fn record(&mut self, status: HealthStatus) -> GateVerdict {
        let now = Instant::now();
        match status {
            HealthStatus::Healthy => {
                self.unhealthy_since = None;
                let since = *self.healthy_since.get_or_insert(now);
                if now.duration_since(since) >= self.window {
                    return GateVerdict::Passed;
                }
            }
            HealthStatus::Unhealthy => {
                self.healthy_since = None;
                let since = *self.unhealthy_since.get_or_insert(now);
                if now.duration_since(since) >= self.window {
                    return GateVerdict::Failed(format!(
                        "unhealthy for the full {:?} observation window",
                        self.window
                    ));
                }
            }
            HealthStatus::Unknown => {
                self.healthy_since = None;
                self.unhealthy_since = None;
            }
        }

        if now.duration_since(self.started) >= self.timeout {
            return GateVerdict::Failed(format!(
                "not healthy within the {:?} validation timeout",
                self.timeout
            ));
        }
        debug!(%status, "health gate pending");
        GateVerdict::Pending
    }

    /// When the gate gives up if nothing decides it first.
    pub fn deadline(&self) -> Instant {
        self.started + self.timeout
    }
}
