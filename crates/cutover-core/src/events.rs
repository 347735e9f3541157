//! Observability events.
//!
//! The orchestrator, fleet manager, and health gate publish [`Event`]s on a
//! shared [`EventBus`]. Consumers (the daemon's event logger, tests) subscribe
//! to a broadcast receiver; publishing never blocks and never fails when
//! nobody is listening.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{DeploymentId, HealthStatus, ServiceId, TargetGroupId};

/// Something an external observability collaborator may care about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A deployment moved between orchestrator states.
    StateChanged {
        deployment_id: DeploymentId,
        service: ServiceId,
        from: String,
        to: String,
    },
    /// The health gate produced a verdict sample for a candidate fleet.
    HealthGate {
        deployment_id: DeploymentId,
        service: ServiceId,
        target_group: TargetGroupId,
        status: HealthStatus,
        verdict: String,
    },
    /// A rollback was started.
    RollbackTriggered {
        deployment_id: DeploymentId,
        service: ServiceId,
        reason: String,
    },
    /// A fleet's desired count changed.
    ScaleAction {
        service: ServiceId,
        target_group: TargetGroupId,
        from: u32,
        to: u32,
        reason: String,
    },
}

/// Cloneable broadcast handle for [`Event`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when there are no subscribers.
    pub fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(Event::RollbackTriggered {
            deployment_id: "d-1".to_string(),
            service: "frontend".to_string(),
            reason: "health".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::RollbackTriggered { ref reason, .. } if reason == "health"));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(Event::ScaleAction {
            service: "backend".to_string(),
            target_group: TargetGroupId::new("backend-blue"),
            from: 1,
            to: 2,
            reason: "autoscale".to_string(),
        });
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(Event::StateChanged {
            deployment_id: "d-1".to_string(),
            service: "frontend".to_string(),
            from: "provisioning".to_string(),
            to: "validating".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "state_changed");
        assert_eq!(json["to"], "validating");
    }
}
