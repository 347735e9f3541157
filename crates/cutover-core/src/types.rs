//! Domain types shared by the fleet, routing, health, and orchestrator crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Service identifier (the key of `[services.<name>]` in the config).
pub type ServiceId = String;

/// Unique identifier of a single deployment attempt.
pub type DeploymentId = String;

// ── Colors ────────────────────────────────────────────────────────

/// Which of the two parallel fleets a resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    /// The opposite color.
    pub fn other(self) -> Self {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Target groups ─────────────────────────────────────────────────

/// Name of a routable set of backend instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetGroupId(String);

impl TargetGroupId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Conventional target group name for a service's fleet: `{service}-{color}`.
    pub fn for_fleet(service: &str, color: Color) -> Self {
        Self(format!("{service}-{color}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Health ────────────────────────────────────────────────────────

/// Health status of an instance, or the aggregate of a fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        })
    }
}

/// Health of a single running instance as reported by the compute provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    pub id: String,
    pub status: HealthStatus,
}

// ── Fleets ────────────────────────────────────────────────────────

/// One color's instance group for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    pub service: ServiceId,
    pub color: Color,
    pub target_group: TargetGroupId,
    /// Container image the fleet's instances run.
    pub image: String,
    pub desired: u32,
    /// Last observed running count (eventually consistent with `desired`).
    pub running: u32,
    /// Last aggregated health written by the health poller.
    pub health: HealthStatus,
    /// Set by a rollback: the autoscaler must not scale this fleet out again.
    pub frozen: bool,
}

impl Fleet {
    /// Scaled to zero and no instance still running.
    pub fn is_drained(&self) -> bool {
        self.desired == 0 && self.running == 0
    }
}

/// Instance shape passed to the compute provider when creating a fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetShape {
    pub memory_mib: u32,
    pub cpu_units: u32,
}

// ── Listeners ─────────────────────────────────────────────────────

/// The two load-balancer entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    Production,
    Test,
}

impl ListenerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerKind::Production => "production",
            ListenerKind::Test => "test",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListenerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" | "prod" => Ok(ListenerKind::Production),
            "test" => Ok(ListenerKind::Test),
            other => Err(format!("unknown listener: {other}")),
        }
    }
}

/// Listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_color_flips() {
        assert_eq!(Color::Blue.other(), Color::Green);
        assert_eq!(Color::Green.other(), Color::Blue);
    }

    #[test]
    fn target_group_naming() {
        let tg = TargetGroupId::for_fleet("frontend", Color::Green);
        assert_eq!(tg.as_str(), "frontend-green");
        assert_eq!(serde_json::to_string(&tg).unwrap(), "\"frontend-green\"");
    }

    #[test]
    fn listener_kind_parses() {
        assert_eq!("prod".parse::<ListenerKind>().unwrap(), ListenerKind::Production);
        assert_eq!("test".parse::<ListenerKind>().unwrap(), ListenerKind::Test);
        assert!("admin".parse::<ListenerKind>().is_err());
    }
}
