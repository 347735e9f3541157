//! cutover.toml configuration parser.
//!
//! The configuration is loaded once per process into an immutable
//! [`CutoverConfig`] and shared by reference. Services are a map from service
//! id to [`ServiceConfig`]; each service owns a disjoint set of path patterns
//! on both listeners.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pattern::PathPattern;
use crate::types::{FleetShape, Protocol, ServiceId};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: String, value: String },

    #[error("no services configured")]
    NoServices,

    #[error("unknown service: {0}")]
    UnknownService(ServiceId),

    #[error("service {0} has no path patterns")]
    NoPaths(ServiceId),

    #[error("service {service}: invalid path pattern {pattern:?}")]
    InvalidPattern { service: ServiceId, pattern: String },

    #[error("duplicate routing rule (priority {priority}, pattern {pattern})")]
    DuplicateRule { priority: u32, pattern: String },

    #[error("path pattern {pattern} is claimed by both {first} and {second}")]
    OverlappingPattern {
        pattern: String,
        first: ServiceId,
        second: ServiceId,
    },

    #[error("service {service}: {detail}")]
    InvalidCapacity { service: ServiceId, detail: String },

    #[error("service {service}: rule priorities overflow from base {base}")]
    PriorityOverflow { service: ServiceId, base: u32 },

    #[error("invalid load balancer config: {0}")]
    InvalidListener(String),

    #[error("invalid deployment defaults: {0}")]
    InvalidDefaults(String),
}

// ── Top level ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutoverConfig {
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub defaults: DeploymentDefaults,
    #[serde(default)]
    pub services: BTreeMap<ServiceId, ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default = "default_lb_name")]
    pub name: String,
    #[serde(default = "ListenerConfig::production")]
    pub production: ListenerConfig,
    #[serde(default = "ListenerConfig::test")]
    pub test: ListenerConfig,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            name: default_lb_name(),
            production: ListenerConfig::production(),
            test: ListenerConfig::test(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl ListenerConfig {
    fn production() -> Self {
        Self {
            port: 80,
            protocol: Protocol::Http,
        }
    }

    fn test() -> Self {
        Self {
            port: 8080,
            protocol: Protocol::Http,
        }
    }
}

/// What happens when the approval window expires without a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    #[default]
    Rollback,
    Proceed,
}

/// Deployment timing shared by every service unless overridden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentDefaults {
    #[serde(default = "default_approval_wait")]
    pub approval_wait: String,
    #[serde(default = "default_termination_wait")]
    pub termination_wait: String,
    #[serde(default)]
    pub approval_timeout: TimeoutPolicy,
    /// When false, validated candidates are promoted without waiting for a decision.
    #[serde(default = "default_true")]
    pub require_approval: bool,
    #[serde(default = "default_provisioning_timeout")]
    pub provisioning_timeout: String,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
    #[serde(default)]
    pub health: HealthGateConfig,
    #[serde(default)]
    pub shift: ShiftConfig,
}

impl Default for DeploymentDefaults {
    fn default() -> Self {
        Self {
            approval_wait: default_approval_wait(),
            termination_wait: default_termination_wait(),
            approval_timeout: TimeoutPolicy::default(),
            require_approval: true,
            provisioning_timeout: default_provisioning_timeout(),
            drain_timeout: default_drain_timeout(),
            health: HealthGateConfig::default(),
            shift: ShiftConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthGateConfig {
    /// How long `healthy` (or `unhealthy`) must hold before the gate decides.
    #[serde(default = "default_observation_window")]
    pub observation_window: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Upper bound on the whole validation phase.
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout: String,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            observation_window: default_observation_window(),
            poll_interval: default_poll_interval(),
            validation_timeout: default_validation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftConfig {
    #[serde(default = "default_shift_attempts")]
    pub max_attempts: u32,
    /// Initial backoff between attempts; doubles after each failure.
    #[serde(default = "default_shift_backoff")]
    pub backoff: String,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_shift_attempts(),
            backoff: default_shift_backoff(),
        }
    }
}

// ── Services ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Path patterns this service owns on both listeners.
    pub paths: Vec<String>,
    /// Priority of the first rule; subsequent paths get consecutive priorities.
    pub priority: Option<u32>,
    /// Container image reference for the initial (blue) fleet.
    pub image: String,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,
    #[serde(default = "default_cpu_units")]
    pub cpu_units: u32,
    pub autoscaling: Option<AutoscalingConfig>,
    pub approval_wait: Option<String>,
    pub termination_wait: Option<String>,
    pub approval_timeout: Option<TimeoutPolicy>,
    pub require_approval: Option<bool>,
}

impl ServiceConfig {
    pub fn shape(&self) -> FleetShape {
        FleetShape {
            memory_mib: self.memory_mib,
            cpu_units: self.cpu_units,
        }
    }
}

/// Target-tracking autoscaling on memory utilisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingConfig {
    #[serde(default = "default_min_capacity")]
    pub min: u32,
    #[serde(default = "default_max_capacity")]
    pub max: u32,
    /// Target utilisation in percent.
    #[serde(default = "default_target_utilization")]
    pub target_utilization: f64,
    #[serde(default = "default_cooldown")]
    pub scale_in_cooldown: String,
    #[serde(default = "default_cooldown")]
    pub scale_out_cooldown: String,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            min: default_min_capacity(),
            max: default_max_capacity(),
            target_utilization: default_target_utilization(),
            scale_in_cooldown: default_cooldown(),
            scale_out_cooldown: default_cooldown(),
        }
    }
}

// ── Resolved views ────────────────────────────────────────────────

/// One routing rule a service owns: (priority, pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteSpec {
    pub priority: u32,
    pub pattern: PathPattern,
}

/// Health gate timing with durations parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub observation_window: Duration,
    pub poll_interval: Duration,
    pub validation_timeout: Duration,
}

/// Per-service deployment timing after applying overrides to the defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentPolicy {
    pub approval_wait: Duration,
    pub termination_wait: Duration,
    pub approval_timeout: TimeoutPolicy,
    pub require_approval: bool,
    pub provisioning_timeout: Duration,
    pub drain_timeout: Duration,
    pub health: HealthSettings,
    pub shift_attempts: u32,
    pub shift_backoff: Duration,
}

/// Resolved autoscaling parameters for one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub min: u32,
    pub max: u32,
    pub target_utilization: f64,
    pub scale_in_cooldown: Duration,
    pub scale_out_cooldown: Duration,
}

impl CutoverConfig {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CutoverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.get(id)
    }

    /// Check every cross-field constraint. Routing collisions are rejected
    /// here so they never surface at runtime.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if self.load_balancer.production.port == self.load_balancer.test.port {
            return Err(ConfigError::InvalidListener(format!(
                "production and test listeners share port {}",
                self.load_balancer.production.port
            )));
        }
        if self.defaults.shift.max_attempts == 0 {
            return Err(ConfigError::InvalidDefaults(
                "shift.max_attempts must be at least 1".to_string(),
            ));
        }

        for (id, svc) in &self.services {
            let policy = self.policy_for(id)?;
            if policy.health.poll_interval.is_zero() {
                return Err(ConfigError::InvalidDefaults(format!(
                    "service {id}: health poll interval must be greater than zero"
                )));
            }
            if policy.health.observation_window > policy.health.validation_timeout {
                return Err(ConfigError::InvalidDefaults(format!(
                    "service {id}: health observation window {:?} exceeds validation timeout {:?}",
                    policy.health.observation_window, policy.health.validation_timeout
                )));
            }
            if svc.desired_count == 0 {
                return Err(ConfigError::InvalidCapacity {
                    service: id.clone(),
                    detail: "desired count must be at least 1".to_string(),
                });
            }
            if let Some(scaling) = self.scaling_for(id)? {
                if scaling.min > scaling.max {
                    return Err(ConfigError::InvalidCapacity {
                        service: id.clone(),
                        detail: format!("autoscaling min {} > max {}", scaling.min, scaling.max),
                    });
                }
                if svc.desired_count < scaling.min || svc.desired_count > scaling.max {
                    return Err(ConfigError::InvalidCapacity {
                        service: id.clone(),
                        detail: format!(
                            "desired count {} outside autoscaling range {}..={}",
                            svc.desired_count, scaling.min, scaling.max
                        ),
                    });
                }
                if scaling.target_utilization <= 0.0 || scaling.target_utilization > 100.0 {
                    return Err(ConfigError::InvalidCapacity {
                        service: id.clone(),
                        detail: format!(
                            "target utilization {} must be in (0, 100]",
                            scaling.target_utilization
                        ),
                    });
                }
            }
        }

        self.routes()?;
        Ok(())
    }

    /// Routing rules per service, with priorities assigned and collisions rejected.
    ///
    /// Services without an explicit `priority` are numbered in blocks of 100
    /// in service-id order.
    pub fn routes(&self) -> ConfigResult<BTreeMap<ServiceId, Vec<RouteSpec>>> {
        let mut out = BTreeMap::new();
        let mut tuples: HashMap<(u32, String), ServiceId> = HashMap::new();
        let mut owners: HashMap<String, ServiceId> = HashMap::new();

        for (index, (id, svc)) in self.services.iter().enumerate() {
            if svc.paths.is_empty() {
                return Err(ConfigError::NoPaths(id.clone()));
            }
            let base = svc.priority.unwrap_or((index as u32 + 1) * 100);
            let mut specs = Vec::with_capacity(svc.paths.len());

            for (offset, path) in svc.paths.iter().enumerate() {
                let pattern = PathPattern::new(path.clone());
                if !pattern.is_valid() {
                    return Err(ConfigError::InvalidPattern {
                        service: id.clone(),
                        pattern: path.clone(),
                    });
                }
                let priority = u32::try_from(offset)
                    .ok()
                    .and_then(|offset| base.checked_add(offset))
                    .ok_or_else(|| ConfigError::PriorityOverflow {
                        service: id.clone(),
                        base,
                    })?;

                if tuples.insert((priority, path.clone()), id.clone()).is_some() {
                    return Err(ConfigError::DuplicateRule {
                        priority,
                        pattern: path.clone(),
                    });
                }
                if let Some(first) = owners.insert(path.clone(), id.clone())
                    && first != *id
                {
                    return Err(ConfigError::OverlappingPattern {
                        pattern: path.clone(),
                        first,
                        second: id.clone(),
                    });
                }

                specs.push(RouteSpec { priority, pattern });
            }
            out.insert(id.clone(), specs);
        }

        Ok(out)
    }

    /// Resolve the deployment policy of a service.
    pub fn policy_for(&self, id: &str) -> ConfigResult<DeploymentPolicy> {
        let svc = self
            .services
            .get(id)
            .ok_or_else(|| ConfigError::UnknownService(id.to_string()))?;
        let d = &self.defaults;

        Ok(DeploymentPolicy {
            approval_wait: parse_field(
                "approval_wait",
                svc.approval_wait.as_deref().unwrap_or(&d.approval_wait),
            )?,
            termination_wait: parse_field(
                "termination_wait",
                svc.termination_wait.as_deref().unwrap_or(&d.termination_wait),
            )?,
            approval_timeout: svc.approval_timeout.unwrap_or(d.approval_timeout),
            require_approval: svc.require_approval.unwrap_or(d.require_approval),
            provisioning_timeout: parse_field("provisioning_timeout", &d.provisioning_timeout)?,
            drain_timeout: parse_field("drain_timeout", &d.drain_timeout)?,
            health: HealthSettings {
                observation_window: parse_field(
                    "health.observation_window",
                    &d.health.observation_window,
                )?,
                poll_interval: parse_field("health.poll_interval", &d.health.poll_interval)?,
                validation_timeout: parse_field(
                    "health.validation_timeout",
                    &d.health.validation_timeout,
                )?,
            },
            shift_attempts: d.shift.max_attempts,
            shift_backoff: parse_field("shift.backoff", &d.shift.backoff)?,
        })
    }

    /// Resolve autoscaling parameters of a service, if it has any.
    pub fn scaling_for(&self, id: &str) -> ConfigResult<Option<ScalingPolicy>> {
        let Some(scaling) = self.services.get(id).and_then(|s| s.autoscaling.as_ref()) else {
            return Ok(None);
        };
        Ok(Some(ScalingPolicy {
            min: scaling.min,
            max: scaling.max,
            target_utilization: scaling.target_utilization,
            scale_in_cooldown: parse_field("autoscaling.scale_in_cooldown", &scaling.scale_in_cooldown)?,
            scale_out_cooldown: parse_field(
                "autoscaling.scale_out_cooldown",
                &scaling.scale_out_cooldown,
            )?,
        }))
    }

    /// Scaffold a two-service config: a frontend and an `/api/*` backend.
    pub fn scaffold() -> Self {
        let mut services = BTreeMap::new();
        services.insert(
            "frontend".to_string(),
            ServiceConfig {
                paths: vec!["/".to_string(), "/frontend".to_string()],
                priority: Some(200),
                image: "registry.local/frontend:v1".to_string(),
                desired_count: 1,
                memory_mib: default_memory_mib(),
                cpu_units: default_cpu_units(),
                autoscaling: Some(AutoscalingConfig::default()),
                approval_wait: None,
                termination_wait: None,
                approval_timeout: None,
                require_approval: None,
            },
        );
        services.insert(
            "backend".to_string(),
            ServiceConfig {
                paths: vec!["/api/*".to_string()],
                priority: Some(100),
                image: "registry.local/backend:v1".to_string(),
                desired_count: 1,
                memory_mib: default_memory_mib(),
                cpu_units: default_cpu_units(),
                autoscaling: Some(AutoscalingConfig::default()),
                approval_wait: None,
                termination_wait: None,
                approval_timeout: None,
                require_approval: None,
            },
        );

        CutoverConfig {
            load_balancer: LoadBalancerConfig::default(),
            defaults: DeploymentDefaults::default(),
            services,
        }
    }
}

fn parse_field(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parse a duration string: `"500ms"`, `"30s"`, `"10m"`, `"1h"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn default_lb_name() -> String {
    "bluegreen-alb".to_string()
}
fn default_approval_wait() -> String {
    "30m".to_string()
}
fn default_termination_wait() -> String {
    "10m".to_string()
}
fn default_provisioning_timeout() -> String {
    "10m".to_string()
}
fn default_drain_timeout() -> String {
    "5m".to_string()
}
fn default_observation_window() -> String {
    "30s".to_string()
}
fn default_poll_interval() -> String {
    "5s".to_string()
}
fn default_validation_timeout() -> String {
    "5m".to_string()
}
fn default_shift_attempts() -> u32 {
    3
}
fn default_shift_backoff() -> String {
    "1s".to_string()
}
fn default_true() -> bool {
    true
}
fn default_desired_count() -> u32 {
    1
}
fn default_memory_mib() -> u32 {
    512
}
fn default_cpu_units() -> u32 {
    256
}
fn default_min_capacity() -> u32 {
    1
}
fn default_max_capacity() -> u32 {
    2
}
fn default_target_utilization() -> f64 {
    40.0
}
fn default_cooldown() -> String {
    "60s".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SERVICES: &str = r#"
[services.frontend]
paths = ["/frontend"]
image = "registry/frontend:v1"

[services.backend]
paths = ["/api/*"]
image = "registry/backend:v1"
desired_count = 2

[services.backend.autoscaling]
min = 1
max = 4
"#;

    #[test]
    fn parses_minimal_two_service_config() {
        let config = CutoverConfig::from_toml_str(TWO_SERVICES).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.load_balancer.production.port, 80);
        assert_eq!(config.load_balancer.test.port, 8080);
        assert_eq!(config.services["frontend"].memory_mib, 512);
        assert_eq!(config.services["frontend"].cpu_units, 256);
    }

    #[test]
    fn defaults_match_load_balancer_stack() {
        let config = CutoverConfig::from_toml_str(TWO_SERVICES).unwrap();
        let policy = config.policy_for("frontend").unwrap();
        assert_eq!(policy.approval_wait, Duration::from_secs(30 * 60));
        assert_eq!(policy.termination_wait, Duration::from_secs(10 * 60));
        assert_eq!(policy.approval_timeout, TimeoutPolicy::Rollback);
        assert!(policy.require_approval);

        let scaling = config.scaling_for("backend").unwrap().unwrap();
        assert_eq!(scaling.target_utilization, 40.0);
        assert_eq!(scaling.scale_in_cooldown, Duration::from_secs(60));
        assert_eq!(scaling.scale_out_cooldown, Duration::from_secs(60));
        assert!(config.scaling_for("frontend").unwrap().is_none());
    }

    #[test]
    fn service_overrides_apply() {
        let doc = r#"
[defaults]
approval_wait = "5m"

[services.web]
paths = ["/"]
image = "web:v1"
approval_wait = "90s"
approval_timeout = "proceed"
"#;
        let config = CutoverConfig::from_toml_str(doc).unwrap();
        let policy = config.policy_for("web").unwrap();
        assert_eq!(policy.approval_wait, Duration::from_secs(90));
        assert_eq!(policy.approval_timeout, TimeoutPolicy::Proceed);
    }

    #[test]
    fn routes_get_block_priorities() {
        let config = CutoverConfig::from_toml_str(TWO_SERVICES).unwrap();
        let routes = config.routes().unwrap();
        // BTreeMap order: backend, frontend.
        assert_eq!(routes["backend"][0].priority, 100);
        assert_eq!(routes["frontend"][0].priority, 200);
        assert_eq!(routes["backend"][0].pattern.as_str(), "/api/*");
    }

    #[test]
    fn overlapping_patterns_are_rejected() {
        let doc = r#"
[services.a]
paths = ["/shared"]
image = "a:v1"

[services.b]
paths = ["/shared"]
image = "b:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingPattern { .. }));
    }

    #[test]
    fn duplicate_tuple_is_rejected() {
        let doc = r#"
[services.a]
paths = ["/x", "/x"]
priority = 10
image = "a:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRule { priority: 10, .. }));
    }

    #[test]
    fn empty_services_rejected() {
        let err = CutoverConfig::from_toml_str("").unwrap_err();
        assert!(matches!(err, ConfigError::NoServices));
    }

    #[test]
    fn bad_duration_rejected() {
        let doc = r#"
[defaults]
termination_wait = "soon"

[services.a]
paths = ["/"]
image = "a:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { ref field, .. } if field == "termination_wait"));
    }

    #[test]
    fn desired_outside_range_rejected() {
        let doc = r#"
[services.a]
paths = ["/"]
image = "a:v1"
desired_count = 5

[services.a.autoscaling]
min = 1
max = 2
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCapacity { .. }));
    }

    #[test]
    fn shared_listener_port_rejected() {
        let doc = r#"
[load_balancer.production]
port = 80

[load_balancer.test]
port = 80

[services.a]
paths = ["/"]
image = "a:v1"
"#;
        assert!(matches!(
            CutoverConfig::from_toml_str(doc).unwrap_err(),
            ConfigError::InvalidListener(_)
        ));
    }

    #[test]
    fn observation_window_longer_than_timeout_rejected() {
        let doc = r#"
[defaults.health]
observation_window = "10m"
validation_timeout = "5m"

[services.a]
paths = ["/"]
image = "a:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDefaults(ref msg) if msg.contains("observation window")));
    }

    #[test]
    fn observation_window_equal_to_timeout_accepted() {
        let doc = r#"
[defaults.health]
observation_window = "5m"
validation_timeout = "5m"

[services.a]
paths = ["/"]
image = "a:v1"
"#;
        assert!(CutoverConfig::from_toml_str(doc).is_ok());
    }

    #[test]
    fn zero_poll_interval_rejected() {
        let doc = r#"
[defaults.health]
poll_interval = "0s"

[services.a]
paths = ["/"]
image = "a:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDefaults(ref msg) if msg.contains("poll interval")));
    }

    #[test]
    fn priority_overflow_rejected() {
        let doc = r#"
[services.a]
paths = ["/x", "/y"]
priority = 4294967295
image = "a:v1"
"#;
        let err = CutoverConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::PriorityOverflow { base: u32::MAX, .. }));
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = CutoverConfig::scaffold();
        let rendered = config.to_toml_string().unwrap();
        let back = CutoverConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(back.services.len(), 2);
        assert!(rendered.contains("/api/*"));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutover.toml");
        std::fs::write(&path, TWO_SERVICES).unwrap();
        let config = CutoverConfig::from_file(&path).unwrap();
        assert!(config.service("frontend").is_some());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("later"), None);
    }
}
