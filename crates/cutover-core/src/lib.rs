//! cutover-core — shared types and configuration for the cutover workspace.
//!
//! Everything here is plain data: the immutable [`CutoverConfig`] loaded once
//! per process, the blue/green domain types, listener path patterns, and the
//! broadcast [`EventBus`] that the other crates publish observability events on.

pub mod config;
pub mod events;
pub mod pattern;
pub mod types;

pub use config::{
    AutoscalingConfig, ConfigError, ConfigResult, CutoverConfig, DeploymentPolicy, HealthSettings,
    ListenerConfig, LoadBalancerConfig, RouteSpec, ScalingPolicy, ServiceConfig, TimeoutPolicy,
    parse_duration,
};
pub use events::{Event, EventBus};
pub use pattern::PathPattern;
pub use types::*;
