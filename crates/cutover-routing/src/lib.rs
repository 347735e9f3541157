//! cutover-routing — the production and test listeners of the shared load balancer.
//!
//! Each listener holds priority-ordered path rules. A service's rules all
//! forward to that service's *binding* on the listener, the target group
//! currently acting as its default action. Swapping a binding therefore moves
//! every rule of the service in one step.
//!
//! Both listeners live in a single immutable [`ListenerSet`] snapshot behind
//! one lock. Every mutation builds a new snapshot and replaces the old one,
//! so request dispatch never observes a half-applied change, even when a
//! cutover touches both listeners.

pub mod controller;
pub mod error;
pub mod table;

pub use controller::{RoutingController, RoutingSummary};
pub use error::{RoutingError, RoutingResult};
pub use table::{ListenerSet, RoutingRule, RoutingTable, RuleView};
