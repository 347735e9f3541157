//! Immutable routing tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cutover_core::{ListenerKind, PathPattern, Protocol, ServiceId, TargetGroupId};

/// A path rule. The target group is resolved through the owning service's
/// binding on the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingRule {
    pub priority: u32,
    pub pattern: PathPattern,
    pub service: ServiceId,
}

/// A rule with its target group resolved, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleView {
    pub priority: u32,
    pub pattern: PathPattern,
    pub service: ServiceId,
    pub target_group: TargetGroupId,
}

/// Routing state of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    pub kind: ListenerKind,
    pub port: u16,
    pub protocol: Protocol,
    /// Sorted by (priority, pattern); lowest priority number wins.
    rules: Vec<RoutingRule>,
    /// Default action per service.
    bindings: BTreeMap<ServiceId, TargetGroupId>,
}

impl RoutingTable {
    pub fn new(kind: ListenerKind, port: u16, protocol: Protocol) -> Self {
        Self {
            kind,
            port,
            protocol,
            rules: Vec::new(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn binding(&self, service: &str) -> Option<&TargetGroupId> {
        self.bindings.get(service)
    }

    pub fn bindings(&self) -> &BTreeMap<ServiceId, TargetGroupId> {
        &self.bindings
    }

    /// Resolve a request path to a target group: first matching rule in
    /// priority order.
    pub fn resolve(&self, path: &str) -> Option<&TargetGroupId> {
        self.rules
            .iter()
            .find(|r| r.pattern.matches(path))
            .and_then(|r| self.bindings.get(&r.service))
    }

    /// Rules with their target groups resolved.
    pub fn view(&self) -> Vec<RuleView> {
        self.rules
            .iter()
            .filter_map(|r| {
                self.bindings.get(&r.service).map(|tg| RuleView {
                    priority: r.priority,
                    pattern: r.pattern.clone(),
                    service: r.service.clone(),
                    target_group: tg.clone(),
                })
            })
            .collect()
    }

    /// The rule already occupying `(priority, pattern)`, if any.
    pub(crate) fn find_rule(&self, priority: u32, pattern: &PathPattern) -> Option<&RoutingRule> {
        self.rules
            .iter()
            .find(|r| r.priority == priority && &r.pattern == pattern)
    }

    /// Add a service's rules and bind them to `target_group`. The caller has
    /// checked for collisions.
    pub(crate) fn insert(&mut self, service: &str, rules: Vec<RoutingRule>, target_group: TargetGroupId) {
        self.rules.extend(rules);
        self.rules
            .sort_by(|a, b| (a.priority, &a.pattern).cmp(&(b.priority, &b.pattern)));
        self.bindings.insert(service.to_string(), target_group);
    }

    pub(crate) fn rebind(&mut self, service: &str, target_group: TargetGroupId) {
        self.bindings.insert(service.to_string(), target_group);
    }

    /// Remove a service's rules and binding. Returns the old binding.
    pub(crate) fn remove(&mut self, service: &str) -> Option<TargetGroupId> {
        self.rules.retain(|r| r.service != service);
        self.bindings.remove(service)
    }
}

/// Point-in-time snapshot of both listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSet {
    pub production: RoutingTable,
    pub test: RoutingTable,
}

impl ListenerSet {
    pub fn get(&self, kind: ListenerKind) -> &RoutingTable {
        match kind {
            ListenerKind::Production => &self.production,
            ListenerKind::Test => &self.test,
        }
    }

    pub(crate) fn get_mut(&mut self, kind: ListenerKind) -> &mut RoutingTable {
        match kind {
            ListenerKind::Production => &mut self.production,
            ListenerKind::Test => &mut self.test,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::Color;

    fn rule(priority: u32, pattern: &str, service: &str) -> RoutingRule {
        RoutingRule {
            priority,
            pattern: PathPattern::new(pattern),
            service: service.to_string(),
        }
    }

    #[test]
    fn resolves_in_priority_order() {
        let mut table = RoutingTable::new(ListenerKind::Production, 80, Protocol::Http);
        table.insert(
            "frontend",
            vec![rule(200, "/*", "frontend")],
            TargetGroupId::for_fleet("frontend", Color::Blue),
        );
        table.insert(
            "backend",
            vec![rule(100, "/api/*", "backend")],
            TargetGroupId::for_fleet("backend", Color::Blue),
        );

        assert_eq!(table.rules()[0].service, "backend");
        assert_eq!(table.resolve("/api/users").unwrap().as_str(), "backend-blue");
        assert_eq!(table.resolve("/index.html").unwrap().as_str(), "frontend-blue");
    }

    #[test]
    fn unmatched_path_resolves_to_nothing() {
        let mut table = RoutingTable::new(ListenerKind::Test, 8080, Protocol::Http);
        table.insert(
            "backend",
            vec![rule(100, "/api/*", "backend")],
            TargetGroupId::for_fleet("backend", Color::Green),
        );
        assert!(table.resolve("/frontend").is_none());
    }

    #[test]
    fn rebind_moves_every_rule() {
        let mut table = RoutingTable::new(ListenerKind::Production, 80, Protocol::Http);
        table.insert(
            "frontend",
            vec![rule(200, "/", "frontend"), rule(201, "/frontend", "frontend")],
            TargetGroupId::for_fleet("frontend", Color::Blue),
        );
        table.rebind("frontend", TargetGroupId::for_fleet("frontend", Color::Green));

        assert!(
            table
                .view()
                .iter()
                .all(|r| r.target_group.as_str() == "frontend-green")
        );
    }

    #[test]
    fn remove_drops_rules_and_binding() {
        let mut table = RoutingTable::new(ListenerKind::Test, 8080, Protocol::Http);
        table.insert(
            "api",
            vec![rule(100, "/api/*", "api")],
            TargetGroupId::for_fleet("api", Color::Green),
        );
        assert_eq!(table.remove("api").unwrap().as_str(), "api-green");
        assert!(table.rules().is_empty());
        assert!(table.binding("api").is_none());
    }
}
