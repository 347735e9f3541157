//! Routing controller — the single writer of both listener tables.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cutover_core::{
    CutoverConfig, ListenerKind, LoadBalancerConfig, RouteSpec, ServiceId, TargetGroupId,
};

use crate::error::{RoutingError, RoutingResult};
use crate::table::{ListenerSet, RoutingRule, RoutingTable, RuleView};

/// Routing state of one service, as reported by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingSummary {
    pub service: ServiceId,
    /// Production default action.
    pub production: Option<TargetGroupId>,
    /// Test listener default action, present while a candidate is attached.
    pub test: Option<TargetGroupId>,
    pub rules: Vec<RuleView>,
}

pub struct RoutingController {
    listeners: RwLock<Arc<ListenerSet>>,
    /// Registered route specs per service.
    routes: RwLock<BTreeMap<ServiceId, Vec<RouteSpec>>>,
    unavailable: RwLock<HashSet<ListenerKind>>,
}

impl RoutingController {
    pub fn new(lb: &LoadBalancerConfig) -> Self {
        let set = ListenerSet {
            production: RoutingTable::new(ListenerKind::Production, lb.production.port, lb.production.protocol),
            test: RoutingTable::new(ListenerKind::Test, lb.test.port, lb.test.protocol),
        };
        Self {
            listeners: RwLock::new(Arc::new(set)),
            routes: RwLock::new(BTreeMap::new()),
            unavailable: RwLock::new(HashSet::new()),
        }
    }

    /// Build a controller with every configured service registered.
    pub fn from_config(config: &CutoverConfig) -> RoutingResult<Self> {
        let controller = Self::new(&config.load_balancer);
        for (service, specs) in config.routes()? {
            controller.register_service(&service, specs)?;
        }
        Ok(controller)
    }

    /// Register the path rules a service will use on both listeners.
    ///
    /// Rejects a (priority, pattern) tuple or a pattern already claimed by
    /// another service.
    pub fn register_service(&self, service: &str, specs: Vec<RouteSpec>) -> RoutingResult<()> {
        let mut routes = self.routes.write().expect("routes lock");
        for (owner, existing) in routes.iter().filter(|(owner, _)| owner.as_str() != service) {
            for spec in &specs {
                if let Some(clash) = existing.iter().find(|e| e.pattern == spec.pattern) {
                    return Err(if clash.priority == spec.priority {
                        RoutingError::DuplicateRule {
                            listener: ListenerKind::Production,
                            priority: spec.priority,
                            pattern: spec.pattern.clone(),
                            owner: owner.clone(),
                        }
                    } else {
                        RoutingError::OverlappingPattern {
                            pattern: spec.pattern.clone(),
                            owner: owner.clone(),
                        }
                    });
                }
            }
        }
        debug!(%service, rules = specs.len(), "service routes registered");
        routes.insert(service.to_string(), specs);
        Ok(())
    }

    /// Current snapshot of both listeners.
    pub fn snapshot(&self) -> Arc<ListenerSet> {
        self.listeners.read().expect("listeners lock").clone()
    }

    /// Resolve a request path on a listener, the way dispatch would.
    pub fn route(&self, kind: ListenerKind, path: &str) -> Option<TargetGroupId> {
        self.snapshot().get(kind).resolve(path).cloned()
    }

    /// Production default action of a service.
    pub fn live_target(&self, service: &str) -> Option<TargetGroupId> {
        self.snapshot().production.binding(service).cloned()
    }

    pub fn summary(&self, service: &str) -> RoutingSummary {
        let snapshot = self.snapshot();
        RoutingSummary {
            service: service.to_string(),
            production: snapshot.production.binding(service).cloned(),
            test: snapshot.test.binding(service).cloned(),
            rules: snapshot
                .production
                .view()
                .into_iter()
                .chain(snapshot.test.view())
                .filter(|r| r.service == service)
                .collect(),
        }
    }

    /// Mark a listener (un)available. While unavailable every mutation
    /// touching it is rejected.
    pub fn set_available(&self, kind: ListenerKind, available: bool) {
        let mut unavailable = self.unavailable.write().expect("availability lock");
        if available {
            unavailable.remove(&kind);
        } else {
            unavailable.insert(kind);
        }
    }

    /// Add a service's rules to a listener, forwarding to `target_group`.
    pub fn attach(&self, kind: ListenerKind, service: &str, target_group: &TargetGroupId) -> RoutingResult<()> {
        let specs = self.specs_for(service)?;
        self.mutate(&[kind], |set| {
            let table = set.get_mut(kind);
            if table.binding(service).is_some() {
                return Err(RoutingError::AlreadyAttached {
                    listener: kind,
                    service: service.to_string(),
                });
            }
            let mut rules = Vec::with_capacity(specs.len());
            for spec in &specs {
                if let Some(existing) = table.find_rule(spec.priority, &spec.pattern) {
                    return Err(RoutingError::DuplicateRule {
                        listener: kind,
                        priority: spec.priority,
                        pattern: spec.pattern.clone(),
                        owner: existing.service.clone(),
                    });
                }
                rules.push(RoutingRule {
                    priority: spec.priority,
                    pattern: spec.pattern.clone(),
                    service: service.to_string(),
                });
            }
            table.insert(service, rules, target_group.clone());
            Ok(())
        })?;
        info!(listener = %kind, %service, %target_group, "target group attached");
        Ok(())
    }

    /// Point a service's default action on a listener at `target_group`.
    ///
    /// On the production listener the target must have at least one healthy
    /// instance.
    pub fn set_default(
        &self,
        kind: ListenerKind,
        service: &str,
        target_group: &TargetGroupId,
        healthy: u32,
    ) -> RoutingResult<()> {
        if kind == ListenerKind::Production && healthy == 0 {
            return Err(RoutingError::NoHealthyTargets(target_group.clone()));
        }
        self.mutate(&[kind], |set| {
            let table = set.get_mut(kind);
            if table.binding(service).is_none() {
                return Err(RoutingError::NotAttached {
                    listener: kind,
                    service: service.to_string(),
                });
            }
            table.rebind(service, target_group.clone());
            Ok(())
        })?;
        info!(listener = %kind, %service, %target_group, "default action updated");
        Ok(())
    }

    /// Cut production over to `candidate` and point the test listener at the
    /// outgoing fleet, in one step. The test listener never forwards to the
    /// live color.
    pub fn promote(
        &self,
        service: &str,
        candidate: &TargetGroupId,
        outgoing: &TargetGroupId,
        healthy: u32,
    ) -> RoutingResult<()> {
        if healthy == 0 {
            return Err(RoutingError::NoHealthyTargets(candidate.clone()));
        }
        self.mutate(&[ListenerKind::Production, ListenerKind::Test], |set| {
            match set.production.binding(service) {
                Some(live) if live == outgoing => {}
                Some(live) => {
                    return Err(RoutingError::TargetMismatch {
                        listener: ListenerKind::Production,
                        service: service.to_string(),
                        expected: outgoing.clone(),
                        actual: live.clone(),
                    });
                }
                None => {
                    return Err(RoutingError::NotAttached {
                        listener: ListenerKind::Production,
                        service: service.to_string(),
                    });
                }
            }
            if set.test.binding(service).is_none() {
                return Err(RoutingError::NotAttached {
                    listener: ListenerKind::Test,
                    service: service.to_string(),
                });
            }
            set.production.rebind(service, candidate.clone());
            set.test.rebind(service, outgoing.clone());
            Ok(())
        })?;
        info!(%service, live = %candidate, retained = %outgoing, "production cut over");
        Ok(())
    }

    /// Put production back on `stable` and drop the service from the test
    /// listener, in one step. The production table is left alone when it
    /// already forwards to `stable`. Idempotent.
    pub fn restore(&self, service: &str, stable: &TargetGroupId) -> RoutingResult<()> {
        let snapshot = self.snapshot();
        let production_ok = snapshot.production.binding(service) == Some(stable);
        let test_clear = snapshot.test.binding(service).is_none();
        if production_ok && test_clear {
            debug!(%service, "routing already restored");
            return Ok(());
        }

        let touched: &[ListenerKind] = if production_ok {
            &[ListenerKind::Test]
        } else {
            &[ListenerKind::Production, ListenerKind::Test]
        };
        self.mutate(touched, |set| {
            match set.production.binding(service) {
                None => {
                    return Err(RoutingError::NotAttached {
                        listener: ListenerKind::Production,
                        service: service.to_string(),
                    });
                }
                Some(live) if live != stable => set.production.rebind(service, stable.clone()),
                Some(_) => {}
            }
            set.test.remove(service);
            Ok(())
        })?;
        info!(%service, live = %stable, "routing restored");
        Ok(())
    }

    /// Remove a service's rules from a listener. Refused while
    /// `target_group` is the service's production default action.
    pub fn detach(&self, kind: ListenerKind, service: &str, target_group: &TargetGroupId) -> RoutingResult<()> {
        self.mutate(&[kind], |set| {
            if set.production.binding(service) == Some(target_group) {
                return Err(RoutingError::DefaultResponsibility(target_group.clone()));
            }
            let table = set.get_mut(kind);
            match table.binding(service) {
                Some(bound) if bound == target_group => {}
                Some(bound) => {
                    return Err(RoutingError::TargetMismatch {
                        listener: kind,
                        service: service.to_string(),
                        expected: target_group.clone(),
                        actual: bound.clone(),
                    });
                }
                None => {
                    return Err(RoutingError::NotAttached {
                        listener: kind,
                        service: service.to_string(),
                    });
                }
            }
            table.remove(service);
            Ok(())
        })?;
        info!(listener = %kind, %service, %target_group, "target group detached");
        Ok(())
    }

    fn specs_for(&self, service: &str) -> RoutingResult<Vec<RouteSpec>> {
        let routes = self.routes.read().expect("routes lock");
        routes
            .get(service)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownService(service.to_string()))
    }

    /// Apply `f` to a copy of the current snapshot and publish the copy only
    /// if `f` succeeds.
    fn mutate<F>(&self, touched: &[ListenerKind], f: F) -> RoutingResult<()>
    where
        F: FnOnce(&mut ListenerSet) -> RoutingResult<()>,
    {
        {
            let unavailable = self.unavailable.read().expect("availability lock");
            if let Some(kind) = touched.iter().find(|k| unavailable.contains(*k)) {
                return Err(RoutingError::Unavailable(*kind));
            }
        }
        let mut listeners = self.listeners.write().expect("listeners lock");
        let mut next = ListenerSet::clone(&listeners);
        f(&mut next)?;
        *listeners = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::{Color, PathPattern};

    fn spec(priority: u32, pattern: &str) -> RouteSpec {
        RouteSpec {
            priority,
            pattern: PathPattern::new(pattern),
        }
    }

    fn tg(service: &str, color: Color) -> TargetGroupId {
        TargetGroupId::for_fleet(service, color)
    }

    fn controller() -> RoutingController {
        let c = RoutingController::new(&LoadBalancerConfig::default());
        c.register_service("frontend", vec![spec(200, "/frontend"), spec(201, "/")])
            .unwrap();
        c.register_service("backend", vec![spec(100, "/api/*")]).unwrap();
        c.attach(ListenerKind::Production, "frontend", &tg("frontend", Color::Blue))
            .unwrap();
        c.attach(ListenerKind::Production, "backend", &tg("backend", Color::Blue))
            .unwrap();
        c
    }

    #[test]
    fn overlapping_registration_rejected() {
        let c = controller();
        let err = c
            .register_service("admin", vec![spec(100, "/api/*")])
            .unwrap_err();
        assert!(matches!(err, RoutingError::DuplicateRule { .. }));

        let err = c
            .register_service("admin", vec![spec(300, "/api/*")])
            .unwrap_err();
        assert!(matches!(err, RoutingError::OverlappingPattern { .. }));
    }

    #[test]
    fn from_config_registers_every_service() {
        let c = RoutingController::from_config(&CutoverConfig::scaffold()).unwrap();
        assert!(c.specs_for("frontend").is_ok());
        assert!(c.specs_for("backend").is_ok());
        assert!(matches!(
            c.specs_for("billing"),
            Err(RoutingError::UnknownService(_))
        ));
    }

    #[test]
    fn attach_twice_rejected() {
        let c = controller();
        let err = c
            .attach(ListenerKind::Production, "backend", &tg("backend", Color::Green))
            .unwrap_err();
        assert!(matches!(err, RoutingError::AlreadyAttached { .. }));
    }

    #[test]
    fn route_dispatches_by_priority() {
        let c = controller();
        assert_eq!(
            c.route(ListenerKind::Production, "/api/orders").unwrap().as_str(),
            "backend-blue"
        );
        assert_eq!(
            c.route(ListenerKind::Production, "/frontend").unwrap().as_str(),
            "frontend-blue"
        );
        assert!(c.route(ListenerKind::Test, "/api/orders").is_none());
    }

    #[test]
    fn set_default_requires_healthy_target_on_production() {
        let c = controller();
        let err = c
            .set_default(ListenerKind::Production, "backend", &tg("backend", Color::Green), 0)
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoHealthyTargets(_)));
        assert_eq!(c.live_target("backend").unwrap().as_str(), "backend-blue");

        c.set_default(ListenerKind::Production, "backend", &tg("backend", Color::Green), 2)
            .unwrap();
        assert_eq!(c.live_target("backend").unwrap().as_str(), "backend-green");
    }

    #[test]
    fn promote_swaps_both_listeners_together() {
        let c = controller();
        c.attach(ListenerKind::Test, "backend", &tg("backend", Color::Green))
            .unwrap();

        c.promote("backend", &tg("backend", Color::Green), &tg("backend", Color::Blue), 1)
            .unwrap();

        let snap = c.snapshot();
        assert_eq!(snap.production.binding("backend").unwrap().as_str(), "backend-green");
        assert_eq!(snap.test.binding("backend").unwrap().as_str(), "backend-blue");
        // Frontend untouched.
        assert_eq!(snap.production.binding("frontend").unwrap().as_str(), "frontend-blue");
    }

    #[test]
    fn failed_mutation_leaves_snapshot_unchanged() {
        let c = controller();
        c.attach(ListenerKind::Test, "backend", &tg("backend", Color::Green))
            .unwrap();
        let before = c.snapshot();

        c.set_available(ListenerKind::Production, false);
        let err = c
            .promote("backend", &tg("backend", Color::Green), &tg("backend", Color::Blue), 1)
            .unwrap_err();
        assert!(matches!(err, RoutingError::Unavailable(ListenerKind::Production)));
        assert_eq!(*c.snapshot(), *before);

        c.set_available(ListenerKind::Production, true);
        c.promote("backend", &tg("backend", Color::Green), &tg("backend", Color::Blue), 1)
            .unwrap();
    }

    #[test]
    fn detach_refuses_production_default() {
        let c = controller();
        let err = c
            .detach(ListenerKind::Production, "backend", &tg("backend", Color::Blue))
            .unwrap_err();
        assert!(matches!(err, RoutingError::DefaultResponsibility(_)));

        c.attach(ListenerKind::Test, "backend", &tg("backend", Color::Green))
            .unwrap();
        c.detach(ListenerKind::Test, "backend", &tg("backend", Color::Green))
            .unwrap();
        assert!(c.summary("backend").test.is_none());
    }

    #[test]
    fn restore_is_idempotent() {
        let c = controller();
        let before = c.snapshot();
        c.attach(ListenerKind::Test, "frontend", &tg("frontend", Color::Green))
            .unwrap();

        c.restore("frontend", &tg("frontend", Color::Blue)).unwrap();
        let once = c.snapshot();
        c.restore("frontend", &tg("frontend", Color::Blue)).unwrap();

        assert_eq!(*once, *before);
        assert_eq!(*c.snapshot(), *before);
    }

    #[test]
    fn restore_before_cutover_leaves_production_alone() {
        let c = controller();
        c.attach(ListenerKind::Test, "backend", &tg("backend", Color::Green))
            .unwrap();
        let production = c.snapshot().production.clone();

        c.set_available(ListenerKind::Production, false);
        c.restore("backend", &tg("backend", Color::Blue)).unwrap();

        assert_eq!(c.snapshot().production, production);
        assert!(c.summary("backend").test.is_none());
    }

    #[test]
    fn summary_serializes() {
        let c = controller();
        let json = serde_json::to_value(c.summary("frontend")).unwrap();
        assert_eq!(json["production"], "frontend-blue");
        assert!(json["test"].is_null());
        assert_eq!(json["rules"].as_array().unwrap().len(), 2);
    }
}
