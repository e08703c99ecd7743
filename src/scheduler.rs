use std::rc::Rc;

use crate::binding::ScriptSlot;
use crate::content::ContentSource;
use crate::ecs::EntityId;
use crate::host::{AppliedRequests, GameHost};
use crate::scripts::{DeferredQueue, InvocationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPhase {
    #[default]
    Idle,
    Collecting,
    Invoking,
    Applying,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub frame: u64,
    /// Entities with an enabled behavior at the start of the tick, in creation order.
    pub scheduled: Vec<EntityId>,
    pub succeeded: usize,
    pub faulted: usize,
    pub applied: AppliedRequests,
}

/// Drives behavior scripts once per frame.
#[derive(Debug, Default)]
pub struct BehaviorScheduler {
    phase: TickPhase,
    deferred: DeferredQueue,
}

impl BehaviorScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    pub fn tick<C: ContentSource>(&mut self, host: &mut GameHost<C>, dt: f64) -> TickSummary {
        let mut summary = TickSummary { frame: host.frame, ..Default::default() };

        self.phase = TickPhase::Collecting;
        summary.scheduled = host
            .world
            .ids()
            .into_iter()
            .filter(|&id| {
                host.world
                    .binding(id)
                    .and_then(|binding| binding.behavior.as_ref())
                    .is_some_and(|behavior| !behavior.faulted && host.engine.is_usable(behavior.handle))
            })
            .collect();

        self.phase = TickPhase::Invoking;
        let mut view = host.view();
        let faults_before = host.faults.len();
        for &id in &summary.scheduled {
            let Some(mutations) = host.invoke(id, &ScriptSlot::Behavior, InvocationKind::Behavior { dt }, &view) else {
                continue;
            };
            summary.succeeded += 1;
            if let Some(state) = host.apply(id, mutations, &mut self.deferred) {
                // Later entities in this tick read the applied values.
                Rc::make_mut(&mut view).upsert(state);
            }
        }
        summary.faulted = host.faults.len() - faults_before;

        self.phase = TickPhase::Applying;
        summary.applied = host.apply_deferred(&mut self.deferred);

        self.phase = TickPhase::Idle;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PhysicsConfig, ScriptingConfig};
    use crate::content::MemoryContentSource;
    use crate::ecs::EcsWorld;
    use crate::scripts::{Budget, ScriptEngine};
    use crate::template::{EntityTemplate, ScriptRef, TemplateLibrary};

    fn host(script: &str) -> GameHost<MemoryContentSource> {
        let engine = ScriptEngine::new(&ScriptingConfig::default()).expect("engine");
        let content = MemoryContentSource::new().with_script("tick.rhai", script);
        let templates = TemplateLibrary::from_templates([
            EntityTemplate::new("drone", "drone").with_behavior(ScriptRef::isolated("tick.rhai")),
            EntityTemplate::new("dummy", "dummy"),
        ]);
        GameHost::new(engine, content, templates, EcsWorld::new(&PhysicsConfig::default()), Budget::default())
    }

    #[test]
    fn only_bound_entities_are_scheduled() {
        let mut host = host(r#"fn process(world, entity, dt) { world.set("dt", dt); }"#);
        let drone = host.spawn("drone", None).expect("drone");
        host.spawn("dummy", None).expect("dummy");
        let mut scheduler = BehaviorScheduler::new();

        let summary = scheduler.tick(&mut host, 0.25);

        assert_eq!(summary.scheduled, vec![drone]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(scheduler.phase(), TickPhase::Idle);
        assert_eq!(host.world.state(drone).and_then(|state| state.number("dt")), Some(0.25));
    }

    #[test]
    fn deferred_requests_wait_for_the_applying_phase() {
        let mut host = host(r#"fn process(world, entity, dt) { world.spawn("dummy", 0, 0); world.destroy_self(); }"#);
        let drone = host.spawn("drone", None).expect("drone");
        let mut scheduler = BehaviorScheduler::new();

        let summary = scheduler.tick(&mut host, 0.25);

        assert_eq!(summary.applied.destroyed, vec![drone]);
        assert_eq!(summary.applied.spawned.len(), 1);
        assert!(!host.world.contains(drone));
        assert_eq!(host.world.len(), 1);
    }
}
