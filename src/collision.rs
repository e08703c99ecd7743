use std::collections::BTreeSet;
use std::rc::Rc;

use crate::binding::ScriptSlot;
use crate::content::ContentSource;
use crate::ecs::EntityId;
use crate::events::GameEvent;
use crate::host::{AppliedRequests, GameHost};
use crate::scripts::{DeferredQueue, InvocationKind};

/// Invokes collision-action scripts for reported overlaps.
#[derive(Debug, Default)]
pub struct CollisionDispatcher {
    frame: u64,
    handled: BTreeSet<(EntityId, EntityId)>,
    deferred: DeferredQueue,
}

impl CollisionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `a`'s action for `b`'s category, then `b`'s action for `a`'s category. A pair is
    /// handled at most once per frame regardless of argument order. Returns how many actions ran
    /// successfully.
    pub fn handle<C: ContentSource>(&mut self, host: &mut GameHost<C>, a: EntityId, b: EntityId) -> usize {
        if self.frame != host.frame {
            self.frame = host.frame;
            self.handled.clear();
        }
        if a == b {
            return 0;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if !self.handled.insert(key) {
            return 0;
        }
        let (Some(category_a), Some(category_b)) =
            (host.world.category(a).map(str::to_owned), host.world.category(b).map(str::to_owned))
        else {
            return 0;
        };
        host.events.push(GameEvent::collision_started(a, b));

        let mut view = host.view();
        let mut fired = 0;
        for (actor, other, other_category) in [(a, b, category_b), (b, a, category_a)] {
            let Some(partner) = host.world.state(other) else {
                continue;
            };
            let slot = ScriptSlot::Collision(other_category);
            let Some(mutations) = host.invoke(actor, &slot, InvocationKind::Collision { partner }, &view) else {
                continue;
            };
            fired += 1;
            if let Some(state) = host.apply(actor, mutations, &mut self.deferred) {
                Rc::make_mut(&mut view).upsert(state);
            }
        }
        fired
    }

    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Applies every spawn, destroy and consume request gathered since the last call.
    pub fn resolve<C: ContentSource>(&mut self, host: &mut GameHost<C>) -> AppliedRequests {
        host.apply_deferred(&mut self.deferred)
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

    fn host() -> GameHost<MemoryContentSource> {
        let engine = ScriptEngine::new(&ScriptingConfig::default()).expect("engine");
        let content = MemoryContentSource::new()
            .with_script("eat.rhai", "fn collide(world, entity, other) { world.consume(other); }");
        let templates = TemplateLibrary::from_templates([
            EntityTemplate::new("whale", "whale").with_collision("fish", ScriptRef::isolated("eat.rhai")),
            EntityTemplate::new("fish", "fish"),
        ]);
        GameHost::new(engine, content, templates, EcsWorld::new(&PhysicsConfig::default()), Budget::default())
    }

    #[test]
    fn consumption_waits_for_resolve() {
        let mut host = host();
        let whale = host.spawn("whale", None).expect("whale");
        let fish = host.spawn("fish", None).expect("fish");
        let mut dispatcher = CollisionDispatcher::new();

        assert_eq!(dispatcher.handle(&mut host, fish, whale), 1);
        assert_eq!(dispatcher.pending(), 1);
        assert!(host.world.contains(fish));

        let applied = dispatcher.resolve(&mut host);
        assert_eq!(applied.destroyed, vec![fish]);
        assert_eq!(dispatcher.pending(), 0);
        assert!(host.world.contains(whale));
    }

    #[test]
    fn self_pairs_and_missing_entities_are_ignored() {
        let mut host = host();
        let whale = host.spawn("whale", None).expect("whale");
        let mut dispatcher = CollisionDispatcher::new();
        assert_eq!(dispatcher.handle(&mut host, whale, whale), 0);
        assert_eq!(dispatcher.handle(&mut host, whale, EntityId(99)), 0);
        assert_eq!(dispatcher.pending(), 0);
    }
}
