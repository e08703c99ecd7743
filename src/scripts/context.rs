use std::collections::BTreeMap;

use rhai::{Dynamic, Map};

use super::engine::ScriptHandle;
use crate::ecs::EntityId;

/// Who a context belongs to. Shared contexts are keyed by script alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextOwner {
    Entity(EntityId),
    Shared,
}

/// Script-private state that survives between invocations.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub(crate) state: Dynamic,
    pub(crate) ready: bool,
    generation: u64,
}

impl ScriptContext {
    fn fresh(generation: u64) -> Self {
        Self { state: Dynamic::from_map(Map::new()), ready: false, generation }
    }

    fn reset(&mut self, generation: u64) {
        self.state = Dynamic::from_map(Map::new());
        self.ready = false;
        self.generation = generation;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub idle: usize,
    pub created: usize,
    pub recycled: usize,
}

/// Live contexts plus a bounded free list of reset ones.
#[derive(Debug)]
pub struct ContextPool {
    live: BTreeMap<(ScriptHandle, ContextOwner), ScriptContext>,
    idle: Vec<ScriptContext>,
    limit: usize,
    created: usize,
    recycled: usize,
}

impl ContextPool {
    pub fn new(limit: usize) -> Self {
        Self { live: BTreeMap::new(), idle: Vec::new(), limit, created: 0, recycled: 0 }
    }

    /// Context for `(handle, owner)`, created or recycled on first use. A context compiled against
    /// an older generation of the script starts over.
    pub(crate) fn checkout(&mut self, handle: ScriptHandle, owner: ContextOwner, generation: u64) -> &mut ScriptContext {
        let Self { live, idle, created, recycled, .. } = self;
        let context = live.entry((handle, owner)).or_insert_with(|| match idle.pop() {
            Some(mut context) => {
                *recycled += 1;
                context.reset(generation);
                context
            }
            None => {
                *created += 1;
                ScriptContext::fresh(generation)
            }
        });
        if context.generation != generation {
            context.reset(generation);
        }
        context
    }

    pub fn contains(&self, handle: ScriptHandle, owner: ContextOwner) -> bool {
        self.live.contains_key(&(handle, owner))
    }

    /// Drops every context owned by `entity`.
    pub fn release_entity(&mut self, entity: EntityId) {
        let owner = ContextOwner::Entity(entity);
        let keys: Vec<_> = self.live.keys().filter(|(_, o)| *o == owner).copied().collect();
        for key in keys {
            if let Some(context) = self.live.remove(&key) {
                self.recycle(context);
            }
        }
    }

    /// Drops one context, e.g. when an entity is rebound to a different script.
    pub fn release(&mut self, handle: ScriptHandle, owner: ContextOwner) {
        if let Some(context) = self.live.remove(&(handle, owner)) {
            self.recycle(context);
        }
    }

    fn recycle(&mut self, mut context: ScriptContext) {
        if self.idle.len() < self.limit {
            context.reset(0);
            self.idle.push(context);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats { live: self.live.len(), idle: self.idle.len(), created: self.created, recycled: self.recycled }
    }
}
