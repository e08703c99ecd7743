use std::rc::Rc;

use glam::DVec2;
use thiserror::Error;

use crate::binding::{BoundScript, EntityBinder, ScriptSlot};
use crate::content::ContentSource;
use crate::diagnostics::{FaultLog, FaultReport, FaultSink};
use crate::ecs::{EcsWorld, EntityId, EntityState, WorldView};
use crate::events::{EventBus, GameEvent};
use crate::scripts::{
    Budget, DeferredQueue, DeferredRequest, InvocationContext, InvocationKind, MutationSet, ScriptEngine, ScriptError,
};
use crate::template::{ScriptRef, TemplateLibrary};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Entities created and removed while applying one deferred queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedRequests {
    pub spawned: Vec<EntityId>,
    pub destroyed: Vec<EntityId>,
}

impl AppliedRequests {
    pub fn extend(&mut self, other: AppliedRequests) {
        self.spawned.extend(other.spawned);
        self.destroyed.extend(other.destroyed);
    }
}

/// Authoritative game state plus the script engine that reads it. Mutated only between
/// invocations.
pub struct GameHost<C: ContentSource> {
    pub(crate) engine: ScriptEngine,
    pub(crate) content: C,
    pub(crate) templates: TemplateLibrary,
    pub(crate) world: EcsWorld,
    pub(crate) budget: Budget,
    pub(crate) frame: u64,
    pub(crate) score: f64,
    pub(crate) events: EventBus,
    pub(crate) faults: FaultLog,
    pub(crate) sinks: Vec<Box<dyn FaultSink>>,
    pub(crate) logs: Vec<String>,
}

impl<C: ContentSource> GameHost<C> {
    pub fn new(engine: ScriptEngine, content: C, templates: TemplateLibrary, world: EcsWorld, budget: Budget) -> Self {
        Self {
            engine,
            content,
            templates,
            world,
            budget,
            frame: 0,
            score: 0.0,
            events: EventBus::default(),
            faults: FaultLog::new(),
            sinks: Vec::new(),
            logs: Vec::new(),
        }
    }

    pub fn view(&self) -> Rc<WorldView> {
        Rc::new(self.world.view())
    }

    /// Runs one bound script for `entity`. Faulted slots and scripts that currently fail to
    /// compile are skipped. Failures disable the slot and are reported; they never propagate.
    pub(crate) fn invoke(
        &mut self,
        entity: EntityId,
        slot: &ScriptSlot,
        kind: InvocationKind,
        view: &Rc<WorldView>,
    ) -> Option<MutationSet> {
        let bound = self.world.binding(entity)?.slot(slot)?.clone();
        if bound.faulted || !self.engine.is_usable(bound.handle) {
            return None;
        }
        let state = self.world.state(entity)?;
        let invocation = InvocationContext {
            kind,
            entity: state,
            view: view.clone(),
            frame: self.frame,
            shared: bound.shared,
            templates: self.templates.names(),
        };
        match self.engine.invoke(bound.handle, invocation, &self.budget) {
            Ok(mutations) => Some(mutations),
            Err(error) => {
                self.fault(entity, slot, &bound, error);
                None
            }
        }
    }

    fn fault(&mut self, entity: EntityId, slot: &ScriptSlot, bound: &BoundScript, error: ScriptError) {
        if let Some(mut binding) = self.world.binding_mut(entity) {
            if let Some(script) = binding.slot_mut(slot) {
                script.faulted = true;
            }
        }
        self.report(entity, &bound.path, &error);
    }

    fn report(&mut self, entity: EntityId, path: &str, error: &ScriptError) {
        tracing::warn!(target: "script", entity = %entity, script = path, kind = %error.kind(), "{error}");
        let report = FaultReport {
            entity_id: entity,
            script_path: path.to_string(),
            error_kind: error.kind(),
            message: error.to_string(),
            frame: self.frame,
        };
        for sink in &mut self.sinks {
            sink.report(report.clone());
        }
        self.faults.report(report);
        self.events.push(GameEvent::ScriptFault { entity, kind: error.kind(), script: path.to_string() });
    }

    /// Applies a successful invocation's result. Own-property writes land immediately; spawn and
    /// destroy requests go to `deferred`.
    pub(crate) fn apply(
        &mut self,
        source: EntityId,
        mutations: MutationSet,
        deferred: &mut DeferredQueue,
    ) -> Option<EntityState> {
        let updated = if mutations.writes.is_empty() {
            self.world.state(source)
        } else {
            match self.world.apply_writes(source, &mutations.writes) {
                Ok(state) => Some(state),
                Err(err) => {
                    tracing::warn!(target: "script", entity = %source, "discarding writes: {err}");
                    return None;
                }
            }
        };
        if mutations.score_delta != 0.0 {
            self.score += mutations.score_delta;
            self.events.push(GameEvent::ScoreChanged { source, delta: mutations.score_delta, total: self.score });
        }
        for signal in mutations.signals {
            self.events.push(GameEvent::ScriptSignal { source, name: signal.name, value: signal.value });
        }
        self.logs.extend(mutations.logs);
        deferred.extend(source, mutations.requests);
        updated
    }

    /// Drains `deferred` in request order. Destroying an entity that is already gone is a no-op.
    pub(crate) fn apply_deferred(&mut self, deferred: &mut DeferredQueue) -> AppliedRequests {
        let mut applied = AppliedRequests::default();
        for (source, request) in deferred.drain() {
            match request {
                DeferredRequest::Spawn { template, position } => match self.spawn(&template, Some(position)) {
                    Ok(id) => applied.spawned.push(id),
                    Err(err) => tracing::warn!(target: "host", source = %source, "spawn request dropped: {err}"),
                },
                DeferredRequest::Destroy { target } => {
                    if self.destroy(target, false) {
                        applied.destroyed.push(target);
                    }
                }
                DeferredRequest::Consume { target } => {
                    if self.destroy(target, true) {
                        applied.destroyed.push(target);
                    }
                }
            }
        }
        applied
    }

    pub(crate) fn destroy(&mut self, target: EntityId, consumed: bool) -> bool {
        if self.world.despawn(target).is_none() {
            return false;
        }
        self.engine.release_entity(target);
        self.events.push(GameEvent::EntityDestroyed { entity: target, consumed });
        tracing::debug!(target: "host", entity = %target, consumed, "destroyed");
        true
    }

    /// Creates an entity from a template: allocate an id, bind its scripts, run the generator
    /// against the not-yet-inserted state, then insert it into the live set.
    pub(crate) fn spawn(&mut self, template: &str, position: Option<DVec2>) -> Result<EntityId, HostError> {
        let template =
            self.templates.get(template).cloned().ok_or_else(|| HostError::UnknownTemplate(template.to_string()))?;
        let id = self.world.allocate_id();
        let mut state = EntityState {
            id,
            category: template.category.clone(),
            template: template.name.clone(),
            position: position.unwrap_or(template.position),
            velocity: template.velocity,
            properties: template.properties.clone(),
            alive: true,
        };

        let report = EntityBinder::new(&mut self.engine, &self.content).bind(id, &template);
        for failure in &report.failures {
            self.report(id, &failure.path, &failure.error);
        }
        let mut binding = report.binding;

        if let Some(generator) = binding.generator.as_mut() {
            match self.generate(&state, generator) {
                Ok(mutations) => {
                    for (name, value) in mutations.writes {
                        if let Err(err) = state.write(&name, value) {
                            tracing::warn!(target: "script", entity = %id, "generator write '{name}' dropped: {err}");
                        }
                    }
                    self.logs.extend(mutations.logs);
                }
                Err(error) => {
                    generator.faulted = true;
                    let path = generator.path.clone();
                    self.report(id, &path, &error);
                }
            }
        }

        self.world.insert(state, template.half_extents, binding);
        self.events.push(GameEvent::EntitySpawned { entity: id, template: template.name.clone() });
        tracing::debug!(target: "host", entity = %id, template = %template.name, "spawned");
        Ok(id)
    }

    fn generate(&mut self, state: &EntityState, generator: &BoundScript) -> Result<MutationSet, ScriptError> {
        if !self.engine.is_usable(generator.handle) {
            return Ok(MutationSet::default());
        }
        let invocation = InvocationContext {
            kind: InvocationKind::Generator,
            entity: state.clone(),
            view: Rc::new(WorldView::empty()),
            frame: self.frame,
            shared: generator.shared,
            templates: self.templates.names(),
        };
        let result = self.engine.invoke(generator.handle, invocation, &self.budget);
        if !generator.shared {
            self.engine.release_context(generator.handle, generator.owner(state.id));
        }
        result
    }

    pub(crate) fn rebind(
        &mut self,
        entity: EntityId,
        slot: &ScriptSlot,
        script: Option<&ScriptRef>,
    ) -> Result<(), HostError> {
        let mut binding = self.world.binding_mut(entity).ok_or(HostError::UnknownEntity(entity))?;
        EntityBinder::new(&mut self.engine, &self.content).rebind(entity, &mut binding, slot, script)?;
        Ok(())
    }
}
