use std::collections::BTreeMap;
use std::fmt;

use bevy_ecs::prelude::Component;

use crate::content::ContentSource;
use crate::ecs::EntityId;
use crate::scripts::{ContextOwner, EntryPoints, ScriptEngine, ScriptError, ScriptHandle};
use crate::template::{EntityTemplate, ScriptRef};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundScript {
    pub handle: ScriptHandle,
    pub path: String,
    pub shared: bool,
    /// Set after a failed invocation; the slot stays disabled until rebound.
    pub faulted: bool,
}

impl BoundScript {
    pub fn owner(&self, entity: EntityId) -> ContextOwner {
        if self.shared {
            ContextOwner::Shared
        } else {
            ContextOwner::Entity(entity)
        }
    }
}

/// Scripts governing one entity. Dropped with the entity; dropping never calls into a script.
#[derive(Component, Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub behavior: Option<BoundScript>,
    /// Keyed by the category of the other entity.
    pub collisions: BTreeMap<String, BoundScript>,
    pub generator: Option<BoundScript>,
}

impl Binding {
    pub fn is_empty(&self) -> bool {
        self.behavior.is_none() && self.collisions.is_empty() && self.generator.is_none()
    }

    pub fn slot(&self, slot: &ScriptSlot) -> Option<&BoundScript> {
        match slot {
            ScriptSlot::Behavior => self.behavior.as_ref(),
            ScriptSlot::Collision(category) => self.collisions.get(category),
            ScriptSlot::Generator => self.generator.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, slot: &ScriptSlot) -> Option<&mut BoundScript> {
        match slot {
            ScriptSlot::Behavior => self.behavior.as_mut(),
            ScriptSlot::Collision(category) => self.collisions.get_mut(category),
            ScriptSlot::Generator => self.generator.as_mut(),
        }
    }

    fn replace(&mut self, slot: &ScriptSlot, script: Option<BoundScript>) -> Option<BoundScript> {
        match slot {
            ScriptSlot::Behavior => std::mem::replace(&mut self.behavior, script),
            ScriptSlot::Generator => std::mem::replace(&mut self.generator, script),
            ScriptSlot::Collision(category) => match script {
                Some(script) => self.collisions.insert(category.clone(), script),
                None => self.collisions.remove(category),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScriptSlot {
    Behavior,
    Collision(String),
    Generator,
}

impl ScriptSlot {
    fn entry_point(&self) -> &'static str {
        match self {
            ScriptSlot::Behavior => "process(world, entity, dt)",
            ScriptSlot::Collision(_) => "collide(world, entity, other)",
            ScriptSlot::Generator => "generate(world, entity)",
        }
    }

    fn satisfied_by(&self, entry: EntryPoints) -> bool {
        match self {
            ScriptSlot::Behavior => entry.process,
            ScriptSlot::Collision(_) => entry.collide,
            ScriptSlot::Generator => entry.generate,
        }
    }
}

impl fmt::Display for ScriptSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSlot::Behavior => f.write_str("behavior"),
            ScriptSlot::Collision(category) => write!(f, "collision[{category}]"),
            ScriptSlot::Generator => f.write_str("generator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindFailure {
    pub slot: ScriptSlot,
    pub path: String,
    pub error: ScriptError,
}

/// Outcome of binding a template. Failed slots are simply absent from `binding`.
#[derive(Debug, Clone, Default)]
pub struct BindReport {
    pub binding: Binding,
    pub failures: Vec<BindFailure>,
}

impl BindReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves template script references to compiled handles.
pub struct EntityBinder<'a> {
    engine: &'a mut ScriptEngine,
    content: &'a dyn ContentSource,
}

impl<'a> EntityBinder<'a> {
    pub fn new(engine: &'a mut ScriptEngine, content: &'a dyn ContentSource) -> Self {
        Self { engine, content }
    }

    pub fn bind(&mut self, entity: EntityId, template: &EntityTemplate) -> BindReport {
        let mut report = BindReport::default();
        let mut slots: Vec<(ScriptSlot, &ScriptRef)> = Vec::new();
        if let Some(script) = &template.behavior {
            slots.push((ScriptSlot::Behavior, script));
        }
        for (category, script) in &template.collisions {
            slots.push((ScriptSlot::Collision(category.clone()), script));
        }
        if let Some(script) = &template.generator {
            slots.push((ScriptSlot::Generator, script));
        }

        for (slot, script) in slots {
            match self.resolve(&slot, script) {
                Ok(bound) => {
                    report.binding.replace(&slot, Some(bound));
                }
                Err(error) => {
                    tracing::warn!(
                        target: "binding",
                        entity = %entity,
                        template = %template.name,
                        slot = %slot,
                        "{error}"
                    );
                    report.failures.push(BindFailure { slot, path: script.path.clone(), error });
                }
            }
        }
        report
    }

    /// Swaps the script in one slot without touching the entity. `None` clears the slot. On
    /// failure the existing binding is left as it was.
    pub fn rebind(
        &mut self,
        entity: EntityId,
        binding: &mut Binding,
        slot: &ScriptSlot,
        script: Option<&ScriptRef>,
    ) -> Result<(), ScriptError> {
        let bound = script.map(|script| self.resolve(slot, script)).transpose()?;
        if let Some(previous) = binding.replace(slot, bound) {
            self.engine.release_context(previous.handle, previous.owner(entity));
        }
        tracing::debug!(target: "binding", entity = %entity, slot = %slot, "rebound");
        Ok(())
    }

    fn resolve(&mut self, slot: &ScriptSlot, script: &ScriptRef) -> Result<BoundScript, ScriptError> {
        let handle = self.engine.compile(&script.path, self.content)?;
        let entry = self.engine.entry_points(handle).unwrap_or_default();
        if !slot.satisfied_by(entry) {
            return Err(ScriptError::Compile {
                path: script.path.clone(),
                message: format!("missing entry point fn {}", slot.entry_point()),
            });
        }
        Ok(BoundScript { handle, path: script.path.clone(), shared: script.shared, faulted: false })
    }
}
