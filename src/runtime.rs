use std::path::Path;

use anyhow::Result;
use glam::DVec2;
use serde::Serialize;

use crate::binding::{Binding, ScriptSlot};
use crate::collision::CollisionDispatcher;
use crate::config::RuntimeConfig;
use crate::content::ContentSource;
use crate::diagnostics::{FaultReport, FaultSink};
use crate::ecs::{EcsWorld, EntityId, EntityState};
use crate::events::GameEvent;
use crate::host::{AppliedRequests, GameHost, HostError};
use crate::scheduler::{BehaviorScheduler, TickSummary};
use crate::scripts::watch::ScriptWatcher;
use crate::scripts::{ApiRegistrationError, ReloadOutcome, ScriptEngine};
use crate::template::{ScriptRef, TemplateLibrary};

/// Read-only state published after each tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub frame: u64,
    pub score: f64,
    pub entities: Vec<EntityState>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub behaviors: TickSummary,
    pub collisions: usize,
    pub actions: usize,
    pub collision_requests: AppliedRequests,
}

/// Owns every piece of the scripted game and exposes the per-frame contract.
pub struct ArcadeRuntime<C: ContentSource> {
    host: GameHost<C>,
    scheduler: BehaviorScheduler,
    dispatcher: CollisionDispatcher,
    watcher: Option<ScriptWatcher>,
}

impl<C: ContentSource> ArcadeRuntime<C> {
    pub fn new(config: &RuntimeConfig, templates: TemplateLibrary, content: C) -> Result<Self, ApiRegistrationError> {
        let engine = ScriptEngine::new(&config.scripting)?;
        let world = EcsWorld::new(&config.physics);
        let host = GameHost::new(engine, content, templates, world, config.scripting.budget());
        Ok(Self { host, scheduler: BehaviorScheduler::new(), dispatcher: CollisionDispatcher::new(), watcher: None })
    }

    /// Adds a sink that receives every fault report alongside the built-in log.
    pub fn add_fault_sink(&mut self, sink: impl FaultSink + 'static) {
        self.host.sinks.push(Box::new(sink));
    }

    /// Spawns from `template` at `position`, or at the template's own position.
    pub fn spawn(&mut self, template: &str, position: Option<DVec2>) -> Result<EntityId, HostError> {
        self.host.spawn(template, position)
    }

    /// One frame: behaviors, their deferred requests, host physics, collision actions, and
    /// finally the collision requests.
    pub fn tick(&mut self, dt: f64) -> FrameReport {
        let behaviors = self.scheduler.tick(&mut self.host, dt);
        self.host.world.fixed_step(dt);

        let matrix = self.host.templates.matrix();
        let pairs = self.host.world.detect_overlaps(|a, b| matrix.contains(a, b));
        let mut actions = 0;
        for &(a, b) in &pairs {
            actions += self.dispatcher.handle(&mut self.host, a, b);
        }
        let collision_requests = self.dispatcher.resolve(&mut self.host);

        self.host.frame += 1;
        FrameReport { behaviors, collisions: pairs.len(), actions, collision_requests }
    }

    /// Entry point for an external physics layer. Requests stay queued until
    /// [`resolve_collisions`](Self::resolve_collisions) or the next tick.
    pub fn handle_collision(&mut self, a: EntityId, b: EntityId) -> usize {
        self.dispatcher.handle(&mut self.host, a, b)
    }

    pub fn resolve_collisions(&mut self) -> AppliedRequests {
        self.dispatcher.resolve(&mut self.host)
    }

    /// Recompiles every script whose source changed. Call between ticks.
    pub fn reload_scripts(&mut self) -> Vec<ReloadOutcome> {
        let outcomes = self.host.engine.reload_changed(&self.host.content);
        log_reloads(&outcomes);
        outcomes
    }

    pub fn watch_scripts(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let mut watcher = ScriptWatcher::new()?;
        watcher.watch_root(root)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Reloads only the paths the watcher reported since the last poll.
    pub fn poll_script_changes(&mut self) -> Vec<ReloadOutcome> {
        let Some(watcher) = self.watcher.as_mut() else {
            return Vec::new();
        };
        let changed = watcher.drain_changes();
        let outcomes = self.host.engine.reload_paths(changed.iter().map(String::as_str), &self.host.content);
        log_reloads(&outcomes);
        outcomes
    }

    /// Hot-swaps one script slot of a live entity. `None` removes the slot.
    pub fn rebind(&mut self, entity: EntityId, slot: ScriptSlot, script: Option<ScriptRef>) -> Result<(), HostError> {
        self.host.rebind(entity, &slot, script.as_ref())
    }

    pub fn destroy(&mut self, entity: EntityId) -> bool {
        self.host.destroy(entity, false)
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            frame: self.host.frame,
            score: self.host.score,
            entities: self.host.world.view().iter().cloned().collect(),
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<EntityState> {
        self.host.world.state(id)
    }

    pub fn binding(&self, id: EntityId) -> Option<&Binding> {
        self.host.world.binding(id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.host.world.ids()
    }

    pub fn entity_count(&self) -> usize {
        self.host.world.len()
    }

    pub fn frame(&self) -> u64 {
        self.host.frame
    }

    pub fn score(&self) -> f64 {
        self.host.score
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.host.templates
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.host.engine
    }

    pub fn content(&self) -> &C {
        &self.host.content
    }

    /// Live-editable content, e.g. for authoring tools. Follow edits with `reload_scripts`.
    pub fn content_mut(&mut self) -> &mut C {
        &mut self.host.content
    }

    pub fn take_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.host.logs)
    }

    pub fn take_events(&mut self) -> Vec<GameEvent> {
        self.host.events.drain()
    }

    pub fn take_faults(&mut self) -> Vec<FaultReport> {
        self.host.faults.drain()
    }
}

fn log_reloads(outcomes: &[ReloadOutcome]) {
    for outcome in outcomes {
        match outcome {
            ReloadOutcome::Reloaded { path, .. } => tracing::debug!(target: "script", path = %path, "reloaded"),
            ReloadOutcome::Failed { path, error, .. } => {
                tracing::warn!(target: "script", path = %path, "reload failed: {error}")
            }
        }
    }
}
