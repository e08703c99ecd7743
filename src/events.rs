use serde::Serialize;
use std::fmt;

use crate::ecs::EntityId;
use crate::scripts::{ErrorKind, ScriptValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    EntitySpawned { entity: EntityId, template: String },
    EntityDestroyed { entity: EntityId, consumed: bool },
    CollisionStarted { a: EntityId, b: EntityId },
    ScoreChanged { source: EntityId, delta: f64, total: f64 },
    ScriptSignal { source: EntityId, name: String, value: Option<ScriptValue> },
    ScriptFault { entity: EntityId, kind: ErrorKind, script: String },
}

impl GameEvent {
    pub fn collision_started(a: EntityId, b: EntityId) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        GameEvent::CollisionStarted { a, b }
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameEvent::EntitySpawned { entity, template } => {
                write!(f, "EntitySpawned entity={entity} template={template}")
            }
            GameEvent::EntityDestroyed { entity, consumed } => {
                write!(f, "EntityDestroyed entity={entity} consumed={consumed}")
            }
            GameEvent::CollisionStarted { a, b } => write!(f, "CollisionStarted a={a} b={b}"),
            GameEvent::ScoreChanged { source, delta, total } => {
                write!(f, "ScoreChanged source={source} delta={delta:.3} total={total:.3}")
            }
            GameEvent::ScriptSignal { source, name, value } => match value {
                Some(value) => write!(f, "ScriptSignal source={source} name={name} value={value}"),
                None => write!(f, "ScriptSignal source={source} name={name}"),
            },
            GameEvent::ScriptFault { entity, kind, script } => {
                write!(f, "ScriptFault entity={entity} kind={kind} script={script}")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<GameEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
