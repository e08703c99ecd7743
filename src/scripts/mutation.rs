use glam::DVec2;
use serde::{Deserialize, Serialize};

use super::value::ScriptValue;
use crate::ecs::EntityId;

/// Host-side requests that must wait until the current traversal finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredRequest {
    Spawn { template: String, position: DVec2 },
    Destroy { target: EntityId },
    Consume { target: EntityId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSignal {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ScriptValue>,
}

/// Everything one successful invocation asks the host to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationSet {
    /// Writes to the invoking entity, in call order. Later writes to the same name win.
    pub writes: Vec<(String, ScriptValue)>,
    pub requests: Vec<DeferredRequest>,
    pub score_delta: f64,
    pub signals: Vec<ScriptSignal>,
    pub logs: Vec<String>,
}

impl MutationSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
            && self.requests.is_empty()
            && self.score_delta == 0.0
            && self.signals.is_empty()
            && self.logs.is_empty()
    }
}

/// Requests gathered during a tick or a collision pass, tagged with the entity that issued them.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: Vec<(EntityId, DeferredRequest)>,
}

impl DeferredQueue {
    pub fn push(&mut self, source: EntityId, request: DeferredRequest) {
        self.entries.push((source, request));
    }

    pub fn extend(&mut self, source: EntityId, requests: impl IntoIterator<Item = DeferredRequest>) {
        for request in requests {
            self.push(source, request);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(EntityId, DeferredRequest)> {
        std::mem::take(&mut self.entries)
    }
}
