use serde::{Deserialize, Serialize};

use crate::ecs::EntityId;
use crate::scripts::ErrorKind;

/// Structured record of one script failure attributed to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    pub entity_id: EntityId,
    pub script_path: String,
    pub error_kind: ErrorKind,
    pub message: String,
    pub frame: u64,
}

/// Receives fault reports as they happen. The core never formats or displays them.
pub trait FaultSink {
    fn report(&mut self, fault: FaultReport);
}

/// Buffering sink drained by the owner.
#[derive(Debug, Default)]
pub struct FaultLog {
    faults: Vec<FaultReport>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FaultReport> {
        self.faults.iter()
    }

    pub fn drain(&mut self) -> Vec<FaultReport> {
        std::mem::take(&mut self.faults)
    }
}

impl FaultSink for FaultLog {
    fn report(&mut self, fault: FaultReport) {
        self.faults.push(fault);
    }
}

impl<F: FnMut(FaultReport)> FaultSink for F {
    fn report(&mut self, fault: FaultReport) {
        self(fault)
    }
}
