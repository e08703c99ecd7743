pub mod binding;
pub mod cli;
pub mod collision;
pub mod config;
pub mod content;
pub mod diagnostics;
pub mod ecs;
pub mod events;
pub mod host;
pub mod runtime;
pub mod scheduler;
pub mod script_harness;
pub mod scripts;
pub mod template;

pub use binding::{BindFailure, BindReport, Binding, BoundScript, EntityBinder, ScriptSlot};
pub use collision::CollisionDispatcher;
pub use config::{RuntimeConfig, ScriptingConfig};
pub use content::{ContentError, ContentSource, FsContentSource, MemoryContentSource};
pub use diagnostics::{FaultLog, FaultReport, FaultSink};
pub use ecs::{EntityId, EntityState};
pub use events::GameEvent;
pub use host::{AppliedRequests, HostError};
pub use runtime::{ArcadeRuntime, FrameReport, WorldSnapshot};
pub use scheduler::{BehaviorScheduler, TickPhase, TickSummary};
pub use scripts::{Budget, ErrorKind, ScriptEngine, ScriptError, ScriptHandle, ScriptValue};
pub use template::{CollisionMatrix, EntityTemplate, ScriptRef, TemplateLibrary};
