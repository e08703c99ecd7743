mod api;
mod context;
mod engine;
mod error;
mod mutation;
mod value;
pub mod watch;

use std::time::Duration;

pub use api::{ScriptApi, HOST_API_VERSION, MATH_API, WORLD_API};
pub use context::{ContextOwner, ContextPool, PoolStats};
pub use engine::{EntryPoints, InvocationContext, InvocationKind, ReloadOutcome, ScriptEngine, ScriptHandle};
pub use error::{ApiRegistrationError, ErrorKind, MarshalError, ScriptError};
pub use mutation::{DeferredQueue, DeferredRequest, MutationSet, ScriptSignal};
pub use value::{PropertyMap, ScriptValue};

/// Per-invocation execution allowance. `None` disables that ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_operations: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl Budget {
    pub const UNLIMITED: Budget = Budget { max_operations: None, max_duration: None };

    pub fn operations(max_operations: u64) -> Self {
        Self { max_operations: Some(max_operations), max_duration: None }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::operations(100_000)
    }
}
