use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::scripts::Budget;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptingConfig {
    /// Per-invocation operation ceiling. `0` disables it.
    #[serde(default = "ScriptingConfig::default_max_operations")]
    pub max_operations: u64,
    /// Per-invocation wall-clock ceiling in milliseconds. Absent means no wall-clock limit.
    #[serde(default)]
    pub max_wall_clock_ms: Option<f64>,
    #[serde(default = "ScriptingConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "ScriptingConfig::default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "ScriptingConfig::default_max_string_size")]
    pub max_string_size: usize,
    #[serde(default = "ScriptingConfig::default_max_array_size")]
    pub max_array_size: usize,
    #[serde(default = "ScriptingConfig::default_max_map_size")]
    pub max_map_size: usize,
    #[serde(default = "ScriptingConfig::default_seed")]
    pub seed: u64,
    #[serde(default = "ScriptingConfig::default_context_pool_limit")]
    pub context_pool_limit: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BoundsConfig {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhysicsConfig {
    #[serde(default = "PhysicsConfig::default_spatial_cell")]
    pub spatial_cell: f64,
    #[serde(default)]
    pub bounds: Option<BoundsConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scripting: ScriptingConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigOverrides {
    pub max_operations: Option<u64>,
    pub seed: Option<u64>,
}

impl ScriptingConfig {
    const fn default_max_operations() -> u64 {
        100_000
    }

    const fn default_max_call_levels() -> usize {
        32
    }

    const fn default_max_expr_depth() -> usize {
        64
    }

    const fn default_max_string_size() -> usize {
        4_096
    }

    const fn default_max_array_size() -> usize {
        256
    }

    const fn default_max_map_size() -> usize {
        128
    }

    const fn default_seed() -> u64 {
        1
    }

    const fn default_context_pool_limit() -> usize {
        64
    }

    pub fn budget(&self) -> Budget {
        Budget {
            max_operations: (self.max_operations > 0).then_some(self.max_operations),
            max_duration: self
                .max_wall_clock_ms
                .filter(|ms| *ms > 0.0)
                .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok()),
        }
    }
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            max_operations: Self::default_max_operations(),
            max_wall_clock_ms: None,
            max_call_levels: Self::default_max_call_levels(),
            max_expr_depth: Self::default_max_expr_depth(),
            max_string_size: Self::default_max_string_size(),
            max_array_size: Self::default_max_array_size(),
            max_map_size: Self::default_max_map_size(),
            seed: Self::default_seed(),
            context_pool_limit: Self::default_context_pool_limit(),
        }
    }
}

impl PhysicsConfig {
    const fn default_spatial_cell() -> f64 {
        1.0
    }
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self { spatial_cell: Self::default_spatial_cell(), bounds: None }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RuntimeConfigOverrides) {
        if let Some(max_operations) = overrides.max_operations {
            self.scripting.max_operations = max_operations;
        }
        if let Some(seed) = overrides.seed {
            self.scripting.seed = seed;
        }
    }
}

impl RuntimeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.max_operations.is_none() && self.seed.is_none()
    }
}
