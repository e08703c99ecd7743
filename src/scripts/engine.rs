use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Scope, AST, INT};
use serde::Serialize;

use super::api::{self, ApiBridge, ApiState, FrameKind, InvocationFrame, ScriptApi};
use super::context::{ContextOwner, ContextPool, PoolStats};
use super::error::{ApiRegistrationError, ScriptError};
use super::mutation::MutationSet;
use super::value::sanitize_state;
use super::Budget;
use crate::config::ScriptingConfig;
use crate::content::{ContentError, ContentSource, ScriptSource, SourceMarker};
use crate::ecs::{EntityId, EntityState, WorldView};

/// Stable reference to a compiled script. Survives hot reloads of the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ScriptHandle(pub u32);

impl fmt::Display for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script:{}", self.0)
    }
}

/// Which lifecycle functions a script defines, by name and parameter count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryPoints {
    pub ready: bool,
    pub process: bool,
    pub collide: bool,
    pub generate: bool,
}

impl EntryPoints {
    fn scan(ast: &AST) -> Self {
        let mut entry = Self::default();
        for function in ast.iter_functions() {
            match (function.name, function.params.len()) {
                ("ready", 2) => entry.ready = true,
                ("process", 3) => entry.process = true,
                ("collide", 3) => entry.collide = true,
                ("generate", 2) => entry.generate = true,
                _ => {}
            }
        }
        entry
    }
}

pub enum InvocationKind {
    /// Per-tick behavior; runs `ready` first on a fresh context.
    Behavior { dt: f64 },
    Collision { partner: EntityState },
    /// Runs before insertion against an empty world.
    Generator,
}

/// Everything an invocation may read.
pub struct InvocationContext {
    pub kind: InvocationKind,
    pub entity: EntityState,
    pub view: Rc<WorldView>,
    pub frame: u64,
    pub shared: bool,
    pub templates: Rc<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    Reloaded { handle: ScriptHandle, path: String },
    Failed { handle: ScriptHandle, path: String, error: ScriptError },
}

struct CompiledScript {
    path: String,
    /// `None` while the latest source fails to compile.
    ast: Option<Rc<AST>>,
    hash: Option<blake3::Hash>,
    marker: SourceMarker,
    entry: EntryPoints,
    generation: u64,
    last_error: Option<String>,
}

pub struct ScriptEngine {
    engine: Engine,
    bridge: ApiBridge,
    deadline: Rc<Cell<Option<Instant>>>,
    scripts: Vec<CompiledScript>,
    by_path: HashMap<String, ScriptHandle>,
    asts: HashMap<blake3::Hash, Rc<AST>>,
    contexts: ContextPool,
    seed: u64,
}

impl ScriptEngine {
    pub fn new(config: &ScriptingConfig) -> Result<Self, ApiRegistrationError> {
        let bridge: ApiBridge = Rc::new(RefCell::new(ApiState::default()));
        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));

        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(config.max_array_size);
        engine.set_max_map_size(config.max_map_size);

        let clock = deadline.clone();
        engine.on_progress(move |ops| {
            if ops % 256 != 0 {
                return None;
            }
            match clock.get() {
                Some(limit) if Instant::now() >= limit => Some(Dynamic::from("wall-clock budget exhausted")),
                _ => None,
            }
        });
        let print_bridge = bridge.clone();
        engine.on_print(move |text| {
            if let Some(frame) = print_bridge.borrow_mut().frame.as_mut() {
                frame.mutations.logs.push(format!("[{}] {text}", frame.me.id));
            }
        });
        engine.on_debug(|text, _, _| tracing::debug!(target: "script", "{text}"));

        api::register_api(&mut engine, &bridge)?;

        Ok(Self {
            engine,
            bridge,
            deadline,
            scripts: Vec::new(),
            by_path: HashMap::new(),
            asts: HashMap::new(),
            contexts: ContextPool::new(config.context_pool_limit),
            seed: config.seed,
        })
    }

    /// Compiles `path` on first use. A registered path returns its existing handle; newer
    /// sources are only picked up by `reload_changed` or `reload_paths`.
    pub fn compile(&mut self, path: &str, content: &dyn ContentSource) -> Result<ScriptHandle, ScriptError> {
        if let Some(&handle) = self.by_path.get(path) {
            let script = &self.scripts[handle.0 as usize];
            if script.ast.is_none() {
                let message = script.last_error.clone().unwrap_or_else(|| "script failed to compile".into());
                return Err(ScriptError::Compile { path: path.to_string(), message });
            }
            return Ok(handle);
        }
        let source = content.resolve(path).map_err(|err| unresolved(path, err))?;
        self.compile_source(path, source)
    }

    /// Registers `source` under `path`. Identical text reuses the cached AST.
    pub fn compile_source(&mut self, path: &str, source: ScriptSource) -> Result<ScriptHandle, ScriptError> {
        let hash = blake3::hash(source.text.as_bytes());
        let existing = self.by_path.get(path).copied();
        if let Some(handle) = existing {
            let script = &mut self.scripts[handle.0 as usize];
            if script.hash == Some(hash) && script.ast.is_some() {
                script.marker = source.marker;
                return Ok(handle);
            }
        }

        let compiled = match self.asts.get(&hash) {
            Some(ast) => Ok(ast.clone()),
            None => self.engine.compile(&source.text).map(Rc::new).map_err(|err| err.to_string()),
        };

        let ast = match compiled {
            Ok(ast) => ast,
            Err(message) => {
                if let Some(handle) = existing {
                    let script = &mut self.scripts[handle.0 as usize];
                    script.ast = None;
                    script.hash = Some(hash);
                    script.marker = source.marker;
                    script.generation += 1;
                    script.last_error = Some(message.clone());
                }
                tracing::warn!(target: "script", path, %message, "compile failed");
                return Err(ScriptError::Compile { path: path.to_string(), message });
            }
        };
        self.asts.insert(hash, ast.clone());
        let entry = EntryPoints::scan(&ast);

        match existing {
            Some(handle) => {
                let script = &mut self.scripts[handle.0 as usize];
                script.ast = Some(ast);
                script.hash = Some(hash);
                script.marker = source.marker;
                script.entry = entry;
                script.generation += 1;
                script.last_error = None;
                tracing::info!(target: "script", path, generation = script.generation, "recompiled");
                Ok(handle)
            }
            None => {
                let handle = ScriptHandle(self.scripts.len() as u32);
                self.scripts.push(CompiledScript {
                    path: path.to_string(),
                    ast: Some(ast),
                    hash: Some(hash),
                    marker: source.marker,
                    entry,
                    generation: 1,
                    last_error: None,
                });
                self.by_path.insert(path.to_string(), handle);
                tracing::debug!(target: "script", path, %handle, "compiled");
                Ok(handle)
            }
        }
    }

    pub fn handle_for(&self, path: &str) -> Option<ScriptHandle> {
        self.by_path.get(path).copied()
    }

    pub fn path(&self, handle: ScriptHandle) -> Option<&str> {
        self.scripts.get(handle.0 as usize).map(|script| script.path.as_str())
    }

    pub fn entry_points(&self, handle: ScriptHandle) -> Option<EntryPoints> {
        self.scripts.get(handle.0 as usize).map(|script| script.entry)
    }

    /// False while the latest source for `handle` fails to compile.
    pub fn is_usable(&self, handle: ScriptHandle) -> bool {
        self.scripts.get(handle.0 as usize).is_some_and(|script| script.ast.is_some())
    }

    pub fn last_error(&self, handle: ScriptHandle) -> Option<&str> {
        self.scripts.get(handle.0 as usize).and_then(|script| script.last_error.as_deref())
    }

    pub fn generation(&self, handle: ScriptHandle) -> Option<u64> {
        self.scripts.get(handle.0 as usize).map(|script| script.generation)
    }

    pub fn script_count(&self) -> usize {
        self.scripts.len()
    }

    pub fn cached_asts(&self) -> usize {
        self.asts.len()
    }

    /// Recompiles every script whose source marker moved. Scripts whose source vanished keep
    /// their last good compilation and are reported as unresolved.
    pub fn reload_changed(&mut self, content: &dyn ContentSource) -> Vec<ReloadOutcome> {
        let stale: Vec<(ScriptHandle, String)> = self
            .scripts
            .iter()
            .enumerate()
            .filter(|(_, script)| content.marker(&script.path) != Some(script.marker))
            .map(|(index, script)| (ScriptHandle(index as u32), script.path.clone()))
            .collect();
        stale.into_iter().map(|(handle, path)| self.reload_one(handle, path, content)).collect()
    }

    /// Recompiles the named paths when they are registered, regardless of markers.
    pub fn reload_paths<'a>(
        &mut self,
        paths: impl IntoIterator<Item = &'a str>,
        content: &dyn ContentSource,
    ) -> Vec<ReloadOutcome> {
        let mut outcomes = Vec::new();
        for path in paths {
            if let Some(handle) = self.handle_for(path) {
                outcomes.push(self.reload_one(handle, path.to_string(), content));
            }
        }
        outcomes
    }

    fn reload_one(&mut self, handle: ScriptHandle, path: String, content: &dyn ContentSource) -> ReloadOutcome {
        let result = match content.resolve(&path) {
            Ok(source) => self.compile_source(&path, source),
            Err(err) => {
                // Keep running the last good compilation; stop re-checking until the marker moves.
                if let Some(marker) = content.marker(&path) {
                    self.scripts[handle.0 as usize].marker = marker;
                }
                Err(unresolved(&path, err))
            }
        };
        match result {
            Ok(_) => ReloadOutcome::Reloaded { handle, path },
            Err(error) => ReloadOutcome::Failed { handle, path, error },
        }
    }

    /// Runs one entry point in the context owned by the invoking entity (or the shared one).
    /// Returns the mutations to apply; on any failure nothing is applied and the context is left
    /// as it was before the call.
    pub fn invoke(
        &mut self,
        handle: ScriptHandle,
        invocation: InvocationContext,
        budget: &Budget,
    ) -> Result<MutationSet, ScriptError> {
        let Some(script) = self.scripts.get(handle.0 as usize) else {
            return Err(ScriptError::Unresolved { path: handle.to_string(), message: "unknown script handle".into() });
        };
        let path = script.path.clone();
        let Some(ast) = script.ast.clone() else {
            let message = script.last_error.clone().unwrap_or_else(|| "script failed to compile".into());
            return Err(ScriptError::Compile { path, message });
        };
        let entry = script.entry;
        let generation = script.generation;

        let (present, signature) = match &invocation.kind {
            InvocationKind::Behavior { .. } => (entry.process, "process(world, entity, dt)"),
            InvocationKind::Collision { .. } => (entry.collide, "collide(world, entity, other)"),
            InvocationKind::Generator => (entry.generate, "generate(world, entity)"),
        };
        if !present {
            return Err(missing_entry(&path, signature));
        }

        let entity_id = invocation.entity.id;
        let owner = if invocation.shared { ContextOwner::Shared } else { ContextOwner::Entity(entity_id) };
        let (mut state, was_ready) = {
            let context = self.contexts.checkout(handle, owner, generation);
            (context.state.clone(), context.ready)
        };

        let id_arg: INT = entity_id.to_script();
        let (frame_kind, partner) = match &invocation.kind {
            InvocationKind::Behavior { .. } => (FrameKind::Behavior, None),
            InvocationKind::Collision { partner } => (FrameKind::Collision, Some(partner.clone())),
            InvocationKind::Generator => (FrameKind::Generator, None),
        };
        let calls: Vec<(&str, Vec<Dynamic>)> = match &invocation.kind {
            InvocationKind::Behavior { dt } => {
                let mut calls = Vec::with_capacity(2);
                if entry.ready && !was_ready {
                    calls.push(("ready", vec![Dynamic::from(id_arg)]));
                }
                calls.push(("process", vec![Dynamic::from(id_arg), Dynamic::from(*dt)]));
                calls
            }
            InvocationKind::Collision { partner } => {
                vec![("collide", vec![Dynamic::from(id_arg), Dynamic::from(partner.id.to_script())])]
            }
            InvocationKind::Generator => vec![("generate", vec![Dynamic::from(id_arg)])],
        };

        let frame = InvocationFrame::new(
            frame_kind,
            invocation.entity,
            partner,
            invocation.view,
            invocation.frame,
            invocation.templates,
            self.seed,
        );
        self.bridge.borrow_mut().begin(frame);
        self.engine.set_max_operations(budget.max_operations.unwrap_or(0));
        self.deadline.set(budget.max_duration.and_then(|limit| Instant::now().checked_add(limit)));

        let mut outcome = Ok(());
        for (name, args) in calls {
            let mut call_args = Vec::with_capacity(args.len() + 1);
            call_args.push(Dynamic::from(ScriptApi::new(self.bridge.clone())));
            call_args.extend(args);
            let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(&mut state);
            let mut scope = Scope::new();
            if let Err(err) = self.engine.call_fn_with_options::<Dynamic>(options, &mut scope, &ast, name, call_args) {
                outcome = Err(err);
                break;
            }
        }

        self.deadline.set(None);
        let (frame, misuse, marshal) = {
            let mut shared = self.bridge.borrow_mut();
            (shared.frame.take(), shared.misuse.take(), shared.marshal.take())
        };

        if let Some(message) = misuse {
            return Err(ScriptError::ApiMisuse(message));
        }
        if let Some(err) = marshal {
            return Err(ScriptError::Marshal(err));
        }
        if let Err(err) = outcome {
            return Err(classify(*err, budget));
        }

        let state = sanitize_state(&state)?;
        let context = self.contexts.checkout(handle, owner, generation);
        context.state = state;
        if matches!(invocation.kind, InvocationKind::Behavior { .. }) {
            context.ready = true;
        }
        Ok(frame.map(|frame| frame.mutations).unwrap_or_default())
    }

    /// Forgets every context owned by `entity`.
    pub fn release_entity(&mut self, entity: EntityId) {
        self.contexts.release_entity(entity);
    }

    pub fn release_context(&mut self, handle: ScriptHandle, owner: ContextOwner) {
        self.contexts.release(handle, owner);
    }

    pub fn has_context(&self, handle: ScriptHandle, owner: ContextOwner) -> bool {
        self.contexts.contains(handle, owner)
    }

    pub fn context_stats(&self) -> PoolStats {
        self.contexts.stats()
    }
}

fn unresolved(path: &str, err: ContentError) -> ScriptError {
    ScriptError::Unresolved { path: path.to_string(), message: err.to_string() }
}

fn missing_entry(path: &str, signature: &str) -> ScriptError {
    ScriptError::Compile { path: path.to_string(), message: format!("missing entry point fn {signature}") }
}

/// Maps an interpreter error onto the host taxonomy, looking through nested call frames.
fn classify(err: EvalAltResult, budget: &Budget) -> ScriptError {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) | EvalAltResult::ErrorInModule(_, inner, _) => {
            classify(*inner, budget)
        }
        EvalAltResult::ErrorTooManyOperations(_) => ScriptError::BudgetExceeded(format!(
            "operation limit of {} exceeded",
            budget.max_operations.unwrap_or_default()
        )),
        EvalAltResult::ErrorTerminated(_, _) => ScriptError::BudgetExceeded(format!(
            "wall-clock limit of {:?} exceeded",
            budget.max_duration.unwrap_or_default()
        )),
        EvalAltResult::ErrorStackOverflow(_) => ScriptError::BudgetExceeded("call depth limit exceeded".into()),
        EvalAltResult::ErrorDataTooLarge(what, _) => ScriptError::BudgetExceeded(format!("{what} exceeds its limit")),
        EvalAltResult::ErrorFunctionNotFound(signature, _) if api::is_api_signature(&signature) => {
            ScriptError::ApiMisuse(format!("no host function matches {signature}"))
        }
        other => ScriptError::Runtime(other.to_string()),
    }
}
