use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

use glam::DVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rhai::{Dynamic, Engine, EvalAltResult, Position, INT};

use super::error::{ApiRegistrationError, MarshalError};
use super::mutation::{DeferredRequest, MutationSet, ScriptSignal};
use super::value::{number_arg, ScriptValue};
use crate::ecs::{EntityId, EntityState, WorldView};

pub const HOST_API_VERSION: INT = 1;

type ApiResult<T> = Result<T, Box<EvalAltResult>>;

/// Functions callable on the `world` value, one entry per name (overloads share an entry).
pub const WORLD_API: &[&str] = &[
    "id",
    "category",
    "frame",
    "get",
    "position",
    "velocity",
    "property",
    "position_of",
    "nearest",
    "count",
    "set",
    "set_position",
    "set_velocity",
    "spawn",
    "destroy",
    "destroy_self",
    "consume",
    "add_score",
    "emit",
    "log",
    "random",
];

/// Free functions available in every script.
pub const MATH_API: &[&str] = &["api_version", "vec2", "clamp", "lerp", "random_seeded"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Behavior,
    Collision,
    Generator,
}

/// Host state one invocation resolves against, plus everything it has asked for so far.
pub(crate) struct InvocationFrame {
    pub kind: FrameKind,
    pub me: EntityState,
    pub partner: Option<EntityState>,
    pub view: Rc<WorldView>,
    pub frame: u64,
    pub templates: Rc<BTreeSet<String>>,
    pub rng: StdRng,
    pub mutations: MutationSet,
}

impl InvocationFrame {
    pub fn new(
        kind: FrameKind,
        me: EntityState,
        partner: Option<EntityState>,
        view: Rc<WorldView>,
        frame: u64,
        templates: Rc<BTreeSet<String>>,
        seed: u64,
    ) -> Self {
        let rng = StdRng::seed_from_u64(mix_seed(seed, me.id.0, frame, kind as u64));
        Self { kind, me, partner, view, frame, templates, rng, mutations: MutationSet::default() }
    }

    /// The invoking entity (with its pending writes), the collision partner, or the view.
    fn lookup(&self, id: EntityId) -> Option<&EntityState> {
        if id == self.me.id {
            return Some(&self.me);
        }
        match &self.partner {
            Some(partner) if partner.id == id => Some(partner),
            _ => self.view.get(id),
        }
    }
}

fn mix_seed(seed: u64, entity: u64, frame: u64, salt: u64) -> u64 {
    let mut x = seed ^ 0x9E37_79B9_7F4A_7C15;
    for part in [entity, frame, salt] {
        x ^= part.wrapping_add(0x9E37_79B9_7F4A_7C15).wrapping_add(x << 6).wrapping_add(x >> 2);
    }
    x
}

/// Shared between the engine and every registered function. The frame is only present while an
/// invocation runs.
#[derive(Default)]
pub(crate) struct ApiState {
    pub frame: Option<InvocationFrame>,
    pub misuse: Option<String>,
    pub marshal: Option<MarshalError>,
}

impl ApiState {
    pub fn begin(&mut self, frame: InvocationFrame) {
        self.frame = Some(frame);
        self.misuse = None;
        self.marshal = None;
    }
}

pub(crate) type ApiBridge = Rc<RefCell<ApiState>>;

fn raise(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), Position::NONE))
}

fn misuse(bridge: &ApiBridge, message: String) -> Box<EvalAltResult> {
    let mut state = bridge.borrow_mut();
    if state.misuse.is_none() {
        state.misuse = Some(message.clone());
    }
    raise(message)
}

/// The `world` value handed to every entry point.
#[derive(Clone)]
pub struct ScriptApi {
    bridge: ApiBridge,
}

impl ScriptApi {
    pub(crate) fn new(bridge: ApiBridge) -> Self {
        Self { bridge }
    }

    fn with_frame<T>(&mut self, call: &str, f: impl FnOnce(&mut InvocationFrame) -> T) -> ApiResult<T> {
        let mut state = self.bridge.borrow_mut();
        if let Some(frame) = state.frame.as_mut() {
            return Ok(f(frame));
        }
        drop(state);
        Err(misuse(&self.bridge, format!("world.{call}() used outside of its invocation")))
    }

    fn misuse(&self, message: String) -> Box<EvalAltResult> {
        misuse(&self.bridge, message)
    }

    fn marshal(&self, err: MarshalError) -> Box<EvalAltResult> {
        let message = err.to_string();
        let mut state = self.bridge.borrow_mut();
        if state.marshal.is_none() {
            state.marshal = Some(err);
        }
        raise(message)
    }

    fn number(&self, call: &str, arg: &str, value: &Dynamic) -> ApiResult<f64> {
        number_arg(value)
            .ok_or_else(|| self.misuse(format!("world.{call}: '{arg}' must be a number, got {}", value.type_name())))
    }

    fn entity_arg(&self, call: &str, value: &Dynamic) -> ApiResult<EntityId> {
        value
            .as_int()
            .ok()
            .and_then(EntityId::from_script)
            .ok_or_else(|| self.misuse(format!("world.{call}: expected an entity id, got {}", value.type_name())))
    }

    fn deny_in_generator(&mut self, call: &str) -> ApiResult<()> {
        let kind = self.with_frame(call, |frame| frame.kind)?;
        if kind == FrameKind::Generator {
            return Err(self.misuse(format!("world.{call} is not available while generating properties")));
        }
        Ok(())
    }

    // ---------- queries ----------
    fn id(&mut self) -> ApiResult<INT> {
        self.with_frame("id", |frame| frame.me.id.to_script())
    }

    fn category(&mut self) -> ApiResult<String> {
        self.with_frame("category", |frame| frame.me.category.clone())
    }

    fn frame_index(&mut self) -> ApiResult<INT> {
        self.with_frame("frame", |frame| frame.frame as INT)
    }

    fn get(&mut self, name: &str) -> ApiResult<Dynamic> {
        self.with_frame("get", |frame| frame.me.property(name).map_or(Dynamic::UNIT, |value| value.to_dynamic()))
    }

    fn position(&mut self) -> ApiResult<DVec2> {
        self.with_frame("position", |frame| frame.me.position)
    }

    fn velocity(&mut self) -> ApiResult<DVec2> {
        self.with_frame("velocity", |frame| frame.me.velocity)
    }

    fn property(&mut self, id: Dynamic, name: &str) -> ApiResult<Dynamic> {
        let id = self.entity_arg("property", &id)?;
        self.with_frame("property", |frame| {
            frame.lookup(id).and_then(|state| state.property(name)).map_or(Dynamic::UNIT, |value| value.to_dynamic())
        })
    }

    fn position_of(&mut self, id: Dynamic) -> ApiResult<Dynamic> {
        let id = self.entity_arg("position_of", &id)?;
        self.with_frame("position_of", |frame| {
            frame.lookup(id).map_or(Dynamic::UNIT, |state| Dynamic::from(state.position))
        })
    }

    fn nearest(&mut self, category: &str, radius: Dynamic) -> ApiResult<INT> {
        let radius = self.number("nearest", "radius", &radius)?;
        self.with_frame("nearest", |frame| {
            frame
                .view
                .nearest(frame.me.position, category, radius, frame.me.id)
                .map_or(-1, EntityId::to_script)
        })
    }

    fn count(&mut self, category: &str) -> ApiResult<INT> {
        self.with_frame("count", |frame| {
            let others = frame.view.iter().filter(|s| s.id != frame.me.id && s.alive && s.category == category).count();
            let me = usize::from(frame.kind != FrameKind::Generator && frame.me.category == category);
            (others + me) as INT
        })
    }

    // ---------- mutations ----------
    fn write(&mut self, call: &str, name: &str, value: ScriptValue) -> ApiResult<()> {
        let result = self.with_frame(call, |frame| {
            frame.me.write(name, value.clone())?;
            frame.mutations.writes.push((name.to_string(), value));
            Ok::<(), MarshalError>(())
        })?;
        result.map_err(|err| self.marshal(err))
    }

    fn set(&mut self, name: &str, value: Dynamic) -> ApiResult<()> {
        let value = ScriptValue::from_dynamic(&value).map_err(|err| self.marshal(err))?;
        self.write("set", name, value)
    }

    fn set_position(&mut self, x: Dynamic, y: Dynamic) -> ApiResult<()> {
        let position = DVec2::new(self.number("set_position", "x", &x)?, self.number("set_position", "y", &y)?);
        self.write("set_position", "position", ScriptValue::Vec2(position))
    }

    fn set_velocity(&mut self, x: Dynamic, y: Dynamic) -> ApiResult<()> {
        let velocity = DVec2::new(self.number("set_velocity", "x", &x)?, self.number("set_velocity", "y", &y)?);
        self.write("set_velocity", "velocity", ScriptValue::Vec2(velocity))
    }

    fn spawn_at(&mut self, template: &str, position: DVec2) -> ApiResult<()> {
        self.deny_in_generator("spawn")?;
        let known = self.with_frame("spawn", |frame| frame.templates.contains(template))?;
        if !known {
            return Err(self.misuse(format!("world.spawn: unknown template '{template}'")));
        }
        self.with_frame("spawn", |frame| {
            frame.mutations.requests.push(DeferredRequest::Spawn { template: template.to_string(), position });
        })
    }

    fn spawn_xy(&mut self, template: &str, x: Dynamic, y: Dynamic) -> ApiResult<()> {
        let position = DVec2::new(self.number("spawn", "x", &x)?, self.number("spawn", "y", &y)?);
        self.spawn_at(template, position)
    }

    fn spawn_vec(&mut self, template: &str, position: DVec2) -> ApiResult<()> {
        self.spawn_at(template, position)
    }

    fn destroy(&mut self, id: Dynamic) -> ApiResult<()> {
        self.deny_in_generator("destroy")?;
        let target = self.entity_arg("destroy", &id)?;
        self.with_frame("destroy", |frame| frame.mutations.requests.push(DeferredRequest::Destroy { target }))
    }

    fn destroy_self(&mut self) -> ApiResult<()> {
        self.deny_in_generator("destroy_self")?;
        self.with_frame("destroy_self", |frame| {
            let target = frame.me.id;
            frame.mutations.requests.push(DeferredRequest::Destroy { target });
        })
    }

    fn consume(&mut self, id: Dynamic) -> ApiResult<()> {
        self.deny_in_generator("consume")?;
        let target = self.entity_arg("consume", &id)?;
        self.with_frame("consume", |frame| frame.mutations.requests.push(DeferredRequest::Consume { target }))
    }

    fn add_score(&mut self, delta: Dynamic) -> ApiResult<()> {
        let delta = self.number("add_score", "delta", &delta)?;
        self.with_frame("add_score", |frame| frame.mutations.score_delta += delta)
    }

    fn emit(&mut self, name: &str) -> ApiResult<()> {
        self.with_frame("emit", |frame| {
            frame.mutations.signals.push(ScriptSignal { name: name.to_string(), value: None });
        })
    }

    fn emit_value(&mut self, name: &str, value: Dynamic) -> ApiResult<()> {
        let value = ScriptValue::from_dynamic(&value).map_err(|err| self.marshal(err))?;
        self.with_frame("emit", |frame| {
            frame.mutations.signals.push(ScriptSignal { name: name.to_string(), value: Some(value) });
        })
    }

    fn log(&mut self, message: Dynamic) -> ApiResult<()> {
        self.with_frame("log", |frame| {
            let line = format!("[{}] {message}", frame.me.id);
            frame.mutations.logs.push(line);
        })
    }

    fn random(&mut self, min: Dynamic, max: Dynamic) -> ApiResult<f64> {
        let (min, max) = (self.number("random", "min", &min)?, self.number("random", "max", &max)?);
        self.with_frame("random", |frame| sample_range(&mut frame.rng, min, max))?
            .ok_or_else(|| self.misuse(format!("world.random: range {min}..{max} is too wide")))
    }
}

/// Uniform draw from `min..max`; an empty range yields `min`. `None` when the width of the range
/// is not a finite number.
fn sample_range(rng: &mut StdRng, min: f64, max: f64) -> Option<f64> {
    if min < max {
        (max - min).is_finite().then(|| rng.gen_range(min..max))
    } else {
        Some(min)
    }
}

/// Registers the whole host surface. Any inconsistency in the manifest is fatal.
pub(crate) fn register_api(engine: &mut Engine, bridge: &ApiBridge) -> Result<(), ApiRegistrationError> {
    validate_manifest()?;

    engine.register_type_with_name::<ScriptApi>("World");
    engine.register_fn("id", ScriptApi::id);
    engine.register_fn("category", ScriptApi::category);
    engine.register_fn("frame", ScriptApi::frame_index);
    engine.register_fn("get", ScriptApi::get);
    engine.register_fn("position", ScriptApi::position);
    engine.register_fn("velocity", ScriptApi::velocity);
    engine.register_fn("property", ScriptApi::property);
    engine.register_fn("position_of", ScriptApi::position_of);
    engine.register_fn("nearest", ScriptApi::nearest);
    engine.register_fn("count", ScriptApi::count);
    engine.register_fn("set", ScriptApi::set);
    engine.register_fn("set_position", ScriptApi::set_position);
    engine.register_fn("set_velocity", ScriptApi::set_velocity);
    engine.register_fn("spawn", ScriptApi::spawn_xy);
    engine.register_fn("spawn", ScriptApi::spawn_vec);
    engine.register_fn("destroy", ScriptApi::destroy);
    engine.register_fn("destroy_self", ScriptApi::destroy_self);
    engine.register_fn("consume", ScriptApi::consume);
    engine.register_fn("add_score", ScriptApi::add_score);
    engine.register_fn("emit", ScriptApi::emit);
    engine.register_fn("emit", ScriptApi::emit_value);
    engine.register_fn("log", ScriptApi::log);
    engine.register_fn("random", ScriptApi::random);

    register_vec2(engine, bridge);
    register_math(engine, bridge);
    register_fallbacks(engine, bridge);
    Ok(())
}

/// Highest argument count (receiver included) that gets a rejecting overload.
const FALLBACK_ARITY: usize = 6;

/// Registers an all-`Dynamic` overload for every host name at every arity that has no
/// all-`Dynamic` signature of its own. The interpreter tries these last, so they only catch
/// calls no real overload accepts, and they record the misuse even when the script catches the
/// error.
fn register_fallbacks(engine: &mut Engine, bridge: &ApiBridge) {
    for &name in WORLD_API.iter().chain(MATH_API) {
        for arity in 0..=FALLBACK_ARITY {
            if !matches!((name, arity), ("api_version", 0) | ("vec2", 2) | ("clamp", 3) | ("lerp", 3)) {
                register_fallback(engine, bridge, name, arity);
            }
        }
    }
}

fn register_fallback(engine: &mut Engine, bridge: &ApiBridge, name: &'static str, arity: usize) {
    let bridge = bridge.clone();
    let reject = move || -> ApiResult<Dynamic> {
        Err(misuse(&bridge, format!("no host function {name} takes these {arity} argument(s)")))
    };
    type D = Dynamic;
    match arity {
        0 => engine.register_fn(name, move || reject()),
        1 => engine.register_fn(name, move |_: D| reject()),
        2 => engine.register_fn(name, move |_: D, _: D| reject()),
        3 => engine.register_fn(name, move |_: D, _: D, _: D| reject()),
        4 => engine.register_fn(name, move |_: D, _: D, _: D, _: D| reject()),
        5 => engine.register_fn(name, move |_: D, _: D, _: D, _: D, _: D| reject()),
        _ => engine.register_fn(name, move |_: D, _: D, _: D, _: D, _: D, _: D| reject()),
    };
}

fn validate_manifest() -> Result<(), ApiRegistrationError> {
    let mut seen = HashSet::new();
    for name in WORLD_API.iter().chain(MATH_API) {
        if !seen.insert(*name) {
            return Err(ApiRegistrationError::Duplicate(name));
        }
    }
    Ok(())
}

/// True when a missing-function error names part of the host surface, i.e. the script called an
/// API function with the wrong arity or argument types.
pub(crate) fn is_api_signature(signature: &str) -> bool {
    let name = signature.split(|c: char| c == ' ' || c == '(').next().unwrap_or_default();
    signature.contains("(World") || WORLD_API.contains(&name) || MATH_API.contains(&name)
}

fn register_vec2(engine: &mut Engine, bridge: &ApiBridge) {
    engine.register_type_with_name::<DVec2>("Vec2");
    let vec2_bridge = bridge.clone();
    engine.register_fn("vec2", move |x: Dynamic, y: Dynamic| -> ApiResult<DVec2> {
        match (number_arg(&x), number_arg(&y)) {
            (Some(x), Some(y)) => Ok(DVec2::new(x, y)),
            _ => Err(misuse(&vec2_bridge, format!("vec2 expects numbers, got ({}, {})", x.type_name(), y.type_name()))),
        }
    });
    engine.register_get_set("x", |v: &mut DVec2| v.x, |v: &mut DVec2, x: f64| v.x = x);
    engine.register_get_set("y", |v: &mut DVec2| v.y, |v: &mut DVec2, y: f64| v.y = y);
    engine.register_fn("+", |a: DVec2, b: DVec2| a + b);
    engine.register_fn("-", |a: DVec2, b: DVec2| a - b);
    engine.register_fn("-", |a: DVec2| -a);
    engine.register_fn("*", |a: DVec2, s: f64| a * s);
    engine.register_fn("*", |s: f64, a: DVec2| a * s);
    engine.register_fn("*", |a: DVec2, s: INT| a * s as f64);
    engine.register_fn("==", |a: DVec2, b: DVec2| a == b);
    engine.register_fn("length", |v: &mut DVec2| v.length());
    engine.register_fn("normalized", |v: &mut DVec2| v.normalize_or_zero());
    engine.register_fn("dot", |a: &mut DVec2, b: DVec2| a.dot(b));
    engine.register_fn("distance", |a: &mut DVec2, b: DVec2| a.distance(b));
    engine.register_fn("to_string", |v: &mut DVec2| format!("({}, {})", v.x, v.y));
    engine.register_fn("to_debug", |v: &mut DVec2| format!("vec2({}, {})", v.x, v.y));
}

fn register_math(engine: &mut Engine, bridge: &ApiBridge) {
    engine.register_fn("api_version", || HOST_API_VERSION);

    let clamp_bridge = bridge.clone();
    engine.register_fn("clamp", move |v: Dynamic, lo: Dynamic, hi: Dynamic| -> ApiResult<f64> {
        match (number_arg(&v), number_arg(&lo), number_arg(&hi)) {
            (Some(v), Some(lo), Some(hi)) if lo <= hi => Ok(v.clamp(lo, hi)),
            (Some(_), Some(lo), Some(hi)) => Err(misuse(&clamp_bridge, format!("clamp: lower bound {lo} exceeds {hi}"))),
            _ => Err(misuse(&clamp_bridge, "clamp expects three numbers".to_string())),
        }
    });

    let lerp_bridge = bridge.clone();
    engine.register_fn("lerp", move |a: Dynamic, b: Dynamic, t: Dynamic| -> ApiResult<f64> {
        match (number_arg(&a), number_arg(&b), number_arg(&t)) {
            (Some(a), Some(b), Some(t)) => Ok(a + (b - a) * t),
            _ => Err(misuse(&lerp_bridge, "lerp expects three numbers".to_string())),
        }
    });

    let random_bridge = bridge.clone();
    engine.register_fn("random_seeded", move |seed: INT, min: Dynamic, max: Dynamic| -> ApiResult<f64> {
        match (number_arg(&min), number_arg(&max)) {
            (Some(min), Some(max)) => sample_range(&mut StdRng::seed_from_u64(seed as u64), min, max)
                .ok_or_else(|| misuse(&random_bridge, format!("random_seeded: range {min}..{max} is too wide"))),
            _ => Err(misuse(&random_bridge, "random_seeded expects (int, number, number)".to_string())),
        }
    });
}
