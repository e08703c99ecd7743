use arcade_script::config::RuntimeConfig;
use arcade_script::{
    ArcadeRuntime, EntityTemplate, GameEvent, MemoryContentSource, ScriptRef, ScriptValue, TemplateLibrary,
};
use glam::DVec2;

const BULLET_HITS_ROCK: &str = r#"
fn collide(world, entity, other) {
    world.set("hits", world.get("hits") + 1);
    world.set("last_target", world.property(other, "label"));
    world.consume(other);
}
"#;

const ROCK_HIT: &str = r#"
fn collide(world, entity, other) {
    world.set("hits", world.get("hits") + 1);
    world.set("still_there", world.property(other, "label") == "bullet");
}
"#;

fn arena() -> ArcadeRuntime<MemoryContentSource> {
    let content = MemoryContentSource::new()
        .with_script("bullet_hits_rock.rhai", BULLET_HITS_ROCK)
        .with_script("rock_hit.rhai", ROCK_HIT);
    let bullet = EntityTemplate::new("bullet", "bullet")
        .with_property("hits", 0.0)
        .with_property("label", "bullet")
        .with_collision("rock", ScriptRef::isolated("bullet_hits_rock.rhai"));
    let rock = EntityTemplate::new("rock", "rock")
        .with_property("hits", 0.0)
        .with_property("label", "rock")
        .with_collision("bullet", ScriptRef::isolated("rock_hit.rhai"));
    let library = TemplateLibrary::from_templates([bullet, rock]);
    ArcadeRuntime::new(&RuntimeConfig::default(), library, content).expect("runtime")
}

fn hits(runtime: &ArcadeRuntime<MemoryContentSource>, id: arcade_script::EntityId) -> ScriptValue {
    runtime.entity(id).expect("entity").properties["hits"].clone()
}

#[test]
fn both_directions_fire_once_per_frame() {
    let mut runtime = arena();
    let bullet = runtime.spawn("bullet", Some(DVec2::new(0.0, 0.0))).expect("bullet");
    let rock = runtime.spawn("rock", Some(DVec2::new(100.0, 0.0))).expect("rock");
    runtime.take_events();

    assert_eq!(runtime.handle_collision(bullet, rock), 2);
    assert_eq!(runtime.handle_collision(rock, bullet), 0);
    assert_eq!(runtime.handle_collision(bullet, rock), 0);

    assert_eq!(hits(&runtime, bullet), ScriptValue::Number(1.0));
    assert_eq!(hits(&runtime, rock), ScriptValue::Number(1.0));
    assert_eq!(
        runtime.entity(bullet).expect("bullet").properties["last_target"],
        ScriptValue::Str("rock".into())
    );
    let collisions = runtime
        .take_events()
        .into_iter()
        .filter(|event| matches!(event, GameEvent::CollisionStarted { .. }))
        .count();
    assert_eq!(collisions, 1);
}

#[test]
fn consumed_targets_survive_until_resolve() {
    let mut runtime = arena();
    let bullet = runtime.spawn("bullet", None).expect("bullet");
    let rock = runtime.spawn("rock", Some(DVec2::new(50.0, 0.0))).expect("rock");

    runtime.handle_collision(bullet, rock);

    assert!(runtime.entity(rock).is_some());
    assert_eq!(
        runtime.entity(rock).expect("rock").properties["still_there"],
        ScriptValue::Bool(true)
    );

    let applied = runtime.resolve_collisions();
    assert_eq!(applied.destroyed, vec![rock]);
    assert!(runtime.entity(rock).is_none());
    assert!(runtime.entity(bullet).is_some());
    let consumed = runtime
        .take_events()
        .into_iter()
        .any(|event| event == GameEvent::EntityDestroyed { entity: rock, consumed: true });
    assert!(consumed);
}

#[test]
fn overlapping_entities_collide_during_tick() {
    let mut runtime = arena();
    let bullet = runtime.spawn("bullet", Some(DVec2::new(0.0, 0.0))).expect("bullet");
    let rock = runtime.spawn("rock", Some(DVec2::new(0.5, 0.0))).expect("rock");
    let far = runtime.spawn("rock", Some(DVec2::new(20.0, 0.0))).expect("far rock");

    let report = runtime.tick(0.016);

    assert_eq!(report.collisions, 1);
    assert_eq!(report.actions, 2);
    assert_eq!(report.collision_requests.destroyed, vec![rock]);
    assert!(runtime.entity(rock).is_none());
    assert_eq!(hits(&runtime, far), ScriptValue::Number(0.0));
    assert_eq!(hits(&runtime, bullet), ScriptValue::Number(1.0));
}

#[test]
fn pairs_without_actions_are_ignored() {
    let mut runtime = arena();
    let a = runtime.spawn("rock", Some(DVec2::ZERO)).expect("rock");
    let b = runtime.spawn("rock", Some(DVec2::new(0.1, 0.0))).expect("rock");

    let report = runtime.tick(0.016);

    assert_eq!(report.collisions, 0);
    assert_eq!(runtime.handle_collision(a, b), 0);
    assert_eq!(hits(&runtime, a), ScriptValue::Number(0.0));
}

#[test]
fn the_same_pair_fires_again_next_frame() {
    let mut runtime = arena();
    let bullet = runtime.spawn("bullet", Some(DVec2::new(0.0, 0.0))).expect("bullet");
    let rock = runtime.spawn("rock", Some(DVec2::new(100.0, 0.0))).expect("rock");

    runtime.handle_collision(bullet, rock);
    runtime.tick(0.016);
    runtime.handle_collision(rock, bullet);

    assert_eq!(hits(&runtime, bullet), ScriptValue::Number(2.0));
    assert_eq!(hits(&runtime, rock), ScriptValue::Number(2.0));
}

#[test]
fn failing_actions_fault_only_their_slot() {
    let content = MemoryContentSource::new()
        .with_script("explode.rhai", r#"fn collide(world, entity, other) { throw "boom"; }"#)
        .with_script("rock_hit.rhai", ROCK_HIT);
    let bullet = EntityTemplate::new("bullet", "bullet").with_collision("rock", ScriptRef::isolated("explode.rhai"));
    let rock = EntityTemplate::new("rock", "rock")
        .with_property("hits", 0.0)
        .with_collision("bullet", ScriptRef::isolated("rock_hit.rhai"));
    let library = TemplateLibrary::from_templates([bullet, rock]);
    let mut runtime = ArcadeRuntime::new(&RuntimeConfig::default(), library, content).expect("runtime");
    let bullet = runtime.spawn("bullet", None).expect("bullet");
    let rock = runtime.spawn("rock", Some(DVec2::new(40.0, 0.0))).expect("rock");

    assert_eq!(runtime.handle_collision(bullet, rock), 1);

    assert_eq!(hits(&runtime, rock), ScriptValue::Number(1.0));
    let binding = runtime.binding(bullet).expect("binding");
    assert!(binding.collisions["rock"].faulted);
    let faults = runtime.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].script_path, "explode.rhai");
}

#[test]
fn larger_bounds_reach_further() {
    let content = MemoryContentSource::new().with_script("rock_hit.rhai", ROCK_HIT);
    let bullet = EntityTemplate::new("bullet", "bullet").with_property("label", "bullet");
    let boulder = EntityTemplate::new("boulder", "rock")
        .with_property("hits", 0.0)
        .with_half_extents(DVec2::splat(3.0))
        .with_collision("bullet", ScriptRef::isolated("rock_hit.rhai"));
    let pebble = EntityTemplate::new("pebble", "rock")
        .with_property("hits", 0.0)
        .with_collision("bullet", ScriptRef::isolated("rock_hit.rhai"));
    let library = TemplateLibrary::from_templates([bullet, boulder, pebble]);
    let mut runtime = ArcadeRuntime::new(&RuntimeConfig::default(), library, content).expect("runtime");
    runtime.spawn("bullet", Some(DVec2::ZERO)).expect("bullet");
    let boulder = runtime.spawn("boulder", Some(DVec2::new(3.0, 0.0))).expect("boulder");
    let pebble = runtime.spawn("pebble", Some(DVec2::new(0.0, 3.0))).expect("pebble");

    let report = runtime.tick(0.016);

    assert_eq!(report.collisions, 1);
    assert_eq!(hits(&runtime, boulder), ScriptValue::Number(1.0));
    assert_eq!(hits(&runtime, pebble), ScriptValue::Number(0.0));
}
