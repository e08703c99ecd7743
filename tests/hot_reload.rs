use std::fs::{self, File};
use std::time::{Duration, SystemTime};

use arcade_script::config::RuntimeConfig;
use arcade_script::scripts::ReloadOutcome;
use arcade_script::{
    ArcadeRuntime, EntityTemplate, FsContentSource, MemoryContentSource, ScriptRef, ScriptSlot, ScriptValue,
    TemplateLibrary,
};

fn versioned(version: i64) -> String {
    format!(
        r#"
        fn ready(world, entity) {{
            world.set("ready_version", {version});
        }}
        fn process(world, entity, dt) {{
            world.set("version", {version});
        }}
        "#
    )
}

fn drone() -> EntityTemplate {
    EntityTemplate::new("drone", "drone").with_behavior(ScriptRef::isolated("drone.rhai"))
}

fn memory_runtime(source: &str) -> ArcadeRuntime<MemoryContentSource> {
    let content = MemoryContentSource::new().with_script("drone.rhai", source);
    ArcadeRuntime::new(&RuntimeConfig::default(), TemplateLibrary::from_templates([drone()]), content)
        .expect("runtime")
}

fn version(runtime: &ArcadeRuntime<impl arcade_script::ContentSource>, id: arcade_script::EntityId) -> ScriptValue {
    runtime.entity(id).expect("drone").properties["version"].clone()
}

#[test]
fn edited_scripts_take_effect_on_the_next_tick() {
    let mut runtime = memory_runtime(&versioned(1));
    let id = runtime.spawn("drone", None).expect("spawn");
    runtime.tick(0.016);
    assert_eq!(version(&runtime, id), ScriptValue::Number(1.0));

    runtime.content_mut().insert("drone.rhai", versioned(2));
    let outcomes = runtime.reload_scripts();

    assert!(matches!(outcomes.as_slice(), [ReloadOutcome::Reloaded { path, .. }] if path == "drone.rhai"));
    runtime.tick(0.016);
    let state = runtime.entity(id).expect("drone");
    assert_eq!(state.properties["version"], ScriptValue::Number(2.0));
    assert_eq!(state.properties["ready_version"], ScriptValue::Number(2.0));
}

#[test]
fn untouched_scripts_are_not_reloaded() {
    let mut runtime = memory_runtime(&versioned(1));
    runtime.spawn("drone", None).expect("spawn");
    assert!(runtime.reload_scripts().is_empty());
    let generation = runtime.engine().handle_for("drone.rhai").and_then(|handle| runtime.engine().generation(handle));
    assert_eq!(generation, Some(1));
}

#[test]
fn broken_reloads_pause_the_script_until_fixed() {
    let mut runtime = memory_runtime(&versioned(1));
    let id = runtime.spawn("drone", None).expect("spawn");
    runtime.tick(0.016);

    runtime.content_mut().insert("drone.rhai", "fn process(world, entity, dt) { world.set(");
    let outcomes = runtime.reload_scripts();
    assert!(matches!(outcomes.as_slice(), [ReloadOutcome::Failed { .. }]));

    let paused = runtime.tick(0.016);
    assert!(paused.behaviors.scheduled.is_empty());
    assert_eq!(version(&runtime, id), ScriptValue::Number(1.0));
    assert!(runtime.take_faults().is_empty());
    let handle = runtime.engine().handle_for("drone.rhai").expect("handle");
    assert!(runtime.engine().last_error(handle).is_some());

    runtime.content_mut().insert("drone.rhai", versioned(3));
    runtime.reload_scripts();
    let resumed = runtime.tick(0.016);
    assert_eq!(resumed.behaviors.scheduled, vec![id]);
    assert_eq!(version(&runtime, id), ScriptValue::Number(3.0));
    assert!(runtime.engine().last_error(handle).is_none());
}

#[test]
fn removed_sources_keep_the_last_good_compilation() {
    let mut runtime = memory_runtime(&versioned(1));
    let id = runtime.spawn("drone", None).expect("spawn");

    runtime.content_mut().remove("drone.rhai");
    let outcomes = runtime.reload_scripts();
    assert!(matches!(outcomes.as_slice(), [ReloadOutcome::Failed { .. }]));

    runtime.tick(0.016);
    assert_eq!(version(&runtime, id), ScriptValue::Number(1.0));
}

#[test]
fn faulted_slots_stay_disabled_until_rebound() {
    let mut runtime = memory_runtime(r#"fn process(world, entity, dt) { throw "broken"; }"#);
    let id = runtime.spawn("drone", None).expect("spawn");
    runtime.tick(0.016);
    assert_eq!(runtime.take_faults().len(), 1);

    runtime.content_mut().insert("drone.rhai", versioned(5));
    runtime.reload_scripts();
    let report = runtime.tick(0.016);
    assert!(report.behaviors.scheduled.is_empty());

    runtime.rebind(id, ScriptSlot::Behavior, Some(ScriptRef::isolated("drone.rhai"))).expect("rebind");
    runtime.tick(0.016);
    assert_eq!(version(&runtime, id), ScriptValue::Number(5.0));
}

#[test]
fn file_edits_are_picked_up_from_disk() {
    let dir = tempfile::tempdir().expect("temp dir");
    let script = dir.path().join("drone.rhai");
    fs::write(&script, versioned(1)).expect("write script");

    let mut runtime = ArcadeRuntime::new(
        &RuntimeConfig::default(),
        TemplateLibrary::from_templates([drone()]),
        FsContentSource::new(dir.path()),
    )
    .expect("runtime");
    let id = runtime.spawn("drone", None).expect("spawn");
    runtime.tick(0.016);
    assert_eq!(version(&runtime, id), ScriptValue::Number(1.0));

    fs::write(&script, versioned(2)).expect("rewrite script");
    File::options()
        .write(true)
        .open(&script)
        .and_then(|file| file.set_modified(SystemTime::now() + Duration::from_secs(10)))
        .expect("bump mtime");

    let outcomes = runtime.reload_scripts();
    assert_eq!(outcomes.len(), 1);
    runtime.tick(0.016);
    assert_eq!(version(&runtime, id), ScriptValue::Number(2.0));
}

#[test]
fn identical_sources_share_one_ast() {
    let content = MemoryContentSource::new()
        .with_script("a.rhai", versioned(1))
        .with_script("b.rhai", versioned(1));
    let a = EntityTemplate::new("a", "drone").with_behavior(ScriptRef::isolated("a.rhai"));
    let b = EntityTemplate::new("b", "drone").with_behavior(ScriptRef::isolated("b.rhai"));
    let mut runtime =
        ArcadeRuntime::new(&RuntimeConfig::default(), TemplateLibrary::from_templates([a, b]), content).expect("runtime");
    runtime.spawn("a", None).expect("a");
    runtime.spawn("b", None).expect("b");

    assert_eq!(runtime.engine().script_count(), 2);
    assert_eq!(runtime.engine().cached_asts(), 1);
}

#[test]
fn watching_requires_an_existing_directory() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("drone.rhai"), versioned(1)).expect("write script");
    let mut runtime = ArcadeRuntime::new(
        &RuntimeConfig::default(),
        TemplateLibrary::from_templates([drone()]),
        FsContentSource::new(dir.path()),
    )
    .expect("runtime");

    assert!(runtime.poll_script_changes().is_empty());
    assert!(runtime.watch_scripts(dir.path().join("missing")).is_err());
    runtime.watch_scripts(dir.path()).expect("watch");
    runtime.spawn("drone", None).expect("spawn");
    assert!(runtime.poll_script_changes().is_empty());
}
