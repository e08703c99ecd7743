use std::fs;
use std::path::Path;

use arcade_script::config::ScriptingConfig;
use arcade_script::{FsContentSource, ScriptEngine};

fn compile_all(root: &str) -> Vec<String> {
    let mut engine = ScriptEngine::new(&ScriptingConfig::default()).expect("script engine");
    let content = FsContentSource::new(root);
    let mut compiled = Vec::new();
    for entry in fs::read_dir(Path::new(root)).expect("read script dir") {
        let path = entry.expect("dir entry").path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("rhai") {
            continue;
        }
        let name = path.file_name().and_then(|name| name.to_str()).expect("utf-8 name").to_string();
        let handle = engine.compile(&name, &content).unwrap_or_else(|err| panic!("{name}: {err}"));
        assert!(engine.is_usable(handle));
        compiled.push(name);
    }
    compiled.sort();
    compiled
}

#[test]
fn demo_scripts_compile() {
    let compiled = compile_all("assets/scripts");
    assert_eq!(
        compiled,
        vec!["bullet.rhai", "bullet_hits_rock.rhai", "rock_gen.rhai", "rock_hit.rhai", "ship.rhai", "ship_hit.rhai"]
    );
}

#[test]
fn fixture_scripts_compile() {
    let compiled = compile_all("tests/fixtures/script_harness/scripts");
    assert_eq!(compiled, vec!["counter.rhai", "emitter.rhai"]);
}

#[test]
fn demo_entry_points_match_their_slots() {
    let mut engine = ScriptEngine::new(&ScriptingConfig::default()).expect("script engine");
    let content = FsContentSource::new("assets/scripts");
    let ship = engine.compile("ship.rhai", &content).expect("ship");
    let ship_entry = engine.entry_points(ship).expect("entry points");
    assert!(ship_entry.ready && ship_entry.process && !ship_entry.collide);
    let rock_gen = engine.compile("rock_gen.rhai", &content).expect("rock_gen");
    assert!(engine.entry_points(rock_gen).expect("entry points").generate);
    let rock_hit = engine.compile("rock_hit.rhai", &content).expect("rock_hit");
    assert!(engine.entry_points(rock_hit).expect("entry points").collide);
}
