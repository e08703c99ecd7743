use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::config::{RuntimeConfig, RuntimeConfigOverrides};
use crate::content::{ContentSource, FsContentSource};
use crate::diagnostics::FaultReport;
use crate::ecs::{EntityId, EntityState};
use crate::runtime::ArcadeRuntime;
use crate::template::{EntityTemplate, TemplateLibrary};

/// Headless scenario: templates, initial spawns and a step count.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessFixture {
    /// Script directory, relative to the fixture file.
    #[serde(default = "default_script_root")]
    pub script_root: String,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub config: RuntimeConfig,
    /// Template library file, relative to the fixture file. Merged with `templates`.
    #[serde(default)]
    pub template_file: Option<String>,
    #[serde(default)]
    pub templates: Vec<EntityTemplate>,
    #[serde(default)]
    pub spawns: Vec<FixtureSpawn>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSpawn {
    pub template: String,
    #[serde(default)]
    pub position: Option<DVec2>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub steps: usize,
    pub dt: f64,
    pub seed: u64,
    pub initial: Vec<EntityId>,
    pub results: Vec<StepResult>,
    pub score: f64,
    pub faults: Vec<FaultReport>,
    pub final_entities: Vec<EntityState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub scheduled: usize,
    pub collisions: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spawned: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destroyed: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

/// Loads a fixture and inlines its template file, if it names one.
pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening fixture '{}'", path.display()))?;
    let mut fixture: HarnessFixture =
        serde_json::from_reader(file).with_context(|| format!("parsing fixture '{}'", path.display()))?;
    if let Some(template_file) = fixture.template_file.take() {
        let library = TemplateLibrary::load(fixture_dir(path).join(template_file))?;
        fixture.templates.extend(library.iter().cloned());
    }
    Ok(fixture)
}

fn fixture_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

/// Script root of a fixture loaded from `fixture_path`.
pub fn script_root_for(fixture_path: &Path, fixture: &HarnessFixture) -> PathBuf {
    fixture_dir(fixture_path).join(&fixture.script_root)
}

pub fn run_fixture_file(path: impl AsRef<Path>, overrides: &RuntimeConfigOverrides) -> Result<HarnessOutput> {
    let path = path.as_ref();
    let fixture = load_fixture(path)?;
    let content = FsContentSource::new(script_root_for(path, &fixture));
    run_fixture(&fixture, content, overrides)
}

/// Runs the fixture to completion. Two runs with the same fixture, scripts and overrides
/// produce identical output.
pub fn run_fixture<C: ContentSource>(
    fixture: &HarnessFixture,
    content: C,
    overrides: &RuntimeConfigOverrides,
) -> Result<HarnessOutput> {
    let mut config = fixture.config.clone();
    config.apply_overrides(overrides);
    let templates = TemplateLibrary::from_templates(fixture.templates.iter().cloned());
    let mut runtime = ArcadeRuntime::new(&config, templates, content).context("initializing script engine")?;

    let mut initial = Vec::with_capacity(fixture.spawns.len());
    for spawn in &fixture.spawns {
        let id = runtime
            .spawn(&spawn.template, spawn.position)
            .map_err(|err| anyhow!("fixture spawn of '{}' failed: {err}", spawn.template))?;
        initial.push(id);
    }
    runtime.take_events();

    let mut results = Vec::with_capacity(fixture.steps);
    for step in 0..fixture.steps {
        let report = runtime.tick(fixture.dt);
        let mut spawned = report.behaviors.applied.spawned;
        spawned.extend(report.collision_requests.spawned);
        let mut destroyed = report.behaviors.applied.destroyed;
        destroyed.extend(report.collision_requests.destroyed);
        results.push(StepResult {
            step,
            scheduled: report.behaviors.scheduled.len(),
            collisions: report.collisions,
            spawned,
            destroyed,
            events: runtime.take_events().iter().map(ToString::to_string).collect(),
            logs: runtime.take_logs(),
        });
    }

    tracing::info!(
        target: "harness",
        steps = fixture.steps,
        entities = runtime.entity_count(),
        score = runtime.score(),
        "fixture complete"
    );

    let snapshot = runtime.snapshot();
    Ok(HarnessOutput {
        steps: fixture.steps,
        dt: fixture.dt,
        seed: config.scripting.seed,
        initial,
        results,
        score: snapshot.score,
        faults: runtime.take_faults(),
        final_entities: snapshot.entities,
    })
}

fn default_script_root() -> String {
    "scripts".to_string()
}

fn default_steps() -> usize {
    60
}

fn default_dt() -> f64 {
    1.0 / 60.0
}
