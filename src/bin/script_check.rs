use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use arcade_script::config::RuntimeConfig;
use arcade_script::{FsContentSource, ScriptEngine};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_target(false).init();
    let args: Vec<_> = std::env::args().collect();
    let script_root = args.get(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("assets/scripts"));
    let config = args
        .get(2)
        .map(RuntimeConfig::load_or_default)
        .unwrap_or_default();

    tracing::info!("checking scripts under '{}'", script_root.display());
    let mut engine = ScriptEngine::new(&config.scripting).context("initializing script engine")?;
    let content_root = match script_root.parent() {
        Some(parent) if script_root.is_file() => parent.to_path_buf(),
        _ => script_root.clone(),
    };
    let content = FsContentSource::new(&content_root);
    let scripts = collect_scripts(&script_root)?;
    let mut failures = 0usize;
    for script in &scripts {
        let relative = script.strip_prefix(&content_root).unwrap_or(script).to_string_lossy().replace('\\', "/");
        match engine.compile(&relative, &content) {
            Ok(handle) => {
                let entry = engine.entry_points(handle).unwrap_or_default();
                tracing::info!(
                    "ok {relative} (ready={} process={} collide={} generate={})",
                    entry.ready,
                    entry.process,
                    entry.collide,
                    entry.generate
                );
            }
            Err(err) => {
                failures += 1;
                tracing::error!("{err}");
            }
        }
    }
    tracing::info!("checked {} scripts, {} compiled ASTs cached", scripts.len(), engine.cached_asts());
    if failures > 0 {
        bail!("{failures} of {} scripts failed to compile", scripts.len());
    }
    Ok(())
}

fn collect_scripts(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if root.is_file() {
        if root.extension().and_then(|ext| ext.to_str()) == Some("rhai") {
            out.push(root.to_path_buf());
        }
        return Ok(out);
    }
    for entry in std::fs::read_dir(root).with_context(|| format!("Reading '{}'", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            out.extend(collect_scripts(&path)?);
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("rhai") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}
