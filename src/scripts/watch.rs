use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

/// Watches a script root and reports edited files as content-relative paths, the form
/// `ScriptEngine::reload_paths` expects.
pub struct ScriptWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    root: Option<PathBuf>,
}

impl ScriptWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(Duration::from_millis(250)),
            )
            .context("configure script watcher")?;
        Ok(Self { watcher, rx, root: None })
    }

    pub fn watch_root(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        if !root.is_dir() {
            anyhow::bail!("script root '{}' is not a directory", root.display());
        }
        let normalized = normalize(root);
        if self.root.as_ref() == Some(&normalized) {
            return Ok(());
        }
        if let Some(previous) = self.root.take() {
            let _ = self.watcher.unwatch(&previous);
        }
        self.watcher
            .watch(&normalized, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", normalized.display()))?;
        self.root = Some(normalized);
        Ok(())
    }

    /// Relative paths of every `.rhai` file touched since the last drain, deduplicated.
    pub fn drain_changes(&mut self) -> Vec<String> {
        let mut changed = BTreeSet::new();
        while let Ok(event) = self.rx.try_recv() {
            match event {
                Ok(event) if is_relevant(&event.kind) => {
                    for path in &event.paths {
                        if let Some(relative) = self.relative(path) {
                            changed.insert(relative);
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(target: "script", "script watcher error: {err}"),
            }
        }
        changed.into_iter().collect()
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let root = self.root.as_ref()?;
        if path.extension().and_then(|ext| ext.to_str()) != Some("rhai") {
            return None;
        }
        let normalized = normalize(path);
        let relative = normalized.strip_prefix(root).ok()?;
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Create(_)
            | EventKind::Remove(_)
    )
}

/// Canonical form where possible. Removed files cannot be canonicalized, so fall back to
/// canonicalizing the parent.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent).map(|p| p.join(name)).unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_roots() {
        let mut watcher = ScriptWatcher::new().expect("watcher");
        assert!(watcher.watch_root("definitely/not/here").is_err());
    }

    #[test]
    fn only_script_files_under_the_root_map_to_paths() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::create_dir_all(dir.path().join("enemies")).expect("mkdir");
        fs::write(dir.path().join("enemies/drone.rhai"), "").expect("write");
        fs::write(dir.path().join("notes.txt"), "").expect("write");
        let mut watcher = ScriptWatcher::new().expect("watcher");
        watcher.watch_root(dir.path()).expect("watch");
        assert_eq!(watcher.relative(&dir.path().join("enemies/drone.rhai")).as_deref(), Some("enemies/drone.rhai"));
        assert_eq!(watcher.relative(&dir.path().join("notes.txt")), None);
    }
}
