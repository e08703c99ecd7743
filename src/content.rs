use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

/// Change marker for a script source. Only equality matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceMarker(pub u128);

#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub text: String,
    pub marker: SourceMarker,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContentError {
    #[error("script '{0}' not found")]
    NotFound(String),
    #[error("script path '{0}' escapes the content root")]
    OutsideRoot(String),
    #[error("reading '{path}': {message}")]
    Io { path: String, message: String },
}

/// Resolves script paths to source text. The core never touches storage any other way.
pub trait ContentSource {
    fn resolve(&self, path: &str) -> Result<ScriptSource, ContentError>;

    /// Current marker without reading the text, or `None` when the path no longer resolves.
    fn marker(&self, path: &str) -> Option<SourceMarker>;
}

/// Scripts stored under a directory. Paths are relative and may not climb out of the root.
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn full_path(&self, path: &str) -> Result<PathBuf, ContentError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ContentError::OutsideRoot(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn marker_for(full: &Path) -> Option<SourceMarker> {
        let modified = fs::metadata(full).ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let nanos = modified.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
        Some(SourceMarker(nanos))
    }
}

impl ContentSource for FsContentSource {
    fn resolve(&self, path: &str) -> Result<ScriptSource, ContentError> {
        let full = self.full_path(path)?;
        if !full.is_file() {
            return Err(ContentError::NotFound(path.to_string()));
        }
        let text = fs::read_to_string(&full)
            .map_err(|err| ContentError::Io { path: path.to_string(), message: err.to_string() })?;
        let marker = Self::marker_for(&full).unwrap_or(SourceMarker(0));
        Ok(ScriptSource { text, marker })
    }

    fn marker(&self, path: &str) -> Option<SourceMarker> {
        let full = self.full_path(path).ok()?;
        Self::marker_for(&full)
    }
}

/// Live-editable scripts held in memory. Every write bumps a revision that serves as the marker.
#[derive(Default)]
pub struct MemoryContentSource {
    scripts: HashMap<String, (String, u128)>,
    revision: u128,
}

impl MemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.revision += 1;
        self.scripts.insert(path.into(), (text.into(), self.revision));
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.scripts.remove(path).is_some()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.scripts.contains_key(path)
    }
}

impl ContentSource for MemoryContentSource {
    fn resolve(&self, path: &str) -> Result<ScriptSource, ContentError> {
        self.scripts
            .get(path)
            .map(|(text, revision)| ScriptSource { text: text.clone(), marker: SourceMarker(*revision) })
            .ok_or_else(|| ContentError::NotFound(path.to_string()))
    }

    fn marker(&self, path: &str) -> Option<SourceMarker> {
        self.scripts.get(path).map(|(_, revision)| SourceMarker(*revision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_source_rejects_paths_outside_root() {
        let source = FsContentSource::new("assets");
        assert!(matches!(source.full_path("../secret.rhai"), Err(ContentError::OutsideRoot(_))));
        assert!(matches!(source.full_path("/etc/passwd"), Err(ContentError::OutsideRoot(_))));
        assert!(source.full_path("scripts/ship.rhai").is_ok());
    }

    #[test]
    fn fs_source_reports_missing_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let source = FsContentSource::new(dir.path());
        assert!(matches!(source.resolve("missing.rhai"), Err(ContentError::NotFound(_))));
        fs::write(dir.path().join("present.rhai"), "fn process(world, entity, dt) {}").expect("write");
        let resolved = source.resolve("present.rhai").expect("resolve");
        assert!(resolved.text.contains("process"));
        assert_eq!(source.marker("present.rhai"), Some(resolved.marker));
    }

    #[test]
    fn memory_source_bumps_marker_on_every_write() {
        let mut source = MemoryContentSource::new().with_script("a.rhai", "1");
        let first = source.marker("a.rhai").expect("marker");
        source.insert("a.rhai", "2");
        let second = source.marker("a.rhai").expect("marker");
        assert_ne!(first, second);
        assert_eq!(source.resolve("a.rhai").expect("resolve").text, "2");
        assert!(source.remove("a.rhai"));
        assert!(source.marker("a.rhai").is_none());
    }
}
