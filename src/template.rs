use anyhow::{Context, Result};
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::scripts::PropertyMap;

/// A script slot in a template. Plain strings are accepted as an isolated reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ScriptRefRepr")]
pub struct ScriptRef {
    pub path: String,
    pub shared: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptRefRepr {
    Path(String),
    Full {
        path: String,
        #[serde(default)]
        shared: bool,
    },
}

impl From<ScriptRefRepr> for ScriptRef {
    fn from(repr: ScriptRefRepr) -> Self {
        match repr {
            ScriptRefRepr::Path(path) => ScriptRef { path, shared: false },
            ScriptRefRepr::Full { path, shared } => ScriptRef { path, shared },
        }
    }
}

impl ScriptRef {
    pub fn isolated(path: impl Into<String>) -> Self {
        Self { path: path.into(), shared: false }
    }

    pub fn shared(path: impl Into<String>) -> Self {
        Self { path: path.into(), shared: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTemplate {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub properties: PropertyMap,
    #[serde(default)]
    pub position: DVec2,
    #[serde(default)]
    pub velocity: DVec2,
    #[serde(default = "EntityTemplate::default_half_extents")]
    pub half_extents: DVec2,
    #[serde(default)]
    pub behavior: Option<ScriptRef>,
    /// Collision actions keyed by the category of the other entity.
    #[serde(default)]
    pub collisions: BTreeMap<String, ScriptRef>,
    #[serde(default)]
    pub generator: Option<ScriptRef>,
}

impl EntityTemplate {
    fn default_half_extents() -> DVec2 {
        DVec2::splat(0.5)
    }

    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            properties: PropertyMap::new(),
            position: DVec2::ZERO,
            velocity: DVec2::ZERO,
            half_extents: Self::default_half_extents(),
            behavior: None,
            collisions: BTreeMap::new(),
            generator: None,
        }
    }

    pub fn with_behavior(mut self, script: ScriptRef) -> Self {
        self.behavior = Some(script);
        self
    }

    pub fn with_collision(mut self, other_category: impl Into<String>, script: ScriptRef) -> Self {
        self.collisions.insert(other_category.into(), script);
        self
    }

    pub fn with_generator(mut self, script: ScriptRef) -> Self {
        self.generator = Some(script);
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<crate::scripts::ScriptValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_velocity(mut self, velocity: DVec2) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_half_extents(mut self, half: DVec2) -> Self {
        self.half_extents = half;
        self
    }
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    templates: Vec<EntityTemplate>,
}

/// Ordered category pairs `(a, b)` for which some `a` template acts on `b`.
#[derive(Debug, Clone, Default)]
pub struct CollisionMatrix {
    pairs: BTreeSet<(String, String)>,
}

impl CollisionMatrix {
    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.pairs.contains(&(from.to_string(), to.to_string()))
    }

    /// True when a collision between the two categories would fire anything.
    pub fn interested(&self, a: &str, b: &str) -> bool {
        self.contains(a, b) || self.contains(b, a)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, EntityTemplate>,
    names: Rc<BTreeSet<String>>,
    matrix: CollisionMatrix,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_templates(templates: impl IntoIterator<Item = EntityTemplate>) -> Self {
        let mut library = Self::new();
        for template in templates {
            library.insert(template);
        }
        library
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read templates {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Failed to parse templates {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: TemplateFile = serde_json::from_str(text)?;
        let mut seen = BTreeSet::new();
        for template in &file.templates {
            if !seen.insert(template.name.as_str()) {
                anyhow::bail!("template '{}' is defined twice", template.name);
            }
        }
        Ok(Self::from_templates(file.templates))
    }

    pub fn insert(&mut self, template: EntityTemplate) {
        self.templates.insert(template.name.clone(), template);
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.names = Rc::new(self.templates.keys().cloned().collect());
        let pairs = self
            .templates
            .values()
            .flat_map(|template| template.collisions.keys().map(|other| (template.category.clone(), other.clone())))
            .collect();
        self.matrix = CollisionMatrix { pairs };
    }

    pub fn get(&self, name: &str) -> Option<&EntityTemplate> {
        self.templates.get(name)
    }

    pub fn names(&self) -> Rc<BTreeSet<String>> {
        self.names.clone()
    }

    pub fn matrix(&self) -> &CollisionMatrix {
        &self.matrix
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityTemplate> {
        self.templates.values()
    }
}
