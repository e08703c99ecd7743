pub mod physics;

use std::collections::BTreeMap;
use std::fmt;

use bevy_ecs::prelude::*;
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::binding::Binding;
use crate::config::PhysicsConfig;
use crate::scripts::{MarshalError, PropertyMap, ScriptValue};

pub use physics::{SpatialHash, TimeDelta, WorldBounds};

/// Process-unique entity identifier. Allocated monotonically and never reused, so ordering by id
/// is ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn to_script(self) -> rhai::INT {
        self.0 as rhai::INT
    }

    pub fn from_script(raw: rhai::INT) -> Option<Self> {
        (raw > 0).then_some(EntityId(raw as u64))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------- Components ----------
#[derive(Component, Clone)]
pub struct ScriptEntity {
    pub id: EntityId,
    pub category: String,
    pub template: String,
    pub alive: bool,
}
#[derive(Component, Clone, Copy, Default)]
pub struct Transform {
    pub translation: DVec2,
}
#[derive(Component, Clone, Copy, Default)]
pub struct Velocity(pub DVec2);
#[derive(Component, Clone, Copy)]
pub struct Aabb {
    pub half: DVec2,
}
#[derive(Component, Clone, Default)]
pub struct Properties(pub PropertyMap);

/// Plain-data copy of one entity, the shape scripts and observers see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub category: String,
    pub template: String,
    pub position: DVec2,
    pub velocity: DVec2,
    pub properties: PropertyMap,
    pub alive: bool,
}

impl EntityState {
    /// Reads a property, resolving the reserved transform names first.
    pub fn property(&self, name: &str) -> Option<ScriptValue> {
        match name {
            "x" => Some(ScriptValue::Number(self.position.x)),
            "y" => Some(ScriptValue::Number(self.position.y)),
            "vx" => Some(ScriptValue::Number(self.velocity.x)),
            "vy" => Some(ScriptValue::Number(self.velocity.y)),
            "position" => Some(ScriptValue::Vec2(self.position)),
            "velocity" => Some(ScriptValue::Vec2(self.velocity)),
            _ => self.properties.get(name).cloned(),
        }
    }

    /// Writes a property. Reserved names keep their type; everything else is free-form.
    pub fn write(&mut self, name: &str, value: ScriptValue) -> Result<(), MarshalError> {
        match name {
            "x" => self.position.x = expect_number(name, &value)?,
            "y" => self.position.y = expect_number(name, &value)?,
            "vx" => self.velocity.x = expect_number(name, &value)?,
            "vy" => self.velocity.y = expect_number(name, &value)?,
            "position" => self.position = expect_vec2(name, &value)?,
            "velocity" => self.velocity = expect_vec2(name, &value)?,
            _ => {
                self.properties.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.property(name).and_then(|value| value.as_number())
    }
}

fn expect_number(name: &str, value: &ScriptValue) -> Result<f64, MarshalError> {
    value.as_number().ok_or_else(|| MarshalError::PropertyType {
        name: name.to_string(),
        expected: "number",
        found: value.kind(),
    })
}

fn expect_vec2(name: &str, value: &ScriptValue) -> Result<DVec2, MarshalError> {
    value.as_vec2().ok_or_else(|| MarshalError::PropertyType {
        name: name.to_string(),
        expected: "vec2",
        found: value.kind(),
    })
}

/// Read-only copy of the live set, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct WorldView {
    entities: BTreeMap<EntityId, EntityState>,
}

impl WorldView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values()
    }

    pub fn upsert(&mut self, state: EntityState) {
        self.entities.insert(state.id, state);
    }

    pub fn remove(&mut self, id: EntityId) {
        self.entities.remove(&id);
    }

    pub fn count(&self, category: &str) -> usize {
        self.entities.values().filter(|state| state.alive && state.category == category).count()
    }

    /// Nearest live entity of `category` within `radius` of `origin`, excluding `exclude`.
    /// Equal distances resolve to the lower id.
    pub fn nearest(&self, origin: DVec2, category: &str, radius: f64, exclude: EntityId) -> Option<EntityId> {
        let radius_sq = radius * radius;
        let mut best: Option<(f64, EntityId)> = None;
        for state in self.entities.values() {
            if state.id == exclude || !state.alive || state.category != category {
                continue;
            }
            let dist_sq = state.position.distance_squared(origin);
            if dist_sq > radius_sq {
                continue;
            }
            if best.map_or(true, |(current, _)| dist_sq < current) {
                best = Some((dist_sq, state.id));
            }
        }
        best.map(|(_, id)| id)
    }
}

// ---------- World container ----------
pub struct EcsWorld {
    pub world: World,
    index: BTreeMap<EntityId, Entity>,
    next_id: u64,
    schedule_fixed: Schedule,
}

impl EcsWorld {
    pub fn new(config: &PhysicsConfig) -> Self {
        let mut world = World::new();
        world.insert_resource(TimeDelta(0.0));
        world.insert_resource(SpatialHash::new(config.spatial_cell));
        world.insert_resource(WorldBounds::from_config(config));

        let mut schedule_fixed = Schedule::default();
        schedule_fixed.add_systems((physics::sys_integrate_positions, physics::sys_world_bounds_bounce).chain());

        Self { world, index: BTreeMap::new(), next_id: 1, schedule_fixed }
    }

    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, state: EntityState, half: DVec2, binding: Binding) -> Entity {
        let id = state.id;
        let entity = self
            .world
            .spawn((
                ScriptEntity { id, category: state.category, template: state.template, alive: true },
                Transform { translation: state.position },
                Velocity(state.velocity),
                Aabb { half },
                Properties(state.properties),
                binding,
            ))
            .id();
        self.index.insert(id, entity);
        entity
    }

    /// Removes an entity and its binding. Returns the last state it had.
    pub fn despawn(&mut self, id: EntityId) -> Option<EntityState> {
        let entity = self.index.remove(&id)?;
        let mut state = self.state_of(entity);
        self.world.despawn(entity);
        if let Some(state) = state.as_mut() {
            state.alive = false;
        }
        state
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Live ids in creation order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.index.keys().copied().collect()
    }

    pub fn state(&self, id: EntityId) -> Option<EntityState> {
        let entity = *self.index.get(&id)?;
        self.state_of(entity)
    }

    fn state_of(&self, entity: Entity) -> Option<EntityState> {
        let ident = self.world.get::<ScriptEntity>(entity)?;
        let position = self.world.get::<Transform>(entity).map(|t| t.translation).unwrap_or_default();
        let velocity = self.world.get::<Velocity>(entity).map(|v| v.0).unwrap_or_default();
        let properties = self.world.get::<Properties>(entity).map(|p| p.0.clone()).unwrap_or_default();
        Some(EntityState {
            id: ident.id,
            category: ident.category.clone(),
            template: ident.template.clone(),
            position,
            velocity,
            properties,
            alive: ident.alive,
        })
    }

    pub fn category(&self, id: EntityId) -> Option<&str> {
        let entity = *self.index.get(&id)?;
        self.world.get::<ScriptEntity>(entity).map(|ident| ident.category.as_str())
    }

    pub fn view(&self) -> WorldView {
        let mut view = WorldView::empty();
        for &entity in self.index.values() {
            if let Some(state) = self.state_of(entity) {
                view.upsert(state);
            }
        }
        view
    }

    /// Applies a batch of own-property writes. Either every write lands or none does.
    pub fn apply_writes(&mut self, id: EntityId, writes: &[(String, ScriptValue)]) -> Result<EntityState, MarshalError> {
        let Some(mut state) = self.state(id) else {
            return Err(MarshalError::Unsupported { type_name: format!("entity {id}") });
        };
        for (name, value) in writes {
            state.write(name, value.clone())?;
        }
        self.store_state(&state);
        Ok(state)
    }

    fn store_state(&mut self, state: &EntityState) {
        let Some(&entity) = self.index.get(&state.id) else {
            return;
        };
        if let Some(mut transform) = self.world.get_mut::<Transform>(entity) {
            transform.translation = state.position;
        }
        if let Some(mut velocity) = self.world.get_mut::<Velocity>(entity) {
            velocity.0 = state.velocity;
        }
        if let Some(mut properties) = self.world.get_mut::<Properties>(entity) {
            properties.0 = state.properties.clone();
        }
    }

    pub fn binding(&self, id: EntityId) -> Option<&Binding> {
        let entity = *self.index.get(&id)?;
        self.world.get::<Binding>(entity)
    }

    pub fn binding_mut(&mut self, id: EntityId) -> Option<Mut<'_, Binding>> {
        let entity = *self.index.get(&id)?;
        self.world.get_mut::<Binding>(entity)
    }

    pub fn half_extents(&self, id: EntityId) -> Option<DVec2> {
        let entity = *self.index.get(&id)?;
        self.world.get::<Aabb>(entity).map(|aabb| aabb.half)
    }

    /// Host physics: integrate velocities and keep entities inside the configured bounds.
    pub fn fixed_step(&mut self, dt: f64) {
        self.world.resource_mut::<TimeDelta>().0 = dt;
        self.schedule_fixed.run(&mut self.world);
    }

    /// Overlapping pairs `(a, b)` with `a < b`, sorted, restricted to pairs `accept` approves.
    pub fn detect_overlaps(&mut self, accept: impl Fn(&str, &str) -> bool) -> Vec<(EntityId, EntityId)> {
        let mut colliders = Vec::with_capacity(self.index.len());
        let mut query = self.world.query::<(&ScriptEntity, &Transform, &Aabb)>();
        for (ident, transform, aabb) in query.iter(&self.world) {
            colliders.push(physics::Collider {
                id: ident.id,
                category: ident.category.clone(),
                center: transform.translation,
                half: aabb.half,
            });
        }
        colliders.sort_by_key(|collider| collider.id);
        let mut grid = self.world.resource_mut::<SpatialHash>();
        physics::overlapping_pairs(&mut grid, &colliders, accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u64, category: &str, position: DVec2) -> EntityState {
        EntityState {
            id: EntityId(id),
            category: category.to_string(),
            template: category.to_string(),
            position,
            velocity: DVec2::ZERO,
            properties: PropertyMap::new(),
            alive: true,
        }
    }

    #[test]
    fn reserved_properties_keep_their_types() {
        let mut entity = state(1, "ship", DVec2::ZERO);
        entity.write("vx", ScriptValue::Number(2.0)).expect("number write");
        assert_eq!(entity.velocity.x, 2.0);
        let err = entity.write("x", ScriptValue::Str("left".into())).unwrap_err();
        assert!(matches!(err, MarshalError::PropertyType { expected: "number", .. }));
        entity.write("hp", ScriptValue::Number(3.0)).expect("free-form write");
        assert_eq!(entity.number("hp"), Some(3.0));
    }

    #[test]
    fn nearest_prefers_lower_id_on_ties() {
        let mut view = WorldView::empty();
        view.upsert(state(1, "ship", DVec2::ZERO));
        view.upsert(state(3, "rock", DVec2::new(1.0, 0.0)));
        view.upsert(state(2, "rock", DVec2::new(-1.0, 0.0)));
        view.upsert(state(4, "rock", DVec2::new(5.0, 0.0)));
        assert_eq!(view.nearest(DVec2::ZERO, "rock", 2.0, EntityId(1)), Some(EntityId(2)));
        assert_eq!(view.nearest(DVec2::ZERO, "rock", 0.5, EntityId(1)), None);
        assert_eq!(view.count("rock"), 3);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut world = EcsWorld::new(&PhysicsConfig::default());
        let first = world.allocate_id();
        world.insert(state(first.0, "ship", DVec2::ZERO), DVec2::splat(0.5), Binding::default());
        world.despawn(first);
        let second = world.allocate_id();
        assert!(second > first);
        assert!(!world.contains(first));
    }

    #[test]
    fn failed_write_batches_leave_state_untouched() {
        let mut world = EcsWorld::new(&PhysicsConfig::default());
        let id = world.allocate_id();
        world.insert(state(id.0, "ship", DVec2::ZERO), DVec2::splat(0.5), Binding::default());
        let writes = vec![
            ("hp".to_string(), ScriptValue::Number(9.0)),
            ("x".to_string(), ScriptValue::Bool(true)),
        ];
        assert!(world.apply_writes(id, &writes).is_err());
        let stored = world.state(id).expect("entity");
        assert!(stored.properties.get("hp").is_none());
    }

    #[test]
    fn fixed_step_integrates_velocity() {
        let mut world = EcsWorld::new(&PhysicsConfig::default());
        let id = world.allocate_id();
        let mut moving = state(id.0, "ship", DVec2::ZERO);
        moving.velocity = DVec2::new(2.0, 0.0);
        world.insert(moving, DVec2::splat(0.5), Binding::default());
        world.fixed_step(0.5);
        let stored = world.state(id).expect("entity");
        assert!((stored.position.x - 1.0).abs() < 1e-9);
    }
}
