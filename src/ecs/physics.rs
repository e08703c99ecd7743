use std::collections::{BTreeSet, HashMap};

use bevy_ecs::prelude::*;
use glam::DVec2;
use smallvec::SmallVec;

use super::{Aabb, EntityId, Transform, Velocity};
use crate::config::PhysicsConfig;

#[derive(Resource, Clone, Copy)]
pub struct TimeDelta(pub f64);

#[derive(Resource, Clone, Copy)]
pub struct WorldBounds {
    pub area: Option<(DVec2, DVec2)>,
}

impl WorldBounds {
    pub fn from_config(config: &PhysicsConfig) -> Self {
        let area = config.bounds.map(|bounds| (DVec2::from(bounds.min), DVec2::from(bounds.max)));
        Self { area }
    }
}

// ---------- Spatial hash ----------
#[derive(Resource)]
pub struct SpatialHash {
    pub cell: f64,
    pub grid: HashMap<(i32, i32), SmallVec<[usize; 8]>>,
}

impl SpatialHash {
    pub fn new(cell: f64) -> Self {
        Self { cell: cell.max(f64::EPSILON), grid: HashMap::new() }
    }

    pub fn clear(&mut self) {
        self.grid.clear();
    }

    fn key(&self, p: DVec2) -> (i32, i32) {
        ((p.x / self.cell).floor() as i32, (p.y / self.cell).floor() as i32)
    }

    pub fn insert(&mut self, slot: usize, pos: DVec2, half: DVec2) {
        let (kx0, ky0) = self.key(pos - half);
        let (kx1, ky1) = self.key(pos + half);
        for ky in ky0..=ky1 {
            for kx in kx0..=kx1 {
                self.grid.entry((kx, ky)).or_default().push(slot);
            }
        }
    }
}

pub(crate) struct Collider {
    pub id: EntityId,
    pub category: String,
    pub center: DVec2,
    pub half: DVec2,
}

// ---------- Systems ----------
pub fn sys_integrate_positions(mut q: Query<(&mut Transform, &Velocity)>, dt: Res<TimeDelta>) {
    for (mut t, v) in &mut q {
        t.translation += v.0 * dt.0;
    }
}

pub fn sys_world_bounds_bounce(bounds: Res<WorldBounds>, mut q: Query<(&mut Transform, &mut Velocity, &Aabb)>) {
    let Some((min, max)) = bounds.area else {
        return;
    };
    for (mut t, mut v, aabb) in &mut q {
        let half = aabb.half;
        if t.translation.x - half.x < min.x {
            t.translation.x = min.x + half.x;
            v.0.x = v.0.x.abs();
        }
        if t.translation.x + half.x > max.x {
            t.translation.x = max.x - half.x;
            v.0.x = -v.0.x.abs();
        }
        if t.translation.y - half.y < min.y {
            t.translation.y = min.y + half.y;
            v.0.y = v.0.y.abs();
        }
        if t.translation.y + half.y > max.y {
            t.translation.y = max.y - half.y;
            v.0.y = -v.0.y.abs();
        }
    }
}

/// Broad phase through the spatial hash, narrow phase by AABB. Each pair appears once, ordered.
pub(crate) fn overlapping_pairs(
    grid: &mut SpatialHash,
    colliders: &[Collider],
    accept: impl Fn(&str, &str) -> bool,
) -> Vec<(EntityId, EntityId)> {
    grid.clear();
    for (slot, collider) in colliders.iter().enumerate() {
        grid.insert(slot, collider.center, collider.half);
    }
    let mut pairs = BTreeSet::new();
    for cell in grid.grid.values() {
        for (i, &a) in cell.iter().enumerate() {
            for &b in &cell[i + 1..] {
                let (first, second) = (&colliders[a], &colliders[b]);
                if first.id == second.id {
                    continue;
                }
                if !accept(&first.category, &second.category) && !accept(&second.category, &first.category) {
                    continue;
                }
                if overlap(first.center, first.half, second.center, second.half) {
                    let pair = if first.id < second.id { (first.id, second.id) } else { (second.id, first.id) };
                    pairs.insert(pair);
                }
            }
        }
    }
    pairs.into_iter().collect()
}

fn overlap(a_pos: DVec2, a_half: DVec2, b_pos: DVec2, b_half: DVec2) -> bool {
    (a_pos.x - b_pos.x).abs() < (a_half.x + b_half.x) && (a_pos.y - b_pos.y).abs() < (a_half.y + b_half.y)
}
