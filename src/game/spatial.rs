//! Uniform-cell spatial index for near-neighbour collision queries

use std::collections::{BTreeSet, HashMap};

use super::entity::{Entity, EntityId, Position};
use super::physics::PhysicsSystem;

/// Average number of entities a cell should hold after `optimize_cell_size`
const TARGET_OCCUPANCY: f32 = 4.0;

/// Maps cell coordinates to indices into the entity slice it was built from.
///
/// The grid holds indices, not entities, so it must be cleared and rebuilt
/// from the current slice every tick before it is queried.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    /// Never shrink cells below the query radius, or 3x3 lookups miss pairs
    min_cell_size: f32,
    cells: HashMap<(i32, i32), Vec<usize>>,
    len: usize,
}

impl SpatialGrid {
    pub fn new(cell_size: f32, min_cell_size: f32) -> Self {
        let min_cell_size = min_cell_size.max(f32::EPSILON);
        Self {
            cell_size: cell_size.max(min_cell_size),
            min_cell_size,
            cells: HashMap::new(),
            len: 0,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Pick a cell size that keeps average occupancy near the target
    pub fn optimize_cell_size(&mut self, entity_count: usize, area: f32) {
        let max = area.sqrt().max(self.min_cell_size);
        if entity_count == 0 {
            self.cell_size = max;
            return;
        }
        let ideal = (area * TARGET_OCCUPANCY / entity_count as f32).sqrt();
        self.cell_size = ideal.clamp(self.min_cell_size, max);
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }

    fn key(&self, pos: Position) -> (i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
        )
    }

    /// Point entities are covered by exactly one cell
    pub fn insert(&mut self, index: usize, entity: &Entity) {
        let key = self.key(entity.position);
        self.cells.entry(key).or_default().push(index);
        self.len += 1;
    }

    /// Clear and repopulate from a slice
    pub fn rebuild<'a>(&mut self, entities: impl IntoIterator<Item = (usize, &'a Entity)>) {
        self.clear();
        for (index, entity) in entities {
            self.insert(index, entity);
        }
    }

    /// Indices in the entity's own cell and the 8 around it, itself included
    pub fn nearby_objects(&self, entity: &Entity) -> Vec<usize> {
        let (cx, cy) = self.key(entity.position);
        let mut found = Vec::new();
        for dy in -1..=1 {
            for dx in -1..=1 {
                if let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) {
                    found.extend_from_slice(bucket);
                }
            }
        }
        found
    }

    /// Every unordered pair of walkers within `radius`, as (lower id, higher id)
    pub fn collision_pairs(&mut self, entities: &[Entity], radius: f32) -> BTreeSet<(EntityId, EntityId)> {
        self.rebuild(entities.iter().enumerate().filter(|(_, e)| e.is_walker()));
        let mut pairs = BTreeSet::new();
        for (i, a) in entities.iter().enumerate().filter(|(_, e)| e.is_walker()) {
            for j in self.nearby_objects(a) {
                if j <= i {
                    continue;
                }
                let b = &entities[j];
                if PhysicsSystem::within(a.position, b.position, radius) {
                    pairs.insert(ordered(a.id, b.id));
                }
            }
        }
        pairs
    }

    /// Mouse-cat contacts as `(mouse, cat)` pairs, sorted
    pub fn find_collisions(&mut self, entities: &[Entity], radius: f32) -> Vec<(EntityId, EntityId)> {
        self.rebuild(entities.iter().enumerate().filter(|(_, e)| e.is_mouse()));
        let mut hits = Vec::new();
        for cat in entities.iter().filter(|e| e.is_cat()) {
            for i in self.nearby_objects(cat) {
                let mouse = &entities[i];
                if PhysicsSystem::within(mouse.position, cat.position, radius) {
                    hits.push((mouse.id, cat.id));
                }
            }
        }
        hits.sort();
        hits
    }
}

fn ordered(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// All-pairs reference for [`SpatialGrid::collision_pairs`]
pub fn brute_force_pairs(entities: &[Entity], radius: f32) -> BTreeSet<(EntityId, EntityId)> {
    let walkers: Vec<&Entity> = entities.iter().filter(|e| e.is_walker()).collect();
    let mut pairs = BTreeSet::new();
    for i in 0..walkers.len() {
        for j in (i + 1)..walkers.len() {
            if PhysicsSystem::within(walkers[i].position, walkers[j].position, radius) {
                pairs.insert(ordered(walkers[i].id, walkers[j].id));
            }
        }
    }
    pairs
}

/// All-pairs reference for [`SpatialGrid::find_collisions`]
pub fn brute_force_collisions(entities: &[Entity], radius: f32) -> Vec<(EntityId, EntityId)> {
    let mut hits = Vec::new();
    for mouse in entities.iter().filter(|e| e.is_mouse()) {
        for cat in entities.iter().filter(|e| e.is_cat()) {
            if PhysicsSystem::within(mouse.position, cat.position, radius) {
                hits.push((mouse.id, cat.id));
            }
        }
    }
    hits.sort();
    hits
}
