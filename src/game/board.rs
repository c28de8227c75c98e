//! Board geometry, layout and arrow placement

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::entity::{Direction, Entity, EntityId, EntityKind, PlayerId, Position};

/// Distinct goal cells a board offers; one per seat
pub const GOAL_SLOTS: usize = 8;

/// Discrete grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub col: i32,
    pub row: i32,
}

impl Cell {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    pub fn step(self, direction: Direction) -> Cell {
        let (dc, dr) = direction.cell_delta();
        Cell::new(self.col + dc, self.row + dr)
    }
}

/// Board dimensions in cells plus the cell edge in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardSize {
    pub cols: i32,
    pub rows: i32,
    pub tile: f32,
}

impl BoardSize {
    /// Board dimensions are a step function of the player count
    pub fn for_players(player_count: usize, tile: f32) -> Self {
        let (cols, rows) = match player_count {
            0..=2 => (12, 9),
            3..=4 => (16, 12),
            5..=6 => (20, 15),
            _ => (24, 18),
        };
        Self { cols, rows, tile }
    }

    pub fn width(&self) -> f32 {
        self.cols as f32 * self.tile
    }

    pub fn height(&self) -> f32 {
        self.rows as f32 * self.tile
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.col >= 0 && cell.row >= 0 && cell.col < self.cols && cell.row < self.rows
    }

    /// Cell under a position, clamped onto the board
    pub fn cell_at(&self, pos: Position) -> Cell {
        let col = (pos.x / self.tile).floor() as i32;
        let row = (pos.y / self.tile).floor() as i32;
        Cell::new(col.clamp(0, self.cols - 1), row.clamp(0, self.rows - 1))
    }

    pub fn cell_center(&self, cell: Cell) -> Position {
        Position::new(
            (cell.col as f32 + 0.5) * self.tile,
            (cell.row as f32 + 0.5) * self.tile,
        )
    }

    /// Clamp a position inside the board; non-finite coordinates land on the origin
    pub fn clamp(&self, pos: Position) -> Position {
        let x = if pos.x.is_finite() { pos.x } else { 0.0 };
        let y = if pos.y.is_finite() { pos.y } else { 0.0 };
        Position::new(x.clamp(0.0, self.width()), y.clamp(0.0, self.height()))
    }

    /// Centre of the grid cell nearest a position
    pub fn snap(&self, pos: Position) -> Position {
        self.cell_center(self.cell_at(self.clamp(pos)))
    }

    /// Cells where walkers enter, with their initial heading
    pub fn spawn_points(&self) -> [(Cell, Direction); 2] {
        let mid = self.rows / 2;
        [
            (Cell::new(0, mid), Direction::Right),
            (Cell::new(self.cols - 1, mid), Direction::Left),
        ]
    }

    /// Goal cell for the n-th player slot
    pub fn goal_slot(&self, slot: usize) -> Cell {
        let (c1, c2, c3) = (self.cols / 4, self.cols / 2, self.cols * 3 / 4);
        let (r1, r2, r3) = (self.rows / 4, self.rows / 2, self.rows * 3 / 4);
        let slots: [Cell; GOAL_SLOTS] = [
            Cell::new(c1, r1),
            Cell::new(c3, r3),
            Cell::new(c3, r1),
            Cell::new(c1, r3),
            Cell::new(c2, r1),
            Cell::new(c2, r3),
            Cell::new(c1, r2 + 1),
            Cell::new(c3, r2 - 1),
        ];
        slots[slot % slots.len()]
    }
}

/// What happened to an arrow placement request
#[derive(Debug, Clone, PartialEq)]
pub enum ArrowPlacement {
    Placed {
        id: EntityId,
        cell: Cell,
        /// The owner's oldest arrow, dropped to stay under the cap
        dropped: Option<EntityId>,
        /// An arrow that already occupied the cell
        replaced: Option<EntityId>,
    },
    /// Target cell holds a wall or goal
    Ignored,
}

/// Board contents; every list stays sorted by entity id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub size: BoardSize,
    /// Mice and cats
    pub entities: Vec<Entity>,
    pub goals: Vec<Entity>,
    pub walls: Vec<Entity>,
    pub arrows: Vec<Entity>,
}

impl Board {
    pub fn new(size: BoardSize) -> Self {
        Self {
            size,
            entities: Vec::new(),
            goals: Vec::new(),
            walls: Vec::new(),
            arrows: Vec::new(),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len() + self.goals.len() + self.walls.len() + self.arrows.len()
    }

    pub fn all_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities
            .iter()
            .chain(self.goals.iter())
            .chain(self.walls.iter())
            .chain(self.arrows.iter())
    }

    pub fn find(&self, id: EntityId) -> Option<&Entity> {
        self.all_entities().find(|e| e.id == id)
    }

    pub fn goal_at(&self, cell: Cell) -> Option<&Entity> {
        self.goals
            .iter()
            .find(|g| self.size.cell_at(g.position) == cell)
    }

    pub fn arrows_of(&self, owner: PlayerId) -> impl Iterator<Item = &Entity> {
        self.arrows.iter().filter(move |a| a.owner() == Some(owner))
    }

    /// Lay out walls and goals for the current size and player list.
    ///
    /// Goals of players still present keep their ids; walls are rebuilt only
    /// when the size changed.
    pub fn layout(&mut self, size: BoardSize, players: &[PlayerId], next_id: &mut u64) {
        let resized = size != self.size || self.walls.is_empty();
        self.size = size;

        self.goals.retain(|g| g.owner().is_some_and(|o| players.contains(&o)));
        for (slot, owner) in players.iter().enumerate() {
            let position = size.cell_center(size.goal_slot(slot));
            match self.goals.iter_mut().find(|g| g.owner() == Some(*owner)) {
                Some(goal) => goal.position = position,
                None => {
                    let id = alloc(next_id);
                    self.goals.push(Entity::new(
                        id,
                        EntityKind::Goal { owner: *owner },
                        position,
                        Direction::Up,
                    ));
                }
            }
        }

        if resized {
            self.walls.clear();
            // Every slot a goal could ever occupy stays free of walls so a
            // join never has to move pillars
            let reserved: HashSet<Cell> = (0..GOAL_SLOTS)
                .map(|slot| size.goal_slot(slot))
                .collect();
            let spawn_row = size.rows / 2;
            for row in 0..size.rows {
                for col in 0..size.cols {
                    let cell = Cell::new(col, row);
                    if col % 4 == 2 && row % 4 == 2 && row != spawn_row && !reserved.contains(&cell) {
                        let id = alloc(next_id);
                        self.walls.push(Entity::new(
                            id,
                            EntityKind::Wall,
                            size.cell_center(cell),
                            Direction::Up,
                        ));
                    }
                }
            }
        }

        // Walkers are pulled back onto the grid; arrows that fell off or now
        // sit on a wall or goal are removed
        if resized {
            for walker in &mut self.entities {
                walker.position = size.snap(walker.position);
            }
        }
        let blocked: HashSet<Cell> = self
            .walls
            .iter()
            .chain(self.goals.iter())
            .map(|e| size.cell_at(e.position))
            .collect();
        self.arrows.retain(|a| {
            let cell = Cell::new(
                (a.position.x / size.tile).floor() as i32,
                (a.position.y / size.tile).floor() as i32,
            );
            size.contains(cell) && !blocked.contains(&cell)
        });

        self.goals.sort_by_key(|g| g.id);
    }

    /// Place an arrow at the cell nearest `cursor`
    pub fn place_arrow(
        &mut self,
        owner: PlayerId,
        cursor: Position,
        direction: Direction,
        max_arrows: usize,
        id: EntityId,
    ) -> ArrowPlacement {
        let cell = self.size.cell_at(self.size.clamp(cursor));
        let on_wall = self.walls.iter().any(|w| self.size.cell_at(w.position) == cell);
        if on_wall || self.goal_at(cell).is_some() || max_arrows == 0 {
            return ArrowPlacement::Ignored;
        }

        let size = self.size;
        let occupied = self.arrows.iter().position(|a| size.cell_at(a.position) == cell);
        let replaced = occupied.map(|idx| self.arrows.remove(idx).id);

        let mut dropped = None;
        if self.arrows_of(owner).count() >= max_arrows {
            let oldest = self
                .arrows_of(owner)
                .min_by_key(|a| match a.kind {
                    EntityKind::Arrow { placed_seq, .. } => placed_seq,
                    _ => u64::MAX,
                })
                .map(|a| a.id);
            if let Some(oldest) = oldest {
                self.arrows.retain(|a| a.id != oldest);
                dropped = Some(oldest);
            }
        }

        let placed_seq = self
            .arrows
            .iter()
            .filter_map(|a| match a.kind {
                EntityKind::Arrow { placed_seq, .. } => Some(placed_seq),
                _ => None,
            })
            .max()
            .map_or(0, |seq| seq + 1);

        self.arrows.push(Entity::new(
            id,
            EntityKind::Arrow { owner, placed_seq },
            self.size.cell_center(cell),
            direction,
        ));
        self.arrows.sort_by_key(|a| a.id);

        ArrowPlacement::Placed {
            id,
            cell,
            dropped,
            replaced,
        }
    }

    /// Remove every arrow of one player, returning how many went
    pub fn clear_arrows_of(&mut self, owner: PlayerId) -> usize {
        let before = self.arrows.len();
        self.arrows.retain(|a| a.owner() != Some(owner));
        before - self.arrows.len()
    }
}

fn alloc(next_id: &mut u64) -> EntityId {
    let id = EntityId(*next_id);
    *next_id += 1;
    id
}

/// Per-tick lookup of walls and arrows by cell
#[derive(Debug, Clone)]
pub struct CellIndex {
    pub size: BoardSize,
    walls: HashSet<Cell>,
    arrows: HashMap<Cell, Direction>,
}

impl CellIndex {
    pub fn build(board: &Board) -> Self {
        let size = board.size;
        Self {
            size,
            walls: board.walls.iter().map(|w| size.cell_at(w.position)).collect(),
            arrows: board
                .arrows
                .iter()
                .map(|a| (size.cell_at(a.position), a.direction))
                .collect(),
        }
    }

    /// Walls and the board edge both block movement
    pub fn is_blocked(&self, cell: Cell) -> bool {
        !self.size.contains(cell) || self.walls.contains(&cell)
    }

    pub fn arrow(&self, cell: Cell) -> Option<Direction> {
        self.arrows.get(&cell).copied()
    }
}

/// Outcome string for a cursor move, shared by client prediction and server
pub fn describe_cursor(pos: Position) -> String {
    format!("cursor:{},{}", pos.x.round() as i64, pos.y.round() as i64)
}

/// Outcome string for an arrow placement
pub fn describe_arrow(placement: &ArrowPlacement, direction: Direction) -> String {
    match placement {
        ArrowPlacement::Placed { cell, .. } => {
            format!("arrow:{},{}:{}", cell.col, cell.row, direction.as_str())
        }
        ArrowPlacement::Ignored => "ignored".to_string(),
    }
}
