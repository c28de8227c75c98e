//! Board entities as a single tagged variant

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Players are identified by the id their connection presented
pub type PlayerId = Uuid;

/// Stable entity id, unique within a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    const PROVISIONAL_BIT: u64 = 1 << 62;

    /// Id for an entity the client predicted before the server assigned one
    pub fn provisional(input_sequence: u64) -> Self {
        Self(Self::PROVISIONAL_BIT | input_sequence)
    }

    pub fn is_provisional(self) -> bool {
        self.0 & Self::PROVISIONAL_BIT != 0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pixel position on the board
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Position) -> f32 {
        self.distance_sq(other).sqrt()
    }

    pub fn distance_sq(self, other: Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Step `distance` pixels along `direction`
    pub fn offset(self, direction: Direction, distance: f32) -> Position {
        let (dx, dy) = direction.vector();
        Position::new(self.x + dx * distance, self.y + dy * distance)
    }

    pub fn lerp(self, to: Position, t: f32) -> Position {
        Position::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Cardinal heading; screen coordinates, so `Up` is negative y
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::Up, Direction::Right, Direction::Down, Direction::Left];

    pub fn vector(self) -> (f32, f32) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Right => (1.0, 0.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
        }
    }

    /// Cell offset as (column, row) deltas
    pub fn cell_delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    pub fn turn_right(self) -> Self {
        match self {
            Direction::Up => Direction::Right,
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
        }
    }

    pub fn turn_left(self) -> Self {
        self.turn_right().turn_right().turn_right()
    }

    pub fn reverse(self) -> Self {
        self.turn_right().turn_right()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Right => "right",
            Direction::Down => "down",
            Direction::Left => "left",
        }
    }
}

/// What an entity is, with the data only that kind carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Mouse { speed: f32 },
    Cat { speed: f32 },
    Arrow { owner: PlayerId, placed_seq: u64 },
    Goal { owner: PlayerId },
    Wall,
}

/// Anything that lives on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    #[serde(flatten)]
    pub kind: EntityKind,
    pub position: Position,
    pub direction: Direction,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, position: Position, direction: Direction) -> Self {
        Self {
            id,
            kind,
            position,
            direction,
        }
    }

    /// Walkers move every tick; everything else is static
    pub fn is_walker(&self) -> bool {
        matches!(self.kind, EntityKind::Mouse { .. } | EntityKind::Cat { .. })
    }

    pub fn is_mouse(&self) -> bool {
        matches!(self.kind, EntityKind::Mouse { .. })
    }

    pub fn is_cat(&self) -> bool {
        matches!(self.kind, EntityKind::Cat { .. })
    }

    pub fn speed(&self) -> Option<f32> {
        match self.kind {
            EntityKind::Mouse { speed } | EntityKind::Cat { speed } => Some(speed),
            _ => None,
        }
    }

    pub fn owner(&self) -> Option<PlayerId> {
        match self.kind {
            EntityKind::Arrow { owner, .. } | EntityKind::Goal { owner } => Some(owner),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            EntityKind::Mouse { .. } => "mouse",
            EntityKind::Cat { .. } => "cat",
            EntityKind::Arrow { .. } => "arrow",
            EntityKind::Goal { .. } => "goal",
            EntityKind::Wall => "wall",
        }
    }
}
