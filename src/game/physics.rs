//! Walker movement along the grid

use super::board::{Cell, CellIndex};
use super::entity::{Direction, Entity, Position};

/// Distance under which a walker counts as standing on a cell centre
const CENTER_EPSILON: f32 = 1e-3;

/// Upper bound on cell centres crossed in one step
const MAX_CROSSINGS: usize = 32;

/// Physics system for moving mice and cats
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance a walker by `speed * dt_secs` pixels.
    ///
    /// Walkers only change heading on cell centres: an arrow on the cell sets
    /// the heading, then a blocked cell ahead turns them right, left or back
    /// in that order. Returns (new_position, new_direction).
    pub fn step_walker(
        position: Position,
        direction: Direction,
        speed: f32,
        dt_secs: f32,
        cells: &CellIndex,
    ) -> (Position, Direction) {
        let size = cells.size;
        let tile = size.tile;
        let mut pos = position;
        let mut dir = direction;
        let mut remaining = (speed * dt_secs).max(0.0);
        if !remaining.is_finite() {
            return (pos, dir);
        }

        for _ in 0..MAX_CROSSINGS {
            if remaining <= 0.0 {
                break;
            }

            let cell = size.cell_at(pos);
            let center = size.cell_center(cell);
            let (dx, dy) = dir.vector();
            let along = (center.x - pos.x) * dx + (center.y - pos.y) * dy;

            if along.abs() <= CENTER_EPSILON {
                pos = center;
                match Self::choose_direction(cell, dir, cells) {
                    Some(next) => dir = next,
                    None => return (pos, dir),
                }
                if remaining >= tile {
                    pos = size.cell_center(cell.step(dir));
                    remaining -= tile;
                } else {
                    pos = pos.offset(dir, remaining);
                    remaining = 0.0;
                }
                continue;
            }

            if along < 0.0 && cells.is_blocked(cell.step(dir)) {
                // Past the centre heading into a wall; back up and re-decide
                pos = center;
                continue;
            }

            let ahead = if along > 0.0 { along } else { along + tile };
            if ahead <= remaining {
                let next = if along > 0.0 { cell } else { cell.step(dir) };
                pos = size.cell_center(next);
                remaining -= ahead;
            } else {
                pos = pos.offset(dir, remaining);
                remaining = 0.0;
            }
        }

        (pos, dir)
    }

    /// Heading a walker takes when standing on the centre of `cell`.
    /// `None` means it is boxed in.
    pub fn choose_direction(cell: Cell, heading: Direction, cells: &CellIndex) -> Option<Direction> {
        let heading = cells.arrow(cell).unwrap_or(heading);
        [
            heading,
            heading.turn_right(),
            heading.turn_left(),
            heading.reverse(),
        ]
        .into_iter()
        .find(|dir| !cells.is_blocked(cell.step(*dir)))
    }

    /// Move a walker entity in place
    pub fn advance(entity: &mut Entity, dt_secs: f32, cells: &CellIndex) {
        if let Some(speed) = entity.speed() {
            let (pos, dir) =
                Self::step_walker(entity.position, entity.direction, speed, dt_secs, cells);
            entity.position = pos;
            entity.direction = dir;
        }
    }

    /// Check whether two points are within `radius` of each other
    pub fn within(a: Position, b: Position, radius: f32) -> bool {
        a.distance_sq(b) <= radius * radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::{Board, BoardSize};
    use crate::game::entity::{EntityId, EntityKind, PlayerId};
    use uuid::Uuid;

    fn open_board() -> Board {
        // No layout call: no walls, no goals
        Board::new(BoardSize::for_players(1, 40.0))
    }

    #[test]
    fn moves_straight_between_centres() {
        let board = open_board();
        let cells = CellIndex::build(&board);
        let (pos, dir) = PhysicsSystem::step_walker(
            Position::new(20.0, 20.0),
            Direction::Right,
            60.0,
            0.5,
            &cells,
        );
        assert_eq!(dir, Direction::Right);
        assert!((pos.x - 50.0).abs() < 1e-4);
        assert_eq!(pos.y, 20.0);
    }

    #[test]
    fn turns_right_at_board_edge() {
        let board = open_board();
        let cells = CellIndex::build(&board);
        // Last column centre, heading out of the board
        let start = board.size.cell_center(Cell::new(11, 0));
        let (pos, dir) = PhysicsSystem::step_walker(start, Direction::Right, 40.0, 0.5, &cells);
        assert_eq!(dir, Direction::Down);
        assert!((pos.y - 40.0).abs() < 1e-4);
        assert_eq!(pos.x, start.x);
    }

    #[test]
    fn arrow_redirects_on_centre() {
        let mut board = open_board();
        let owner: PlayerId = Uuid::from_u128(1);
        board.arrows.push(Entity::new(
            EntityId(1),
            EntityKind::Arrow { owner, placed_seq: 0 },
            board.size.cell_center(Cell::new(2, 2)),
            Direction::Down,
        ));
        let cells = CellIndex::build(&board);
        let start = board.size.cell_center(Cell::new(1, 2));
        // One full tile to reach the arrow, half a tile more after turning
        let (pos, dir) = PhysicsSystem::step_walker(start, Direction::Right, 60.0, 1.0, &cells);
        assert_eq!(dir, Direction::Down);
        assert_eq!(pos.x, 100.0);
        assert!((pos.y - 120.0).abs() < 1e-4);
    }

    #[test]
    fn boxed_in_walker_stops() {
        let mut board = Board::new(BoardSize {
            cols: 1,
            rows: 1,
            tile: 40.0,
        });
        board.entities.clear();
        let cells = CellIndex::build(&board);
        let start = Position::new(20.0, 20.0);
        let (pos, _) = PhysicsSystem::step_walker(start, Direction::Up, 100.0, 1.0, &cells);
        assert_eq!(pos, start);
    }

    #[test]
    fn movement_is_deterministic() {
        let mut board = Board::new(BoardSize::for_players(2, 40.0));
        let mut next_id = 1;
        let players = [Uuid::from_u128(1), Uuid::from_u128(2)];
        board.layout(board.size, &players, &mut next_id);
        let cells = CellIndex::build(&board);

        let run = || {
            let mut pos = board.size.cell_center(Cell::new(0, 4));
            let mut dir = Direction::Right;
            for _ in 0..500 {
                (pos, dir) = PhysicsSystem::step_walker(pos, dir, 75.0, 0.033, &cells);
            }
            (pos, dir)
        };
        assert_eq!(run(), run());
        let (pos, _) = run();
        assert!(pos.x >= 0.0 && pos.x <= board.size.width());
        assert!(pos.y >= 0.0 && pos.y <= board.size.height());
    }
}
