//! Authoritative board simulation
//!
//! Everything here is synchronous and driven by the timestamps passed in, so
//! the same seed, joins and inputs replayed at the same times always produce
//! the same board.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimulationConfig;

use super::board::{describe_arrow, describe_cursor, ArrowPlacement, Board, BoardSize, Cell, CellIndex};
use super::entity::{Direction, Entity, EntityId, EntityKind, PlayerId, Position};
use super::input::{InputPayload, InputRejected, PlayerAction, PlayerInput};
use super::physics::PhysicsSystem;
use super::scoring::{Absorbed, ScoringSystem};
use super::snapshot::GamePhase;
use super::spatial::SpatialGrid;
use super::strategy::Strategy;

/// Longest simulated step; a stalled driver catches up in bounded jumps
const MAX_STEP_MS: u64 = 250;

/// Walker cap so trickle spawns cannot grow the board without bound
const MAX_WALKERS: usize = 96;

pub const OUTCOME_IGNORED: &str = "ignored";
pub const OUTCOME_CLEAR: &str = "action:clear";

/// Player state (authoritative)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: PlayerId,
    pub name: String,
    pub score: u64,
    /// Where the player's pointer is; arrows land on the cell under it
    pub cursor: Position,
    pub is_bot: bool,
    /// Last input sequence applied for this player
    pub last_processed_sequence: u64,
}

impl PlayerState {
    pub fn new(id: PlayerId, name: String, is_bot: bool) -> Self {
        Self {
            id,
            name,
            score: 0,
            cursor: Position::default(),
            is_bot,
            last_processed_sequence: 0,
        }
    }
}

/// Apply one input payload to a board on behalf of `player`.
///
/// Shared by the server tick and client prediction so both derive the same
/// outcome string from the same state.
pub fn apply_player_input(
    board: &mut Board,
    player: &mut PlayerState,
    payload: &InputPayload,
    max_arrows: usize,
    arrow_id: EntityId,
) -> (String, Option<ArrowPlacement>) {
    match payload {
        InputPayload::Move { x, y } => {
            player.cursor = board.size.clamp(Position::new(*x, *y));
            (describe_cursor(player.cursor), None)
        }
        InputPayload::ArrowPlace { direction } => {
            let placement = board.place_arrow(player.id, player.cursor, *direction, max_arrows, arrow_id);
            (describe_arrow(&placement, *direction), Some(placement))
        }
        InputPayload::Action {
            action: PlayerAction::ClearArrows,
        } => {
            board.clear_arrows_of(player.id);
            (OUTCOME_CLEAR.to_string(), None)
        }
    }
}

/// Why a join was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("match is full")]
    MatchFull,

    #[error("match is ending")]
    MatchEnding,
}

#[derive(Debug, Clone)]
struct BotBrain {
    next_action_ms: u64,
}

/// A walker swallowed by a goal this tick
#[derive(Debug, Clone, PartialEq)]
pub struct Absorption {
    pub entity: EntityId,
    pub absorbed: Absorbed,
    pub owner: PlayerId,
    pub new_score: u64,
}

/// What a tick did, for logging and tests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub absorbed: Vec<Absorption>,
    /// (mouse, cat) contacts that removed the mouse
    pub eaten: Vec<(EntityId, EntityId)>,
    pub spawned: usize,
    pub bot_arrows: usize,
    pub phase_change: Option<GamePhase>,
    pub rotated_to: Option<Strategy>,
}

/// The authoritative game board and the rules that advance it
pub struct Simulation {
    config: SimulationConfig,
    seed: u64,
    rng: ChaCha8Rng,
    board: Board,
    players: BTreeMap<PlayerId, PlayerState>,
    bots: BTreeMap<PlayerId, BotBrain>,
    /// Goal slots follow join order
    join_order: Vec<PlayerId>,
    phase: GamePhase,
    strategy: Option<Strategy>,
    round: u32,
    tick: u64,
    clock_ms: u64,
    round_elapsed_ms: u64,
    spawn_timer_ms: u64,
    ending_elapsed_ms: u64,
    next_entity_id: u64,
    grid: SpatialGrid,
}

impl Simulation {
    pub fn new(config: SimulationConfig, seed: u64, now_ms: u64) -> Self {
        let size = BoardSize::for_players(0, config.tile_size);
        let grid = SpatialGrid::new(config.tile_size, config.collision_radius);
        let mut sim = Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            board: Board::new(size),
            players: BTreeMap::new(),
            bots: BTreeMap::new(),
            join_order: Vec::new(),
            phase: GamePhase::Waiting,
            strategy: None,
            round: 0,
            tick: 0,
            clock_ms: now_ms,
            round_elapsed_ms: 0,
            spawn_timer_ms: 0,
            ending_elapsed_ms: 0,
            next_entity_id: 1,
            grid,
            config,
        };
        sim.relayout();
        sim
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn players(&self) -> &BTreeMap<PlayerId, PlayerState> {
        &self.players
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn clock_ms(&self) -> u64 {
        self.clock_ms
    }

    pub fn human_count(&self) -> usize {
        self.players.values().filter(|p| !p.is_bot).count()
    }

    /// Ending phase has run past its grace period
    pub fn is_finished(&self) -> bool {
        self.phase == GamePhase::Ending && self.ending_elapsed_ms >= self.config.ending_grace_ms
    }

    /// Add a human player. Joining again with the same id is a no-op.
    pub fn add_player(&mut self, id: PlayerId, name: String) -> Result<(), JoinError> {
        if self.players.contains_key(&id) {
            return Ok(());
        }
        if self.phase == GamePhase::Ending {
            return Err(JoinError::MatchEnding);
        }
        if self.players.len() >= self.config.seat_limit() {
            // Bots give up their seat to humans
            let Some(bot) = self.bots.keys().next_back().copied() else {
                return Err(JoinError::MatchFull);
            };
            self.remove_player(&bot);
        }

        self.players.insert(id, PlayerState::new(id, name, false));
        self.join_order.push(id);
        self.relayout();
        Ok(())
    }

    /// Remove a player, their goal and their arrows
    pub fn remove_player(&mut self, id: &PlayerId) -> Option<PlayerState> {
        let removed = self.players.remove(id)?;
        self.bots.remove(id);
        self.join_order.retain(|p| p != id);
        self.board.clear_arrows_of(*id);
        self.relayout();

        if !removed.is_bot && self.human_count() == 0 && self.phase != GamePhase::Ending {
            self.enter_phase(GamePhase::Ending);
        }
        Some(removed)
    }

    /// Apply a sequenced input and return its outcome string
    pub fn apply_input(&mut self, input: &PlayerInput) -> Result<String, InputRejected> {
        let player = self
            .players
            .get_mut(&input.player_id)
            .ok_or(InputRejected::InvalidPlayerId(input.player_id))?;
        player.last_processed_sequence = player.last_processed_sequence.max(input.sequence);

        let is_move = matches!(input.payload, InputPayload::Move { .. });
        if self.phase != GamePhase::Active && !is_move {
            return Ok(OUTCOME_IGNORED.to_string());
        }

        let arrow_id = EntityId(self.next_entity_id);
        let (outcome, placement) = apply_player_input(
            &mut self.board,
            player,
            &input.payload,
            self.config.max_arrows_per_player,
            arrow_id,
        );
        if matches!(placement, Some(ArrowPlacement::Placed { .. })) {
            self.next_entity_id += 1;
        }
        Ok(outcome)
    }

    /// Advance the simulation to `now_ms`
    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let dt_ms = now_ms.saturating_sub(self.clock_ms).min(MAX_STEP_MS);
        self.clock_ms = self.clock_ms.max(now_ms);
        self.tick += 1;

        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        match self.phase {
            GamePhase::Waiting => {
                if self.human_count() >= self.config.min_humans_to_start.max(1) {
                    self.start_game(&mut report);
                }
            }
            GamePhase::Active => self.run_active(dt_ms, &mut report),
            GamePhase::Ending => {
                self.ending_elapsed_ms += dt_ms;
            }
        }

        report
    }

    fn run_active(&mut self, dt_ms: u64, report: &mut TickReport) {
        let dt_secs = dt_ms as f32 / 1000.0;

        // (a) bots
        report.bot_arrows = self.run_bots();

        // (b) movement
        let cells = CellIndex::build(&self.board);
        for walker in &mut self.board.entities {
            PhysicsSystem::advance(walker, dt_secs, &cells);
        }

        // (c) goal absorption
        report.absorbed = self.absorb_walkers();

        // (d) mouse-cat collisions
        self.grid
            .optimize_cell_size(self.board.entities.len(), self.board.size.area());
        let hits = self
            .grid
            .find_collisions(&self.board.entities, self.config.collision_radius);
        if !hits.is_empty() {
            let eaten: HashSet<EntityId> = hits.iter().map(|(mouse, _)| *mouse).collect();
            self.board.entities.retain(|e| !eaten.contains(&e.id));
            report.eaten = hits;
        }

        report.spawned = self.trickle_spawn(dt_ms);

        // (e) rotation
        self.round_elapsed_ms += dt_ms;
        if self.round_elapsed_ms >= self.config.round_duration_ms {
            self.rotate(report);
        }
    }

    fn start_game(&mut self, report: &mut TickReport) {
        let target = self.config.bot_fill_target.min(self.config.seat_limit());
        while self.players.len() < target {
            let id = Uuid::from_u128(self.rng.gen());
            let name = format!("Bot {}", self.bots.len() + 1);
            self.players.insert(id, PlayerState::new(id, name, true));
            self.bots.insert(
                id,
                BotBrain {
                    next_action_ms: self.clock_ms + self.config.bot_cooldown_ms,
                },
            );
            self.join_order.push(id);
        }
        self.relayout();

        self.round = 1;
        let first = Strategy::next(None, &mut self.rng);
        self.begin_round(first);
        self.enter_phase(GamePhase::Active);
        report.phase_change = Some(GamePhase::Active);
        report.rotated_to = self.strategy;
    }

    fn begin_round(&mut self, strategy: Strategy) {
        self.strategy = Some(strategy);
        self.round_elapsed_ms = 0;
        self.spawn_timer_ms = 0;
        let profile = strategy.profile();
        for _ in 0..profile.initial_mice {
            self.spawn_walker(false);
        }
        for _ in 0..profile.initial_cats {
            self.spawn_walker(true);
        }
        info!(
            seed = self.seed,
            round = self.round,
            strategy = ?strategy,
            walkers = self.board.entities.len(),
            "Round started"
        );
    }

    fn rotate(&mut self, report: &mut TickReport) {
        let reward = ScoringSystem::time_reward(self.round_elapsed_ms, &self.config);
        for player in self.players.values_mut() {
            player.score = player.score.saturating_add(reward);
        }
        self.board.arrows.clear();
        self.board.entities.clear();

        if self.config.max_rounds > 0 && self.round >= self.config.max_rounds {
            self.enter_phase(GamePhase::Ending);
            report.phase_change = Some(GamePhase::Ending);
            return;
        }

        self.round += 1;
        let next = Strategy::next(self.strategy, &mut self.rng);
        self.begin_round(next);
        report.rotated_to = Some(next);
    }

    fn enter_phase(&mut self, phase: GamePhase) {
        if self.phase == phase {
            return;
        }
        info!(seed = self.seed, from = ?self.phase, to = ?phase, "Phase changed");
        self.phase = phase;
        if phase == GamePhase::Ending {
            self.ending_elapsed_ms = 0;
        }
    }

    fn alloc_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        id
    }

    fn spawn_walker(&mut self, cat: bool) -> bool {
        if self.board.entities.len() >= MAX_WALKERS {
            return false;
        }
        let Some(profile) = self.strategy.map(Strategy::profile) else {
            return false;
        };
        let spawns = self.board.size.spawn_points();
        let (cell, direction) = spawns[self.rng.gen_range(0..spawns.len())];
        let kind = if cat {
            EntityKind::Cat {
                speed: profile.cat_speed,
            }
        } else {
            EntityKind::Mouse {
                speed: profile.mouse_speed,
            }
        };
        let id = self.alloc_id();
        self.board.entities.push(Entity::new(
            id,
            kind,
            self.board.size.cell_center(cell),
            direction,
        ));
        true
    }

    fn trickle_spawn(&mut self, dt_ms: u64) -> usize {
        let Some(profile) = self.strategy.map(Strategy::profile) else {
            return 0;
        };
        if profile.spawn_every_ms == 0 {
            return 0;
        }
        self.spawn_timer_ms += dt_ms;
        let mut spawned = 0;
        while self.spawn_timer_ms >= profile.spawn_every_ms {
            self.spawn_timer_ms -= profile.spawn_every_ms;
            let cat = self.rng.gen_bool(profile.cat_chance.clamp(0.0, 1.0));
            if self.spawn_walker(cat) {
                spawned += 1;
            }
        }
        spawned
    }

    fn absorb_walkers(&mut self) -> Vec<Absorption> {
        let mut absorbed = Vec::new();
        let mut removed = BTreeSet::new();
        for walker in &self.board.entities {
            let goal = self.board.goals.iter().find(|g| {
                PhysicsSystem::within(walker.position, g.position, self.config.absorption_radius)
            });
            let Some(owner) = goal.and_then(Entity::owner) else {
                continue;
            };
            let kind = if walker.is_cat() {
                Absorbed::Cat
            } else {
                Absorbed::Mouse
            };
            removed.insert(walker.id);
            if let Some(player) = self.players.get_mut(&owner) {
                player.score = ScoringSystem::apply_absorption(player.score, kind, &self.config);
                absorbed.push(Absorption {
                    entity: walker.id,
                    absorbed: kind,
                    owner,
                    new_score: player.score,
                });
            }
        }
        if !removed.is_empty() {
            self.board.entities.retain(|e| !removed.contains(&e.id));
        }
        absorbed
    }

    /// Each bot whose cooldown ran out points an arrow toward its own goal
    fn run_bots(&mut self) -> usize {
        let due: Vec<PlayerId> = self
            .bots
            .iter()
            .filter(|(_, brain)| brain.next_action_ms <= self.clock_ms)
            .map(|(id, _)| *id)
            .collect();

        let mut placed = 0;
        for bot in due {
            let Some(goal) = self.board.goals.iter().find(|g| g.owner() == Some(bot)) else {
                continue;
            };
            let goal_cell = self.board.size.cell_at(goal.position);
            let size = self.board.size;
            let cell = Cell::new(self.rng.gen_range(0..size.cols), self.rng.gen_range(0..size.rows));
            let direction = toward(cell, goal_cell);

            let arrow_id = EntityId(self.next_entity_id);
            let max_arrows = self.config.max_arrows_per_player;
            if let Some(player) = self.players.get_mut(&bot) {
                player.cursor = size.cell_center(cell);
                let payload = InputPayload::ArrowPlace { direction };
                let (_, placement) =
                    apply_player_input(&mut self.board, player, &payload, max_arrows, arrow_id);
                if matches!(placement, Some(ArrowPlacement::Placed { .. })) {
                    self.next_entity_id += 1;
                    placed += 1;
                }
            }
            if let Some(brain) = self.bots.get_mut(&bot) {
                brain.next_action_ms = self.clock_ms + self.config.bot_cooldown_ms;
            }
        }
        placed
    }

    fn relayout(&mut self) {
        let size = BoardSize::for_players(self.players.len(), self.config.tile_size);
        let resized = size != self.board.size;
        self.board
            .layout(size, &self.join_order, &mut self.next_entity_id);
        if resized {
            debug!(
                seed = self.seed,
                cols = size.cols,
                rows = size.rows,
                players = self.players.len(),
                "Board resized"
            );
        }
    }
}

/// Heading along the dominant axis from `from` toward `to`
fn toward(from: Cell, to: Cell) -> Direction {
    let dc = to.col - from.col;
    let dr = to.row - from.row;
    if dc.abs() >= dr.abs() {
        if dc >= 0 {
            Direction::Right
        } else {
            Direction::Left
        }
    } else if dr >= 0 {
        Direction::Down
    } else {
        Direction::Up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::GOAL_SLOTS;
    use crate::game::input::InputType;

    fn human(n: u128) -> PlayerId {
        Uuid::from_u128(n)
    }

    fn input(player: PlayerId, sequence: u64, payload: InputPayload) -> PlayerInput {
        PlayerInput {
            player_id: player,
            sequence,
            timestamp: 0,
            input_type: payload.input_type(),
            payload,
            acknowledged: false,
            ack_timeout_ms: 1_000,
        }
    }

    fn started(seed: u64) -> Simulation {
        let mut sim = Simulation::new(SimulationConfig::default(), seed, 0);
        sim.add_player(human(1), "ada".into()).unwrap();
        sim.tick(0);
        sim
    }

    #[test]
    fn first_human_starts_the_game_with_bots() {
        let sim = started(1);
        assert_eq!(sim.phase(), GamePhase::Active);
        assert_eq!(sim.players().len(), 2);
        assert_eq!(sim.players().values().filter(|p| p.is_bot).count(), 1);
        assert_eq!(sim.board().goals.len(), 2);
        assert!(sim.strategy().is_some());
        assert!(!sim.board().entities.is_empty());
    }

    #[test]
    fn unknown_player_input_is_rejected() {
        let mut sim = started(1);
        let stranger = human(99);
        let result = sim.apply_input(&input(stranger, 1, InputPayload::Move { x: 1.0, y: 1.0 }));
        assert_eq!(result, Err(InputRejected::InvalidPlayerId(stranger)));
    }

    #[test]
    fn cursor_is_clamped_and_arrow_lands_under_it() {
        let mut sim = started(1);
        let outcome = sim
            .apply_input(&input(human(1), 1, InputPayload::Move { x: -50.0, y: 5_000.0 }))
            .unwrap();
        assert_eq!(outcome, "cursor:0,360");

        let outcome = sim
            .apply_input(&input(
                human(1),
                2,
                InputPayload::ArrowPlace {
                    direction: Direction::Up,
                },
            ))
            .unwrap();
        assert_eq!(outcome, "arrow:0,8:up");
        assert_eq!(sim.player(&human(1)).unwrap().last_processed_sequence, 2);
        assert_eq!(sim.board().arrows_of(human(1)).count(), 1);
    }

    #[test]
    fn arrows_ignored_while_waiting() {
        let mut sim = Simulation::new(SimulationConfig::default(), 1, 0);
        sim.add_player(human(1), "ada".into()).unwrap();
        let payload = InputPayload::ArrowPlace {
            direction: Direction::Up,
        };
        assert_eq!(payload.input_type(), InputType::ArrowPlace);
        assert_eq!(sim.apply_input(&input(human(1), 1, payload)).unwrap(), OUTCOME_IGNORED);
    }

    #[test]
    fn clear_action_removes_own_arrows() {
        let mut sim = started(1);
        sim.apply_input(&input(human(1), 1, InputPayload::Move { x: 20.0, y: 20.0 }))
            .unwrap();
        sim.apply_input(&input(
            human(1),
            2,
            InputPayload::ArrowPlace {
                direction: Direction::Down,
            },
        ))
        .unwrap();
        let outcome = sim
            .apply_input(&input(
                human(1),
                3,
                InputPayload::Action {
                    action: PlayerAction::ClearArrows,
                },
            ))
            .unwrap();
        assert_eq!(outcome, OUTCOME_CLEAR);
        assert_eq!(sim.board().arrows_of(human(1)).count(), 0);
    }

    #[test]
    fn same_seed_same_board() {
        let run = |seed| {
            let mut sim = started(seed);
            for step in 1..=300u64 {
                if step % 40 == 0 {
                    let x = (step * 7 % 480) as f32;
                    sim.apply_input(&input(human(1), step, InputPayload::Move { x, y: 100.0 }))
                        .unwrap();
                    sim.apply_input(&input(
                        human(1),
                        step + 1,
                        InputPayload::ArrowPlace {
                            direction: Direction::Down,
                        },
                    ))
                    .unwrap();
                }
                sim.tick(step * 33);
            }
            (sim.board().clone(), sim.players().clone())
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn walkers_stay_on_the_board() {
        let mut sim = started(3);
        for step in 1..=600u64 {
            sim.tick(step * 33);
            let size = sim.board().size;
            for walker in &sim.board().entities {
                assert!(walker.position.x >= 0.0 && walker.position.x <= size.width());
                assert!(walker.position.y >= 0.0 && walker.position.y <= size.height());
            }
        }
    }

    #[test]
    fn goal_absorbs_mouse_and_scores_owner() {
        let mut sim = started(1);
        sim.board.entities.clear();
        let goal = sim
            .board
            .goals
            .iter()
            .find(|g| g.owner() == Some(human(1)))
            .unwrap()
            .clone();
        sim.board.entities.push(Entity::new(
            EntityId(10_000),
            EntityKind::Mouse { speed: 0.0 },
            goal.position,
            Direction::Left,
        ));
        let report = sim.tick(33);
        assert_eq!(report.absorbed.len(), 1);
        assert_eq!(report.absorbed[0].owner, human(1));
        assert_eq!(sim.player(&human(1)).unwrap().score, 1);
    }

    #[test]
    fn cat_eats_adjacent_mouse() {
        let mut sim = started(1);
        sim.board.entities.clear();
        sim.board.arrows.clear();
        let mouse = Entity::new(
            EntityId(10_000),
            EntityKind::Mouse { speed: 0.0 },
            Position::new(20.0, 180.0),
            Direction::Right,
        );
        let cat = Entity::new(
            EntityId(10_001),
            EntityKind::Cat { speed: 0.0 },
            Position::new(30.0, 180.0),
            Direction::Left,
        );
        sim.board.entities.extend([mouse, cat]);
        let report = sim.tick(33);
        assert_eq!(report.eaten, vec![(EntityId(10_000), EntityId(10_001))]);
        assert!(sim.board().entities.iter().all(|e| e.is_cat()));
    }

    #[test]
    fn rotation_rewards_time_and_resets_arrows() {
        let mut sim = started(1);
        sim.apply_input(&input(human(1), 1, InputPayload::Move { x: 20.0, y: 20.0 }))
            .unwrap();
        sim.apply_input(&input(
            human(1),
            2,
            InputPayload::ArrowPlace {
                direction: Direction::Down,
            },
        ))
        .unwrap();
        let before = sim.strategy();
        let score_before = sim.player(&human(1)).unwrap().score;

        sim.round_elapsed_ms = sim.config.round_duration_ms - 10;
        let report = sim.tick(200);
        assert!(report.rotated_to.is_some());
        assert_ne!(sim.strategy(), before);
        assert_eq!(sim.round(), 2);
        assert!(sim.board().arrows.iter().all(|a| a.owner() != Some(human(1))));
        assert!(sim.player(&human(1)).unwrap().score >= score_before + 3);
    }

    #[test]
    fn last_human_leaving_ends_the_game() {
        let mut sim = started(1);
        sim.remove_player(&human(1));
        assert_eq!(sim.phase(), GamePhase::Ending);
        assert!(!sim.is_finished());
        sim.tick(250);
        for step in 2..=20 {
            sim.tick(step * 250);
        }
        assert!(sim.is_finished());
        assert_eq!(
            sim.add_player(human(2), "late".into()),
            Err(JoinError::MatchEnding)
        );
    }

    #[test]
    fn seats_never_outnumber_goal_cells() {
        let config = SimulationConfig {
            max_players: 12,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config, 9, 0);
        for n in 1..=GOAL_SLOTS as u128 {
            sim.add_player(human(n), format!("p{n}")).unwrap();
        }
        assert_eq!(
            sim.add_player(human(99), "extra".into()),
            Err(JoinError::MatchFull)
        );

        let size = sim.board().size;
        let cells: std::collections::HashSet<_> = sim
            .board()
            .goals
            .iter()
            .map(|g| size.cell_at(g.position))
            .collect();
        assert_eq!(cells.len(), GOAL_SLOTS);
    }

    #[test]
    fn joins_resize_board_and_bots_yield_seats() {
        let config = SimulationConfig {
            max_players: 2,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config, 5, 0);
        sim.add_player(human(1), "a".into()).unwrap();
        sim.tick(0);
        assert_eq!(sim.players().len(), 2);

        sim.add_player(human(2), "b".into()).unwrap();
        assert_eq!(sim.human_count(), 2);
        assert_eq!(sim.players().len(), 2);
        assert_eq!(
            sim.add_player(human(3), "c".into()),
            Err(JoinError::MatchFull)
        );
    }

    #[test]
    fn max_rounds_ends_the_game() {
        let config = SimulationConfig {
            max_rounds: 1,
            round_duration_ms: 1_000,
            ..SimulationConfig::default()
        };
        let mut sim = Simulation::new(config, 2, 0);
        sim.add_player(human(1), "a".into()).unwrap();
        sim.tick(0);
        for step in 1..=6 {
            sim.tick(step * 200);
        }
        assert_eq!(sim.phase(), GamePhase::Ending);
        assert_eq!(sim.round(), 1);
    }
}
