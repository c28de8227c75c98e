//! Property tests for the sync pipeline's core guarantees

use proptest::prelude::*;
use uuid::Uuid;

use arcade_sync::client::PredictionEngine;
use arcade_sync::config::{GameConfig, InputConfig, PredictionConfig, SimulationConfig};
use arcade_sync::game::delta::{self, DeltaCompressor, StateUpdate};
use arcade_sync::game::entity::{Direction, Entity, EntityId, EntityKind, Position};
use arcade_sync::game::input::{InputPayload, InputRejected, InputSequencer};
use arcade_sync::game::snapshot::SnapshotBuilder;
use arcade_sync::game::spatial::{brute_force_collisions, brute_force_pairs, SpatialGrid};
use arcade_sync::game::Simulation;
use arcade_sync::util::rate_limit::SlidingWindowLimiter;

fn walker_strategy() -> impl Strategy<Value = (bool, f32, f32)> {
    (any::<bool>(), 0.0f32..960.0, 0.0f32..720.0)
}

fn walkers(raw: &[(bool, f32, f32)]) -> Vec<Entity> {
    raw.iter()
        .enumerate()
        .map(|(i, (is_cat, x, y))| {
            let kind = if *is_cat {
                EntityKind::Cat { speed: 60.0 }
            } else {
                EntityKind::Mouse { speed: 80.0 }
            };
            Entity::new(EntityId(i as u64 + 1), kind, Position::new(*x, *y), Direction::Right)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn grid_collisions_match_brute_force(
        raw in prop::collection::vec(walker_strategy(), 0..500),
        radius in 1.0f32..48.0,
    ) {
        let entities = walkers(&raw);
        let mut grid = SpatialGrid::new(radius, radius);
        grid.optimize_cell_size(entities.len(), 960.0 * 720.0);

        prop_assert_eq!(grid.find_collisions(&entities, radius), brute_force_collisions(&entities, radius));
        prop_assert_eq!(grid.collision_pairs(&entities, radius), brute_force_pairs(&entities, radius));
    }

    #[test]
    fn limiter_never_admits_more_than_limit_per_window(
        mut times in prop::collection::vec(0u64..5_000, 1..400),
        limit in 1usize..80,
    ) {
        times.sort_unstable();
        let mut limiter = SlidingWindowLimiter::new(limit, 1_000);
        let admitted: Vec<u64> = times
            .iter()
            .copied()
            .filter(|t| limiter.try_acquire(*t))
            .collect();

        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..].iter().take_while(|t| **t < start + 1_000).count();
            prop_assert!(in_window <= limit);
        }
    }

    #[test]
    fn accepted_sequences_are_gapless(
        gaps in prop::collection::vec(0u64..40, 1..200),
    ) {
        let player = Uuid::from_u128(1);
        let mut sequencer = InputSequencer::new(InputConfig::default());
        sequencer.register(player);

        let mut now = 0;
        let mut accepted = Vec::new();
        for gap in gaps {
            now += gap;
            match sequencer.accept(player, InputPayload::Move { x: 1.0, y: 1.0 }, now) {
                Ok(input) => accepted.push(input.sequence),
                Err(err) => prop_assert_eq!(err, InputRejected::RateLimitExceeded),
            }
        }
        for (i, seq) in accepted.iter().enumerate() {
            prop_assert_eq!(*seq, i as u64 + 1);
        }
    }

    #[test]
    fn confidence_is_monotonic(
        pending in 0usize..20,
        drop_rate in 0.0f32..1.0,
        latency in prop::option::of(0.0f32..500.0),
    ) {
        let engine = PredictionEngine::new(
            Uuid::from_u128(1),
            PredictionConfig::default(),
            &SimulationConfig::default(),
        );
        let base = engine.confidence(pending, drop_rate, latency);
        prop_assert!((0.1..=1.0).contains(&base));
        prop_assert!(engine.confidence(pending + 1, drop_rate, latency) <= base);
        prop_assert!(engine.confidence(pending, (drop_rate + 0.1).min(1.0), latency) <= base);
    }

    #[test]
    fn deltas_rebuild_the_next_snapshot(
        seed in any::<u64>(),
        steps in prop::collection::vec(10u64..120, 1..25),
        moves in prop::collection::vec((0.0f32..480.0, 0.0f32..360.0), 0..10),
    ) {
        let config = GameConfig::default();
        let player = Uuid::from_u128(1);
        let mut sim = Simulation::new(config.simulation.clone(), seed, 0);
        sim.add_player(player, "p".into()).unwrap();

        let mut sequencer = InputSequencer::new(config.input.clone());
        sequencer.register(player);
        let mut builder = SnapshotBuilder::new();
        let mut compressor = DeltaCompressor::new(config.delta.clone());

        let mut now = 0;
        sim.tick(now);
        let mut client_view = match compressor.encode(builder.build(&sim, now)) {
            StateUpdate::Full(state) => state,
            StateUpdate::Delta(_) => unreachable!("first send is always full"),
        };

        for (i, step) in steps.iter().enumerate() {
            now += step;
            if let Some((x, y)) = moves.get(i) {
                if let Ok(input) = sequencer.accept(player, InputPayload::Move { x: *x, y: *y }, now) {
                    sim.apply_input(&input).unwrap();
                }
            }
            sim.tick(now);
            let current = builder.build(&sim, now);
            match compressor.encode(current.clone()) {
                StateUpdate::Delta(d) => {
                    prop_assert_eq!(d.delta_sequence, d.base_sequence + 1);
                    prop_assert!((0.0..=1.0).contains(&d.compression_ratio));
                    client_view = delta::apply(&client_view, &d).unwrap();
                }
                StateUpdate::Full(state) => client_view = state,
            }
            prop_assert_eq!(&client_view, &current);
            prop_assert!(client_view.verify());
        }
    }
}
