//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the command pipeline produces
//! identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Lockstep simulations must be 100% deterministic. Sources of
//! non-determinism the pipeline guards against:
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   All pipeline containers are ordered (`BTreeMap`, sorted serials).
//!
//! - **Same-tick command order**: two commands due the same tick must apply
//!   in `cmdserial` order on every peer, regardless of arrival order.
//!
//! - **Wall-clock and randomness**: command execution reads neither.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual operations (queue mutation, renumbering)
//! 2. **Property tests**: random command streams still replay identically
//! 3. **Integration tests**: full scripted games are reproducible
//! 4. **Parallel tests**: running N games in parallel all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use emberfall_core::dispatch::CommandQueue;
use emberfall_core::game::{Game, Tick};

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: Tick,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for a deterministic pipeline).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the runs were deterministic, with a detailed message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Pipeline is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a scenario multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the scenario
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial state
/// * `step` - Function to advance the state by one tick
/// * `hash` - Function to compute a state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: Tick,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Simplified determinism verification for a game plus its command queue.
///
/// Runs the scenario twice, advancing the dispatcher one tick at a time,
/// and verifies the final state hashes match exactly.
pub fn verify_pipeline_determinism<F>(setup_fn: F, num_ticks: Tick) -> bool
where
    F: Fn() -> (Game, CommandQueue),
{
    let result = verify_determinism(
        2,
        num_ticks,
        &setup_fn,
        |(game, queue)| {
            let next = game.current_tick() + 1;
            queue.advance(game, next);
        },
        |(game, _)| game.state_hash(),
    );
    result.is_deterministic
}

/// Compare two runs tick-by-tick, finding the first divergence.
///
/// Useful for debugging non-determinism by finding exactly when two runs
/// start to differ.
///
/// # Returns
///
/// `None` if the runs are deterministic, `Some(tick)` if they diverge at
/// that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: Tick) -> Option<Tick>
where
    F: Fn() -> (Game, CommandQueue),
{
    let (mut game1, mut queue1) = setup_fn();
    let (mut game2, mut queue2) = setup_fn();

    if game1.state_hash() != game2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        queue1.advance(&mut game1, tick);
        queue2.advance(&mut game2, tick);

        if game1.state_hash() != game2.state_hash() {
            tracing::debug!(tick, "runs diverged");
            return Some(tick);
        }
    }

    None
}

/// Verify that a snapshot round-trip preserves game state exactly.
///
/// Critical for save/load and network join synchronization.
pub fn verify_snapshot_determinism<F>(setup_fn: F, num_ticks: Tick) -> bool
where
    F: Fn() -> (Game, CommandQueue),
{
    let (mut game, mut queue) = setup_fn();
    queue.advance(&mut game, num_ticks);

    let hash_before = game.state_hash();

    let bytes = match game.serialize() {
        Ok(b) => b,
        Err(_) => return false,
    };
    let restored = match Game::deserialize(&bytes) {
        Ok(g) => g,
        Err(_) => return false,
    };

    hash_before == restored.state_hash()
}

/// Result of parallel pipeline runs.
#[derive(Debug, Clone)]
pub struct ParallelRunResult {
    /// Final state hash from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks each run simulated.
    pub ticks: Tick,
    /// Number of runs.
    pub num_runs: usize,
}

impl ParallelRunResult {
    /// Check if all runs produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all runs matched.
    ///
    /// # Panics
    ///
    /// Panics if runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel runs diverged!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_runs,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run N scenarios in parallel using scoped threads and collect hashes.
///
/// Catches non-determinism that only manifests under thread scheduling
/// variations or memory layout differences.
pub fn run_parallel_pipelines<F>(setup_fn: F, num_runs: usize, num_ticks: Tick) -> ParallelRunResult
where
    F: Fn() -> (Game, CommandQueue) + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_runs)
            .map(|_| {
                s.spawn(|| {
                    let (mut game, mut queue) = setup_fn();
                    for tick in 1..=num_ticks {
                        queue.advance(&mut game, tick);
                    }
                    game.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ParallelRunResult {
        hashes,
        ticks: num_ticks,
        num_runs,
    }
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible command payloads for
/// property-based testing of the pipeline.
pub mod strategies {
    use emberfall_core::command::{CommandPayload, DiplomacyAction};
    use emberfall_core::game::{MapCoords, WarePriority, WareWorker};
    use proptest::prelude::*;

    /// Generate an arbitrary map coordinate.
    pub fn arb_coords() -> impl Strategy<Value = MapCoords> {
        (0u16..512, 0u16..512).prop_map(|(x, y)| MapCoords::new(x, y))
    }

    /// Generate an arbitrary ware priority.
    pub fn arb_priority() -> impl Strategy<Value = WarePriority> {
        prop_oneof![
            Just(WarePriority::Low),
            Just(WarePriority::Normal),
            Just(WarePriority::High),
        ]
    }

    /// Generate an arbitrary diplomacy action.
    pub fn arb_diplomacy_action() -> impl Strategy<Value = DiplomacyAction> {
        prop_oneof![
            Just(DiplomacyAction::Invite),
            Just(DiplomacyAction::AcceptInvite),
            Just(DiplomacyAction::RefuseInvite),
            Just(DiplomacyAction::Join),
            Just(DiplomacyAction::AcceptJoin),
            Just(DiplomacyAction::RefuseJoin),
            Just(DiplomacyAction::LeaveTeam),
            Just(DiplomacyAction::Resign),
        ]
    }

    /// Generate a build command payload.
    pub fn arb_build() -> impl Strategy<Value = CommandPayload> {
        (arb_coords(), 0u16..32).prop_map(|(position, building)| CommandPayload::Build {
            position,
            building,
        })
    }

    /// Generate a ware-priority payload targeting a small serial range, so
    /// some commands hit live objects and some target vanished ones.
    pub fn arb_ware_priority() -> impl Strategy<Value = CommandPayload> {
        (0u32..16, 0u16..8, arb_priority(), any::<bool>()).prop_map(
            |(object, ware, priority, is_constructionsite_setting)| {
                CommandPayload::SetWarePriority {
                    object,
                    ware,
                    priority,
                    is_constructionsite_setting,
                }
            },
        )
    }

    /// Generate an input-max-fill payload.
    pub fn arb_input_max_fill() -> impl Strategy<Value = CommandPayload> {
        (
            0u32..16,
            0u16..8,
            any::<bool>(),
            0u32..64,
            any::<bool>(),
        )
            .prop_map(|(object, index, worker, max_fill, is_constructionsite_setting)| {
                CommandPayload::SetInputMaxFill {
                    object,
                    index,
                    kind: if worker {
                        WareWorker::Worker
                    } else {
                        WareWorker::Ware
                    },
                    max_fill,
                    is_constructionsite_setting,
                }
            })
    }

    /// Generate a diplomacy payload.
    pub fn arb_diplomacy() -> impl Strategy<Value = CommandPayload> {
        (arb_diplomacy_action(), 0u8..4).prop_map(|(action, other_player)| {
            CommandPayload::Diplomacy {
                action,
                other_player,
            }
        })
    }

    /// Generate a pinned-note payload.
    pub fn arb_pinned_note() -> impl Strategy<Value = CommandPayload> {
        (
            0u32..16,
            arb_coords(),
            "[a-z ]{0,24}",
            any::<[u8; 3]>(),
            any::<bool>(),
        )
            .prop_map(|(note, position, text, color, delete)| CommandPayload::PinnedNote {
                note,
                position,
                text,
                color,
                delete,
            })
    }

    /// Generate any command payload.
    pub fn arb_payload() -> impl Strategy<Value = CommandPayload> {
        prop_oneof![
            arb_build(),
            arb_ware_priority(),
            arb_input_max_fill(),
            arb_diplomacy(),
            arb_pinned_note(),
        ]
    }

    /// Generate a sequence of payloads.
    pub fn arb_payload_sequence(max_len: usize) -> impl Strategy<Value = Vec<CommandPayload>> {
        proptest::collection::vec(arb_payload(), 0..max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{note_command, priority_command, two_player_game};
    use emberfall_core::command::PlayerCommand;
    use emberfall_core::game::WarePriority;
    use proptest::prelude::*;

    // =========================================================================
    // Basic determinism tests
    // =========================================================================

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_pipeline_determinism() {
        assert!(verify_pipeline_determinism(
            || (Game::new(), CommandQueue::new()),
            100
        ));
    }

    fn scripted_scenario() -> (Game, CommandQueue) {
        let mut game = two_player_game();
        let building = game.place_building(1, emberfall_core::game::MapCoords::new(8, 8), 2);

        let mut queue = CommandQueue::new();
        queue.enqueue(note_command(1, 3, 1, "scouted"));
        queue.enqueue(priority_command(1, 3, 2, building, WarePriority::High));
        queue.enqueue(note_command(2, 7, 3, "expanding"));
        (game, queue)
    }

    #[test]
    fn test_scripted_scenario_determinism() {
        let result = verify_determinism(
            5,
            20,
            scripted_scenario,
            |(game, queue)| {
                let next = game.current_tick() + 1;
                queue.advance(game, next);
            },
            |(game, _)| game.state_hash(),
        );
        result.assert_deterministic();
    }

    #[test]
    fn test_find_divergence_on_deterministic_pipeline() {
        let divergence = find_first_divergence(scripted_scenario, 20);
        assert!(divergence.is_none(), "Expected no divergence");
    }

    #[test]
    fn test_snapshot_preserves_scripted_state() {
        assert!(verify_snapshot_determinism(scripted_scenario, 10));
    }

    #[test]
    fn test_parallel_scripted_runs() {
        let result = run_parallel_pipelines(scripted_scenario, 4, 20);
        result.assert_deterministic();
    }

    // =========================================================================
    // Property-based tests using proptest
    // =========================================================================

    proptest! {
        /// Any random payload stream must replay identically: enqueue the
        /// same sequenced commands into two independent games and compare.
        #[test]
        fn prop_random_payload_streams_are_deterministic(
            payloads in strategies::arb_payload_sequence(24),
        ) {
            let payloads_clone = payloads.clone();
            let setup = move || {
                let game = two_player_game();
                let mut queue = CommandQueue::new();
                for (i, payload) in payloads_clone.iter().enumerate() {
                    let sender = if i % 2 == 0 { 1 } else { 2 };
                    let due = (i as u64) % 10;
                    let mut cmd = PlayerCommand::new(sender, due, payload.clone());
                    cmd.assign_serial(i as u32 + 1);
                    queue.enqueue(cmd);
                }
                (game, queue)
            };

            let result = verify_determinism(
                2,
                12,
                setup,
                |(game, queue)| {
                    let next = game.current_tick() + 1;
                    queue.advance(game, next);
                },
                |(game, _)| game.state_hash(),
            );
            prop_assert!(result.is_deterministic);
        }

        /// Arrival order must not matter: the same same-tick commands
        /// enqueued forwards and backwards produce identical states.
        #[test]
        fn prop_enqueue_order_is_irrelevant(
            payloads in strategies::arb_payload_sequence(16),
        ) {
            let build = |reversed: bool| {
                let mut game = two_player_game();
                let mut queue = CommandQueue::new();
                let mut commands: Vec<PlayerCommand> = payloads
                    .iter()
                    .enumerate()
                    .map(|(i, payload)| {
                        let mut cmd = PlayerCommand::new(1, 5, payload.clone());
                        cmd.assign_serial(i as u32 + 1);
                        cmd
                    })
                    .collect();
                if reversed {
                    commands.reverse();
                }
                for cmd in commands {
                    queue.enqueue(cmd);
                }
                queue.advance(&mut game, 10);
                game.state_hash()
            };

            prop_assert_eq!(build(false), build(true));
        }

        /// Snapshot round-trips must be exact for any random stream.
        #[test]
        fn prop_snapshot_roundtrip_is_exact(
            payloads in strategies::arb_payload_sequence(12),
            ticks in 0u64..16,
        ) {
            let payloads_clone = payloads.clone();
            let setup = move || {
                let game = two_player_game();
                let mut queue = CommandQueue::new();
                for (i, payload) in payloads_clone.iter().enumerate() {
                    let mut cmd = PlayerCommand::new(2, (i as u64) % 6, payload.clone());
                    cmd.assign_serial(i as u32 + 1);
                    queue.enqueue(cmd);
                }
                (game, queue)
            };
            prop_assert!(verify_snapshot_determinism(setup, ticks));
        }
    }
}
