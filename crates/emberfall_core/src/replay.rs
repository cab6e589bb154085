//! Replay system for recording and playing back games.
//!
//! Replays store the initial game snapshot and the stream of acked commands.
//! Because command execution is deterministic, re-running the stream through
//! the real dispatcher recreates the game exactly; the recorded final state
//! hash makes the claim checkable.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::command::PlayerCommand;
use crate::dispatch::CommandQueue;
use crate::error::{GameError, Result};
use crate::game::{Game, Tick};

/// Replay file format version for compatibility.
pub const REPLAY_VERSION: u32 = 1;

/// Complete replay data structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    /// Replay format version.
    pub version: u32,
    /// Scenario identifier or name.
    pub scenario_id: String,
    /// Serialized initial game state.
    pub initial_state: Vec<u8>,
    /// Stream of acked commands in `(duetime, cmdserial)` order.
    pub commands: Vec<PlayerCommand>,
    /// Final tick when the game ended.
    pub final_tick: Tick,
    /// Final state hash for verification.
    pub final_hash: u64,
}

impl Replay {
    /// Create a new replay from a game's initial state.
    pub fn new(scenario_id: impl Into<String>, initial_state: &Game) -> Result<Self> {
        let state_bytes = initial_state.serialize()?;
        Ok(Self {
            version: REPLAY_VERSION,
            scenario_id: scenario_id.into(),
            initial_state: state_bytes,
            commands: Vec::new(),
            final_tick: 0,
            final_hash: 0,
        })
    }

    /// Record an acked command for replay.
    ///
    /// Commands must already carry their cmdserial; unsequenced commands
    /// are not part of the authoritative timeline.
    pub fn record_command(&mut self, command: &PlayerCommand) {
        debug_assert_ne!(command.cmdserial(), 0, "recording unsequenced command");
        self.commands.push(command.clone());
    }

    /// Finalize the replay with end-game state.
    pub fn finalize(&mut self, final_tick: Tick, final_hash: u64) {
        self.final_tick = final_tick;
        self.final_hash = final_hash;
    }

    /// Save the replay to a file.
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path.as_ref(), bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to write replay file: {e}")))?;
        Ok(())
    }

    /// Load a replay from a file.
    ///
    /// # Errors
    /// Returns an error if file reading or deserialization fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| GameError::InvalidState(format!("Failed to read replay file: {e}")))?;
        let replay: Self = bincode::deserialize(&bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize replay: {e}")))?;

        // Version check
        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {}, got {}",
                REPLAY_VERSION, replay.version
            )));
        }

        Ok(replay)
    }

    /// Get the initial game state for playback.
    ///
    /// # Errors
    /// Returns an error if state deserialization fails.
    pub fn restore_initial_state(&self) -> Result<Game> {
        Game::deserialize(&self.initial_state)
    }

    /// Get the total duration of the replay in ticks.
    #[must_use]
    pub const fn duration(&self) -> Tick {
        self.final_tick
    }

    /// Get the total number of commands in the replay.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

/// Replay playback controller.
///
/// Drives the recorded command stream through the real dispatcher, so
/// playback exercises exactly the code paths a live game does.
#[derive(Debug)]
pub struct ReplayPlayer {
    /// The replay being played.
    replay: Replay,
    /// Current game state.
    game: Game,
    /// Dispatcher holding the not-yet-due commands.
    queue: CommandQueue,
    /// Current playback tick.
    current_tick: Tick,
    /// Whether playback is paused.
    pub paused: bool,
}

impl ReplayPlayer {
    /// Create a new replay player from a replay.
    ///
    /// # Errors
    /// Returns an error if the initial state cannot be restored.
    pub fn new(replay: Replay) -> Result<Self> {
        let game = replay.restore_initial_state()?;
        let mut queue = CommandQueue::new();
        for command in &replay.commands {
            queue.enqueue(command.clone());
        }
        Ok(Self {
            replay,
            game,
            queue,
            current_tick: 0,
            paused: false,
        })
    }

    /// Advance the replay by one tick.
    ///
    /// Returns true if there are more ticks to play.
    pub fn advance(&mut self) -> bool {
        if self.paused || self.current_tick >= self.replay.final_tick {
            return self.current_tick < self.replay.final_tick;
        }

        self.current_tick += 1;
        self.queue.advance(&mut self.game, self.current_tick);

        self.current_tick < self.replay.final_tick
    }

    /// Seek to a specific tick.
    ///
    /// # Errors
    /// Returns an error if state restoration fails.
    pub fn seek(&mut self, target_tick: Tick) -> Result<()> {
        // Reset to initial state and re-enqueue the whole stream.
        self.game = self.replay.restore_initial_state()?;
        self.queue = CommandQueue::new();
        for command in &self.replay.commands {
            self.queue.enqueue(command.clone());
        }
        self.current_tick = 0;

        let target = target_tick.min(self.replay.final_tick);
        while self.current_tick < target {
            self.current_tick += 1;
            self.queue.advance(&mut self.game, self.current_tick);
        }

        Ok(())
    }

    /// Get the current tick.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Get a reference to the current game state.
    #[must_use]
    pub const fn game(&self) -> &Game {
        &self.game
    }

    /// Get the replay being played.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Check if the replay has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_tick >= self.replay.final_tick
    }

    /// Verify the replay produces the expected final hash.
    ///
    /// # Errors
    /// Returns an error if state restoration fails.
    pub fn verify(&mut self) -> Result<bool> {
        self.seek(self.replay.final_tick)?;
        let actual_hash = self.game.state_hash();
        Ok(actual_hash == self.replay.final_hash)
    }

    /// Toggle pause state.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Get progress as a percentage (0-100).
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.replay.final_tick == 0 {
            100.0
        } else {
            (self.current_tick as f64 / self.replay.final_tick as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPayload;
    use crate::game::MapCoords;

    fn create_test_game() -> Game {
        let mut game = Game::new();
        game.add_player(1, "one");
        game.add_player(2, "two");
        game.place_building(1, MapCoords::new(5, 5), 3);
        game
    }

    fn note_command(sender: u8, duetime: Tick, serial: u32, text: &str) -> PlayerCommand {
        let mut cmd = PlayerCommand::new(
            sender,
            duetime,
            CommandPayload::PinnedNote {
                note: 0,
                position: MapCoords::new(2, 2),
                text: text.into(),
                color: [9, 9, 9],
                delete: false,
            },
        );
        cmd.assign_serial(serial);
        cmd
    }

    #[test]
    fn test_replay_create() {
        let game = create_test_game();
        let replay = Replay::new("test_scenario", &game);
        assert!(replay.is_ok());

        let replay = replay.unwrap();
        assert_eq!(replay.version, REPLAY_VERSION);
        assert_eq!(replay.scenario_id, "test_scenario");
        assert!(replay.commands.is_empty());
    }

    #[test]
    fn test_replay_record_and_finalize() {
        let game = create_test_game();
        let mut replay = Replay::new("test_scenario", &game).unwrap();

        replay.record_command(&note_command(1, 3, 1, "a"));
        replay.record_command(&note_command(2, 7, 2, "b"));
        replay.finalize(100, 0xDEAD_BEEF);

        assert_eq!(replay.command_count(), 2);
        assert_eq!(replay.duration(), 100);
        assert_eq!(replay.final_hash, 0xDEAD_BEEF);
    }

    #[test]
    fn test_replay_save_load() {
        let game = create_test_game();
        let mut replay = Replay::new("test_scenario", &game).unwrap();
        replay.record_command(&note_command(1, 3, 1, "a"));
        replay.finalize(50, 0x1234_5678);

        let temp_path = std::env::temp_dir().join("emberfall_test_replay.bin");
        assert!(replay.save(&temp_path).is_ok());

        let loaded = Replay::load(&temp_path).unwrap();
        assert_eq!(loaded.scenario_id, "test_scenario");
        assert_eq!(loaded.command_count(), 1);
        assert_eq!(loaded.duration(), 50);
        assert_eq!(loaded.final_hash, 0x1234_5678);

        let _ = std::fs::remove_file(temp_path);
    }

    #[test]
    fn test_replay_reproduces_live_run() {
        // Run a live game, record everything, then verify playback lands on
        // the same hash.
        let mut game = create_test_game();
        let mut replay = Replay::new("live", &game).unwrap();
        let mut queue = CommandQueue::new();
        for (tick, text) in [(2u64, "first"), (2, "second"), (9, "third")] {
            let cmd = PlayerCommand::new(
                1,
                tick,
                CommandPayload::PinnedNote {
                    note: 0,
                    position: MapCoords::new(1, 1),
                    text: text.into(),
                    color: [0, 0, 0],
                    delete: false,
                },
            );
            let mut recorded = cmd.clone();
            let serial = queue.sequence(cmd);
            recorded.assign_serial(serial);
            replay.record_command(&recorded);
        }

        queue.advance(&mut game, 20);
        replay.finalize(20, game.state_hash());

        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(player.verify().unwrap());
    }

    #[test]
    fn test_replay_player_advance_and_seek() {
        let game = create_test_game();
        let mut replay = Replay::new("test", &game).unwrap();
        replay.record_command(&note_command(1, 5, 1, "a"));
        replay.finalize(10, 0);

        let mut player = ReplayPlayer::new(replay).unwrap();

        for _ in 0..4 {
            assert!(player.advance());
        }
        assert_eq!(player.current_tick(), 4);
        assert_eq!(player.game().object_count(), 1);

        player.advance();
        assert_eq!(player.game().object_count(), 2);

        player.seek(3).unwrap();
        assert_eq!(player.current_tick(), 3);
        assert_eq!(player.game().object_count(), 1);

        while player.advance() {}
        assert!(player.is_finished());
    }

    #[test]
    fn test_replay_player_pause() {
        let game = create_test_game();
        let mut replay = Replay::new("test", &game).unwrap();
        replay.finalize(10, 0);

        let mut player = ReplayPlayer::new(replay).unwrap();
        player.paused = true;
        player.advance();
        assert_eq!(player.current_tick(), 0);

        player.toggle_pause();
        player.advance();
        assert_eq!(player.current_tick(), 1);
    }

    #[test]
    fn test_replay_player_progress() {
        let game = create_test_game();
        let mut replay = Replay::new("test", &game).unwrap();
        replay.finalize(100, 0);

        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!((player.progress_percent() - 0.0).abs() < 0.01);

        player.seek(50).unwrap();
        assert!((player.progress_percent() - 50.0).abs() < 0.01);
    }
}
