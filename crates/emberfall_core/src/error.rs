//! Error types for the command pipeline.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all command-pipeline errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// A stream ended before a complete value could be read.
    #[error("Stream ended while reading {wanted} ({offset} bytes in)")]
    StreamEnd {
        /// Description of the value being read.
        wanted: &'static str,
        /// Byte offset at which the read was attempted.
        offset: usize,
    },

    /// A stream contained data that cannot be decoded.
    #[error("Corrupt stream data: {0}")]
    CorruptData(String),

    /// A command record carried a type tag no variant claims.
    #[error("Unknown command tag: {0}")]
    UnknownCommandTag(u8),

    /// A saved stream was written by an incompatible format version.
    #[error("Format version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build writes and reads.
        expected: u16,
        /// Version found in the stream.
        got: u16,
    },

    /// A referenced player does not exist in the game.
    #[error("Player not found: {0}")]
    PlayerNotFound(u8),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected in multiplayer.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}
