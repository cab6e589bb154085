//! # Emberfall Relay Server
//!
//! Headless relay host for multiplayer games.
//!
//! The relay is the authoritative sequencer: it assigns each incoming
//! command its `cmdserial`, binds the due tick, and rebroadcasts the result
//! as turn batches so every peer applies the same commands in the same
//! order. It never simulates the game itself - commands stay opaque apart
//! from the header the sequencer rewrites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod host;
pub mod lobby;
pub mod protocol;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use emberfall_core::game::Tick;

/// Error loading a server configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid RON for [`ServerConfig`].
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Maximum players per game.
    pub max_players: u8,
    /// Tick rate (should match client).
    pub tick_rate: u32,
    /// How many ticks ahead of the current tick acked commands fall due.
    /// Covers the round trip to the slowest peer.
    pub command_latency_ticks: Tick,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            max_players: 8,
            tick_rate: emberfall_core::game::TICK_RATE,
            command_latency_ticks: 4,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a RON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(ron::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7777);
        assert_eq!(config.tick_rate, emberfall_core::game::TICK_RATE);
    }

    #[test]
    fn test_config_parses_partial_ron() {
        let config: ServerConfig = ron::from_str("(port: 9000)").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_players, 8);
    }
}
