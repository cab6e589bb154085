//! Session lobby: stable player-number assignment and start transition.

use thiserror::Error;

use emberfall_core::game::PlayerNumber;

use crate::protocol::PlayerInfo;

/// Why a join attempt was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    /// Every slot is taken.
    #[error("session is full ({0} players)")]
    Full(u8),
    /// The game already started; mid-game join is not supported here.
    #[error("game already started")]
    AlreadyStarted,
}

/// Pre-game lobby tracking who occupies which player number.
///
/// Numbers are assigned lowest-free-first starting at 1 and stay stable for
/// the whole session; commands carry them as the sender field, so they must
/// never be reshuffled once the game starts.
#[derive(Debug)]
pub struct Lobby {
    slots: Vec<PlayerInfo>,
    max_players: u8,
    started: bool,
}

impl Lobby {
    /// Create an empty lobby with the given capacity.
    #[must_use]
    pub fn new(max_players: u8) -> Self {
        Self {
            slots: Vec::new(),
            max_players,
            started: false,
        }
    }

    /// Add a player, returning their assigned number.
    ///
    /// # Errors
    ///
    /// Fails when the lobby is full or the game already started.
    pub fn join(&mut self, name: impl Into<String>) -> Result<PlayerNumber, JoinError> {
        if self.started {
            return Err(JoinError::AlreadyStarted);
        }
        if self.slots.len() >= self.max_players as usize {
            return Err(JoinError::Full(self.max_players));
        }
        let number = (1..=self.max_players)
            .find(|n| !self.slots.iter().any(|s| s.number == *n))
            .unwrap_or(self.max_players);
        let info = PlayerInfo {
            number,
            name: name.into(),
        };
        self.slots.push(info);
        self.slots.sort_by_key(|s| s.number);
        tracing::info!(number, "player joined lobby");
        Ok(number)
    }

    /// Remove a player, returning their slot if they were present.
    ///
    /// After the game starts the number is not freed for reuse - a
    /// reconnecting player must take the same number.
    pub fn leave(&mut self, number: PlayerNumber) -> Option<PlayerInfo> {
        let index = self.slots.iter().position(|s| s.number == number)?;
        let info = self.slots.remove(index);
        tracing::info!(number, "player left lobby");
        Some(info)
    }

    /// Everyone currently present, in player-number order.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerInfo> {
        self.slots.clone()
    }

    /// Look up a player's name.
    #[must_use]
    pub fn name_of(&self, number: PlayerNumber) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.number == number)
            .map(|s| s.name.as_str())
    }

    /// Mark the game as started; no further joins are accepted.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// Whether the game has started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the lobby is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_assigned_lowest_free_first() {
        let mut lobby = Lobby::new(4);
        assert_eq!(lobby.join("a").unwrap(), 1);
        assert_eq!(lobby.join("b").unwrap(), 2);
        assert_eq!(lobby.join("c").unwrap(), 3);

        lobby.leave(2);
        assert_eq!(lobby.join("d").unwrap(), 2);
    }

    #[test]
    fn test_full_lobby_rejects() {
        let mut lobby = Lobby::new(2);
        lobby.join("a").unwrap();
        lobby.join("b").unwrap();
        assert_eq!(lobby.join("c").unwrap_err(), JoinError::Full(2));
    }

    #[test]
    fn test_started_lobby_rejects() {
        let mut lobby = Lobby::new(4);
        lobby.join("a").unwrap();
        lobby.start();
        assert_eq!(lobby.join("b").unwrap_err(), JoinError::AlreadyStarted);
    }

    #[test]
    fn test_players_sorted_by_number() {
        let mut lobby = Lobby::new(4);
        lobby.join("a").unwrap();
        lobby.join("b").unwrap();
        lobby.join("c").unwrap();
        lobby.leave(1);
        lobby.join("d").unwrap();

        let numbers: Vec<u8> = lobby.players().iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(lobby.name_of(1), Some("d"));
    }
}
