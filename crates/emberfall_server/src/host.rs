//! The authoritative command sequencer and desync monitor.
//!
//! Clients submit wire-encoded commands with cmdserial 0. The host assigns
//! the next serial, binds the due tick (`current + latency`), and returns
//! the rewritten record for broadcast. Because every peer receives the same
//! serials and due ticks, they all execute the same commands in the same
//! order - the host is the single point where the lockstep ordering is
//! decided.
//!
//! Desync cannot be detected inside the simulation itself; it only shows up
//! when peers' state hashes diverge. Clients report hashes per tick and the
//! host compares them here, announcing the first mismatching tick once.

use std::collections::BTreeMap;

use emberfall_core::codec::{StreamRead, StreamWrite};
use emberfall_core::command::PlayerCommand;
use emberfall_core::error::Result;
use emberfall_core::game::{CmdSerial, PlayerNumber, Tick};

/// A command the host has sequenced and bound, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckedCommand {
    /// Tick at which the command falls due on every peer.
    pub duetime: Tick,
    /// The serial the host assigned.
    pub cmdserial: CmdSerial,
    /// Sender carried in the record.
    pub sender: PlayerNumber,
    /// Rewritten wire record, carrying the assigned serial.
    pub frame: Vec<u8>,
}

/// Sequencing and checksum state for one running game.
#[derive(Debug)]
pub struct Host {
    next_cmdserial: CmdSerial,
    current_tick: Tick,
    latency_ticks: Tick,
    checksums: BTreeMap<Tick, BTreeMap<PlayerNumber, u64>>,
    desync_announced: bool,
}

impl Host {
    /// Create a host at tick 0.
    #[must_use]
    pub fn new(latency_ticks: Tick) -> Self {
        Self {
            next_cmdserial: 0,
            current_tick: 0,
            latency_ticks,
            checksums: BTreeMap::new(),
            desync_announced: false,
        }
    }

    /// The host's current tick.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Advance the host clock by one tick and return the new value.
    pub fn advance_tick(&mut self) -> Tick {
        self.current_tick += 1;
        self.current_tick
    }

    /// Sequence a client-submitted command.
    ///
    /// Decodes the wire record (validating it in the process), assigns the
    /// next cmdserial, binds the due tick, and re-encodes. From this point
    /// the command cannot be withdrawn - peers may already know about it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not decode; the command is then
    /// dropped without consuming a serial.
    pub fn ack_command(&mut self, raw: &[u8]) -> Result<AckedCommand> {
        let mut reader = StreamRead::new(raw);
        let mut command = PlayerCommand::deserialize(&mut reader)?;

        self.next_cmdserial += 1;
        let cmdserial = self.next_cmdserial;
        command.assign_serial(cmdserial);
        let duetime = self.current_tick + self.latency_ticks;
        command.bind_duetime(duetime);

        let mut writer = StreamWrite::new();
        command.serialize(&mut writer);

        tracing::debug!(
            cmdserial,
            duetime,
            sender = command.sender(),
            kind = ?command.kind(),
            "command acked"
        );

        Ok(AckedCommand {
            duetime,
            cmdserial,
            sender: command.sender(),
            frame: writer.into_bytes(),
        })
    }

    /// Record a peer's state hash for a tick.
    ///
    /// Returns the first tick at which two peers disagree, exactly once per
    /// game - after a desync everything downstream diverges too, so
    /// repeating the announcement adds nothing.
    pub fn record_checksum(
        &mut self,
        player: PlayerNumber,
        tick: Tick,
        hash: u64,
    ) -> Option<Tick> {
        let entry = self.checksums.entry(tick).or_default();
        entry.insert(player, hash);

        if self.desync_announced {
            return None;
        }
        let mut hashes = entry.values();
        let first = hashes.next().copied()?;
        if hashes.all(|h| *h == first) {
            return None;
        }
        self.desync_announced = true;
        tracing::warn!(tick, "desync detected between peers");
        Some(tick)
    }

    /// Drop checksum records older than `before`; every peer has passed
    /// them.
    pub fn prune_checksums(&mut self, before: Tick) {
        self.checksums = self.checksums.split_off(&before);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::apply_turn;
    use emberfall_core::command::{CommandPayload, PlayerCommand};
    use emberfall_core::dispatch::CommandQueue;
    use emberfall_core::game::{Game, MapCoords, WarePriority};

    fn wire_encode(command: &PlayerCommand) -> Vec<u8> {
        let mut w = StreamWrite::new();
        command.serialize(&mut w);
        w.into_bytes()
    }

    fn priority_intent(object: u32, priority: WarePriority) -> Vec<u8> {
        wire_encode(&PlayerCommand::new(
            1,
            0,
            CommandPayload::SetWarePriority {
                object,
                ware: 1,
                priority,
                is_constructionsite_setting: false,
            },
        ))
    }

    #[test]
    fn test_ack_assigns_serials_and_duetime() {
        let mut host = Host::new(4);
        host.advance_tick();
        host.advance_tick();

        let first = host.ack_command(&priority_intent(5, WarePriority::Low)).unwrap();
        let second = host
            .ack_command(&priority_intent(5, WarePriority::High))
            .unwrap();

        assert_eq!(first.cmdserial, 1);
        assert_eq!(second.cmdserial, 2);
        assert_eq!(first.duetime, 6);
        assert_eq!(second.duetime, 6);
    }

    #[test]
    fn test_ack_rejects_garbage_without_consuming_serial() {
        let mut host = Host::new(2);
        assert!(host.ack_command(&[200, 0]).is_err());
        let acked = host.ack_command(&priority_intent(5, WarePriority::Low)).unwrap();
        assert_eq!(acked.cmdserial, 1);
    }

    #[test]
    fn test_acked_turns_keep_two_peers_identical() {
        let build_peer = || {
            let mut game = Game::new();
            game.add_player(1, "one");
            let building = game.place_building(1, MapCoords::new(2, 2), 3);
            (game, CommandQueue::new(), building)
        };
        let (mut game_a, mut queue_a, building) = build_peer();
        let (mut game_b, mut queue_b, _) = build_peer();

        let mut host = Host::new(3);
        host.advance_tick();

        // Conflicting intents acked in submission order; both peers must
        // resolve the conflict identically.
        let low = host
            .ack_command(&priority_intent(building, WarePriority::Low))
            .unwrap();
        let high = host
            .ack_command(&priority_intent(building, WarePriority::High))
            .unwrap();
        assert_eq!(low.duetime, high.duetime);

        let frames = vec![low.frame.clone(), high.frame.clone()];
        apply_turn(&mut queue_a, low.duetime, &frames).unwrap();
        // Peer B receives them in the opposite order.
        let reversed = vec![high.frame, low.frame];
        apply_turn(&mut queue_b, low.duetime, &reversed).unwrap();

        queue_a.advance(&mut game_a, 10);
        queue_b.advance(&mut game_b, 10);

        assert_eq!(game_a.state_hash(), game_b.state_hash());
    }

    #[test]
    fn test_checksum_mismatch_reported_once() {
        let mut host = Host::new(2);

        assert_eq!(host.record_checksum(1, 10, 0xAAAA), None);
        assert_eq!(host.record_checksum(2, 10, 0xAAAA), None);

        assert_eq!(host.record_checksum(1, 11, 0xAAAA), None);
        assert_eq!(host.record_checksum(2, 11, 0xBBBB), Some(11));

        // Further mismatches stay quiet.
        assert_eq!(host.record_checksum(2, 12, 0xCCCC), None);
        assert_eq!(host.record_checksum(1, 12, 0xDDDD), None);
    }

    #[test]
    fn test_prune_checksums() {
        let mut host = Host::new(2);
        host.record_checksum(1, 5, 1);
        host.record_checksum(1, 9, 1);
        host.prune_checksums(8);
        assert_eq!(host.record_checksum(2, 9, 1), None);
        // Tick 5 is gone; a single fresh entry cannot mismatch.
        assert_eq!(host.record_checksum(2, 5, 999), None);
    }
}
