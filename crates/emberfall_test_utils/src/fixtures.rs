//! Test fixtures and helpers.
//!
//! Pre-built game states and command constructors for consistent testing.

use emberfall_core::command::{CommandPayload, PlayerCommand};
use emberfall_core::game::{Game, MapCoords, Serial, Tick, WarePriority};

/// A two-player game with one building and one economy per player.
#[must_use]
pub fn two_player_game() -> Game {
    let mut game = Game::new();
    game.add_player(1, "aldora");
    game.add_player(2, "bren");
    game.place_building(1, MapCoords::new(4, 4), 1);
    game.place_building(2, MapCoords::new(40, 40), 1);
    game.create_economy(1);
    game.create_economy(2);
    game
}

/// A sequenced pinned-note command; the cheapest state-mutating command.
#[must_use]
pub fn note_command(sender: u8, duetime: Tick, serial: u32, text: &str) -> PlayerCommand {
    let mut command = PlayerCommand::new(
        sender,
        duetime,
        CommandPayload::PinnedNote {
            note: 0,
            position: MapCoords::new(1, 1),
            text: text.into(),
            color: [128, 128, 128],
            delete: false,
        },
    );
    command.assign_serial(serial);
    command
}

/// A sequenced ware-priority command targeting `object`.
#[must_use]
pub fn priority_command(
    sender: u8,
    duetime: Tick,
    serial: u32,
    object: Serial,
    priority: WarePriority,
) -> PlayerCommand {
    let mut command = PlayerCommand::new(
        sender,
        duetime,
        CommandPayload::SetWarePriority {
            object,
            ware: 1,
            priority,
            is_constructionsite_setting: false,
        },
    );
    command.assign_serial(serial);
    command
}
