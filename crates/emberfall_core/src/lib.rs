//! # Emberfall Core
//!
//! Deterministic player-command pipeline for Emberfall RTS.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO beyond explicit (de)serialization
//! - No system randomness
//! - No wall-clock time
//!
//! Every player action - building, bulldozing, ware priorities, diplomacy,
//! message handling - is expressed as a [`command::PlayerCommand`], sequenced
//! by the authoritative host, and executed at its due tick identically on
//! every simulating peer. This separation enables:
//! - Lockstep multiplayer (identical simulation across clients)
//! - Replay systems
//! - Savegames that renumber sparse runtime ids densely
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`command`] - Command variants, wire format, execution semantics
//! - [`dispatch`] - Deterministic `(duetime, cmdserial)` ordering
//! - [`message`] - Per-player message stores with stable ids
//! - [`savegame`] - Dense renumbering and tagged savegame records
//! - [`replay`] - Command-stream recording and verified playback
//! - [`game`] - The shared simulation state commands mutate
//! - [`codec`] - Byte-level record encoding

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod codec;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod game;
pub mod message;
pub mod replay;
pub mod savegame;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::command::{
        CommandKind, CommandPayload, DiplomacyAction, PlayerCommand,
    };
    pub use crate::dispatch::CommandQueue;
    pub use crate::error::{GameError, Result};
    pub use crate::game::{
        CmdSerial, DescriptionIndex, Game, MapCoords, MapObjectKind, PlayerNumber, Serial, Tick,
        WarePriority, WareWorker,
    };
    pub use crate::message::{Message, MessageBoard, MessageId, MessageQueue, MessageStatus};
    pub use crate::replay::{Replay, ReplayPlayer};
    pub use crate::savegame::{load_game, save_game, MessageSaver, ObjectLoader, ObjectSaver};
}
