//! Shared simulation state mutated exclusively by command execution.
//!
//! A [`Game`] holds everything the command pipeline needs to see of the
//! world: players, map objects addressed by stable [`Serial`] handles,
//! economies, diplomacy proposals, and the per-player message board. UI and
//! networking code never touch this state directly - they construct commands
//! and submit them to the dispatcher, which applies them on the single
//! simulation thread.
//!
//! # Determinism
//!
//! All containers iterate in sorted key order, all quantities are integers,
//! and object references are serials rather than pointers, so two peers
//! applying the same command stream to the same starting state stay
//! byte-identical. [`Game::state_hash`] condenses the observable state for
//! desync testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::message::MessageBoard;

/// Stable identifier of a participating player. 0 is never assigned.
pub type PlayerNumber = u8;

/// Stable integer handle identifying a map object or economy.
///
/// Serials survive serialization boundaries where in-memory addresses do
/// not; 0 is the reserved null value.
pub type Serial = u32;

/// Logical simulation timestamp, in ticks.
pub type Tick = u64;

/// Network-assigned sequence number ordering same-tick commands.
pub type CmdSerial = u32;

/// Index into the static ware/worker/building description tables.
pub type DescriptionIndex = u16;

/// Ticks per second for the simulation.
pub const TICK_RATE: u32 = 20;

/// Duration of one tick in milliseconds.
pub const TICK_DURATION_MS: u32 = 1000 / TICK_RATE;

/// A map field coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MapCoords {
    /// Column.
    pub x: u16,
    /// Row.
    pub y: u16,
}

impl MapCoords {
    /// Create a coordinate pair.
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// Ware transfer priority for a building input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WarePriority {
    /// Deliver after everything else.
    Low,
    /// Default delivery priority.
    #[default]
    Normal,
    /// Deliver before everything else.
    High,
}

impl WarePriority {
    /// Stable wire encoding.
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            WarePriority::Low => 0,
            WarePriority::Normal => 1,
            WarePriority::High => 2,
        }
    }

    /// Decode from the wire value.
    pub(crate) fn from_wire(v: u8) -> Result<Self> {
        match v {
            0 => Ok(WarePriority::Low),
            1 => Ok(WarePriority::Normal),
            2 => Ok(WarePriority::High),
            other => Err(GameError::CorruptData(format!(
                "invalid ware priority {other}"
            ))),
        }
    }
}

/// Discriminates ware inputs from worker inputs in settings and commands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum WareWorker {
    /// A ware input slot.
    #[default]
    Ware,
    /// A worker input slot.
    Worker,
}

impl WareWorker {
    /// Stable wire encoding.
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            WareWorker::Ware => 0,
            WareWorker::Worker => 1,
        }
    }

    /// Decode from the wire value.
    pub(crate) fn from_wire(v: u8) -> Result<Self> {
        match v {
            0 => Ok(WareWorker::Ware),
            1 => Ok(WareWorker::Worker),
            other => Err(GameError::CorruptData(format!(
                "invalid ware/worker discriminant {other}"
            ))),
        }
    }
}

/// Input configuration shared by finished buildings (live settings) and
/// constructionsites (future settings applied on completion).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WareSettings {
    /// Transfer priority per ware input.
    pub priorities: BTreeMap<DescriptionIndex, WarePriority>,
    /// Desired queue fill per input slot.
    pub max_fill: BTreeMap<(WareWorker, DescriptionIndex), u32>,
    /// Whether production is (or will launch) stopped.
    pub stopped: bool,
}

impl WareSettings {
    fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.priorities.len().hash(hasher);
        for (index, priority) in &self.priorities {
            index.hash(hasher);
            priority.to_wire().hash(hasher);
        }
        self.max_fill.len().hash(hasher);
        for ((kind, index), fill) in &self.max_fill {
            kind.to_wire().hash(hasher);
            index.hash(hasher);
            fill.hash(hasher);
        }
        self.stopped.hash(hasher);
    }
}

/// What a map object is, with its kind-specific state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapObjectKind {
    /// A finished building.
    Building {
        /// Description index of the building type.
        descr: DescriptionIndex,
        /// Live input settings.
        settings: WareSettings,
    },
    /// A building under construction.
    ConstructionSite {
        /// Description index of the building being built.
        becomes: DescriptionIndex,
        /// Settings applied when construction completes.
        settings: WareSettings,
    },
    /// A player-placed map annotation.
    PinnedNote {
        /// Note text.
        text: String,
        /// Note color, RGB.
        color: [u8; 3],
    },
}

/// One object on the map, addressed by its serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapObject {
    /// Stable handle for this object.
    pub serial: Serial,
    /// Owning player.
    pub owner: PlayerNumber,
    /// Map position.
    pub position: MapCoords,
    /// Parent object, if this object exists only as an attachment
    /// (e.g. the flag in front of a building). Recursive bulldozing
    /// follows these links.
    pub parent: Option<Serial>,
    /// Kind-specific state.
    pub kind: MapObjectKind,
}

/// A participating player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable player number.
    pub number: PlayerNumber,
    /// Display name.
    pub name: String,
    /// Team the player belongs to; 0 means no team.
    pub team: u8,
    /// Whether the player has resigned.
    pub resigned: bool,
}

/// A pending diplomacy proposal awaiting the counterparty's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiplomacyProposal {
    /// Player who initiated the proposal.
    pub from: PlayerNumber,
    /// Player the proposal is addressed to.
    pub to: PlayerNumber,
    /// Whether this is an invitation into `from`'s team or a request to
    /// join `to`'s team.
    pub kind: ProposalKind,
}

/// The two directions a team proposal can flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalKind {
    /// `from` invites `to` into `from`'s team.
    Invite,
    /// `from` asks to join `to`'s team.
    Join,
}

/// Per-player-economy target quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Economy {
    /// Owning player.
    pub owner: PlayerNumber,
    /// Permanent target per ware type.
    pub ware_targets: BTreeMap<DescriptionIndex, u32>,
    /// Permanent target per worker type.
    pub worker_targets: BTreeMap<DescriptionIndex, u32>,
}

/// The shared simulation state.
///
/// Mutated only from inside command execution on the simulation thread; the
/// one exception is the message board, which tolerates concurrent readers
/// behind its own lock (see the message module).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Game {
    tick: Tick,
    players: BTreeMap<PlayerNumber, Player>,
    objects: BTreeMap<Serial, MapObject>,
    economies: BTreeMap<Serial, Economy>,
    proposals: Vec<DiplomacyProposal>,
    messages: MessageBoard,
    next_serial: Serial,
}

impl Game {
    /// Create an empty game at tick 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current logical tick.
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Advance the logical clock to `tick`.
    ///
    /// The clock never moves backwards; the dispatcher drives this as it
    /// retires due commands.
    pub fn advance_to(&mut self, tick: Tick) {
        debug_assert!(tick >= self.tick, "simulation clock moved backwards");
        self.tick = tick;
    }

    /// Add a player and create their message queue.
    pub fn add_player(&mut self, number: PlayerNumber, name: impl Into<String>) {
        debug_assert_ne!(number, 0, "player number 0 is reserved");
        self.players.insert(
            number,
            Player {
                number,
                name: name.into(),
                team: 0,
                resigned: false,
            },
        );
        self.messages.add_player(number);
    }

    /// Look up a player.
    #[must_use]
    pub fn player(&self, number: PlayerNumber) -> Option<&Player> {
        self.players.get(&number)
    }

    pub(crate) fn player_mut(&mut self, number: PlayerNumber) -> Option<&mut Player> {
        self.players.get_mut(&number)
    }

    /// Player numbers in ascending order.
    #[must_use]
    pub fn player_numbers(&self) -> Vec<PlayerNumber> {
        self.players.keys().copied().collect()
    }

    /// Allocate the next object serial.
    fn allocate_serial(&mut self) -> Serial {
        self.next_serial += 1;
        self.next_serial
    }

    pub(crate) fn insert_object(
        &mut self,
        owner: PlayerNumber,
        position: MapCoords,
        parent: Option<Serial>,
        kind: MapObjectKind,
    ) -> Serial {
        let serial = self.allocate_serial();
        self.objects.insert(
            serial,
            MapObject {
                serial,
                owner,
                position,
                parent,
                kind,
            },
        );
        serial
    }

    /// Place a finished building. Scenario/setup helper.
    pub fn place_building(
        &mut self,
        owner: PlayerNumber,
        position: MapCoords,
        descr: DescriptionIndex,
    ) -> Serial {
        self.insert_object(
            owner,
            position,
            None,
            MapObjectKind::Building {
                descr,
                settings: WareSettings::default(),
            },
        )
    }

    /// Place a constructionsite. Scenario/setup helper.
    pub fn place_constructionsite(
        &mut self,
        owner: PlayerNumber,
        position: MapCoords,
        becomes: DescriptionIndex,
    ) -> Serial {
        self.insert_object(
            owner,
            position,
            None,
            MapObjectKind::ConstructionSite {
                becomes,
                settings: WareSettings::default(),
            },
        )
    }

    /// Attach a child object (e.g. a building's flag) to `parent`.
    pub fn attach_object(
        &mut self,
        parent: Serial,
        position: MapCoords,
        kind: MapObjectKind,
    ) -> Option<Serial> {
        let owner = self.objects.get(&parent)?.owner;
        Some(self.insert_object(owner, position, Some(parent), kind))
    }

    /// Look up a map object by serial.
    #[must_use]
    pub fn object(&self, serial: Serial) -> Option<&MapObject> {
        self.objects.get(&serial)
    }

    pub(crate) fn object_mut(&mut self, serial: Serial) -> Option<&mut MapObject> {
        self.objects.get_mut(&serial)
    }

    pub(crate) fn remove_object(&mut self, serial: Serial) -> Option<MapObject> {
        self.objects.remove(&serial)
    }

    /// Serials of objects attached to `parent`, in ascending order.
    #[must_use]
    pub fn children_of(&self, parent: Serial) -> Vec<Serial> {
        self.objects
            .iter()
            .filter(|(_, o)| o.parent == Some(parent))
            .map(|(s, _)| *s)
            .collect()
    }

    /// Object serials in ascending order, for deterministic iteration.
    #[must_use]
    pub fn object_serials(&self) -> Vec<Serial> {
        self.objects.keys().copied().collect()
    }

    /// Number of live map objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Create an economy for `owner` and return its serial.
    pub fn create_economy(&mut self, owner: PlayerNumber) -> Serial {
        let serial = self.allocate_serial();
        self.economies.insert(
            serial,
            Economy {
                owner,
                ware_targets: BTreeMap::new(),
                worker_targets: BTreeMap::new(),
            },
        );
        serial
    }

    /// Look up an economy by serial.
    #[must_use]
    pub fn economy(&self, serial: Serial) -> Option<&Economy> {
        self.economies.get(&serial)
    }

    /// Economy serials in ascending order, for deterministic iteration.
    #[must_use]
    pub fn economy_serials(&self) -> Vec<Serial> {
        self.economies.keys().copied().collect()
    }

    pub(crate) fn economy_mut(&mut self, serial: Serial) -> Option<&mut Economy> {
        self.economies.get_mut(&serial)
    }

    /// The per-player message board.
    #[must_use]
    pub fn messages(&self) -> &MessageBoard {
        &self.messages
    }

    /// Pending diplomacy proposals, in submission order.
    #[must_use]
    pub fn diplomacy_proposals(&self) -> &[DiplomacyProposal] {
        &self.proposals
    }

    pub(crate) fn proposals_mut(&mut self) -> &mut Vec<DiplomacyProposal> {
        &mut self.proposals
    }

    /// Calculate a hash of the observable game state.
    ///
    /// Used for desync detection in multiplayer. Two games with identical
    /// state produce identical hashes.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.next_serial.hash(&mut hasher);

        self.players.len().hash(&mut hasher);
        for (number, player) in &self.players {
            number.hash(&mut hasher);
            player.name.hash(&mut hasher);
            player.team.hash(&mut hasher);
            player.resigned.hash(&mut hasher);
        }

        self.objects.len().hash(&mut hasher);
        for (serial, object) in &self.objects {
            serial.hash(&mut hasher);
            object.owner.hash(&mut hasher);
            object.position.hash(&mut hasher);
            object.parent.hash(&mut hasher);
            match &object.kind {
                MapObjectKind::Building { descr, settings } => {
                    0u8.hash(&mut hasher);
                    descr.hash(&mut hasher);
                    settings.hash_into(&mut hasher);
                }
                MapObjectKind::ConstructionSite { becomes, settings } => {
                    1u8.hash(&mut hasher);
                    becomes.hash(&mut hasher);
                    settings.hash_into(&mut hasher);
                }
                MapObjectKind::PinnedNote { text, color } => {
                    2u8.hash(&mut hasher);
                    text.hash(&mut hasher);
                    color.hash(&mut hasher);
                }
            }
        }

        self.economies.len().hash(&mut hasher);
        for (serial, economy) in &self.economies {
            serial.hash(&mut hasher);
            economy.owner.hash(&mut hasher);
            for (index, target) in &economy.ware_targets {
                index.hash(&mut hasher);
                target.hash(&mut hasher);
            }
            for (index, target) in &economy.worker_targets {
                index.hash(&mut hasher);
                target.hash(&mut hasher);
            }
        }

        self.proposals.len().hash(&mut hasher);
        for proposal in &self.proposals {
            proposal.from.hash(&mut hasher);
            proposal.to.hash(&mut hasher);
            proposal.kind.hash(&mut hasher);
        }

        self.messages.hash_into(&mut hasher);

        hasher.finish()
    }

    /// Serialize the full game state for replay or network snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize game: {e}")))
    }

    /// Deserialize game state from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize game: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_strictly_increase() {
        let mut game = Game::new();
        game.add_player(1, "one");
        let a = game.place_building(1, MapCoords::new(1, 1), 7);
        let b = game.place_constructionsite(1, MapCoords::new(2, 2), 7);
        let c = game.create_economy(1);
        assert!(a < b && b < c);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_attach_and_children() {
        let mut game = Game::new();
        game.add_player(1, "one");
        let building = game.place_building(1, MapCoords::new(3, 3), 2);
        let note = game
            .attach_object(
                building,
                MapCoords::new(3, 4),
                MapObjectKind::PinnedNote {
                    text: "flag".into(),
                    color: [255, 0, 0],
                },
            )
            .unwrap();

        assert_eq!(game.children_of(building), vec![note]);
        assert_eq!(game.object(note).unwrap().owner, 1);
    }

    #[test]
    fn test_clock_advances_monotonically() {
        let mut game = Game::new();
        game.advance_to(5);
        game.advance_to(5);
        game.advance_to(9);
        assert_eq!(game.current_tick(), 9);
    }

    #[test]
    fn test_identical_setups_hash_identically() {
        let build = || {
            let mut game = Game::new();
            game.add_player(1, "one");
            game.add_player(2, "two");
            game.place_building(1, MapCoords::new(4, 5), 3);
            game.create_economy(2);
            game
        };
        assert_eq!(build().state_hash(), build().state_hash());
    }

    #[test]
    fn test_hash_reflects_state_changes() {
        let mut game = Game::new();
        game.add_player(1, "one");
        let before = game.state_hash();
        game.place_building(1, MapCoords::new(0, 0), 1);
        assert_ne!(before, game.state_hash());
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_hash() {
        let mut game = Game::new();
        game.add_player(1, "one");
        game.place_building(1, MapCoords::new(10, 10), 4);
        game.messages().add_message(
            1,
            crate::message::Message::new(crate::message::MessageStatus::New, "hi", "there"),
        );
        game.advance_to(12);

        let bytes = game.serialize().unwrap();
        let restored = Game::deserialize(&bytes).unwrap();
        assert_eq!(game.state_hash(), restored.state_hash());
        assert_eq!(restored.current_tick(), 12);
    }
}
