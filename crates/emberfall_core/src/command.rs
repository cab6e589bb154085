//! Player commands: deterministic, replayable units of player intent.
//!
//! Every mutation of shared simulation state travels as a [`PlayerCommand`]:
//! the UI constructs one from live intent, the host timestamps and sequences
//! it, and every simulating peer executes it at its due time. Commands are
//! the sole input to the simulation - there is no backdoor API - which is
//! what makes lockstep multiplayer and replays possible.
//!
//! A command is a closed tagged variant: [`CommandKind`] is the stable wire
//! tag, [`CommandPayload`] the in-memory representation, and the
//! serialize/deserialize/execute triple per variant lives in the `match`
//! arms here, so adding a command type is a single-point change that keeps
//! tag and variant in lock-step.
//!
//! # Determinism
//!
//! `execute` mutates the game from exactly one thread, reads no wall clock
//! and no randomness, and addresses objects by stable serials. A target that
//! vanished between intent and due time is a routine occurrence under
//! network latency, not an error: the command silently does nothing.

use serde::{Deserialize, Serialize};

use crate::codec::{StreamRead, StreamWrite};
use crate::error::{GameError, Result};
use crate::game::{
    CmdSerial, DescriptionIndex, Game, MapCoords, MapObjectKind, PlayerNumber, ProposalKind,
    Serial, Tick, WarePriority, WareSettings, WareWorker,
};
use crate::message::{MessageId, MessageStatus};

/// Stable type tags identifying each command's wire and file format.
///
/// Discriminants are part of the network protocol and the savegame format;
/// never renumber an existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandKind {
    /// Start a new building at a map position.
    Build = 1,
    /// Tear a building down.
    Bulldoze = 2,
    /// Pause or resume a building's production.
    StartStopBuilding = 3,
    /// Change a ware input's transfer priority.
    SetWarePriority = 4,
    /// Change an input queue's desired fill.
    SetInputMaxFill = 5,
    /// Change an economy's permanent ware target.
    SetWareTargetQuantity = 6,
    /// Change an economy's permanent worker target.
    SetWorkerTargetQuantity = 7,
    /// Team diplomacy action.
    Diplomacy = 8,
    /// Create, update or delete a pinned map note.
    PinnedNote = 9,
    /// Mark a message read.
    MessageSetStatusRead = 10,
    /// Archive a message.
    MessageSetStatusArchived = 11,
    /// Delete a message. Never persisted to savegames.
    DeleteMessage = 12,
}

impl CommandKind {
    /// The wire tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a wire tag byte.
    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => CommandKind::Build,
            2 => CommandKind::Bulldoze,
            3 => CommandKind::StartStopBuilding,
            4 => CommandKind::SetWarePriority,
            5 => CommandKind::SetInputMaxFill,
            6 => CommandKind::SetWareTargetQuantity,
            7 => CommandKind::SetWorkerTargetQuantity,
            8 => CommandKind::Diplomacy,
            9 => CommandKind::PinnedNote,
            10 => CommandKind::MessageSetStatusRead,
            11 => CommandKind::MessageSetStatusArchived,
            12 => CommandKind::DeleteMessage,
            other => return Err(GameError::UnknownCommandTag(other)),
        })
    }
}

/// What a diplomacy command does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiplomacyAction {
    /// Invite `other_player` into the sender's team.
    Invite,
    /// Accept an invitation previously sent by `other_player`.
    AcceptInvite,
    /// Refuse an invitation previously sent by `other_player`.
    RefuseInvite,
    /// Ask to join `other_player`'s team.
    Join,
    /// Accept `other_player`'s request to join the sender's team.
    AcceptJoin,
    /// Refuse `other_player`'s request to join the sender's team.
    RefuseJoin,
    /// Leave the current team. `other_player` is ignored.
    LeaveTeam,
    /// Resign from the game. `other_player` is ignored.
    Resign,
}

impl DiplomacyAction {
    fn to_wire(self) -> u8 {
        match self {
            DiplomacyAction::Invite => 0,
            DiplomacyAction::AcceptInvite => 1,
            DiplomacyAction::RefuseInvite => 2,
            DiplomacyAction::Join => 3,
            DiplomacyAction::AcceptJoin => 4,
            DiplomacyAction::RefuseJoin => 5,
            DiplomacyAction::LeaveTeam => 6,
            DiplomacyAction::Resign => 7,
        }
    }

    fn from_wire(v: u8) -> Result<Self> {
        Ok(match v {
            0 => DiplomacyAction::Invite,
            1 => DiplomacyAction::AcceptInvite,
            2 => DiplomacyAction::RefuseInvite,
            3 => DiplomacyAction::Join,
            4 => DiplomacyAction::AcceptJoin,
            5 => DiplomacyAction::RefuseJoin,
            6 => DiplomacyAction::LeaveTeam,
            7 => DiplomacyAction::Resign,
            other => {
                return Err(GameError::CorruptData(format!(
                    "invalid diplomacy action {other}"
                )))
            }
        })
    }
}

/// Variant-specific command payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    /// Start a constructionsite for `building` at `position`.
    Build {
        /// Where to build.
        position: MapCoords,
        /// Building type to construct.
        building: DescriptionIndex,
    },
    /// Tear down `object`; with `recurse`, also its attached objects.
    Bulldoze {
        /// Target building or constructionsite.
        object: Serial,
        /// Also remove attached objects (e.g. the base flag).
        recurse: bool,
    },
    /// Toggle production pause on `object` (live for buildings, launch
    /// setting for constructionsites).
    StartStopBuilding {
        /// Target building or constructionsite.
        object: Serial,
    },
    /// Set the transfer priority of one ware input.
    SetWarePriority {
        /// Target building or constructionsite.
        object: Serial,
        /// Ware input to change.
        ware: DescriptionIndex,
        /// New priority.
        priority: WarePriority,
        /// Whether this targets a constructionsite's future settings
        /// rather than a finished building's live settings. The same wire
        /// tag serves both; this flag selects the interpretation at
        /// execute time.
        is_constructionsite_setting: bool,
    },
    /// Set the desired fill of one input queue.
    SetInputMaxFill {
        /// Target building or constructionsite.
        object: Serial,
        /// Input slot to change.
        index: DescriptionIndex,
        /// Whether the slot holds wares or workers.
        kind: WareWorker,
        /// New desired fill.
        max_fill: u32,
        /// Constructionsite future-setting vs live-setting selector.
        is_constructionsite_setting: bool,
    },
    /// Set an economy's permanent ware target.
    SetWareTargetQuantity {
        /// Target economy.
        economy: Serial,
        /// Ware type.
        ware: DescriptionIndex,
        /// New permanent target.
        permanent: u32,
    },
    /// Set an economy's permanent worker target.
    SetWorkerTargetQuantity {
        /// Target economy.
        economy: Serial,
        /// Worker type.
        worker: DescriptionIndex,
        /// New permanent target.
        permanent: u32,
    },
    /// Team diplomacy.
    Diplomacy {
        /// What to do.
        action: DiplomacyAction,
        /// Counterparty. Present on the wire for every action but ignored
        /// for `LeaveTeam` and `Resign`.
        other_player: PlayerNumber,
    },
    /// Create, update or delete a pinned map note. One wire format serves
    /// all three operations, discriminated by `note` and `delete`.
    PinnedNote {
        /// Existing note serial, or 0 to create a new note.
        note: Serial,
        /// Note position.
        position: MapCoords,
        /// Note text.
        text: String,
        /// Note color, RGB.
        color: [u8; 3],
        /// Delete instead of create/update.
        delete: bool,
    },
    /// Mark one of the sender's messages read.
    MessageSetStatusRead {
        /// Target message.
        message: MessageId,
    },
    /// Archive one of the sender's messages.
    MessageSetStatusArchived {
        /// Target message.
        message: MessageId,
    },
    /// Delete one of the sender's messages.
    DeleteMessage {
        /// Target message.
        message: MessageId,
    },
}

impl CommandPayload {
    /// The wire/file tag of this payload's variant.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandPayload::Build { .. } => CommandKind::Build,
            CommandPayload::Bulldoze { .. } => CommandKind::Bulldoze,
            CommandPayload::StartStopBuilding { .. } => CommandKind::StartStopBuilding,
            CommandPayload::SetWarePriority { .. } => CommandKind::SetWarePriority,
            CommandPayload::SetInputMaxFill { .. } => CommandKind::SetInputMaxFill,
            CommandPayload::SetWareTargetQuantity { .. } => CommandKind::SetWareTargetQuantity,
            CommandPayload::SetWorkerTargetQuantity { .. } => CommandKind::SetWorkerTargetQuantity,
            CommandPayload::Diplomacy { .. } => CommandKind::Diplomacy,
            CommandPayload::PinnedNote { .. } => CommandKind::PinnedNote,
            CommandPayload::MessageSetStatusRead { .. } => CommandKind::MessageSetStatusRead,
            CommandPayload::MessageSetStatusArchived { .. } => {
                CommandKind::MessageSetStatusArchived
            }
            CommandPayload::DeleteMessage { .. } => CommandKind::DeleteMessage,
        }
    }

    /// The message id this payload references, if it is a message command.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            CommandPayload::MessageSetStatusRead { message }
            | CommandPayload::MessageSetStatusArchived { message }
            | CommandPayload::DeleteMessage { message } => Some(*message),
            _ => None,
        }
    }

    /// Encode the payload fields (everything after the record header).
    pub(crate) fn write_fields(&self, w: &mut StreamWrite) {
        match self {
            CommandPayload::Build { position, building } => {
                w.u16(position.x);
                w.u16(position.y);
                w.u16(*building);
            }
            CommandPayload::Bulldoze { object, recurse } => {
                w.u32(*object);
                w.bool(*recurse);
            }
            CommandPayload::StartStopBuilding { object } => {
                w.u32(*object);
            }
            CommandPayload::SetWarePriority {
                object,
                ware,
                priority,
                is_constructionsite_setting,
            } => {
                w.u32(*object);
                w.u16(*ware);
                w.u8(priority.to_wire());
                w.bool(*is_constructionsite_setting);
            }
            CommandPayload::SetInputMaxFill {
                object,
                index,
                kind,
                max_fill,
                is_constructionsite_setting,
            } => {
                w.u32(*object);
                w.u16(*index);
                w.u8(kind.to_wire());
                w.u32(*max_fill);
                w.bool(*is_constructionsite_setting);
            }
            CommandPayload::SetWareTargetQuantity {
                economy,
                ware,
                permanent,
            } => {
                w.u32(*economy);
                w.u16(*ware);
                w.u32(*permanent);
            }
            CommandPayload::SetWorkerTargetQuantity {
                economy,
                worker,
                permanent,
            } => {
                w.u32(*economy);
                w.u16(*worker);
                w.u32(*permanent);
            }
            CommandPayload::Diplomacy {
                action,
                other_player,
            } => {
                w.u8(action.to_wire());
                w.u8(*other_player);
            }
            CommandPayload::PinnedNote {
                note,
                position,
                text,
                color,
                delete,
            } => {
                w.u32(*note);
                w.u16(position.x);
                w.u16(position.y);
                w.str(text);
                w.u8(color[0]);
                w.u8(color[1]);
                w.u8(color[2]);
                w.bool(*delete);
            }
            CommandPayload::MessageSetStatusRead { message }
            | CommandPayload::MessageSetStatusArchived { message }
            | CommandPayload::DeleteMessage { message } => {
                w.u32(message.value());
            }
        }
    }

    /// Decode the payload fields for `kind`.
    pub(crate) fn read_fields(kind: CommandKind, r: &mut StreamRead<'_>) -> Result<Self> {
        Ok(match kind {
            CommandKind::Build => CommandPayload::Build {
                position: MapCoords::new(r.u16()?, r.u16()?),
                building: r.u16()?,
            },
            CommandKind::Bulldoze => CommandPayload::Bulldoze {
                object: r.u32()?,
                recurse: r.bool()?,
            },
            CommandKind::StartStopBuilding => CommandPayload::StartStopBuilding {
                object: r.u32()?,
            },
            CommandKind::SetWarePriority => CommandPayload::SetWarePriority {
                object: r.u32()?,
                ware: r.u16()?,
                priority: WarePriority::from_wire(r.u8()?)?,
                is_constructionsite_setting: r.bool()?,
            },
            CommandKind::SetInputMaxFill => CommandPayload::SetInputMaxFill {
                object: r.u32()?,
                index: r.u16()?,
                kind: WareWorker::from_wire(r.u8()?)?,
                max_fill: r.u32()?,
                is_constructionsite_setting: r.bool()?,
            },
            CommandKind::SetWareTargetQuantity => CommandPayload::SetWareTargetQuantity {
                economy: r.u32()?,
                ware: r.u16()?,
                permanent: r.u32()?,
            },
            CommandKind::SetWorkerTargetQuantity => CommandPayload::SetWorkerTargetQuantity {
                economy: r.u32()?,
                worker: r.u16()?,
                permanent: r.u32()?,
            },
            CommandKind::Diplomacy => CommandPayload::Diplomacy {
                action: DiplomacyAction::from_wire(r.u8()?)?,
                other_player: r.u8()?,
            },
            CommandKind::PinnedNote => CommandPayload::PinnedNote {
                note: r.u32()?,
                position: MapCoords::new(r.u16()?, r.u16()?),
                text: r.str()?,
                color: [r.u8()?, r.u8()?, r.u8()?],
                delete: r.bool()?,
            },
            CommandKind::MessageSetStatusRead => CommandPayload::MessageSetStatusRead {
                message: MessageId::from_raw(r.u32()?),
            },
            CommandKind::MessageSetStatusArchived => CommandPayload::MessageSetStatusArchived {
                message: MessageId::from_raw(r.u32()?),
            },
            CommandKind::DeleteMessage => CommandPayload::DeleteMessage {
                message: MessageId::from_raw(r.u32()?),
            },
        })
    }
}

/// One unit of deterministic, replayable player intent.
///
/// Lifecycle: constructed (from UI intent, the wire, or a savegame), bound
/// to a due time, sequenced by the host (`cmdserial`), executed exactly once
/// by the dispatcher, then retired. A command object is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCommand {
    duetime: Tick,
    sender: PlayerNumber,
    cmdserial: CmdSerial,
    payload: CommandPayload,
}

impl PlayerCommand {
    /// Construct a bound command from live intent.
    ///
    /// Legality is not checked here: simulation state may change between
    /// intent and due time, so validation happens inside [`execute`]
    /// (`Self::execute`) against the state of that moment.
    #[must_use]
    pub fn new(sender: PlayerNumber, duetime: Tick, payload: CommandPayload) -> Self {
        Self {
            duetime,
            sender,
            cmdserial: 0,
            payload,
        }
    }

    /// Logical tick at which this command becomes eligible to execute.
    #[must_use]
    pub const fn duetime(&self) -> Tick {
        self.duetime
    }

    /// Bind the due time. Used by the host at ack time and by the savegame
    /// loader; live-intent commands are bound at construction.
    pub fn bind_duetime(&mut self, duetime: Tick) {
        self.duetime = duetime;
    }

    /// The acting player.
    #[must_use]
    pub const fn sender(&self) -> PlayerNumber {
        self.sender
    }

    /// The network sequence number, or 0 while unassigned.
    #[must_use]
    pub const fn cmdserial(&self) -> CmdSerial {
        self.cmdserial
    }

    /// Assign the network sequence number.
    ///
    /// Happens exactly once, when the authoritative host acknowledges the
    /// command; after that the serial is stable and globally comparable
    /// across peers, and the command can no longer be withdrawn.
    pub fn assign_serial(&mut self, serial: CmdSerial) {
        debug_assert_ne!(serial, 0, "cmdserial 0 means unassigned");
        debug_assert_eq!(self.cmdserial, 0, "cmdserial assigned twice");
        self.cmdserial = serial;
    }

    /// The wire/file tag of this command's variant.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    /// Variant-specific payload.
    #[must_use]
    pub const fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    /// Shared wire header: tag, sender, cmdserial.
    fn write_id_and_sender(&self, w: &mut StreamWrite) {
        w.u8(self.kind().tag());
        w.u8(self.sender);
        w.u32(self.cmdserial);
    }

    /// Encode for the network wire.
    ///
    /// The wire record carries sender and cmdserial inline but no due time:
    /// the host binds the due time when it acknowledges the command and
    /// announces it in the turn batch header. The savegame format is the
    /// mirror image (due time per record, sender implicit); the asymmetry
    /// is part of the format contract.
    pub fn serialize(&self, w: &mut StreamWrite) {
        self.write_id_and_sender(w);
        self.payload.write_fields(w);
    }

    /// Decode a wire record. The result is unbound (due time 0) until the
    /// turn batch header supplies one.
    ///
    /// # Errors
    ///
    /// Fails on unknown tags, truncated streams, or corrupt field values.
    pub fn deserialize(r: &mut StreamRead<'_>) -> Result<Self> {
        let kind = CommandKind::from_tag(r.u8()?)?;
        let sender = r.u8()?;
        let cmdserial = r.u32()?;
        let payload = CommandPayload::read_fields(kind, r)?;
        Ok(Self {
            duetime: 0,
            sender,
            cmdserial,
            payload,
        })
    }

    /// Apply this command to the game.
    ///
    /// Called exactly once per command, on the simulation thread, at or
    /// after the due time. Deterministic by construction. A target that no
    /// longer exists, or that the sender does not own, makes the command a
    /// silent no-op - concurrent player actions and network latency make
    /// "target vanished before I got here" routine, not exceptional.
    pub fn execute(&self, game: &mut Game) {
        match &self.payload {
            CommandPayload::Build { position, building } => {
                if game.player(self.sender).is_none() {
                    tracing::debug!(sender = self.sender, "build from unknown player ignored");
                    return;
                }
                game.insert_object(
                    self.sender,
                    *position,
                    None,
                    MapObjectKind::ConstructionSite {
                        becomes: *building,
                        settings: WareSettings::default(),
                    },
                );
            }
            CommandPayload::Bulldoze { object, recurse } => {
                let Some(target) = game.object(*object) else {
                    tracing::debug!(object, "bulldoze target vanished");
                    return;
                };
                if target.owner != self.sender {
                    tracing::debug!(object, sender = self.sender, "bulldoze of foreign object");
                    return;
                }
                if *recurse {
                    for child in game.children_of(*object) {
                        game.remove_object(child);
                    }
                }
                game.remove_object(*object);
            }
            CommandPayload::StartStopBuilding { object } => {
                let sender = self.sender;
                let Some(target) = game.object_mut(*object) else {
                    tracing::debug!(object, "start/stop target vanished");
                    return;
                };
                if target.owner != sender {
                    return;
                }
                match &mut target.kind {
                    MapObjectKind::Building { settings, .. }
                    | MapObjectKind::ConstructionSite { settings, .. } => {
                        settings.stopped = !settings.stopped;
                    }
                    MapObjectKind::PinnedNote { .. } => {
                        tracing::debug!(object, "start/stop on non-building ignored");
                    }
                }
            }
            CommandPayload::SetWarePriority {
                object,
                ware,
                priority,
                is_constructionsite_setting,
            } => {
                let sender = self.sender;
                let Some(target) = game.object_mut(*object) else {
                    tracing::debug!(object, "ware priority target vanished");
                    return;
                };
                if target.owner != sender {
                    return;
                }
                match (&mut target.kind, *is_constructionsite_setting) {
                    (MapObjectKind::Building { settings, .. }, false)
                    | (MapObjectKind::ConstructionSite { settings, .. }, true) => {
                        settings.priorities.insert(*ware, *priority);
                    }
                    _ => {
                        tracing::debug!(
                            object,
                            is_constructionsite_setting,
                            "ware priority object kind mismatch"
                        );
                    }
                }
            }
            CommandPayload::SetInputMaxFill {
                object,
                index,
                kind,
                max_fill,
                is_constructionsite_setting,
            } => {
                let sender = self.sender;
                let Some(target) = game.object_mut(*object) else {
                    tracing::debug!(object, "input fill target vanished");
                    return;
                };
                if target.owner != sender {
                    return;
                }
                match (&mut target.kind, *is_constructionsite_setting) {
                    (MapObjectKind::Building { settings, .. }, false)
                    | (MapObjectKind::ConstructionSite { settings, .. }, true) => {
                        settings.max_fill.insert((*kind, *index), *max_fill);
                    }
                    _ => {
                        tracing::debug!(
                            object,
                            is_constructionsite_setting,
                            "input fill object kind mismatch"
                        );
                    }
                }
            }
            CommandPayload::SetWareTargetQuantity {
                economy,
                ware,
                permanent,
            } => {
                let sender = self.sender;
                let Some(target) = game.economy_mut(*economy) else {
                    tracing::debug!(economy, "ware target economy vanished");
                    return;
                };
                if target.owner != sender {
                    return;
                }
                target.ware_targets.insert(*ware, *permanent);
            }
            CommandPayload::SetWorkerTargetQuantity {
                economy,
                worker,
                permanent,
            } => {
                let sender = self.sender;
                let Some(target) = game.economy_mut(*economy) else {
                    tracing::debug!(economy, "worker target economy vanished");
                    return;
                };
                if target.owner != sender {
                    return;
                }
                target.worker_targets.insert(*worker, *permanent);
            }
            CommandPayload::Diplomacy {
                action,
                other_player,
            } => {
                self.execute_diplomacy(game, *action, *other_player);
            }
            CommandPayload::PinnedNote {
                note,
                position,
                text,
                color,
                delete,
            } => {
                self.execute_pinned_note(game, *note, *position, text, *color, *delete);
            }
            CommandPayload::MessageSetStatusRead { message } => {
                if message.valid() {
                    game.messages()
                        .set_message_status(self.sender, *message, MessageStatus::Read);
                }
            }
            CommandPayload::MessageSetStatusArchived { message } => {
                if message.valid() {
                    game.messages().set_message_status(
                        self.sender,
                        *message,
                        MessageStatus::Archived,
                    );
                }
            }
            CommandPayload::DeleteMessage { message } => {
                if message.valid() {
                    game.messages().delete_message(self.sender, *message);
                }
            }
        }
    }

    fn execute_diplomacy(&self, game: &mut Game, action: DiplomacyAction, other: PlayerNumber) {
        let sender = self.sender;
        if game.player(sender).is_none() {
            return;
        }

        // Proposals require a live counterparty distinct from the sender.
        let needs_other = !matches!(
            action,
            DiplomacyAction::LeaveTeam | DiplomacyAction::Resign
        );
        if needs_other && (other == sender || game.player(other).is_none()) {
            tracing::debug!(sender, other, ?action, "diplomacy counterparty invalid");
            return;
        }

        match action {
            DiplomacyAction::Invite => {
                self.push_proposal(game, sender, other, ProposalKind::Invite);
            }
            DiplomacyAction::Join => {
                self.push_proposal(game, sender, other, ProposalKind::Join);
            }
            DiplomacyAction::AcceptInvite => {
                if self.take_proposal(game, other, sender, ProposalKind::Invite) {
                    let team = Self::team_of(game, other);
                    if let Some(player) = game.player_mut(sender) {
                        player.team = team;
                    }
                }
            }
            DiplomacyAction::RefuseInvite => {
                self.take_proposal(game, other, sender, ProposalKind::Invite);
            }
            DiplomacyAction::AcceptJoin => {
                if self.take_proposal(game, other, sender, ProposalKind::Join) {
                    let team = Self::team_of(game, sender);
                    if let Some(player) = game.player_mut(other) {
                        player.team = team;
                    }
                }
            }
            DiplomacyAction::RefuseJoin => {
                self.take_proposal(game, other, sender, ProposalKind::Join);
            }
            DiplomacyAction::LeaveTeam => {
                if let Some(player) = game.player_mut(sender) {
                    player.team = 0;
                }
            }
            DiplomacyAction::Resign => {
                if let Some(player) = game.player_mut(sender) {
                    player.resigned = true;
                    player.team = 0;
                }
                game.proposals_mut()
                    .retain(|p| p.from != sender && p.to != sender);
            }
        }
    }

    /// A player's team, forming a fresh one (numbered after the player) if
    /// they had none. Deterministic: the team id derives from the player
    /// number, never from insertion order.
    fn team_of(game: &mut Game, player: PlayerNumber) -> u8 {
        let current = game.player(player).map_or(0, |p| p.team);
        if current != 0 {
            return current;
        }
        if let Some(p) = game.player_mut(player) {
            p.team = player;
        }
        player
    }

    fn push_proposal(
        &self,
        game: &mut Game,
        from: PlayerNumber,
        to: PlayerNumber,
        kind: ProposalKind,
    ) {
        let proposals = game.proposals_mut();
        let exists = proposals
            .iter()
            .any(|p| p.from == from && p.to == to && p.kind == kind);
        if !exists {
            proposals.push(crate::game::DiplomacyProposal { from, to, kind });
        }
    }

    /// Remove a matching proposal, reporting whether one existed.
    fn take_proposal(
        &self,
        game: &mut Game,
        from: PlayerNumber,
        to: PlayerNumber,
        kind: ProposalKind,
    ) -> bool {
        let proposals = game.proposals_mut();
        let before = proposals.len();
        proposals.retain(|p| !(p.from == from && p.to == to && p.kind == kind));
        proposals.len() != before
    }

    fn execute_pinned_note(
        &self,
        game: &mut Game,
        note: Serial,
        position: MapCoords,
        text: &str,
        color: [u8; 3],
        delete: bool,
    ) {
        let sender = self.sender;
        if delete {
            let removable = game.object(note).is_some_and(|o| {
                o.owner == sender && matches!(o.kind, MapObjectKind::PinnedNote { .. })
            });
            if removable {
                game.remove_object(note);
            } else {
                tracing::debug!(note, "pinned note delete target vanished");
            }
            return;
        }
        if note == 0 {
            if game.player(sender).is_none() {
                return;
            }
            game.insert_object(
                sender,
                position,
                None,
                MapObjectKind::PinnedNote {
                    text: text.to_owned(),
                    color,
                },
            );
            return;
        }
        let Some(target) = game.object_mut(note) else {
            tracing::debug!(note, "pinned note update target vanished");
            return;
        };
        if target.owner != sender {
            return;
        }
        if let MapObjectKind::PinnedNote {
            text: note_text,
            color: note_color,
        } = &mut target.kind
        {
            target.position = position;
            *note_text = text.to_owned();
            *note_color = color;
        }
    }
}
