//! Savegame serialization: dense renumbering and tagged command records.
//!
//! Runtime ids are never reused, so a long-running game accumulates sparse
//! message ids and object serials. The save pass rewrites both densely:
//! objects and messages are written in ascending id order without their ids,
//! a fresh game re-inserts them in file order on load and re-mints ids
//! `1..=N`, and the renumbering tables ([`MessageSaver`], [`ObjectSaver`])
//! rewrite the *references* inside pending commands to match.
//!
//! A reference whose target vanished before the save translates to the null
//! id. That is not an error: the command it sits in was already guaranteed
//! to be a no-op, and it stays one after load.
//!
//! Delete-message commands are not persisted at all. Deletions that already
//! executed are reflected in the reconstructed message store, and a pending
//! delete is re-derived by the null-reference rule above, so a stored record
//! would be redundant and would need fragile cross-validation against the
//! message list.

use crate::codec::{StreamRead, StreamWrite};
use crate::command::{CommandKind, CommandPayload, PlayerCommand};
use crate::dispatch::CommandQueue;
use crate::error::{GameError, Result};
use crate::game::{Game, MapCoords, MapObjectKind, PlayerNumber, Serial, WareSettings};
use crate::message::{Message, MessageId, MessageQueue, MessageStatus};

use std::collections::BTreeMap;

/// Savegame format version; bump on any layout change.
pub const SAVEGAME_VERSION: u16 = 1;

/// Save-time renumbering table for one player's message ids.
///
/// Translates volatile runtime ids to the dense sequence numbers that will
/// become the messages' ids after the next load. Constructed fresh for each
/// save pass and discarded afterwards.
#[derive(Debug, Default)]
pub struct MessageSaver {
    map: BTreeMap<MessageId, MessageId>,
    counter: MessageId,
}

impl MessageSaver {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `old`, assigning it the next dense id.
    ///
    /// Each live message is visited exactly once during a save pass, so
    /// registering the same id twice is a programming error.
    pub fn add(&mut self, old: MessageId) {
        debug_assert!(old.valid(), "registering the null message id");
        debug_assert!(
            !self.map.contains_key(&old),
            "message id {old} registered twice in one save pass"
        );
        self.counter = self.counter.succ();
        self.map.insert(old, self.counter);
    }

    /// The dense id registered for `old`, or the null id if `old` was never
    /// registered - meaning the message no longer exists at save time and
    /// any command referencing it is a no-op after load.
    #[must_use]
    pub fn get(&self, old: MessageId) -> MessageId {
        self.map.get(&old).copied().unwrap_or_else(MessageId::null)
    }
}

/// Save-time renumbering table for map-object and economy serials.
///
/// Same contract as [`MessageSaver`], for the shared serial space.
#[derive(Debug, Default)]
pub struct ObjectSaver {
    map: BTreeMap<Serial, Serial>,
    counter: Serial,
}

impl ObjectSaver {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `serial`, assigning it the next dense file serial.
    pub fn add(&mut self, serial: Serial) {
        debug_assert_ne!(serial, 0, "registering the null serial");
        debug_assert!(
            !self.map.contains_key(&serial),
            "serial {serial} registered twice in one save pass"
        );
        self.counter += 1;
        self.map.insert(serial, self.counter);
    }

    /// The file serial registered for `serial`, or 0 if unregistered.
    #[must_use]
    pub fn get(&self, serial: Serial) -> Serial {
        self.map.get(&serial).copied().unwrap_or(0)
    }
}

/// Load-time counterpart of [`ObjectSaver`]: maps file serials back to the
/// runtime serials allocated while re-inserting objects.
#[derive(Debug, Default)]
pub struct ObjectLoader {
    map: BTreeMap<Serial, Serial>,
}

impl ObjectLoader {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the object stored under `file_serial` now lives at
    /// `runtime_serial`.
    pub fn insert(&mut self, file_serial: Serial, runtime_serial: Serial) {
        debug_assert!(
            !self.map.contains_key(&file_serial),
            "file serial {file_serial} loaded twice"
        );
        self.map.insert(file_serial, runtime_serial);
    }

    /// The runtime serial for `file_serial`, or 0 if the file never defined
    /// it (a reference that was already null at save time).
    #[must_use]
    pub fn get(&self, file_serial: Serial) -> Serial {
        self.map.get(&file_serial).copied().unwrap_or(0)
    }
}

fn status_to_wire(status: MessageStatus) -> u8 {
    match status {
        MessageStatus::New => 0,
        MessageStatus::Read => 1,
        MessageStatus::Archived => 2,
    }
}

fn status_from_wire(v: u8) -> Result<MessageStatus> {
    match v {
        0 => Ok(MessageStatus::New),
        1 => Ok(MessageStatus::Read),
        2 => Ok(MessageStatus::Archived),
        other => Err(GameError::CorruptData(format!(
            "invalid message status {other}"
        ))),
    }
}

fn write_coords(w: &mut StreamWrite, coords: MapCoords) {
    w.u16(coords.x);
    w.u16(coords.y);
}

fn read_coords(r: &mut StreamRead<'_>) -> Result<MapCoords> {
    Ok(MapCoords::new(r.u16()?, r.u16()?))
}

fn write_ware_settings(w: &mut StreamWrite, settings: &WareSettings) {
    #[allow(clippy::cast_possible_truncation)]
    w.u16(settings.priorities.len() as u16);
    for (index, priority) in &settings.priorities {
        w.u16(*index);
        w.u8(priority.to_wire());
    }
    #[allow(clippy::cast_possible_truncation)]
    w.u16(settings.max_fill.len() as u16);
    for ((kind, index), fill) in &settings.max_fill {
        w.u8(kind.to_wire());
        w.u16(*index);
        w.u32(*fill);
    }
    w.bool(settings.stopped);
}

fn read_ware_settings(r: &mut StreamRead<'_>) -> Result<WareSettings> {
    let mut settings = WareSettings::default();
    let priorities = r.u16()?;
    for _ in 0..priorities {
        let index = r.u16()?;
        let priority = crate::game::WarePriority::from_wire(r.u8()?)?;
        settings.priorities.insert(index, priority);
    }
    let fills = r.u16()?;
    for _ in 0..fills {
        let kind = crate::game::WareWorker::from_wire(r.u8()?)?;
        let index = r.u16()?;
        let fill = r.u32()?;
        settings.max_fill.insert((kind, index), fill);
    }
    settings.stopped = r.bool()?;
    Ok(settings)
}

/// Write one player's message queue, registering every live message in the
/// renumbering table in ascending id order.
///
/// Ids themselves are not written: the loader re-adds messages in file order
/// and a fresh queue re-mints `1..=N` naturally.
pub fn write_player_messages(w: &mut StreamWrite, queue: &MessageQueue, saver: &mut MessageSaver) {
    #[allow(clippy::cast_possible_truncation)]
    w.u32(queue.len() as u32);
    for (id, message) in queue.iter() {
        saver.add(id);
        w.u8(status_to_wire(message.status));
        w.str(&message.title);
        w.str(&message.body);
        w.u64(message.sent);
        match message.position {
            Some(coords) => {
                w.bool(true);
                write_coords(w, coords);
            }
            None => w.bool(false),
        }
    }
}

/// Read one player's message queue back from a savegame.
///
/// # Errors
///
/// Fails on truncated or corrupt records.
pub fn read_player_messages(r: &mut StreamRead<'_>) -> Result<MessageQueue> {
    let count = r.u32()?;
    let mut queue = MessageQueue::new();
    for _ in 0..count {
        let status = status_from_wire(r.u8()?)?;
        let title = r.str()?;
        let body = r.str()?;
        let sent = r.u64()?;
        let mut message = Message::new(status, title, body).sent_at(sent);
        if r.bool()? {
            message = message.at(read_coords(r)?);
        }
        queue.add_message(message);
    }
    // Bulk-load sanity check: no deletions can have happened yet, so the id
    // sequence must be gap-free.
    debug_assert!(queue.is_continuous(), "loaded message queue has id gaps");
    Ok(queue)
}

/// Rewrite a payload's references for the save file.
fn translate_payload_for_save(
    payload: &CommandPayload,
    objects: &ObjectSaver,
    messages: &MessageSaver,
) -> CommandPayload {
    let mut translated = payload.clone();
    match &mut translated {
        CommandPayload::Bulldoze { object, .. }
        | CommandPayload::StartStopBuilding { object }
        | CommandPayload::SetWarePriority { object, .. }
        | CommandPayload::SetInputMaxFill { object, .. } => {
            *object = objects.get(*object);
        }
        CommandPayload::SetWareTargetQuantity { economy, .. }
        | CommandPayload::SetWorkerTargetQuantity { economy, .. } => {
            *economy = objects.get(*economy);
        }
        CommandPayload::PinnedNote { note, .. } => {
            if *note != 0 {
                *note = objects.get(*note);
            }
        }
        CommandPayload::MessageSetStatusRead { message }
        | CommandPayload::MessageSetStatusArchived { message }
        | CommandPayload::DeleteMessage { message } => {
            *message = messages.get(*message);
        }
        CommandPayload::Build { .. } | CommandPayload::Diplomacy { .. } => {}
    }
    translated
}

/// Rewrite a payload's object references from file serials to the runtime
/// serials allocated during load. Message ids are already dense and valid.
fn translate_payload_for_load(payload: &CommandPayload, loader: &ObjectLoader) -> CommandPayload {
    let mut translated = payload.clone();
    match &mut translated {
        CommandPayload::Bulldoze { object, .. }
        | CommandPayload::StartStopBuilding { object }
        | CommandPayload::SetWarePriority { object, .. }
        | CommandPayload::SetInputMaxFill { object, .. } => {
            *object = loader.get(*object);
        }
        CommandPayload::SetWareTargetQuantity { economy, .. }
        | CommandPayload::SetWorkerTargetQuantity { economy, .. } => {
            *economy = loader.get(*economy);
        }
        CommandPayload::PinnedNote { note, .. } => {
            if *note != 0 {
                *note = loader.get(*note);
            }
        }
        CommandPayload::Build { .. }
        | CommandPayload::Diplomacy { .. }
        | CommandPayload::MessageSetStatusRead { .. }
        | CommandPayload::MessageSetStatusArchived { .. }
        | CommandPayload::DeleteMessage { .. } => {}
    }
    translated
}

impl PlayerCommand {
    /// Write this command as a savegame record.
    ///
    /// Layout: `tag | duetime | cmdserial | payload`. The sender is implicit
    /// - records live inside a per-player block - which is the mirror image
    /// of the wire format's inline sender; the asymmetry is intentional.
    pub fn write_record(
        &self,
        w: &mut StreamWrite,
        objects: &ObjectSaver,
        messages: &MessageSaver,
    ) {
        w.u8(self.kind().tag());
        w.u64(self.duetime());
        w.u32(self.cmdserial());
        translate_payload_for_save(self.payload(), objects, messages).write_fields(w);
    }

    /// Read a savegame record back, attaching the block's sender.
    ///
    /// # Errors
    ///
    /// Fails on unknown tags, truncated streams, or corrupt field values.
    pub fn read_record(
        r: &mut StreamRead<'_>,
        sender: PlayerNumber,
        loader: &ObjectLoader,
    ) -> Result<Self> {
        let kind = CommandKind::from_tag(r.u8()?)?;
        let duetime = r.u64()?;
        let cmdserial = r.u32()?;
        let payload = CommandPayload::read_fields(kind, r)?;
        let mut command = Self::new(sender, duetime, translate_payload_for_load(&payload, loader));
        if cmdserial != 0 {
            command.assign_serial(cmdserial);
        }
        Ok(command)
    }
}

/// Serialize the whole game plus its pending command queue.
///
/// # Errors
///
/// Currently infallible in practice; the `Result` mirrors the read side so
/// callers treat both directions uniformly.
pub fn save_game(game: &Game, queue: &CommandQueue) -> Result<Vec<u8>> {
    let mut w = StreamWrite::new();
    w.u16(SAVEGAME_VERSION);

    // Register every live object and economy in ascending serial order, so
    // references can be rewritten densely. Parents precede children because
    // serials are allocated monotonically.
    let mut objects = ObjectSaver::new();
    let object_serials = game.object_serials();
    for serial in &object_serials {
        objects.add(*serial);
    }
    let mut economy_serials: Vec<Serial> = Vec::new();
    for serial in game.economy_serials() {
        objects.add(serial);
        economy_serials.push(serial);
    }

    #[allow(clippy::cast_possible_truncation)]
    w.u32(object_serials.len() as u32);
    for serial in &object_serials {
        let object = game.object(*serial).expect("registered object exists");
        w.u8(object.owner);
        write_coords(&mut w, object.position);
        w.u32(object.parent.map_or(0, |p| objects.get(p)));
        match &object.kind {
            MapObjectKind::Building { descr, settings } => {
                w.u8(0);
                w.u16(*descr);
                write_ware_settings(&mut w, settings);
            }
            MapObjectKind::ConstructionSite { becomes, settings } => {
                w.u8(1);
                w.u16(*becomes);
                write_ware_settings(&mut w, settings);
            }
            MapObjectKind::PinnedNote { text, color } => {
                w.u8(2);
                w.str(text);
                w.u8(color[0]);
                w.u8(color[1]);
                w.u8(color[2]);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    w.u32(economy_serials.len() as u32);
    for serial in &economy_serials {
        let economy = game.economy(*serial).expect("registered economy exists");
        w.u8(economy.owner);
        #[allow(clippy::cast_possible_truncation)]
        w.u16(economy.ware_targets.len() as u16);
        for (index, target) in &economy.ware_targets {
            w.u16(*index);
            w.u32(*target);
        }
        #[allow(clippy::cast_possible_truncation)]
        w.u16(economy.worker_targets.len() as u16);
        for (index, target) in &economy.worker_targets {
            w.u16(*index);
            w.u32(*target);
        }
    }

    // Players, each with their message block. The per-player message saver
    // is kept for the command block below.
    let players = game.player_numbers();
    let mut message_savers: BTreeMap<PlayerNumber, MessageSaver> = BTreeMap::new();
    #[allow(clippy::cast_possible_truncation)]
    w.u8(players.len() as u8);
    for number in &players {
        let player = game.player(*number).expect("listed player exists");
        w.u8(player.number);
        w.str(&player.name);
        w.u8(player.team);
        w.bool(player.resigned);

        let mut saver = MessageSaver::new();
        let snapshot = game.messages().snapshot(*number).unwrap_or_default();
        write_player_messages(&mut w, &snapshot, &mut saver);
        message_savers.insert(*number, saver);
    }

    // Diplomacy proposals.
    let proposals = game.diplomacy_proposals();
    #[allow(clippy::cast_possible_truncation)]
    w.u16(proposals.len() as u16);
    for proposal in proposals {
        w.u8(proposal.from);
        w.u8(proposal.to);
        w.u8(match proposal.kind {
            crate::game::ProposalKind::Invite => 0,
            crate::game::ProposalKind::Join => 1,
        });
    }

    w.u64(game.current_tick());

    // Pending commands, grouped per sender. Delete-message commands are
    // skipped; see the module docs.
    let pending = queue.pending_sorted();
    let empty_saver = MessageSaver::new();
    for number in &players {
        let commands: Vec<&PlayerCommand> = pending
            .iter()
            .copied()
            .filter(|c| c.sender() == *number && c.kind() != CommandKind::DeleteMessage)
            .collect();
        let skipped = pending
            .iter()
            .filter(|c| c.sender() == *number && c.kind() == CommandKind::DeleteMessage)
            .count();
        if skipped > 0 {
            tracing::debug!(player = number, skipped, "delete-message commands not saved");
        }
        let saver = message_savers.get(number).unwrap_or(&empty_saver);
        #[allow(clippy::cast_possible_truncation)]
        w.u32(commands.len() as u32);
        for command in commands {
            command.write_record(&mut w, &objects, saver);
        }
    }

    Ok(w.into_bytes())
}

/// Rebuild a game and its pending command queue from savegame bytes.
///
/// # Errors
///
/// Fails on version mismatch, truncation, or corrupt records.
pub fn load_game(bytes: &[u8]) -> Result<(Game, CommandQueue)> {
    let mut r = StreamRead::new(bytes);

    let version = r.u16()?;
    if version != SAVEGAME_VERSION {
        return Err(GameError::VersionMismatch {
            expected: SAVEGAME_VERSION,
            got: version,
        });
    }

    let mut game = Game::new();
    let mut loader = ObjectLoader::new();
    let mut next_file_serial: Serial = 0;

    let object_count = r.u32()?;
    for _ in 0..object_count {
        next_file_serial += 1;
        let owner = r.u8()?;
        let position = read_coords(&mut r)?;
        let parent_file = r.u32()?;
        let parent = match parent_file {
            0 => None,
            p => Some(loader.get(p)).filter(|s| *s != 0),
        };
        let kind = match r.u8()? {
            0 => MapObjectKind::Building {
                descr: r.u16()?,
                settings: read_ware_settings(&mut r)?,
            },
            1 => MapObjectKind::ConstructionSite {
                becomes: r.u16()?,
                settings: read_ware_settings(&mut r)?,
            },
            2 => MapObjectKind::PinnedNote {
                text: r.str()?,
                color: [r.u8()?, r.u8()?, r.u8()?],
            },
            other => {
                return Err(GameError::CorruptData(format!(
                    "invalid object kind {other}"
                )))
            }
        };
        let runtime = game.insert_object(owner, position, parent, kind);
        loader.insert(next_file_serial, runtime);
    }

    let economy_count = r.u32()?;
    for _ in 0..economy_count {
        next_file_serial += 1;
        let owner = r.u8()?;
        let runtime = game.create_economy(owner);
        loader.insert(next_file_serial, runtime);
        let ware_count = r.u16()?;
        for _ in 0..ware_count {
            let index = r.u16()?;
            let target = r.u32()?;
            if let Some(economy) = game.economy_mut(runtime) {
                economy.ware_targets.insert(index, target);
            }
        }
        let worker_count = r.u16()?;
        for _ in 0..worker_count {
            let index = r.u16()?;
            let target = r.u32()?;
            if let Some(economy) = game.economy_mut(runtime) {
                economy.worker_targets.insert(index, target);
            }
        }
    }

    let player_count = r.u8()?;
    let mut player_numbers = Vec::with_capacity(player_count as usize);
    for _ in 0..player_count {
        let number = r.u8()?;
        let name = r.str()?;
        let team = r.u8()?;
        let resigned = r.bool()?;
        game.add_player(number, name);
        if let Some(player) = game.player_mut(number) {
            player.team = team;
            player.resigned = resigned;
        }
        let queue = read_player_messages(&mut r)?;
        game.messages().restore(number, queue);
        player_numbers.push(number);
    }

    let proposal_count = r.u16()?;
    for _ in 0..proposal_count {
        let from = r.u8()?;
        let to = r.u8()?;
        let kind = match r.u8()? {
            0 => crate::game::ProposalKind::Invite,
            1 => crate::game::ProposalKind::Join,
            other => {
                return Err(GameError::CorruptData(format!(
                    "invalid proposal kind {other}"
                )))
            }
        };
        game.proposals_mut()
            .push(crate::game::DiplomacyProposal { from, to, kind });
    }

    let tick = r.u64()?;
    game.advance_to(tick);

    let mut queue = CommandQueue::new();
    for number in player_numbers {
        let command_count = r.u32()?;
        for _ in 0..command_count {
            let command = PlayerCommand::read_record(&mut r, number, &loader)?;
            queue.enqueue(command);
        }
    }

    if !r.is_at_end() {
        return Err(GameError::CorruptData(format!(
            "{} trailing bytes after savegame",
            r.remaining()
        )));
    }

    Ok((game, queue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DiplomacyAction;
    use crate::game::{WarePriority, WareWorker};
    use crate::message::MessageStatus;

    #[test]
    fn test_renumbering_assigns_dense_ids_in_registration_order() {
        let mut saver = MessageSaver::new();
        saver.add(MessageId::from_raw(5));
        saver.add(MessageId::from_raw(12));
        saver.add(MessageId::from_raw(7));

        assert_eq!(saver.get(MessageId::from_raw(5)), MessageId::from_raw(1));
        assert_eq!(saver.get(MessageId::from_raw(12)), MessageId::from_raw(2));
        assert_eq!(saver.get(MessageId::from_raw(7)), MessageId::from_raw(3));
        assert_eq!(saver.get(MessageId::from_raw(999)), MessageId::null());
    }

    #[test]
    fn test_renumbering_survivors_after_delete() {
        let mut queue = MessageQueue::new();
        let first = queue.add_message(Message::new(MessageStatus::New, "a", ""));
        let second = queue.add_message(Message::new(MessageStatus::New, "b", ""));
        let third = queue.add_message(Message::new(MessageStatus::Read, "c", ""));
        queue.delete_message(first);

        let mut saver = MessageSaver::new();
        for (id, _) in queue.iter() {
            saver.add(id);
        }

        assert_eq!(saver.get(first), MessageId::null());
        assert_eq!(saver.get(second), MessageId::from_raw(1));
        assert_eq!(saver.get(third), MessageId::from_raw(2));
    }

    #[test]
    fn test_object_saver_mirrors_message_contract() {
        let mut saver = ObjectSaver::new();
        saver.add(31);
        saver.add(8);
        assert_eq!(saver.get(31), 1);
        assert_eq!(saver.get(8), 2);
        assert_eq!(saver.get(77), 0);
    }

    #[test]
    fn test_message_block_roundtrip_renumbers_densely() {
        let mut queue = MessageQueue::new();
        queue.add_message(Message::new(MessageStatus::New, "keep", "k").sent_at(4));
        let doomed = queue.add_message(Message::new(MessageStatus::Read, "drop", "d"));
        queue.add_message(
            Message::new(MessageStatus::Archived, "pos", "p").at(MapCoords::new(9, 9)),
        );
        queue.delete_message(doomed);

        let mut saver = MessageSaver::new();
        let mut w = StreamWrite::new();
        write_player_messages(&mut w, &queue, &mut saver);
        let bytes = w.into_bytes();

        let mut r = StreamRead::new(&bytes);
        let loaded = read_player_messages(&mut r).unwrap();
        assert!(r.is_at_end());

        assert!(loaded.is_continuous());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.nr_messages(MessageStatus::New), 1);
        assert_eq!(loaded.nr_messages(MessageStatus::Archived), 1);
        let first = loaded.get(MessageId::from_raw(1)).unwrap();
        assert_eq!(first.title, "keep");
        assert_eq!(first.sent, 4);
        let second = loaded.get(MessageId::from_raw(2)).unwrap();
        assert_eq!(second.position, Some(MapCoords::new(9, 9)));
    }

    fn populated_game() -> (Game, CommandQueue) {
        let mut game = Game::new();
        game.add_player(1, "aldora");
        game.add_player(2, "bren");

        let building = game.place_building(1, MapCoords::new(3, 4), 11);
        let _site = game.place_constructionsite(2, MapCoords::new(7, 7), 12);
        let economy = game.create_economy(1);

        let keep = game
            .messages()
            .add_message(1, Message::new(MessageStatus::New, "mine built", ""));
        let doomed = game
            .messages()
            .add_message(1, Message::new(MessageStatus::New, "under attack", ""));
        game.messages().delete_message(1, doomed);

        let mut queue = CommandQueue::new();
        queue.sequence(PlayerCommand::new(
            1,
            30,
            CommandPayload::SetWarePriority {
                object: building,
                ware: 2,
                priority: WarePriority::High,
                is_constructionsite_setting: false,
            },
        ));
        queue.sequence(PlayerCommand::new(
            1,
            30,
            CommandPayload::SetWareTargetQuantity {
                economy,
                ware: 2,
                permanent: 12,
            },
        ));
        queue.sequence(PlayerCommand::new(
            1,
            31,
            CommandPayload::MessageSetStatusRead { message: keep },
        ));
        // References the deleted message: must translate to null and stay a
        // no-op after load.
        queue.sequence(PlayerCommand::new(
            1,
            31,
            CommandPayload::MessageSetStatusArchived { message: doomed },
        ));
        // Never persisted.
        queue.sequence(PlayerCommand::new(
            1,
            32,
            CommandPayload::DeleteMessage { message: keep },
        ));
        queue.sequence(PlayerCommand::new(
            2,
            33,
            CommandPayload::Diplomacy {
                action: DiplomacyAction::Join,
                other_player: 1,
            },
        ));

        game.advance_to(20);
        (game, queue)
    }

    #[test]
    fn test_full_savegame_roundtrip() {
        let (game, queue) = populated_game();
        let bytes = save_game(&game, &queue).unwrap();
        let (loaded, loaded_queue) = load_game(&bytes).unwrap();

        assert_eq!(loaded.current_tick(), 20);
        assert_eq!(loaded.player_numbers(), vec![1, 2]);
        assert_eq!(loaded.object_count(), 2);
        assert!(loaded.messages().is_continuous(1));
        assert_eq!(loaded.messages().nr_messages(1, MessageStatus::New), 1);

        // Delete-message command dropped, everything else kept.
        assert_eq!(loaded_queue.pending_count(), queue.pending_count() - 1);
    }

    #[test]
    fn test_loaded_commands_execute_equivalently() {
        let (mut game, mut queue) = populated_game();
        let bytes = save_game(&game, &queue).unwrap();
        let (mut loaded, mut loaded_queue) = load_game(&bytes).unwrap();

        queue.advance(&mut game, 40);
        loaded_queue.advance(&mut loaded, 40);

        // The priority command found its translated building.
        let loaded_building = loaded
            .object_serials()
            .into_iter()
            .find(|s| {
                matches!(
                    loaded.object(*s).unwrap().kind,
                    MapObjectKind::Building { .. }
                )
            })
            .unwrap();
        let MapObjectKind::Building { settings, .. } = &loaded.object(loaded_building).unwrap().kind
        else {
            panic!("expected building");
        };
        assert_eq!(settings.priorities.get(&2), Some(&WarePriority::High));

        // Economy target applied through the renumbered serial.
        let loaded_economy = loaded
            .economy_serials()
            .into_iter()
            .next()
            .expect("economy loaded");
        assert_eq!(
            loaded.economy(loaded_economy).unwrap().ware_targets.get(&2),
            Some(&12)
        );

        // Surviving message was marked read; the null-translated archive
        // command did nothing; the unsaved delete never ran in the copy.
        assert_eq!(loaded.messages().nr_messages(1, MessageStatus::Read), 1);
        assert_eq!(loaded.messages().nr_messages(1, MessageStatus::Archived), 0);

        // The original also archived nothing (its target was deleted) and
        // the diplomacy request landed in both.
        assert_eq!(game.messages().nr_messages(1, MessageStatus::Archived), 0);
        assert_eq!(loaded.diplomacy_proposals().len(), 1);
        assert_eq!(game.diplomacy_proposals().len(), 1);
    }

    #[test]
    fn test_save_of_loaded_game_is_stable() {
        let (game, queue) = populated_game();
        let bytes = save_game(&game, &queue).unwrap();
        let (loaded, loaded_queue) = load_game(&bytes).unwrap();
        let bytes2 = save_game(&loaded, &loaded_queue).unwrap();
        let (loaded2, loaded_queue2) = load_game(&bytes2).unwrap();
        let bytes3 = save_game(&loaded2, &loaded_queue2).unwrap();
        // Once ids are dense, renumbering is the identity.
        assert_eq!(bytes2, bytes3);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let (game, queue) = populated_game();
        let mut bytes = save_game(&game, &queue).unwrap();
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        assert!(matches!(
            load_game(&bytes),
            Err(GameError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_savegame_rejected() {
        let (game, queue) = populated_game();
        let bytes = save_game(&game, &queue).unwrap();
        let err = load_game(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, GameError::StreamEnd { .. }));
    }

    #[test]
    fn test_input_max_fill_roundtrips_through_record() {
        let mut objects = ObjectSaver::new();
        objects.add(42);
        let messages = MessageSaver::new();

        let mut cmd = PlayerCommand::new(
            1,
            9,
            CommandPayload::SetInputMaxFill {
                object: 42,
                index: 5,
                kind: WareWorker::Worker,
                max_fill: 3,
                is_constructionsite_setting: true,
            },
        );
        cmd.assign_serial(8);

        let mut w = StreamWrite::new();
        cmd.write_record(&mut w, &objects, &messages);
        let bytes = w.into_bytes();

        // Identity loader: file serial 1 maps back to 1.
        let mut loader = ObjectLoader::new();
        loader.insert(1, 1);
        let mut r = StreamRead::new(&bytes);
        let read = PlayerCommand::read_record(&mut r, 1, &loader).unwrap();

        assert_eq!(read.duetime(), 9);
        assert_eq!(read.cmdserial(), 8);
        assert_eq!(read.sender(), 1);
        assert_eq!(
            read.payload(),
            &CommandPayload::SetInputMaxFill {
                object: 1,
                index: 5,
                kind: WareWorker::Worker,
                max_fill: 3,
                is_constructionsite_setting: true,
            }
        );
    }
}
