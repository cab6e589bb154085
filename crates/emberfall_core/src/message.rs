//! Per-player message stores with stable identity management.
//!
//! Every player owns a [`MessageQueue`] of in-flight notifications. Messages
//! are addressed by [`MessageId`] handles that are monotonic and never reused
//! while the queue is live, so a command replayed over the network or from a
//! savegame can safely reference a message that another code path already
//! removed - the operation degrades to a silent no-op instead of corrupting
//! state.
//!
//! All queues of one game sit behind a single [`MessageBoard`] mutex. Message
//! traffic is rare next to the simulation tick, so one subsystem-wide lock is
//! a simplicity/throughput tradeoff that lets the UI thread read badge counts
//! while the simulation thread delivers new messages.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::game::{MapCoords, PlayerNumber, Tick};

/// Lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageStatus {
    /// Freshly delivered, not yet seen by the player.
    #[default]
    New,
    /// Seen by the player.
    Read,
    /// Moved to the archive by the player.
    Archived,
}

impl MessageStatus {
    /// All statuses, in counter-array order.
    pub const ALL: [MessageStatus; 3] = [
        MessageStatus::New,
        MessageStatus::Read,
        MessageStatus::Archived,
    ];

    /// Index into the per-status counter array.
    pub(crate) fn index(self) -> usize {
        match self {
            MessageStatus::New => 0,
            MessageStatus::Read => 1,
            MessageStatus::Archived => 2,
        }
    }
}

/// Opaque handle identifying one message within one player's queue.
///
/// Ids are queue-local and monotonic; the value 0 is the reserved null
/// sentinel. Only the owning queue and the save-time renumbering table can
/// mint ids - everywhere else they are opaque map keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MessageId(u32);

impl MessageId {
    /// The null sentinel. Compares unequal to every id a queue ever issues.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    /// True iff this id is not the null sentinel.
    #[must_use]
    pub const fn valid(self) -> bool {
        self.0 != 0
    }

    /// Raw integer value. Crate-internal: used for serialization and the
    /// continuity predicate, never exposed as public API.
    pub(crate) const fn value(self) -> u32 {
        self.0
    }

    /// Rebuild an id from its raw value (deserialization only).
    pub(crate) const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// The next id after this one. Crate-internal minting operation.
    pub(crate) const fn succ(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single player-visible notification.
///
/// Owned exclusively by its queue; `Clone` exists for snapshots and
/// serialization, not for sharing live messages between queues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Short heading shown in message lists.
    pub title: String,
    /// Full body text.
    pub body: String,
    /// Tick at which the message was sent.
    pub sent: Tick,
    /// Map position the message refers to, if any.
    pub position: Option<MapCoords>,
}

impl Message {
    /// Create a message with the given status and texts.
    #[must_use]
    pub fn new(status: MessageStatus, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            title: title.into(),
            body: body.into(),
            sent: 0,
            position: None,
        }
    }

    /// Attach the send tick.
    #[must_use]
    pub fn sent_at(mut self, tick: Tick) -> Self {
        self.sent = tick;
        self
    }

    /// Attach a map position.
    #[must_use]
    pub fn at(mut self, position: MapCoords) -> Self {
        self.position = Some(position);
        self
    }
}

/// The full set of currently-live messages for one player.
///
/// Ids are issued by pre-incrementing an internal counter and are never
/// reassigned, so a long-running game accumulates sparse ids; the savegame
/// layer renumbers them densely at save time (see the savegame module).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageQueue {
    messages: BTreeMap<MessageId, Message>,
    counts: [u32; 3],
    current_id: MessageId,
}

impl MessageQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `message`, assign it the next id, and insert it.
    ///
    /// Never fails. Returns the newly minted id.
    pub fn add_message(&mut self, message: Message) -> MessageId {
        self.current_id = self.current_id.succ();
        let id = self.current_id;
        self.counts[message.status.index()] += 1;
        let previous = self.messages.insert(id, message);
        debug_assert!(previous.is_none(), "message id {id} issued twice");
        self.assert_counts();
        id
    }

    /// Change the status of the message with the given id.
    ///
    /// Silent no-op if the id does not exist: replayed status commands may
    /// legitimately target a message already removed by another code path.
    pub fn set_message_status(&mut self, id: MessageId, status: MessageStatus) {
        if let Some(message) = self.messages.get_mut(&id) {
            self.counts[message.status.index()] -= 1;
            self.counts[status.index()] += 1;
            message.status = status;
        } else {
            tracing::debug!(%id, ?status, "status change for missing message ignored");
        }
        self.assert_counts();
    }

    /// Remove the message with the given id.
    ///
    /// Silent no-op if the id does not exist; double-delete is an expected
    /// condition when independent triggers fire on the same destroyed object.
    pub fn delete_message(&mut self, id: MessageId) {
        if let Some(message) = self.messages.remove(&id) {
            self.counts[message.status.index()] -= 1;
        } else {
            tracing::debug!(%id, "delete for missing message ignored");
        }
        self.assert_counts();
    }

    /// Read-only lookup. Never panics.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    /// Existence check.
    #[must_use]
    pub fn contains(&self, id: MessageId) -> bool {
        self.messages.contains_key(&id)
    }

    /// O(1) read of the number of live messages with the given status.
    #[must_use]
    pub fn nr_messages(&self, status: MessageStatus) -> u32 {
        self.counts[status.index()]
    }

    /// The highest id issued so far.
    #[must_use]
    pub fn current_message_id(&self) -> MessageId {
        self.current_id
    }

    /// True iff no id gaps exist yet.
    ///
    /// Holds right after bulk-loading a savegame, before any deletion has
    /// occurred; used exactly once as a load-time sanity check. Not an
    /// invariant during normal play.
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.current_id.value() as usize == self.messages.len()
    }

    /// Number of live messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check whether the queue holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterate over live messages in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (MessageId, &Message)> {
        self.messages.iter().map(|(id, m)| (*id, m))
    }

    /// Drop every message and reset the id counter.
    ///
    /// Recovery escape hatch for a map-loading corner case, not a general
    /// API: ids held across a `clear` dangle, and "older than" comparisons
    /// between pre- and post-clear ids are meaningless.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.counts = [0; 3];
        self.current_id = MessageId::null();
        self.assert_counts();
    }

    /// Counter/population invariant, re-checked after every mutation.
    fn assert_counts(&self) {
        debug_assert_eq!(
            self.counts.iter().sum::<u32>() as usize,
            self.messages.len(),
            "message status counters out of sync with population"
        );
    }

    /// Feed the queue's observable state into a hasher, in id order.
    pub(crate) fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.current_id.value().hash(hasher);
        self.messages.len().hash(hasher);
        for (id, message) in &self.messages {
            id.value().hash(hasher);
            message.status.index().hash(hasher);
            message.title.hash(hasher);
            message.body.hash(hasher);
            message.sent.hash(hasher);
            message.position.hash(hasher);
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BoardInner {
    queues: BTreeMap<PlayerNumber, MessageQueue>,
}

/// All players' message queues behind the messages-subsystem lock.
///
/// Owned by the game state rather than being a process-wide global, so
/// independent games (and tests) never contend on each other's lock. Every
/// operation acquires the mutex for its whole body and releases it before
/// returning - the lock is never held across a callback into foreign code,
/// which is why the public API returns owned data instead of guards.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MessageBoard {
    inner: Mutex<BoardInner>,
}

impl MessageBoard {
    /// Create a board with no players.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner.lock().expect("message board mutex poisoned")
    }

    /// Create an empty queue for `player`. Idempotent.
    pub fn add_player(&self, player: PlayerNumber) {
        self.lock().queues.entry(player).or_default();
    }

    /// Deliver `message` to `player`, returning its newly minted id.
    pub fn add_message(&self, player: PlayerNumber, message: Message) -> MessageId {
        self.lock()
            .queues
            .entry(player)
            .or_default()
            .add_message(message)
    }

    /// Change a message's status. No-op for unknown players or ids.
    pub fn set_message_status(&self, player: PlayerNumber, id: MessageId, status: MessageStatus) {
        if let Some(queue) = self.lock().queues.get_mut(&player) {
            queue.set_message_status(id, status);
        }
    }

    /// Delete a message. No-op for unknown players or ids.
    pub fn delete_message(&self, player: PlayerNumber, id: MessageId) {
        if let Some(queue) = self.lock().queues.get_mut(&player) {
            queue.delete_message(id);
        }
    }

    /// Clone of the message with the given id, if it exists.
    #[must_use]
    pub fn message(&self, player: PlayerNumber, id: MessageId) -> Option<Message> {
        self.lock()
            .queues
            .get(&player)
            .and_then(|q| q.get(id).cloned())
    }

    /// Existence check.
    #[must_use]
    pub fn contains(&self, player: PlayerNumber, id: MessageId) -> bool {
        self.lock()
            .queues
            .get(&player)
            .is_some_and(|q| q.contains(id))
    }

    /// Number of `player`'s live messages with the given status.
    #[must_use]
    pub fn nr_messages(&self, player: PlayerNumber, status: MessageStatus) -> u32 {
        self.lock()
            .queues
            .get(&player)
            .map_or(0, |q| q.nr_messages(status))
    }

    /// Highest id issued to `player` so far (null for unknown players).
    #[must_use]
    pub fn current_message_id(&self, player: PlayerNumber) -> MessageId {
        self.lock()
            .queues
            .get(&player)
            .map_or(MessageId::null(), MessageQueue::current_message_id)
    }

    /// Load-time continuity predicate for `player`'s queue.
    #[must_use]
    pub fn is_continuous(&self, player: PlayerNumber) -> bool {
        self.lock()
            .queues
            .get(&player)
            .map_or(true, MessageQueue::is_continuous)
    }

    /// Players that currently have a queue, in ascending order.
    #[must_use]
    pub fn players(&self) -> Vec<PlayerNumber> {
        self.lock().queues.keys().copied().collect()
    }

    /// Clone of `player`'s whole queue, for the save pass.
    #[must_use]
    pub fn snapshot(&self, player: PlayerNumber) -> Option<MessageQueue> {
        self.lock().queues.get(&player).cloned()
    }

    /// Replace `player`'s queue with one rebuilt from a savegame.
    pub fn restore(&self, player: PlayerNumber, queue: MessageQueue) {
        self.lock().queues.insert(player, queue);
    }

    /// Feed all queues into a hasher, in player order.
    pub(crate) fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        let inner = self.lock();
        inner.queues.len().hash(hasher);
        for (player, queue) in &inner.queues {
            player.hash(hasher);
            queue.hash_into(hasher);
        }
    }
}

impl Clone for MessageBoard {
    fn clone(&self) -> Self {
        let inner = self.lock();
        Self {
            inner: Mutex::new(BoardInner {
                queues: inner.queues.clone(),
            }),
        }
    }
}
