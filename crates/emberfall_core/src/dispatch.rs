//! Command dispatch: deterministic ordering and execution of due commands.
//!
//! Commands are ordered primarily by due time and, within one tick, by
//! `cmdserial` - the sequence number the authoritative host assigned at ack
//! time. Every peer therefore applies same-tick commands in the same order,
//! which is the core correctness property of the whole pipeline: two peers
//! that start from the same state and drain the same queue stay
//! byte-identical.
//!
//! The dispatcher never busy-waits. [`CommandQueue::next_duetime`] tells the
//! caller when the earliest pending command falls due; the simulation loop
//! calls [`CommandQueue::advance`] once its local clock reaches that tick.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::command::PlayerCommand;
use crate::game::{CmdSerial, Game, Tick};

/// Heap entry ordered by `(duetime, cmdserial)`.
///
/// Equality follows the same key so the ordering is total and consistent;
/// two distinct commands never share a cmdserial once sequenced.
#[derive(Debug)]
struct OrderedCommand(PlayerCommand);

impl OrderedCommand {
    fn key(&self) -> (Tick, CmdSerial) {
        (self.0.duetime(), self.0.cmdserial())
    }
}

impl PartialEq for OrderedCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for OrderedCommand {}

impl PartialOrd for OrderedCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// The per-game command queue.
///
/// Holds bound, sequenced commands until their due tick, executes them in
/// deterministic order, and retires them for replay recording and savegame
/// serialization.
#[derive(Debug, Default)]
pub struct CommandQueue {
    pending: BinaryHeap<Reverse<OrderedCommand>>,
    retired: Vec<PlayerCommand>,
    next_local_serial: CmdSerial,
}

impl CommandQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command that already carries its cmdserial (from the host
    /// or a savegame).
    ///
    /// Once enqueued a command cannot be withdrawn; other peers may already
    /// know about it.
    pub fn enqueue(&mut self, command: PlayerCommand) {
        debug_assert_ne!(
            command.cmdserial(),
            0,
            "commands must be sequenced before dispatch"
        );
        // Keep local sequencing clear of serials observed from outside.
        self.next_local_serial = self.next_local_serial.max(command.cmdserial());
        self.pending.push(Reverse(OrderedCommand(command)));
    }

    /// Sequence and enqueue a command in one step.
    ///
    /// Single-player and host-side path: there is no remote authority to
    /// ack, so the queue itself hands out the next serial.
    pub fn sequence(&mut self, mut command: PlayerCommand) -> CmdSerial {
        self.next_local_serial += 1;
        let serial = self.next_local_serial;
        command.assign_serial(serial);
        self.pending.push(Reverse(OrderedCommand(command)));
        serial
    }

    /// Tick at which the earliest pending command falls due.
    #[must_use]
    pub fn next_duetime(&self) -> Option<Tick> {
        self.pending.peek().map(|Reverse(c)| c.0.duetime())
    }

    /// Number of commands waiting for their due tick.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending commands in execution order, for savegame serialization.
    #[must_use]
    pub fn pending_sorted(&self) -> Vec<&PlayerCommand> {
        let mut commands: Vec<&PlayerCommand> =
            self.pending.iter().map(|Reverse(c)| &c.0).collect();
        commands.sort_by_key(|c| (c.duetime(), c.cmdserial()));
        commands
    }

    /// Commands already applied, in application order.
    #[must_use]
    pub fn retired(&self) -> &[PlayerCommand] {
        &self.retired
    }

    /// Execute everything due up to and including `until`, then advance the
    /// game clock to `until`.
    ///
    /// Commands run in `(duetime, cmdserial)` order, each exactly once. A
    /// command whose due tick already passed (a late savegame load, a held
    /// turn batch) executes immediately but still in serial order - it is
    /// never dropped.
    pub fn advance(&mut self, game: &mut Game, until: Tick) {
        while let Some(Reverse(next)) = self.pending.peek() {
            if next.0.duetime() > until {
                break;
            }
            let Some(Reverse(OrderedCommand(command))) = self.pending.pop() else {
                break;
            };
            // Execute at the command's due tick, or at the current clock if
            // the due tick already passed.
            game.advance_to(command.duetime().max(game.current_tick()));
            tracing::trace!(
                duetime = command.duetime(),
                cmdserial = command.cmdserial(),
                kind = ?command.kind(),
                "executing command"
            );
            command.execute(game);
            self.retired.push(command);
        }
        game.advance_to(until.max(game.current_tick()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandPayload;
    use crate::game::MapCoords;

    fn note_payload(text: &str) -> CommandPayload {
        CommandPayload::PinnedNote {
            note: 0,
            position: MapCoords::new(1, 1),
            text: text.into(),
            color: [1, 2, 3],
            delete: false,
        }
    }

    fn game_with_player() -> Game {
        let mut game = Game::new();
        game.add_player(1, "one");
        game
    }

    #[test]
    fn test_orders_by_duetime_then_serial() {
        let mut game = game_with_player();
        let mut queue = CommandQueue::new();

        let mut late = PlayerCommand::new(1, 10, note_payload("late"));
        late.assign_serial(1);
        let mut second = PlayerCommand::new(1, 5, note_payload("second"));
        second.assign_serial(3);
        let mut first = PlayerCommand::new(1, 5, note_payload("first"));
        first.assign_serial(2);

        queue.enqueue(late);
        queue.enqueue(second);
        queue.enqueue(first);

        queue.advance(&mut game, 20);

        let texts: Vec<String> = queue
            .retired()
            .iter()
            .map(|c| match c.payload() {
                CommandPayload::PinnedNote { text, .. } => text.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(texts, vec!["first", "second", "late"]);
        assert_eq!(game.current_tick(), 20);
    }

    #[test]
    fn test_commands_wait_for_due_tick() {
        let mut game = game_with_player();
        let mut queue = CommandQueue::new();

        let mut cmd = PlayerCommand::new(1, 10, note_payload("later"));
        cmd.assign_serial(1);
        queue.enqueue(cmd);

        queue.advance(&mut game, 9);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(game.object_count(), 0);
        assert_eq!(queue.next_duetime(), Some(10));

        queue.advance(&mut game, 10);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(game.object_count(), 1);
    }

    #[test]
    fn test_late_command_executes_instead_of_dropping() {
        let mut game = game_with_player();
        game.advance_to(50);

        let mut queue = CommandQueue::new();
        let mut cmd = PlayerCommand::new(1, 10, note_payload("overdue"));
        cmd.assign_serial(1);
        queue.enqueue(cmd);

        queue.advance(&mut game, 50);
        assert_eq!(game.object_count(), 1);
        assert_eq!(game.current_tick(), 50);
    }

    #[test]
    fn test_equal_tick_serial_order_is_deterministic() {
        // Two independently constructed copies of the same pre-state, with
        // the same same-tick commands enqueued in opposite orders, must end
        // byte-identical.
        let run = |flip: bool| {
            let mut game = Game::new();
            game.add_player(1, "one");
            game.add_player(2, "two");

            let mut a = PlayerCommand::new(1, 5, note_payload("a"));
            a.assign_serial(1);
            let mut b = PlayerCommand::new(2, 5, note_payload("b"));
            b.assign_serial(2);

            let mut queue = CommandQueue::new();
            if flip {
                queue.enqueue(b);
                queue.enqueue(a);
            } else {
                queue.enqueue(a);
                queue.enqueue(b);
            }
            queue.advance(&mut game, 5);
            game.state_hash()
        };

        assert_eq!(run(false), run(true));
    }

    #[test]
    fn test_sequence_assigns_increasing_serials() {
        let mut queue = CommandQueue::new();
        let s1 = queue.sequence(PlayerCommand::new(1, 1, note_payload("x")));
        let s2 = queue.sequence(PlayerCommand::new(1, 1, note_payload("y")));
        assert!(s1 < s2);
        assert_ne!(s1, 0);
    }

    #[test]
    fn test_sequence_continues_past_observed_serials() {
        let mut queue = CommandQueue::new();
        let mut remote = PlayerCommand::new(1, 1, note_payload("remote"));
        remote.assign_serial(40);
        queue.enqueue(remote);

        let s = queue.sequence(PlayerCommand::new(1, 2, note_payload("local")));
        assert!(s > 40);
    }

    #[test]
    fn test_pending_sorted_matches_execution_order() {
        let mut queue = CommandQueue::new();
        let mut a = PlayerCommand::new(1, 9, note_payload("a"));
        a.assign_serial(5);
        let mut b = PlayerCommand::new(1, 3, note_payload("b"));
        b.assign_serial(9);
        queue.enqueue(a);
        queue.enqueue(b);

        let order: Vec<CmdSerial> = queue
            .pending_sorted()
            .iter()
            .map(|c| c.cmdserial())
            .collect();
        assert_eq!(order, vec![9, 5]);
    }
}
