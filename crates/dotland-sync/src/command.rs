//! Player commands and the client's queue of unacknowledged commands.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of unacknowledged commands a client may have in flight.
pub const DEFAULT_MAX_PENDING: usize = 128;

/// What the player asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Step onto the neighbouring cell `(x, y)`.
    Move {
        /// Target column.
        x: i32,
        /// Target row.
        y: i32,
    },
    /// Consume one unit from an inventory slot.
    UseItem {
        /// Inventory slot index.
        slot: usize,
    },
    /// Throw away a whole inventory slot.
    DropItem {
        /// Inventory slot index.
        slot: usize,
    },
}

/// A command tagged with the issuing client's sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedCommand {
    /// Per-client sequence number, starting at 1.
    pub sequence: u64,
    /// Client wall-clock time in milliseconds when the input happened.
    pub timestamp: u64,
    /// The command payload.
    pub kind: CommandKind,
}

/// Commands the client has applied locally but the server has not yet
/// acknowledged, in sequence order.
#[derive(Debug, Clone)]
pub struct PendingCommands {
    entries: VecDeque<SequencedCommand>,
    max_len: usize,
}

impl PendingCommands {
    /// Creates an empty queue holding at most `max_len` commands.
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len),
            max_len,
        }
    }

    /// Returns `true` if no more commands may be queued.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_len
    }

    /// Appends a command. Sequence numbers must increase; the caller
    /// checks [`is_full`](Self::is_full) first.
    pub fn push(&mut self, command: SequencedCommand) {
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|last| last.sequence < command.sequence),
            "pending commands must be pushed in sequence order"
        );
        self.entries.push_back(command);
    }

    /// Drops every command with sequence ≤ `sequence`. Returns how many
    /// were removed.
    pub fn discard_up_to(&mut self, sequence: u64) -> usize {
        let mut removed = 0;
        while self.entries.front().is_some_and(|c| c.sequence <= sequence) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Keeps only the commands for which `keep` returns `true`, visiting
    /// them in sequence order.
    pub fn retain(&mut self, keep: impl FnMut(&SequencedCommand) -> bool) {
        self.entries.retain(keep);
    }

    /// Iterates in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &SequencedCommand> {
        self.entries.iter()
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for PendingCommands {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(sequence: u64) -> SequencedCommand {
        SequencedCommand {
            sequence,
            timestamp: sequence * 16,
            kind: CommandKind::Move { x: 0, y: 0 },
        }
    }

    #[test]
    fn test_discard_up_to_removes_acknowledged_prefix() {
        let mut queue = PendingCommands::new(8);
        for seq in 1..=5 {
            queue.push(command(seq));
        }
        assert_eq!(queue.discard_up_to(3), 3);
        let remaining: Vec<u64> = queue.iter().map(|c| c.sequence).collect();
        assert_eq!(remaining, vec![4, 5]);

        assert_eq!(queue.discard_up_to(3), 0, "discarding again is a no-op");
        assert_eq!(queue.discard_up_to(100), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_reports_full() {
        let mut queue = PendingCommands::new(2);
        queue.push(command(1));
        assert!(!queue.is_full());
        queue.push(command(2));
        assert!(queue.is_full());
        queue.discard_up_to(1);
        assert!(!queue.is_full());
    }

    #[test]
    fn test_retain_preserves_order() {
        let mut queue = PendingCommands::default();
        for seq in 1..=6 {
            queue.push(command(seq));
        }
        queue.retain(|c| c.sequence % 2 == 0);
        let remaining: Vec<u64> = queue.iter().map(|c| c.sequence).collect();
        assert_eq!(remaining, vec![2, 4, 6]);
    }

    #[test]
    fn test_command_wire_encoding() {
        let cmd = SequencedCommand {
            sequence: 9,
            timestamp: 1_700_000_000_000,
            kind: CommandKind::UseItem { slot: 3 },
        };
        let bytes = postcard::to_allocvec(&cmd).unwrap();
        assert!(bytes.len() < 16, "commands should stay compact");
        let decoded: SequencedCommand = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }
}
