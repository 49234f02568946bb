//! Pending-command table.
//!
//! One table per [`Connection`](super::Connection) (browser-level commands)
//! and one per [`Session`](super::Session). An entry lives from the moment a
//! command is queued for writing until its response is delivered, it times
//! out, or the owner is torn down. Whichever happens first removes it, so a
//! command completes exactly once.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::Response;

// ============================================================================
// Types
// ============================================================================

/// Completion channel of one command.
pub(crate) type Completion = oneshot::Sender<Result<Value>>;

/// A command awaiting its response.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    method: String,
    tx: Completion,
}

// ============================================================================
// PendingTable
// ============================================================================

/// Commands awaiting responses, keyed by command ID.
#[derive(Debug, Default)]
pub(crate) struct PendingTable {
    entries: FxHashMap<CommandId, PendingCommand>,
    closed: bool,
}

impl PendingTable {
    /// Registers a command.
    pub(crate) fn insert(&mut self, id: CommandId, method: impl Into<String>, tx: Completion) {
        self.entries.insert(
            id,
            PendingCommand {
                method: method.into(),
                tx,
            },
        );
    }

    /// Completes the command a response belongs to.
    ///
    /// Returns `false` if no entry exists (already completed, timed out or
    /// never sent).
    pub(crate) fn settle(&mut self, response: Response) -> bool {
        let Some(entry) = self.entries.remove(&response.id) else {
            return false;
        };

        let result = response.into_result(&entry.method);
        let _ = entry.tx.send(result);
        true
    }

    /// Removes an entry without completing it.
    pub(crate) fn remove(&mut self, id: CommandId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Rejects every entry with [`Error::TargetClosed`] and closes the table.
    ///
    /// Returns the number of rejected commands.
    pub(crate) fn reject_all(&mut self) -> usize {
        self.closed = true;

        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.tx.send(Err(Error::target_closed(entry.method)));
        }
        count
    }

    /// Returns `true` once [`reject_all`](Self::reject_all) ran.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    fn response(id: u64, result: Value) -> Response {
        Response {
            id: CommandId::new(id),
            result: Some(result),
            error: None,
            session_id: None,
        }
    }

    #[test]
    fn test_settle_delivers_result() {
        let mut table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert(CommandId::new(1), "Page.enable", tx);

        assert!(table.settle(response(1, json!({"ok": true}))));
        assert_eq!(table.len(), 0);
        assert_eq!(rx.try_recv().expect("sent").expect("ok"), json!({"ok": true}));
    }

    #[test]
    fn test_second_settle_is_noop() {
        let mut table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert(CommandId::new(1), "Page.enable", tx);

        assert!(table.settle(response(1, json!(1))));
        assert!(!table.settle(response(1, json!(2))));
        assert_eq!(rx.try_recv().expect("sent").expect("ok"), json!(1));
    }

    #[test]
    fn test_reject_all_uses_method_name() {
        let mut table = PendingTable::default();
        let (tx, mut rx) = oneshot::channel();
        table.insert(CommandId::new(5), "Runtime.evaluate", tx);

        assert_eq!(table.reject_all(), 1);
        assert!(table.is_closed());

        let err = rx.try_recv().expect("sent").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Protocol error (Runtime.evaluate): Target closed."
        );
    }

    #[test]
    fn test_remove_then_settle_ignored() {
        let mut table = PendingTable::default();
        let (tx, _rx) = oneshot::channel();
        table.insert(CommandId::new(9), "Page.navigate", tx);

        assert!(table.remove(CommandId::new(9)));
        assert!(!table.settle(response(9, json!({}))));
    }

    proptest! {
        /// Any arrival order of responses completes each command with its own
        /// result, exactly once.
        #[test]
        fn prop_responses_match_by_id(order in Just((1u64..=24).collect::<Vec<_>>()).prop_shuffle()) {
            let mut table = PendingTable::default();
            let mut receivers = Vec::new();
            for id in 1..=24u64 {
                let (tx, rx) = oneshot::channel();
                table.insert(CommandId::new(id), format!("Test.m{id}"), tx);
                receivers.push((id, rx));
            }

            for id in &order {
                let settled = table.settle(response(*id, json!({ "echo": id })));
                prop_assert!(settled);
                prop_assert!(!table.settle(response(*id, json!("late"))));
            }

            prop_assert_eq!(table.len(), 0);
            for (id, mut rx) in receivers {
                let value = rx.try_recv().expect("completed").expect("ok");
                prop_assert_eq!(value, json!({ "echo": id }));
            }
        }
    }
}
