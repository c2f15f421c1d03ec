//! Bounded, coalescing undo/redo log (component C3, §3 and §4.3).
//!
//! A reversible unit is an [`Edit`]: one or more [`TextOp`]s applied in
//! order, plus the selection to restore on either side of it. Most edits
//! (typing, backspace) produce a single-op `Edit` that may coalesce with
//! the previous one; a [`WorkspaceEdit`](https://microsoft.github.io/language-server-protocol/)
//! application spans several disjoint locations and is recorded as one
//! multi-op `Edit` via [`UndoLog::begin_transaction`]/`commit_transaction`,
//! so one `undo()` call reverses the whole batch.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::trace;

/// Maximum number of individual [`TextOp`]s retained across the whole log.
pub const UNDO_HISTORY_MAX: usize = 500;

/// Records coalesce only if they land within this window of each other.
const COALESCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOp {
    pub position: usize,
    pub removed_text: String,
    pub inserted_text: String,
}

impl TextOp {
    fn is_pure_insert(&self) -> bool {
        self.removed_text.is_empty() && !self.inserted_text.is_empty()
    }

    fn is_pure_delete(&self) -> bool {
        self.inserted_text.is_empty() && !self.removed_text.is_empty()
    }

    /// The inverse of this op: reapplying it at the same position undoes it.
    pub fn inverse(&self) -> TextOp {
        TextOp {
            position: self.position,
            removed_text: self.inserted_text.clone(),
            inserted_text: self.removed_text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub base: usize,
    pub extent: usize,
}

#[derive(Debug, Clone)]
pub struct Edit {
    pub ops: Vec<TextOp>,
    pub selection_before: SelectionRange,
    pub selection_after: SelectionRange,
}

impl Edit {
    pub fn single(op: TextOp, selection_before: SelectionRange, selection_after: SelectionRange) -> Self {
        Edit {
            ops: vec![op],
            selection_before,
            selection_after,
        }
    }

    /// The inverse edit: applying its ops (in the same order) undoes `self`.
    pub fn inverse(&self) -> Edit {
        Edit {
            ops: self.ops.iter().map(TextOp::inverse).collect(),
            selection_before: self.selection_after,
            selection_after: self.selection_before,
        }
    }

    fn op_count(&self) -> usize {
        self.ops.len()
    }
}

#[derive(Debug)]
struct Entry {
    edit: Edit,
    timestamp: Instant,
}

/// Bounded, coalescing, transaction-aware undo/redo log.
#[derive(Debug)]
pub struct UndoLog {
    undo_stack: VecDeque<Entry>,
    redo_stack: Vec<Entry>,
    transaction: Option<Vec<TextOp>>,
    transaction_selection_before: Option<SelectionRange>,
    /// Set by [`UndoLog::break_coalescing`] to prevent the next `record` from
    /// merging with the previous entry — a non-text operation (fold toggle,
    /// selection-only change) intervened.
    coalescing_broken: bool,
    total_ops: usize,
}

impl Default for UndoLog {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoLog {
    pub fn new() -> Self {
        UndoLog {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            transaction: None,
            transaction_selection_before: None,
            coalescing_broken: false,
            total_ops: 0,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Mark that a non-text operation occurred, breaking the coalescing
    /// chain for the next `record` call.
    pub fn break_coalescing(&mut self) {
        self.coalescing_broken = true;
    }

    /// Begin grouping subsequent `record` calls into one reversal step.
    /// Nested transactions are a caller bug and panic rather than silently
    /// misbehave.
    pub fn begin_transaction(&mut self, selection_before: SelectionRange) {
        assert!(self.transaction.is_none(), "nested transaction");
        self.transaction = Some(Vec::new());
        self.transaction_selection_before = Some(selection_before);
    }

    /// Commit the current transaction as one [`Edit`]. Panics if no
    /// transaction is open.
    pub fn commit_transaction(&mut self, selection_after: SelectionRange) {
        let ops = self.transaction.take().expect("no open transaction");
        let selection_before = self
            .transaction_selection_before
            .take()
            .expect("no open transaction");
        if ops.is_empty() {
            return;
        }
        self.push_edit(Edit {
            ops,
            selection_before,
            selection_after,
        });
    }

    /// Record one text operation. Inside a transaction it is appended to the
    /// open group; otherwise it becomes its own `Edit`, attempting to
    /// coalesce with the most recent one.
    pub fn record(
        &mut self,
        op: TextOp,
        selection_before: SelectionRange,
        selection_after: SelectionRange,
    ) {
        if let Some(txn) = self.transaction.as_mut() {
            txn.push(op);
            return;
        }
        let broke = std::mem::take(&mut self.coalescing_broken);
        if !broke
            && let Some(last) = self.undo_stack.back_mut()
            && last.edit.op_count() == 1
            && last.timestamp.elapsed() <= COALESCE_WINDOW
            && let Some(merged) = try_coalesce(&last.edit.ops[0], &op)
        {
            last.edit.ops[0] = merged;
            last.edit.selection_after = selection_after;
            last.timestamp = Instant::now();
            self.redo_stack.clear();
            trace!("undo: coalesced edit at {}", last.edit.ops[0].position);
            return;
        }
        self.push_edit(Edit::single(op, selection_before, selection_after));
    }

    fn push_edit(&mut self, edit: Edit) {
        self.redo_stack.clear();
        self.total_ops += edit.op_count();
        self.undo_stack.push_back(Entry {
            edit,
            timestamp: Instant::now(),
        });
        while self.total_ops > UNDO_HISTORY_MAX {
            let Some(front) = self.undo_stack.pop_front() else {
                break;
            };
            self.total_ops -= front.edit.op_count();
            trace!("undo: trimmed oldest entry, history at {}", self.total_ops);
        }
    }

    /// Pop the most recent edit and return its inverse for the caller to
    /// apply to the document; the popped edit moves to the redo stack.
    pub fn undo(&mut self) -> Option<Edit> {
        let entry = self.undo_stack.pop_back()?;
        self.total_ops -= entry.edit.op_count();
        let inverse = entry.edit.inverse();
        self.redo_stack.push(entry);
        self.coalescing_broken = true;
        Some(inverse)
    }

    /// Pop the most recently undone edit and return it (not its inverse) for
    /// the caller to reapply.
    pub fn redo(&mut self) -> Option<Edit> {
        let entry = self.redo_stack.pop()?;
        let edit = entry.edit.clone();
        self.total_ops += edit.op_count();
        self.undo_stack.push_back(entry);
        self.coalescing_broken = true;
        Some(edit)
    }
}

fn try_coalesce(prev: &TextOp, new: &TextOp) -> Option<TextOp> {
    if prev.is_pure_insert() && new.is_pure_insert() {
        let prev_units = prev.inserted_text.encode_utf16().count();
        if new.position == prev.position + prev_units {
            let mut inserted = prev.inserted_text.clone();
            inserted.push_str(&new.inserted_text);
            return Some(TextOp {
                position: prev.position,
                removed_text: String::new(),
                inserted_text: inserted,
            });
        }
        return None;
    }
    if prev.is_pure_delete() && new.is_pure_delete() {
        // Forward-delete chain: position stays fixed, removed text grows.
        if new.position == prev.position {
            let mut removed = prev.removed_text.clone();
            removed.push_str(&new.removed_text);
            return Some(TextOp {
                position: prev.position,
                removed_text: removed,
                inserted_text: String::new(),
            });
        }
        // Backspace chain: new deletion immediately precedes the previous one.
        let new_units = new.removed_text.encode_utf16().count();
        if new.position + new_units == prev.position {
            let mut removed = new.removed_text.clone();
            removed.push_str(&prev.removed_text);
            return Some(TextOp {
                position: new.position,
                removed_text: removed,
                inserted_text: String::new(),
            });
        }
        return None;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sel(base: usize, extent: usize) -> SelectionRange {
        SelectionRange { base, extent }
    }

    fn insert_op(position: usize, text: &str) -> TextOp {
        TextOp {
            position,
            removed_text: String::new(),
            inserted_text: text.to_string(),
        }
    }

    #[test]
    fn coalesces_consecutive_typing() {
        let mut log = UndoLog::new();
        log.record(insert_op(0, "a"), sel(0, 0), sel(1, 1));
        log.record(insert_op(1, "b"), sel(1, 1), sel(2, 2));
        log.record(insert_op(2, "c"), sel(2, 2), sel(3, 3));
        assert_eq!(log.undo_stack.len(), 1);
        let undone = log.undo().unwrap();
        assert_eq!(undone.ops.len(), 1);
        assert_eq!(undone.ops[0].removed_text, "abc");
        assert_eq!(undone.selection_after, sel(0, 0));
    }

    #[test]
    fn does_not_coalesce_across_break() {
        let mut log = UndoLog::new();
        log.record(insert_op(0, "a"), sel(0, 0), sel(1, 1));
        log.break_coalescing();
        log.record(insert_op(1, "b"), sel(1, 1), sel(2, 2));
        assert_eq!(log.undo_stack.len(), 2);
    }

    #[test]
    fn backspace_chain_coalesces_backwards() {
        let mut log = UndoLog::new();
        let del = |pos: usize, text: &str| TextOp {
            position: pos,
            removed_text: text.to_string(),
            inserted_text: String::new(),
        };
        log.record(del(2, "c"), sel(3, 3), sel(2, 2));
        log.record(del(1, "b"), sel(2, 2), sel(1, 1));
        log.record(del(0, "a"), sel(1, 1), sel(0, 0));
        assert_eq!(log.undo_stack.len(), 1);
        let undone = log.undo().unwrap();
        assert_eq!(undone.ops[0].inserted_text, "abc");
    }

    #[test]
    fn undo_redo_is_identity() {
        let mut log = UndoLog::new();
        log.record(insert_op(0, "hi"), sel(0, 0), sel(2, 2));
        let undo_edit = log.undo().unwrap();
        assert_eq!(undo_edit.ops[0].removed_text, "hi");
        let redo_edit = log.redo().unwrap();
        assert_eq!(redo_edit.ops[0].inserted_text, "hi");
        assert_eq!(redo_edit.selection_after, sel(2, 2));
    }

    #[test]
    fn new_record_clears_redo() {
        let mut log = UndoLog::new();
        log.record(insert_op(0, "a"), sel(0, 0), sel(1, 1));
        log.undo();
        assert!(log.can_redo());
        log.record(insert_op(0, "z"), sel(0, 0), sel(1, 1));
        assert!(!log.can_redo());
    }

    #[test]
    fn transaction_groups_into_one_reversal_step() {
        let mut log = UndoLog::new();
        log.begin_transaction(sel(0, 0));
        log.record(insert_op(10, "x"), sel(0, 0), sel(0, 0));
        log.record(insert_op(3, "y"), sel(0, 0), sel(0, 0));
        log.commit_transaction(sel(0, 0));
        assert_eq!(log.undo_stack.len(), 1);
        let undone = log.undo().unwrap();
        assert_eq!(undone.ops.len(), 2);
    }

    #[test]
    #[should_panic(expected = "nested transaction")]
    fn nested_transactions_panic() {
        let mut log = UndoLog::new();
        log.begin_transaction(sel(0, 0));
        log.begin_transaction(sel(0, 0));
    }

    #[test]
    fn history_is_bounded() {
        let mut log = UndoLog::new();
        for i in 0..(UNDO_HISTORY_MAX + 50) {
            log.break_coalescing();
            log.record(insert_op(i, "x"), sel(i, i), sel(i + 1, i + 1));
        }
        assert!(log.total_ops <= UNDO_HISTORY_MAX);
    }
}
