//! Keyword and symbol action dispatcher (component C10, §4.6/§4.10).
//!
//! The host resolves physical keys to a named [`Action`] itself (its
//! concern, not this crate's); [`KeyActionMapper::dispatch`] routes that
//! action onto the one [`core_document::Document`] method that implements
//! it. There is no modal state and no trie: resolution is a single match.

use core_document::Document;
use core_text::CoreResult;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    InsertText(&'a str),
    Backspace,
    Delete,
    DeleteWord,
    DuplicateLine,
    MoveLineUp,
    MoveLineDown,
    MoveLeft { extend: bool },
    MoveRight { extend: bool },
    MoveWordLeft { extend: bool },
    MoveWordRight { extend: bool },
    MoveHome { extend: bool },
    MoveEnd { extend: bool },
    MoveDocumentHome { extend: bool },
    MoveDocumentEnd { extend: bool },
    MovePageUp { extend: bool },
    MovePageDown { extend: bool },
    Indent,
    Unindent,
    Undo,
    Redo,
    ToggleFoldAtCursor,
}

/// Stateless dispatcher: everything it needs lives on the `Document`
/// passed to [`dispatch`](KeyActionMapper::dispatch).
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyActionMapper;

impl KeyActionMapper {
    pub fn new() -> Self {
        KeyActionMapper
    }

    /// `visible_lines` is consulted only by the page motions; callers that
    /// never dispatch those may pass 0.
    pub fn dispatch(
        &self,
        document: &mut Document,
        action: Action<'_>,
        visible_lines: usize,
    ) -> CoreResult<()> {
        trace!(target: "keymap", ?action, "dispatch");
        match action {
            Action::InsertText(text) => document.insert_at_cursor(text),
            Action::Backspace => document.backspace(),
            Action::Delete => document.delete(),
            Action::DeleteWord => document.delete_word(),
            Action::DuplicateLine => document.duplicate_line(),
            Action::MoveLineUp => document.move_line_up(),
            Action::MoveLineDown => document.move_line_down(),
            Action::MoveLeft { extend } => {
                document.move_left(extend);
                Ok(())
            }
            Action::MoveRight { extend } => {
                document.move_right(extend);
                Ok(())
            }
            Action::MoveWordLeft { extend } => document.move_word_left(extend),
            Action::MoveWordRight { extend } => document.move_word_right(extend),
            Action::MoveHome { extend } => document.move_home(extend),
            Action::MoveEnd { extend } => document.move_end(extend),
            Action::MoveDocumentHome { extend } => {
                document.move_document_home(extend);
                Ok(())
            }
            Action::MoveDocumentEnd { extend } => {
                document.move_document_end(extend);
                Ok(())
            }
            Action::MovePageUp { extend } => document.move_page_up(extend, visible_lines),
            Action::MovePageDown { extend } => document.move_page_down(extend, visible_lines),
            Action::Indent => document.indent(),
            Action::Unindent => document.unindent(),
            Action::Undo => document.undo().map(|_| ()),
            Action::Redo => document.redo().map(|_| ()),
            Action::ToggleFoldAtCursor => {
                let line = document.rope().line_at_offset(document.selection().extent)?;
                document.toggle_fold(line)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::Config;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> Document {
        Document::new(text, Config::default())
    }

    #[test]
    fn insert_text_dispatches_to_document() {
        let mut d = doc("ab");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::InsertText("X"), 0).unwrap();
        assert_eq!(d.rope().to_string(), "Xab");
    }

    #[test]
    fn delete_word_dispatches_to_document() {
        let mut d = doc("foo bar");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::MoveDocumentEnd { extend: false }, 0).unwrap();
        mapper.dispatch(&mut d, Action::DeleteWord, 0).unwrap();
        assert_eq!(d.rope().to_string(), "foo ");
    }

    #[test]
    fn indent_dispatches_to_document() {
        let mut d = doc("abc");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::Indent, 0).unwrap();
        assert_eq!(d.rope().to_string(), "    abc");
    }

    #[test]
    fn move_right_dispatches_and_updates_selection() {
        let mut d = doc("abc");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::MoveRight { extend: false }, 0).unwrap();
        assert_eq!(d.selection().extent, 1);
    }

    #[test]
    fn undo_dispatches_after_insert() {
        let mut d = doc("abc");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::InsertText("X"), 0).unwrap();
        assert_eq!(d.rope().to_string(), "Xabc");
        mapper.dispatch(&mut d, Action::Undo, 0).unwrap();
        assert_eq!(d.rope().to_string(), "abc");
    }

    #[test]
    fn duplicate_line_dispatches_to_document() {
        let mut d = doc("one\ntwo\n");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::DuplicateLine, 0).unwrap();
        assert_eq!(d.rope().to_string(), "one\none\ntwo\n");
    }

    #[test]
    fn move_line_down_dispatches_to_document() {
        let mut d = doc("one\ntwo\nthree\n");
        let mapper = KeyActionMapper::new();
        mapper.dispatch(&mut d, Action::MoveLineDown, 0).unwrap();
        assert_eq!(d.rope().to_string(), "two\none\nthree\n");
    }
}
