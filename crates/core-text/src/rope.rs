//! Public rope contract (§4.1).

use std::cell::RefCell;
use std::rc::Rc;

use crate::bidi::{self, BidiSegment, Direction};
use crate::error::{CoreError, CoreResult};
use crate::node::{self, LeafIter, Node};
use tracing::trace;

/// A persistent, balanced-tree text buffer addressed in UTF-16 code units.
///
/// Both a mutable API (`insert`, `delete`) and an immutable API
/// (`insert_immutable`, `delete_immutable`, `concat_immutable`,
/// `split_immutable`) are exposed. The immutable form is the one to reach
/// for by default — it shares structure with the rope it was derived from,
/// which is what makes undo snapshots and background readers cheap. The
/// mutable form exists for the hot path (typing) where replacing `self` in
/// place avoids an extra clone of the `Rope` wrapper; it shares no state
/// with any rope produced by a prior immutable call on the same value.
#[derive(Clone)]
pub struct Rope {
    pub(crate) root: Rc<Node>,
    bidi_cache: RefCell<Option<(Direction, Rc<Vec<BidiSegment>>)>>,
}

impl Rope {
    pub fn new(text: &str) -> Self {
        Rope {
            root: Node::from_str(text),
            bidi_cache: RefCell::new(None),
        }
    }

    fn from_root(root: Rc<Node>) -> Self {
        Rope {
            root,
            bidi_cache: RefCell::new(None),
        }
    }

    /// Total length in UTF-16 code units.
    pub fn length(&self) -> usize {
        self.root.len_utf16()
    }

    fn check_offset(&self, at: usize) -> CoreResult<()> {
        if at > self.length() {
            Err(CoreError::InvalidRange)
        } else {
            Ok(())
        }
    }

    fn check_range(&self, a: usize, b: usize) -> CoreResult<()> {
        if a > b || b > self.length() {
            Err(CoreError::InvalidRange)
        } else {
            Ok(())
        }
    }

    pub fn char_at(&self, at: usize) -> CoreResult<char> {
        self.check_offset(at)?;
        node::char_at(&self.root, at).ok_or(CoreError::InvalidRange)
    }

    pub fn substring(&self, a: usize, b: usize) -> CoreResult<String> {
        self.check_range(a, b)?;
        let mut out = String::new();
        node::collect_range(&self.root, a, b, &mut out);
        Ok(out)
    }

    // ---- mutable API -----------------------------------------------------

    /// Insert `text` at `pos`, replacing `self`'s root in place.
    pub fn insert(&mut self, pos: usize, text: &str) -> CoreResult<()> {
        self.check_offset(pos)?;
        trace!(target: "text.rope", pos, len = text.len(), "insert");
        self.root = insert_rc(&self.root, pos, text);
        self.invalidate();
        Ok(())
    }

    /// Delete the code-unit range `[a, b)`, returning the removed text.
    pub fn delete(&mut self, a: usize, b: usize) -> CoreResult<String> {
        self.check_range(a, b)?;
        trace!(target: "text.rope", a, b, "delete");
        let removed = self.substring(a, b)?;
        let (left, rest) = node::split(&self.root, a);
        let (_, right) = node::split(&rest, b - a);
        self.root = node::concat(left, right);
        self.invalidate();
        Ok(removed)
    }

    fn invalidate(&mut self) {
        *self.bidi_cache.get_mut() = None;
    }

    // ---- immutable API ----------------------------------------------------

    pub fn insert_immutable(&self, pos: usize, text: &str) -> CoreResult<Rope> {
        self.check_offset(pos)?;
        Ok(Rope::from_root(insert_rc(&self.root, pos, text)))
    }

    pub fn delete_immutable(&self, a: usize, b: usize) -> CoreResult<Rope> {
        self.check_range(a, b)?;
        let (left, rest) = node::split(&self.root, a);
        let (_, right) = node::split(&rest, b - a);
        Ok(Rope::from_root(node::concat(left, right)))
    }

    pub fn concat_immutable(&self, other: &Rope) -> Rope {
        Rope::from_root(node::concat(self.root.clone(), other.root.clone()))
    }

    pub fn split_immutable(&self, at: usize) -> CoreResult<(Rope, Rope)> {
        self.check_offset(at)?;
        let (l, r) = node::split(&self.root, at);
        Ok((Rope::from_root(l), Rope::from_root(r)))
    }

    // ---- line API -----------------------------------------------------------

    /// Number of lines; always at least 1, even for an empty rope.
    pub fn line_count(&self) -> usize {
        self.root.newlines() + 1
    }

    pub fn line_start_offset(&self, line: usize) -> CoreResult<usize> {
        if line >= self.line_count() {
            return Err(CoreError::InvalidRange);
        }
        Ok(node::line_start(&self.root, line))
    }

    fn line_end_offset(&self, line: usize) -> CoreResult<usize> {
        if line + 1 < self.line_count() {
            Ok(node::line_start(&self.root, line + 1) - 1)
        } else {
            Ok(self.length())
        }
    }

    pub fn line_text(&self, line: usize) -> CoreResult<String> {
        let start = self.line_start_offset(line)?;
        let end = self.line_end_offset(line)?;
        self.substring(start, end)
    }

    pub fn line_at_offset(&self, off: usize) -> CoreResult<usize> {
        self.check_offset(off)?;
        Ok(node::offset_to_line(&self.root, off))
    }

    /// Code-unit offset of the end of the line containing `off` (before any
    /// trailing `\n`).
    pub fn line_end(&self, off: usize) -> CoreResult<usize> {
        let line = self.line_at_offset(off)?;
        self.line_end_offset(line)
    }

    // ---- BiDi -----------------------------------------------------------

    fn ensure_bidi_cache(&self) -> Rc<Vec<BidiSegment>> {
        if let Some((_, segs)) = self.bidi_cache.borrow().as_ref() {
            return segs.clone();
        }
        let mut out = Vec::new();
        for (start, leaf) in LeafIter::new(&self.root) {
            out.extend(bidi::segments_for(&leaf.text, start));
        }
        let dir = bidi::overall_direction(&out);
        let segs = Rc::new(out);
        *self.bidi_cache.borrow_mut() = Some((dir, segs.clone()));
        segs
    }

    pub fn direction(&self) -> Direction {
        if let Some((dir, _)) = self.bidi_cache.borrow().as_ref() {
            return *dir;
        }
        let segs = self.ensure_bidi_cache();
        bidi::overall_direction(&segs)
    }

    pub fn bidi_segments(&self, start: usize, end: usize) -> CoreResult<Vec<BidiSegment>> {
        self.check_range(start, end)?;
        let segs = self.ensure_bidi_cache();
        Ok(segs
            .iter()
            .filter(|s| s.start < end && s.end > start)
            .map(|s| BidiSegment {
                start: s.start.max(start),
                end: s.end.min(end),
                dir: s.dir,
            })
            .collect())
    }

    pub fn rtl_segments(&self) -> Vec<BidiSegment> {
        self.ensure_bidi_cache()
            .iter()
            .filter(|s| s.dir == Direction::Rtl)
            .copied()
            .collect()
    }
}

fn insert_rc(root: &Rc<Node>, pos: usize, text: &str) -> Rc<Node> {
    if text.is_empty() {
        return root.clone();
    }
    let (left, right) = node::split(root, pos);
    node::concat(node::concat(left, Node::from_str(text)), right)
}

impl std::fmt::Display for Rope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = String::new();
        crate::node::collect_range(&self.root, 0, self.length(), &mut buf);
        f.write_str(&buf)
    }
}

impl std::fmt::Debug for Rope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rope")
            .field("length", &self.length())
            .field("lines", &self.line_count())
            .finish()
    }
}

impl PartialEq for Rope {
    fn eq(&self, other: &Self) -> bool {
        self.length() == other.length() && self.to_string() == other.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_rope_has_one_line() {
        let r = Rope::new("");
        assert_eq!(r.line_count(), 1);
        assert_eq!(r.line_text(0).unwrap(), "");
    }

    #[test]
    fn insert_and_substring() {
        let mut r = Rope::new("hello world");
        r.insert(5, ",").unwrap();
        assert_eq!(r.to_string(), "hello, world");
        assert_eq!(r.substring(0, 5).unwrap(), "hello");
    }

    #[test]
    fn delete_range_returns_removed_text() {
        let mut r = Rope::new("hello world");
        let removed = r.delete(5, 11).unwrap();
        assert_eq!(removed, " world");
        assert_eq!(r.to_string(), "hello");
    }

    #[test]
    fn insert_then_delete_is_identity() {
        let original = Rope::new("fn main() {}\n");
        let mut r = original.clone();
        r.insert(12, " let x = 1;").unwrap();
        r.delete(12, 12 + " let x = 1;".len()).unwrap();
        assert_eq!(r.to_string(), original.to_string());
    }

    #[test]
    fn line_api_basic() {
        let r = Rope::new("fn main() {}\n");
        assert_eq!(r.line_count(), 2);
        assert_eq!(r.line_text(0).unwrap(), "fn main() {}");
        assert_eq!(r.line_text(1).unwrap(), "");
        assert_eq!(r.line_start_offset(1).unwrap(), 13);
        assert!(!r.line_text(0).unwrap().contains('\n'));
    }

    #[test]
    fn line_at_offset_tracks_newlines() {
        let r = Rope::new("aa\nbb\ncc");
        assert_eq!(r.line_at_offset(0).unwrap(), 0);
        assert_eq!(r.line_at_offset(2).unwrap(), 0);
        assert_eq!(r.line_at_offset(3).unwrap(), 1);
        assert_eq!(r.line_at_offset(8).unwrap(), 2);
    }

    #[test]
    fn out_of_range_is_invalid() {
        let r = Rope::new("abc");
        assert_eq!(r.substring(0, 10), Err(CoreError::InvalidRange));
        assert_eq!(r.line_text(5), Err(CoreError::InvalidRange));
    }

    #[test]
    fn delete_whole_document_leaves_one_empty_line() {
        let mut r = Rope::new("line one\nline two\n");
        r.delete(0, r.length()).unwrap();
        assert_eq!(r.line_count(), 1);
        assert_eq!(r.to_string(), "");
    }

    #[test]
    fn insert_across_many_leaves_stays_balanced() {
        let mut r = Rope::new("");
        for i in 0..2000 {
            let s = format!("line {i}\n");
            let pos = r.length();
            r.insert(pos, &s).unwrap();
        }
        assert_eq!(r.line_count(), 2001);
        assert_eq!(r.line_text(500).unwrap(), "line 500");
    }

    #[test]
    fn bidi_segmentation_mixed() {
        let r = Rope::new("hello \u{5E9}\u{5DC}\u{5D5}\u{5DD} world");
        let segs = r.bidi_segments(0, r.length()).unwrap();
        assert!(segs.iter().any(|s| s.dir == Direction::Ltr));
        assert!(segs.iter().any(|s| s.dir == Direction::Rtl));
        assert_eq!(r.direction(), Direction::Mixed);
    }

    #[test]
    fn rtl_only_text_direction() {
        let r = Rope::new("\u{5E9}\u{5DC}\u{5D5}\u{5DD}");
        assert_eq!(r.direction(), Direction::Rtl);
    }

    #[test]
    fn split_and_concat_round_trip() {
        let r = Rope::new("hello world");
        let (l, rr) = r.split_immutable(5).unwrap();
        let joined = l.concat_immutable(&rr);
        assert_eq!(joined.to_string(), r.to_string());
    }

    proptest::proptest! {
        #[test]
        fn insert_delete_round_trip(
            base in "[a-zA-Z0-9\n ]{0,200}",
            ins in "[a-zA-Z0-9]{0,20}",
            pos_frac in 0.0f64..1.0,
        ) {
            let mut r = Rope::new(&base);
            let pos = ((r.length() as f64) * pos_frac) as usize;
            r.insert(pos, &ins).unwrap();
            r.delete(pos, pos + ins.encode_utf16().count()).unwrap();
            prop_assert_eq!(r.to_string(), base);
        }
    }
}
