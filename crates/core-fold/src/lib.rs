//! Fold range computation and state tracking (component C4, §4.4).
//!
//! [`FoldEngine`] computes fold candidates from brackets/indentation when no
//! language server is attached, reconciles them with LSP-provided ranges
//! when one is, and carries folded state across edits so a fold toggled by
//! the user survives a keystroke elsewhere in the document.

use core_text::{CoreError, CoreResult, Rope};
use tracing::trace;

/// Hook a language mode can implement so bracket matching skips characters
/// inside strings or comments. The default (`()`) treats every character
/// equally, matching §4.4's "only if the language mode marks them".
pub trait LanguageMode {
    fn in_string_or_comment(&self, _line: &str, _byte_idx: usize) -> bool {
        false
    }
}

impl LanguageMode for () {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldRange {
    pub start_line: usize,
    pub end_line: usize,
    pub folded: bool,
    /// LSP `kind` (`comment`, `region`, `imports`, ...), `None` when this
    /// range came from local bracket/indent computation.
    pub kind: Option<String>,
    pub originally_folded_children: Vec<FoldRange>,
}

impl FoldRange {
    fn new(start_line: usize, end_line: usize, kind: Option<String>) -> Self {
        FoldRange {
            start_line,
            end_line,
            folded: false,
            kind,
            originally_folded_children: Vec::new(),
        }
    }

    fn strictly_contains(&self, other: &FoldRange) -> bool {
        self.start_line <= other.start_line
            && self.end_line >= other.end_line
            && (self.start_line != other.start_line || self.end_line != other.end_line)
    }
}

#[derive(Debug, Default)]
pub struct FoldEngine {
    ranges: Vec<FoldRange>,
}

const BRACKET_PAIRS: [(char, char); 3] = [('{', '}'), ('(', ')'), ('[', ']')];

impl FoldEngine {
    pub fn new() -> Self {
        FoldEngine { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[FoldRange] {
        &self.ranges
    }

    /// Recompute fold candidates from bracket/indent structure. Any LSP
    /// ranges previously merged in are discarded; call
    /// [`FoldEngine::merge_lsp_ranges`] afterward if a server is attached.
    pub fn recompute_local(&mut self, rope: &Rope, lang: &dyn LanguageMode) -> CoreResult<()> {
        let previous = std::mem::take(&mut self.ranges);
        let mut computed = compute_local_ranges(rope, lang)?;
        preserve_folded_state(&previous, &mut computed);
        self.ranges = computed;
        Ok(())
    }

    /// Replace/augment fold ranges with ones reported by `textDocument/foldingRange`,
    /// preserving folded state by exact or near (±3 line) start-line match.
    pub fn merge_lsp_ranges(&mut self, lsp_ranges: Vec<(usize, usize, Option<String>)>) {
        trace!(target: "fold", count = lsp_ranges.len(), "merge_lsp_ranges");
        let previous = std::mem::take(&mut self.ranges);
        let mut merged: Vec<FoldRange> = lsp_ranges
            .into_iter()
            .filter(|(s, e, _)| e > s)
            .map(|(s, e, kind)| FoldRange::new(s, e, kind))
            .collect();
        preserve_folded_state(&previous, &mut merged);
        self.ranges = merged;
    }

    fn index_of(&self, start_line: usize) -> Option<usize> {
        self.ranges.iter().position(|r| r.start_line == start_line)
    }

    fn is_top_level(&self, idx: usize) -> bool {
        let range = &self.ranges[idx];
        !self
            .ranges
            .iter()
            .enumerate()
            .any(|(i, other)| i != idx && other.strictly_contains(range))
    }

    /// Fold the range starting at `start_line`, remembering which strictly
    /// nested children were already folded so `unfold` can restore them.
    pub fn fold(&mut self, start_line: usize) -> CoreResult<()> {
        let idx = self.index_of(start_line).ok_or(CoreError::InvalidRange)?;
        if self.ranges[idx].folded {
            return Ok(());
        }
        let parent = self.ranges[idx].clone();
        let children: Vec<FoldRange> = self
            .ranges
            .iter()
            .filter(|r| parent.strictly_contains(r) && r.folded)
            .cloned()
            .collect();
        for child_start in children.iter().map(|c| c.start_line).collect::<Vec<_>>() {
            if let Some(i) = self.index_of(child_start) {
                self.ranges[i].folded = false;
            }
        }
        self.ranges[idx].folded = true;
        self.ranges[idx].originally_folded_children = children;
        Ok(())
    }

    /// Unfold the range starting at `start_line`, restoring any strictly
    /// nested children that were folded before this range was folded.
    pub fn unfold(&mut self, start_line: usize) -> CoreResult<()> {
        let idx = self.index_of(start_line).ok_or(CoreError::InvalidRange)?;
        if !self.ranges[idx].folded {
            return Ok(());
        }
        self.ranges[idx].folded = false;
        let children = std::mem::take(&mut self.ranges[idx].originally_folded_children);
        for child in children {
            if let Some(i) = self.index_of(child.start_line) {
                self.ranges[i].folded = true;
            }
        }
        Ok(())
    }

    pub fn toggle(&mut self, start_line: usize) -> CoreResult<()> {
        let idx = self.index_of(start_line).ok_or(CoreError::InvalidRange)?;
        let now_folded = !self.ranges[idx].folded;
        trace!(target: "fold", start_line, now_folded, "toggle");
        if self.ranges[idx].folded {
            self.unfold(start_line)
        } else {
            self.fold(start_line)
        }
    }

    /// Fold every top-level range (a range not strictly contained by any
    /// other range).
    pub fn fold_all(&mut self) {
        let starts: Vec<usize> = (0..self.ranges.len())
            .filter(|&i| self.is_top_level(i))
            .map(|i| self.ranges[i].start_line)
            .collect();
        for start in starts {
            let _ = self.fold(start);
        }
    }

    pub fn unfold_all(&mut self) {
        let starts: Vec<usize> = self.ranges.iter().map(|r| r.start_line).collect();
        for start in starts {
            let _ = self.unfold(start);
        }
    }

    /// Lines that remain visible (not hidden inside a folded range) out of
    /// `[0, total_lines)`.
    pub fn visible_lines(&self, total_lines: usize) -> Vec<usize> {
        let mut hidden = vec![false; total_lines];
        for range in self.ranges.iter().filter(|r| r.folded) {
            for line in (range.start_line + 1)..=range.end_line.min(total_lines.saturating_sub(1)) {
                if line < total_lines {
                    hidden[line] = true;
                }
            }
        }
        (0..total_lines).filter(|&l| !hidden[l]).collect()
    }

    pub fn is_line_hidden(&self, line: usize) -> bool {
        self.ranges
            .iter()
            .filter(|r| r.folded)
            .any(|r| line > r.start_line && line <= r.end_line)
    }

    /// Re-derive fold boundaries after an edit changed `edit_line`'s
    /// position by `line_delta` lines, per §4.4's adjustment protocol.
    pub fn adjust_for_edit(&mut self, edit_line: usize, line_delta: isize) {
        if line_delta == 0 {
            return;
        }
        let mut adjusted = Vec::with_capacity(self.ranges.len());
        for mut range in std::mem::take(&mut self.ranges) {
            if range.end_line < edit_line {
                adjusted.push(range);
                continue;
            }
            if range.start_line > edit_line {
                range.start_line = shift(range.start_line, line_delta);
                range.end_line = shift(range.end_line, line_delta);
                adjusted.push(range);
                continue;
            }
            // Straddles edit_line: only end_line shifts.
            let new_end = shift(range.end_line, line_delta);
            if new_end >= range.start_line {
                range.end_line = new_end;
                adjusted.push(range);
            }
            // else: range collapsed below validity and is dropped.
        }
        self.ranges = adjusted;
    }
}

fn shift(line: usize, delta: isize) -> usize {
    if delta >= 0 {
        line + delta as usize
    } else {
        line.saturating_sub((-delta) as usize)
    }
}

fn preserve_folded_state(previous: &[FoldRange], computed: &mut [FoldRange]) {
    for range in computed.iter_mut() {
        if let Some(prev) = previous.iter().find(|p| p.start_line == range.start_line) {
            range.folded = prev.folded;
            range.originally_folded_children = prev.originally_folded_children.clone();
            continue;
        }
        let similar_size = range.end_line - range.start_line;
        if let Some(prev) = previous.iter().find(|p| {
            p.start_line.abs_diff(range.start_line) <= 3
                && (p.end_line - p.start_line).abs_diff(similar_size) <= 1
        }) {
            range.folded = prev.folded;
            range.originally_folded_children = prev.originally_folded_children.clone();
        }
    }
}

fn compute_local_ranges(rope: &Rope, lang: &dyn LanguageMode) -> CoreResult<Vec<FoldRange>> {
    let line_count = rope.line_count();
    let mut ranges = Vec::new();
    for start_line in 0..line_count.saturating_sub(1) {
        let text = rope.line_text(start_line)?;
        let trimmed = text.trim_end();
        let Some(last) = trimmed.chars().last() else {
            continue;
        };
        if let Some((_, close)) = BRACKET_PAIRS.iter().find(|(open, _)| *open == last) {
            if let Some(end_line) =
                find_matching_close(rope, start_line, trimmed.len(), last, *close, lang)?
                && end_line > start_line
            {
                ranges.push(FoldRange::new(start_line, end_line, None));
            }
        } else if last == ':' {
            let start_indent = indent_of(&text);
            let mut end_line = start_line;
            for line_idx in (start_line + 1)..line_count {
                let candidate = rope.line_text(line_idx)?;
                if candidate.trim().is_empty() {
                    continue;
                }
                if indent_of(&candidate) <= start_indent {
                    break;
                }
                end_line = line_idx;
            }
            if end_line > start_line {
                ranges.push(FoldRange::new(start_line, end_line, None));
            }
        }
    }
    Ok(ranges)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn find_matching_close(
    rope: &Rope,
    start_line: usize,
    open_col: usize,
    open: char,
    close: char,
    lang: &dyn LanguageMode,
) -> CoreResult<Option<usize>> {
    let mut depth = 1i32;
    let line_count = rope.line_count();
    let first_line = rope.line_text(start_line)?;
    for (idx, c) in first_line.char_indices().skip(open_col) {
        if lang.in_string_or_comment(&first_line, idx) {
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(Some(start_line));
            }
        }
    }
    for line_idx in (start_line + 1)..line_count {
        let text = rope.line_text(line_idx)?;
        for (idx, c) in text.char_indices() {
            if lang.in_string_or_comment(&text, idx) {
                continue;
            }
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(line_idx));
                }
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn computes_bracket_fold() {
        let rope = Rope::new("fn main() {\n    let x = 1;\n}\n");
        let mut engine = FoldEngine::new();
        engine.recompute_local(&rope, &()).unwrap();
        assert_eq!(engine.ranges().len(), 1);
        assert_eq!(engine.ranges()[0].start_line, 0);
        assert_eq!(engine.ranges()[0].end_line, 2);
    }

    #[test]
    fn computes_indent_fold_on_colon() {
        let rope = Rope::new("def f():\n    a = 1\n    b = 2\nprint(a)\n");
        let mut engine = FoldEngine::new();
        engine.recompute_local(&rope, &()).unwrap();
        assert_eq!(engine.ranges().len(), 1);
        assert_eq!(engine.ranges()[0].start_line, 0);
        assert_eq!(engine.ranges()[0].end_line, 2);
    }

    #[test]
    fn fold_then_unfold_restores_visible_lines() {
        let rope = Rope::new("a {\nb\nc\n}\nd\n");
        let mut engine = FoldEngine::new();
        engine.recompute_local(&rope, &()).unwrap();
        let before = engine.visible_lines(5);
        engine.toggle(0).unwrap();
        assert!(engine.ranges()[0].folded);
        engine.toggle(0).unwrap();
        let after = engine.visible_lines(5);
        assert_eq!(before, after);
    }

    #[test]
    fn folding_parent_unfolds_remembers_children() {
        let rope = Rope::new("outer {\n  inner {\n    x\n  }\n}\n");
        let mut engine = FoldEngine::new();
        engine.recompute_local(&rope, &()).unwrap();
        engine.toggle(1).unwrap(); // fold inner first
        engine.toggle(0).unwrap(); // fold outer remembers inner was folded
        assert!(!engine.ranges().iter().find(|r| r.start_line == 1).unwrap().folded);
        engine.toggle(0).unwrap(); // unfold outer restores inner
        assert!(engine.ranges().iter().find(|r| r.start_line == 1).unwrap().folded);
    }

    #[test]
    fn adjust_for_edit_shifts_straddling_fold() {
        let mut engine = FoldEngine::new();
        engine.ranges.push(FoldRange::new(2, 7, None));
        engine.ranges[0].folded = true;
        engine.adjust_for_edit(5, 1);
        assert_eq!(engine.ranges()[0].end_line, 8);
        assert!(engine.ranges()[0].folded);
    }

    #[test]
    fn adjust_for_edit_shifts_ranges_after() {
        let mut engine = FoldEngine::new();
        engine.ranges.push(FoldRange::new(10, 15, None));
        engine.adjust_for_edit(2, 3);
        assert_eq!(engine.ranges()[0].start_line, 13);
        assert_eq!(engine.ranges()[0].end_line, 18);
    }

    #[test]
    fn adjust_for_edit_keeps_ranges_fully_before() {
        let mut engine = FoldEngine::new();
        engine.ranges.push(FoldRange::new(1, 4, None));
        engine.adjust_for_edit(10, -2);
        assert_eq!(engine.ranges()[0].start_line, 1);
        assert_eq!(engine.ranges()[0].end_line, 4);
    }

    #[test]
    fn fold_all_only_folds_top_level() {
        let rope = Rope::new("outer {\n  inner {\n    x\n  }\n}\n");
        let mut engine = FoldEngine::new();
        engine.recompute_local(&rope, &()).unwrap();
        engine.fold_all();
        assert!(engine.ranges().iter().find(|r| r.start_line == 0).unwrap().folded);
        assert!(!engine.ranges().iter().find(|r| r.start_line == 1).unwrap().folded);
    }
}
