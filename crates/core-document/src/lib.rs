//! Document model (component C6, §4.6): owns the rope, selection, undo log,
//! fold table, and every overlay collection (diagnostics, semantic tokens,
//! inlay hints, document colors, highlights, search matches, ghost text,
//! decorations). `replace_range` is the one mutator; every other editing
//! operation in this module reduces to it so the edit-dispatch invariants
//! (selection shift, version bump, undo recording, dirty accumulation,
//! single change event) only need to be gotten right once.

use core_config::{Config, IndentUnit};
use core_events::{Event, EventBus};
use core_fold::FoldEngine;
use core_search::{Match, SearchOptions, SearchState};
use core_text::{CoreError, CoreResult, Rope};
use core_undo::{Edit, SelectionRange, TextOp, UndoLog};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub base: usize,
    pub extent: usize,
}

impl Selection {
    pub fn collapsed(at: usize) -> Self {
        Selection { base: at, extent: at }
    }

    pub fn is_collapsed(&self) -> bool {
        self.base == self.extent
    }

    /// Range in ascending order, regardless of which end is the anchor.
    pub fn range(&self) -> (usize, usize) {
        (self.base.min(self.extent), self.base.max(self.extent))
    }

    fn to_core(self) -> SelectionRange {
        SelectionRange { base: self.base, extent: self.extent }
    }

    fn from_core(s: SelectionRange) -> Self {
        Selection { base: s.base, extent: s.extent }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRegion {
    pub start: usize,
    pub end_new: usize,
    pub inserted_length: usize,
    /// Pre-edit end offset, present only when this region reflects exactly
    /// one edit — the shape an incremental `didChange` range needs. Once a
    /// second edit coalesces into the region, tracking it precisely would
    /// require translating it through the first edit's shift, so it is
    /// dropped and callers fall back to a full-document sync.
    pub old_end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub range: (usize, usize),
    pub severity: u8,
    pub message: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticToken {
    pub line: usize,
    pub start_col: usize,
    pub length: usize,
    pub token_type: u32,
    pub modifiers: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlayHintKindTag {
    Type,
    Parameter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlayHint {
    pub position: usize,
    pub label: String,
    pub kind: InlayHintKindTag,
    pub padding_left: bool,
    pub padding_right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentColor {
    pub range: (usize, usize),
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostText {
    pub line: usize,
    pub column: usize,
    pub text: String,
    pub persist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDecorationKind {
    Background,
    LeftBorder,
    Underline,
    Wavy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDecoration {
    pub id: u64,
    pub line: usize,
    pub kind: LineDecorationKind,
    pub style_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GutterDecorationKind {
    ColorBar,
    Icon,
    Dot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GutterDecoration {
    pub id: u64,
    pub line: usize,
    pub kind: GutterDecorationKind,
    pub style_key: String,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || matches!(c as u32, 0x0600..=0x06FF | 0x08A0..=0x08FF | 0x0590..=0x05FF)
}

/// Owns everything named in §3's Document data model and mediates every
/// edit through [`Document::replace_range`].
pub struct Document {
    rope: Rope,
    selection: Selection,
    version: u64,
    dirty: Option<DirtyRegion>,
    undo: UndoLog,
    folds: FoldEngine,
    search: SearchState,
    diagnostics: Vec<Diagnostic>,
    semantic_tokens: Vec<SemanticToken>,
    semantic_tokens_version: u64,
    inlay_hints: Vec<InlayHint>,
    document_colors: Vec<DocumentColor>,
    document_highlights: Vec<(usize, usize)>,
    ghost: Option<GhostText>,
    line_decorations: Vec<LineDecoration>,
    gutter_decorations: Vec<GutterDecoration>,
    next_decoration_id: u64,
    events: EventBus,
    config: Config,
    indent_unit_override: Option<IndentUnit>,
    home_toggle: Option<(usize, bool)>,
}

impl Document {
    pub fn new(text: &str, config: Config) -> Self {
        let rope = Rope::new(text);
        let mut folds = FoldEngine::new();
        let _ = folds.recompute_local(&rope, &());
        let mut doc = Document {
            rope,
            selection: Selection::default(),
            version: 1,
            dirty: None,
            undo: UndoLog::new(),
            folds,
            search: SearchState::new(),
            diagnostics: Vec::new(),
            semantic_tokens: Vec::new(),
            semantic_tokens_version: 0,
            inlay_hints: Vec::new(),
            document_colors: Vec::new(),
            document_highlights: Vec::new(),
            ghost: None,
            line_decorations: Vec::new(),
            gutter_decorations: Vec::new(),
            next_decoration_id: 0,
            events: EventBus::new(),
            config,
            indent_unit_override: None,
            home_toggle: None,
        };
        if doc.config.auto_detect_indent() {
            doc.indent_unit_override = detect_indent_unit(&doc.rope);
        }
        doc
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn rope(&self) -> &Rope {
        &self.rope
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn line_text(&self, line: usize) -> CoreResult<String> {
        self.rope.line_text(line)
    }

    pub fn line_count(&self) -> usize {
        self.rope.line_count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn folds(&self) -> &[core_fold::FoldRange] {
        self.folds.ranges()
    }

    pub fn semantic_tokens_version(&self) -> u64 {
        self.semantic_tokens_version
    }

    pub fn semantic_tokens(&self) -> &[SemanticToken] {
        &self.semantic_tokens
    }

    pub fn ghost_text(&self) -> Option<&GhostText> {
        self.ghost.as_ref()
    }

    pub fn inlay_hints(&self) -> &[InlayHint] {
        &self.inlay_hints
    }

    pub fn document_colors(&self) -> &[DocumentColor] {
        &self.document_colors
    }

    pub fn document_highlights(&self) -> &[(usize, usize)] {
        &self.document_highlights
    }

    pub fn line_decorations(&self) -> &[LineDecoration] {
        &self.line_decorations
    }

    pub fn gutter_decorations(&self) -> &[GutterDecoration] {
        &self.gutter_decorations
    }

    pub fn indent_unit(&self) -> IndentUnit {
        self.indent_unit_override.unwrap_or_else(|| self.config.indent_unit())
    }

    /// Pop the accumulated dirty region, if any, for the host/LSP client to
    /// flush as a `didChange`. Resets accumulation.
    pub fn take_dirty_region(&mut self) -> Option<DirtyRegion> {
        self.dirty.take()
    }

    // ---- the one mutator --------------------------------------------------

    /// Replace `[a, b)` with `text`. Implements the edit-dispatch
    /// invariants of §4.6: rope update, selection shift, version bump,
    /// undo recording (or coalescing), dirty accumulation, and a single
    /// `TextChanged` event.
    pub fn replace_range(&mut self, a: usize, b: usize, text: &str) -> CoreResult<()> {
        if a > b || b > self.rope.length() {
            return Err(CoreError::InvalidRange);
        }
        trace!(target: "document.edit", a, b, inserted_len = text.len(), "replace_range");
        self.handle_ghost_for_edit(a, b, text);

        let selection_before = self.selection.to_core();
        let edit_line = self.rope.line_at_offset(a)?;
        let old_line_count = self.rope.line_count();

        let removed = self.rope.delete(a, b)?;
        self.rope.insert(a, text)?;

        let inserted_len = text.encode_utf16().count();
        self.selection = shift_selection(self.selection, a, b, inserted_len);
        self.version += 1;

        let op = TextOp { position: a, removed_text: removed, inserted_text: text.to_string() };
        self.undo.record(op, selection_before, self.selection.to_core());

        self.search.invalidate_if_intersects(a, b);

        let new_line_count = self.rope.line_count();
        let line_delta = new_line_count as isize - old_line_count as isize;
        self.folds.adjust_for_edit(edit_line, line_delta);

        let end_new = a + inserted_len;
        self.accumulate_dirty(a, Some(b), end_new, inserted_len);

        self.events.emit(Event::TextChanged { dirty_range: a..end_new });
        Ok(())
    }

    fn accumulate_dirty(&mut self, a: usize, old_end: Option<usize>, end_new: usize, inserted_len: usize) {
        self.dirty = Some(match self.dirty.take() {
            None => DirtyRegion { start: a, end_new, inserted_length: inserted_len, old_end },
            Some(prev) => {
                let start = prev.start.min(a);
                let end = prev.end_new.max(end_new);
                DirtyRegion { start, end_new: end, inserted_length: end - start, old_end: None }
            }
        });
    }

    fn handle_ghost_for_edit(&mut self, a: usize, b: usize, text: &str) {
        let Some(ghost) = self.ghost.clone() else { return };
        if ghost.persist {
            return;
        }
        let anchor = match self.rope.line_start_offset(ghost.line) {
            Ok(start) => start + ghost.column,
            Err(_) => {
                self.ghost = None;
                self.events.emit(Event::GhostTextChanged);
                return;
            }
        };
        if a == b && a == anchor && !text.is_empty() && ghost.text.starts_with(text) {
            let remaining = ghost.text[text.len()..].to_string();
            self.ghost = if remaining.is_empty() {
                None
            } else {
                Some(GhostText {
                    line: ghost.line,
                    column: ghost.column + text.encode_utf16().count(),
                    text: remaining,
                    persist: false,
                })
            };
        } else {
            self.ghost = None;
        }
        self.events.emit(Event::GhostTextChanged);
    }

    // ---- text mutation conveniences --------------------------------------

    pub fn insert_at_cursor(&mut self, text: &str) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        self.replace_range(a, b, text)
    }

    pub fn backspace(&mut self) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        if a == b {
            if a == 0 {
                return Ok(());
            }
            self.replace_range(a - 1, a, "")
        } else {
            self.replace_range(a, b, "")
        }
    }

    /// Forward delete. A no-op at document end with a collapsed selection.
    pub fn delete(&mut self) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        if a == b {
            if a >= self.rope.length() {
                return Ok(());
            }
            self.replace_range(a, a + 1, "")
        } else {
            self.replace_range(a, b, "")
        }
    }

    /// Deletes from the cursor back to the previous word boundary, or the
    /// selection if one is active — the same boundary `move_word_left`
    /// would move to, just replaced rather than moved to.
    pub fn delete_word(&mut self) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        if a != b {
            return self.replace_range(a, b, "");
        }
        let text = self.rope.substring(0, self.rope.length())?;
        let chars: Vec<char> = text.chars().collect();
        let offsets = char_offsets(&chars);
        let mut idx = offsets.partition_point(|&o| o < a);
        if idx > 0 {
            idx -= 1;
        }
        while idx > 0 && !is_word_char(chars[idx.min(chars.len() - 1)]) {
            idx -= 1;
        }
        while idx > 0 && is_word_char(chars[idx - 1]) {
            idx -= 1;
        }
        self.replace_range(offsets[idx], a, "")
    }

    pub fn duplicate_line(&mut self) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        let start = self.rope.line_start_offset(line)?;
        let text = self.rope.line_text(line)?;
        self.replace_range(start, start, &format!("{text}\n"))
    }

    pub fn move_line_up(&mut self) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        if line == 0 {
            return Ok(());
        }
        self.swap_lines(line - 1, line)
    }

    pub fn move_line_down(&mut self) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        if line + 1 >= self.rope.line_count() {
            return Ok(());
        }
        self.swap_lines(line, line + 1)
    }

    fn swap_lines(&mut self, first: usize, second: usize) -> CoreResult<()> {
        let second_is_last = second + 1 >= self.rope.line_count();
        let start = self.rope.line_start_offset(first)?;
        let end = if second_is_last { self.rope.length() } else { self.rope.line_start_offset(second + 1)? };
        let first_text = self.rope.line_text(first)?;
        let second_text = self.rope.line_text(second)?;
        let replacement = if second_is_last {
            format!("{second_text}\n{first_text}")
        } else {
            format!("{second_text}\n{first_text}\n")
        };
        self.replace_range(start, end, &replacement)
    }

    // ---- cursor motion ----------------------------------------------------

    fn set_cursor(&mut self, offset: usize, extend: bool) {
        self.home_toggle = None;
        self.undo.break_coalescing();
        self.selection = if extend {
            Selection { base: self.selection.base, extent: offset }
        } else {
            Selection::collapsed(offset)
        };
        self.events.emit(Event::SelectionChanged);
    }

    pub fn move_left(&mut self, extend: bool) {
        let at = self.selection.extent.saturating_sub(1);
        self.set_cursor(at, extend);
    }

    pub fn move_right(&mut self, extend: bool) {
        let at = (self.selection.extent + 1).min(self.rope.length());
        self.set_cursor(at, extend);
    }

    pub fn move_word_left(&mut self, extend: bool) -> CoreResult<()> {
        let text = self.rope.substring(0, self.rope.length())?;
        let chars: Vec<char> = text.chars().collect();
        let offsets = char_offsets(&chars);
        let mut idx = offsets.partition_point(|&o| o < self.selection.extent);
        if idx > 0 {
            idx -= 1;
        }
        while idx > 0 && !is_word_char(chars[idx.min(chars.len() - 1)]) {
            idx -= 1;
        }
        while idx > 0 && is_word_char(chars[idx - 1]) {
            idx -= 1;
        }
        self.set_cursor(offsets[idx], extend);
        Ok(())
    }

    pub fn move_word_right(&mut self, extend: bool) -> CoreResult<()> {
        let text = self.rope.substring(0, self.rope.length())?;
        let chars: Vec<char> = text.chars().collect();
        let offsets = char_offsets(&chars);
        let mut idx = offsets.partition_point(|&o| o < self.selection.extent);
        while idx < chars.len() && !is_word_char(chars[idx]) {
            idx += 1;
        }
        while idx < chars.len() && is_word_char(chars[idx]) {
            idx += 1;
        }
        self.set_cursor(offsets[idx], extend);
        Ok(())
    }

    /// Toggles between column 0 and the first non-whitespace column on
    /// repeated presses on the same line.
    pub fn move_home(&mut self, extend: bool) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        let line_start = self.rope.line_start_offset(line)?;
        let text = self.rope.line_text(line)?;
        let first_non_ws = text.chars().take_while(|c| *c == ' ' || *c == '\t').count();
        let first_non_ws_offset = line_start + first_non_ws;

        let go_to_zero = match self.home_toggle {
            Some((toggled_line, was_at_zero)) if toggled_line == line => !was_at_zero,
            _ => first_non_ws_offset != self.selection.extent,
        };
        let target = if go_to_zero { line_start } else { first_non_ws_offset };
        self.undo.break_coalescing();
        self.selection = if extend {
            Selection { base: self.selection.base, extent: target }
        } else {
            Selection::collapsed(target)
        };
        self.home_toggle = Some((line, go_to_zero));
        self.events.emit(Event::SelectionChanged);
        Ok(())
    }

    pub fn move_end(&mut self, extend: bool) -> CoreResult<()> {
        let end = self.rope.line_end(self.selection.extent)?;
        self.set_cursor(end, extend);
        Ok(())
    }

    pub fn move_document_home(&mut self, extend: bool) {
        self.set_cursor(0, extend);
    }

    pub fn move_document_end(&mut self, extend: bool) {
        let end = self.rope.length();
        self.set_cursor(end, extend);
    }

    pub fn move_page_up(&mut self, extend: bool, visible_lines: usize) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        let target_line = line.saturating_sub(visible_lines);
        let at = self.rope.line_start_offset(target_line)?;
        self.set_cursor(at, extend);
        Ok(())
    }

    pub fn move_page_down(&mut self, extend: bool, visible_lines: usize) -> CoreResult<()> {
        let line = self.rope.line_at_offset(self.selection.extent)?;
        let target_line = (line + visible_lines).min(self.rope.line_count() - 1);
        let at = self.rope.line_start_offset(target_line)?;
        self.set_cursor(at, extend);
        Ok(())
    }

    // ---- indentation -------------------------------------------------------

    fn indent_text(&self) -> String {
        match self.indent_unit() {
            IndentUnit::Tabs => "\t".to_string(),
            IndentUnit::Spaces(n) => " ".repeat(n as usize),
        }
    }

    pub fn indent(&mut self) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        if a == b {
            let unit = self.indent_text();
            let len = unit.encode_utf16().count();
            self.replace_range(a, a, &unit)?;
            self.selection = Selection::collapsed(a + len);
            return Ok(());
        }
        let start_line = self.rope.line_at_offset(a)?;
        let end_line = self.rope.line_at_offset(b)?;
        let unit = self.indent_text();
        let selection_before = self.selection;
        self.begin_transaction(selection_before);
        for line in (start_line..=end_line).rev() {
            let start = self.rope.line_start_offset(line)?;
            if self.rope.line_text(line)?.is_empty() && line != start_line {
                continue;
            }
            self.replace_range(start, start, &unit)?;
        }
        self.commit_transaction(self.selection);
        Ok(())
    }

    pub fn unindent(&mut self) -> CoreResult<()> {
        let (a, b) = self.selection.range();
        let start_line = self.rope.line_at_offset(a)?;
        let end_line = self.rope.line_at_offset(b)?;
        let unit_width = match self.indent_unit() {
            IndentUnit::Tabs => 1,
            IndentUnit::Spaces(n) => n as usize,
        };
        let selection_before = self.selection;
        self.begin_transaction(selection_before);
        for line in (start_line..=end_line).rev() {
            let start = self.rope.line_start_offset(line)?;
            let text = self.rope.line_text(line)?;
            let removable = text
                .chars()
                .take(unit_width)
                .take_while(|c| *c == ' ' || *c == '\t')
                .count();
            if removable > 0 {
                self.replace_range(start, start + removable, "")?;
            }
        }
        self.commit_transaction(self.selection);
        Ok(())
    }

    // ---- bracket matching ---------------------------------------------------

    const OPEN: [char; 3] = ['(', '{', '['];
    const CLOSE: [char; 3] = [')', '}', ']'];

    pub fn bracket_match(&self) -> CoreResult<Option<(usize, usize)>> {
        let at = self.selection.extent;
        if at < self.rope.length()
            && let Some(pos) = self.find_match_from(at)
        {
            return Ok(Some(pos));
        }
        if at > 0
            && let Some(pos) = self.find_match_from(at - 1)
        {
            return Ok(Some(pos));
        }
        Ok(None)
    }

    fn find_match_from(&self, at: usize) -> Option<(usize, usize)> {
        let c = self.rope.char_at(at).ok()?;
        if let Some(idx) = Self::OPEN.iter().position(|&o| o == c) {
            let close = Self::CLOSE[idx];
            let mut depth = 1i32;
            let mut pos = at + 1;
            let len = self.rope.length();
            while pos < len {
                let cur = self.rope.char_at(pos).ok()?;
                if cur == c {
                    depth += 1;
                } else if cur == close {
                    depth -= 1;
                    if depth == 0 {
                        return Some((at, pos));
                    }
                }
                pos += 1;
            }
            return None;
        }
        if let Some(idx) = Self::CLOSE.iter().position(|&o| o == c) {
            let open = Self::OPEN[idx];
            let mut depth = 1i32;
            if at == 0 {
                return None;
            }
            let mut pos = at;
            while pos > 0 {
                pos -= 1;
                let cur = self.rope.char_at(pos).ok()?;
                if cur == c {
                    depth += 1;
                } else if cur == open {
                    depth -= 1;
                    if depth == 0 {
                        return Some((pos, at));
                    }
                }
            }
        }
        None
    }

    // ---- ghost text ----------------------------------------------------------

    pub fn set_ghost(&mut self, line: usize, column: usize, text: &str, persist: bool) {
        self.ghost = Some(GhostText { line, column, text: text.to_string(), persist });
        self.events.emit(Event::GhostTextChanged);
    }

    pub fn clear_ghost(&mut self) {
        if self.ghost.take().is_some() {
            self.events.emit(Event::GhostTextChanged);
        }
    }

    // ---- decorations -----------------------------------------------------------

    pub fn add_line_decoration(&mut self, line: usize, kind: LineDecorationKind, style_key: &str) -> u64 {
        let id = self.next_decoration_id;
        self.next_decoration_id += 1;
        self.line_decorations.push(LineDecoration { id, line, kind, style_key: style_key.to_string() });
        self.events.emit(Event::DecorationsChanged);
        id
    }

    pub fn add_gutter_decoration(&mut self, line: usize, kind: GutterDecorationKind, style_key: &str) -> u64 {
        let id = self.next_decoration_id;
        self.next_decoration_id += 1;
        self.gutter_decorations.push(GutterDecoration { id, line, kind, style_key: style_key.to_string() });
        self.events.emit(Event::DecorationsChanged);
        id
    }

    pub fn clear_decorations_by_id(&mut self, id: u64) {
        let before = self.line_decorations.len() + self.gutter_decorations.len();
        self.line_decorations.retain(|d| d.id != id);
        self.gutter_decorations.retain(|d| d.id != id);
        if self.line_decorations.len() + self.gutter_decorations.len() != before {
            self.events.emit(Event::DecorationsChanged);
        }
    }

    // ---- undo/redo --------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// `UndoLog::undo` already hands back the correctly-oriented inverse
    /// edit, so this applies its ops forward, same as `redo`.
    pub fn undo(&mut self) -> CoreResult<bool> {
        let Some(edit) = self.undo.undo() else { return Ok(false) };
        trace!(target: "document.undo", ops = edit.ops.len(), "undo");
        self.apply_edit_ops(&edit)?;
        self.selection = Selection::from_core(edit.selection_after);
        self.version += 1;
        self.events.emit(Event::SelectionChanged);
        Ok(true)
    }

    pub fn redo(&mut self) -> CoreResult<bool> {
        let Some(edit) = self.undo.redo() else { return Ok(false) };
        trace!(target: "document.undo", ops = edit.ops.len(), "redo");
        self.apply_edit_ops(&edit)?;
        self.selection = Selection::from_core(edit.selection_after);
        self.version += 1;
        self.events.emit(Event::SelectionChanged);
        Ok(true)
    }

    fn apply_edit_ops(&mut self, edit: &Edit) -> CoreResult<()> {
        let mut dirty_start = usize::MAX;
        let mut dirty_end = 0usize;
        for op in &edit.ops {
            let end = op.position + op.removed_text.encode_utf16().count();
            self.rope.delete(op.position, end)?;
            self.rope.insert(op.position, &op.inserted_text)?;
            dirty_start = dirty_start.min(op.position);
            dirty_end = dirty_end.max(op.position + op.inserted_text.encode_utf16().count());
        }
        let _ = self.folds.recompute_local(&self.rope, &());
        self.search.invalidate_if_intersects(dirty_start.min(dirty_end), dirty_end.max(dirty_start));
        if dirty_end >= dirty_start {
            self.accumulate_dirty(dirty_start, None, dirty_end, dirty_end.saturating_sub(dirty_start));
            self.events.emit(Event::TextChanged { dirty_range: dirty_start..dirty_end });
        }
        Ok(())
    }

    pub fn begin_transaction(&mut self, selection_before: Selection) {
        self.undo.begin_transaction(selection_before.to_core());
    }

    pub fn commit_transaction(&mut self, selection_after: Selection) {
        self.undo.commit_transaction(selection_after.to_core());
    }

    // ---- search -------------------------------------------------------------

    pub fn search_find(&mut self, pattern: &str, options: SearchOptions) -> CoreResult<()> {
        self.search.find(&self.rope, pattern, options)?;
        self.events.emit(Event::SearchHighlightsChanged);
        Ok(())
    }

    pub fn search_matches(&self) -> &[Match] {
        self.search.matches()
    }

    pub fn search_next(&mut self) -> CoreResult<Option<Match>> {
        let m = self.search.next(&self.rope)?;
        self.events.emit(Event::SearchHighlightsChanged);
        Ok(m)
    }

    pub fn search_previous(&mut self) -> CoreResult<Option<Match>> {
        let m = self.search.previous(&self.rope)?;
        self.events.emit(Event::SearchHighlightsChanged);
        Ok(m)
    }

    pub fn replace_current(&mut self, replacement: &str) -> CoreResult<()> {
        let m = self.search.replace_current()?;
        self.replace_range(m.start, m.end, replacement)
    }

    pub fn replace_all(&mut self, replacement: &str) -> CoreResult<()> {
        let matches = self.search.replace_all();
        let selection_before = self.selection;
        self.begin_transaction(selection_before);
        for m in matches {
            self.replace_range(m.start, m.end, replacement)?;
        }
        self.commit_transaction(self.selection);
        Ok(())
    }

    // ---- LSP-fed overlays (written by core-lsp-client) ------------------------

    pub fn set_diagnostics(&mut self, diagnostics: Vec<Diagnostic>) {
        self.diagnostics = diagnostics;
        self.events.emit(Event::DiagnosticsChanged);
    }

    /// Applies the highest-version-wins rule: a payload older than the
    /// currently applied version is a silent no-op.
    pub fn set_semantic_tokens(&mut self, version: u64, tokens: Vec<SemanticToken>) {
        if version < self.semantic_tokens_version {
            return;
        }
        self.semantic_tokens_version = version;
        self.semantic_tokens = tokens;
        self.events.emit(Event::SemanticTokensChanged { version });
    }

    pub fn set_inlay_hints(&mut self, hints: Vec<InlayHint>) {
        self.inlay_hints = hints;
        self.events.emit(Event::InlayHintsChanged);
    }

    pub fn set_document_colors(&mut self, colors: Vec<DocumentColor>) {
        self.document_colors = colors;
        self.events.emit(Event::DocumentColorsChanged);
    }

    pub fn set_document_highlights(&mut self, highlights: Vec<(usize, usize)>) {
        self.document_highlights = highlights;
        self.events.emit(Event::HighlightsChanged);
    }

    pub fn merge_lsp_folds(&mut self, ranges: Vec<(usize, usize, Option<String>)>) {
        self.folds.merge_lsp_ranges(ranges);
        self.events.emit(Event::FoldsChanged);
    }

    pub fn fold(&mut self, start_line: usize) -> CoreResult<()> {
        self.folds.fold(start_line)?;
        self.undo.break_coalescing();
        self.events.emit(Event::FoldsChanged);
        Ok(())
    }

    pub fn unfold(&mut self, start_line: usize) -> CoreResult<()> {
        self.folds.unfold(start_line)?;
        self.undo.break_coalescing();
        self.events.emit(Event::FoldsChanged);
        Ok(())
    }

    pub fn toggle_fold(&mut self, start_line: usize) -> CoreResult<()> {
        self.folds.toggle(start_line)?;
        self.undo.break_coalescing();
        self.events.emit(Event::FoldsChanged);
        Ok(())
    }
}

fn char_offsets(chars: &[char]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(chars.len() + 1);
    let mut off = 0usize;
    for c in chars {
        offsets.push(off);
        off += c.len_utf16();
    }
    offsets.push(off);
    offsets
}

fn shift_selection(selection: Selection, a: usize, b: usize, inserted_len: usize) -> Selection {
    let shift_offset = |o: usize| -> usize {
        if o < a {
            o
        } else if o >= b {
            (o as isize + inserted_len as isize - (b as isize - a as isize)) as usize
        } else {
            a + inserted_len
        }
    };
    Selection { base: shift_offset(selection.base), extent: shift_offset(selection.extent) }
}

/// Detects the indent unit from the first indented line, falling back to
/// the configured default when no line is indented.
fn detect_indent_unit(rope: &Rope) -> Option<IndentUnit> {
    for line in 0..rope.line_count() {
        let Ok(text) = rope.line_text(line) else { continue };
        let mut chars = text.chars();
        match chars.next() {
            Some('\t') => return Some(IndentUnit::Tabs),
            Some(' ') => {
                let width = text.chars().take_while(|c| *c == ' ').count();
                if width > 0 {
                    return Some(IndentUnit::Spaces(width.min(8) as u8));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> Document {
        Document::new(text, Config::default())
    }

    #[test]
    fn replace_range_shifts_selection_and_bumps_version() {
        let mut d = doc("hello world");
        d.selection = Selection::collapsed(11);
        d.replace_range(5, 5, ",").unwrap();
        assert_eq!(d.rope().to_string(), "hello, world");
        assert_eq!(d.selection().extent, 12);
        assert_eq!(d.version(), 2);
    }

    #[test]
    fn selection_before_edit_is_unaffected() {
        let mut d = doc("hello world");
        d.selection = Selection::collapsed(2);
        d.replace_range(5, 6, "-").unwrap();
        assert_eq!(d.selection().extent, 2);
    }

    #[test]
    fn selection_inside_replaced_range_collapses() {
        let mut d = doc("hello world");
        d.selection = Selection::collapsed(7);
        d.replace_range(5, 11, "!").unwrap();
        assert_eq!(d.selection().extent, 6);
    }

    #[test]
    fn backspace_is_noop_at_document_start() {
        let mut d = doc("abc");
        d.selection = Selection::collapsed(0);
        d.backspace().unwrap();
        assert_eq!(d.rope().to_string(), "abc");
    }

    #[test]
    fn forward_delete_is_noop_at_document_end() {
        let mut d = doc("abc");
        d.selection = Selection::collapsed(3);
        d.delete().unwrap();
        assert_eq!(d.rope().to_string(), "abc");
    }

    #[test]
    fn undo_redo_round_trip_restores_text_and_selection() {
        let mut d = doc("hello world");
        d.selection = Selection::collapsed(5);
        d.insert_at_cursor(",").unwrap();
        assert_eq!(d.rope().to_string(), "hello, world");
        d.undo().unwrap();
        assert_eq!(d.rope().to_string(), "hello world");
        assert_eq!(d.selection().extent, 5);
        d.redo().unwrap();
        assert_eq!(d.rope().to_string(), "hello, world");
    }

    #[test]
    fn cursor_move_breaks_coalescing_between_inserts() {
        let mut d = doc("ac");
        d.selection = Selection::collapsed(1);
        d.insert_at_cursor("b").unwrap();
        assert_eq!(d.rope().to_string(), "abc");
        d.move_left(false);
        d.move_right(false);
        d.insert_at_cursor("d").unwrap();
        assert_eq!(d.rope().to_string(), "abdc");
        d.undo().unwrap();
        assert_eq!(d.rope().to_string(), "abc");
        d.undo().unwrap();
        assert_eq!(d.rope().to_string(), "ac");
    }

    #[test]
    fn delete_word_removes_back_to_previous_boundary() {
        let mut d = doc("foo bar baz");
        d.selection = Selection::collapsed(11);
        d.delete_word().unwrap();
        assert_eq!(d.rope().to_string(), "foo bar ");
        assert_eq!(d.selection().extent, 8);
    }

    #[test]
    fn delete_word_removes_active_selection_instead() {
        let mut d = doc("foo bar baz");
        d.selection = Selection { base: 4, extent: 7 };
        d.delete_word().unwrap();
        assert_eq!(d.rope().to_string(), "foo  baz");
    }

    #[test]
    fn bracket_match_finds_balanced_pair() {
        let mut d = doc("fn main() { x }");
        d.selection = Selection::collapsed(10);
        let pair = d.bracket_match().unwrap();
        assert_eq!(pair, Some((10, 14)));
    }

    #[test]
    fn ghost_text_consumed_by_matching_prefix() {
        let mut d = doc("fn main() {}\n");
        d.selection = Selection::collapsed(12);
        d.set_ghost(0, 12, "let x = 1;", false);
        d.insert_at_cursor("let").unwrap();
        assert_eq!(d.ghost_text().unwrap().text, " x = 1;");
    }

    #[test]
    fn ghost_text_cleared_on_non_matching_input() {
        let mut d = doc("fn main() {}\n");
        d.selection = Selection::collapsed(12);
        d.set_ghost(0, 12, "let x = 1;", false);
        d.insert_at_cursor("Z").unwrap();
        assert!(d.ghost_text().is_none());
    }

    #[test]
    fn persist_ghost_survives_unrelated_edit() {
        let mut d = doc("abc\n");
        d.set_ghost(0, 0, "hint", true);
        d.selection = Selection::collapsed(3);
        d.insert_at_cursor("Z").unwrap();
        assert!(d.ghost_text().is_some());
    }

    #[test]
    fn indent_inserts_configured_unit_on_collapsed_cursor() {
        let mut d = doc("abc");
        d.selection = Selection::collapsed(0);
        d.indent().unwrap();
        assert_eq!(d.rope().to_string(), "    abc");
    }

    #[test]
    fn indent_over_selection_undoes_in_one_step() {
        let mut d = doc("one\ntwo\nthree\n");
        d.selection = Selection { base: 0, extent: d.rope().length() };
        d.indent().unwrap();
        assert_eq!(d.rope().to_string(), "    one\n    two\n    three\n");
        d.undo().unwrap();
        assert_eq!(d.rope().to_string(), "one\ntwo\nthree\n");
    }

    #[test]
    fn unindent_over_selection_undoes_in_one_step() {
        let mut d = doc("    one\n    two\n");
        d.selection = Selection { base: 0, extent: d.rope().length() };
        d.unindent().unwrap();
        assert_eq!(d.rope().to_string(), "one\ntwo\n");
        d.undo().unwrap();
        assert_eq!(d.rope().to_string(), "    one\n    two\n");
    }

    #[test]
    fn search_invalidated_by_intersecting_edit() {
        let mut d = doc("foo bar foo");
        d.search_find("foo", SearchOptions { case_sensitive: true, ..Default::default() }).unwrap();
        assert_eq!(d.search_matches().len(), 2);
        d.replace_range(0, 3, "baz").unwrap();
        d.search_next().unwrap();
        assert_eq!(d.search_matches().len(), 1);
    }

    #[test]
    fn deleting_whole_document_leaves_one_empty_line() {
        let mut d = doc("line one\nline two\n");
        let len = d.rope().length();
        d.replace_range(0, len, "").unwrap();
        assert_eq!(d.line_count(), 1);
    }
}
