//! Incremental syntax tokenizer with a semantic-token overlay (component C2, §4.2).
//!
//! Tokenization is rolling: each line's end-state (which multi-line rule,
//! if any, is still open) is cached. Re-tokenizing a changed line compares
//! its new end-state to the cached one; a mismatch cascades the
//! recomputation to the next line, and so on until the state stabilizes or
//! the document ends.

use core_text::{CoreResult, Rope};
use regex::Regex;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRun {
    pub start: usize,
    pub end: usize,
    pub style_key: String,
}

/// A token-type/modifier override reported by the language server for one
/// line, already translated from the server's integer legend to a style
/// key by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticOverride {
    pub start_col: usize,
    pub length: usize,
    pub style_key: String,
}

pub struct Rule {
    pub style_key: String,
    pub pattern: Regex,
}

/// A rule whose match can span multiple lines, e.g. a block comment. While
/// open, every character belongs to it until `end` matches.
pub struct MultilineRule {
    pub style_key: String,
    pub start: Regex,
    pub end: Regex,
}

pub trait LanguageMode {
    fn rules(&self) -> &[Rule];
    fn multiline_rules(&self) -> &[MultilineRule] {
        &[]
    }
}

/// Rolling per-line tokenizer. `L` supplies the regex rule table; the
/// highlighter owns only the cached end-state per line.
pub struct Highlighter<L> {
    language: L,
    end_states: Vec<Option<usize>>,
}

impl<L: LanguageMode> Highlighter<L> {
    pub fn new(language: L) -> Self {
        Highlighter { language, end_states: Vec::new() }
    }

    /// Cold full re-tokenization, the ground truth every incremental path
    /// must agree with (§8's testable property).
    pub fn retokenize_all(&mut self, rope: &Rope) -> CoreResult<()> {
        self.end_states.clear();
        let mut state = None;
        for line in 0..rope.line_count() {
            let text = rope.line_text(line)?;
            let (_, end_state) = self.tokenize_line(&text, state);
            self.end_states.push(end_state);
            state = end_state;
        }
        Ok(())
    }

    pub fn highlight_line(&self, rope: &Rope, line: usize) -> CoreResult<Vec<StyleRun>> {
        let state_in = if line == 0 { None } else { self.end_states.get(line - 1).copied().flatten() };
        let text = rope.line_text(line)?;
        let (runs, _) = self.tokenize_line(&text, state_in);
        Ok(coalesce(runs))
    }

    pub fn highlight_line_with_semantic(
        &self,
        rope: &Rope,
        line: usize,
        overrides: &[SemanticOverride],
    ) -> CoreResult<Vec<StyleRun>> {
        let base = self.highlight_line(rope, line)?;
        Ok(merge_semantic(&base, overrides))
    }

    /// Apply a document edit whose starting line is `edit_start_line` and
    /// which turned `old_line_count` lines into `new_line_count` lines.
    /// Returns the lines that were recomputed (the invalidation window);
    /// the caller should re-render those.
    pub fn apply_document_edit(
        &mut self,
        rope: &Rope,
        edit_start_line: usize,
        old_line_count: usize,
        new_line_count: usize,
    ) -> CoreResult<Vec<usize>> {
        let delta = new_line_count as isize - old_line_count as isize;
        let old_cache = std::mem::take(&mut self.end_states);
        let keep = edit_start_line.min(old_cache.len());
        self.end_states = old_cache[..keep].to_vec();

        let mut state = if edit_start_line == 0 { None } else { old_cache.get(edit_start_line - 1).copied().flatten() };
        let total_lines = rope.line_count();
        let edit_end_line_new = edit_start_line + new_line_count;
        let mut invalidated = Vec::new();
        let mut line = edit_start_line;

        while line < total_lines {
            let text = rope.line_text(line)?;
            let (_, end_state) = self.tokenize_line(&text, state);
            self.end_states.push(end_state);
            invalidated.push(line);
            state = end_state;

            if line >= edit_end_line_new {
                let old_line_idx_signed = line as isize - delta;
                let matches_old = old_line_idx_signed >= 0
                    && old_cache.get(old_line_idx_signed as usize).copied().flatten() == end_state;
                if matches_old {
                    line += 1;
                    break;
                }
            }
            line += 1;
        }

        // Lines past the cascade keep their old state, shifted by delta.
        while line < total_lines {
            let old_line_idx_signed = line as isize - delta;
            if old_line_idx_signed < 0 {
                break;
            }
            match old_cache.get(old_line_idx_signed as usize) {
                Some(&s) => self.end_states.push(s),
                None => break,
            }
            line += 1;
        }

        trace!(target: "syntax", edit_start_line, lines = invalidated.len(), "apply_document_edit");
        Ok(invalidated)
    }

    fn tokenize_line(&self, text: &str, state_in: Option<usize>) -> (Vec<StyleRun>, Option<usize>) {
        let mut runs = Vec::new();
        let mut pos = 0usize;
        let mut code_unit = 0usize;
        let mut state = state_in;

        if let Some(idx) = state {
            let rule = &self.language.multiline_rules()[idx];
            if let Some(m) = rule.end.find(text) {
                let cu_len = text[..m.end()].encode_utf16().count();
                runs.push(StyleRun { start: 0, end: cu_len, style_key: rule.style_key.clone() });
                pos = m.end();
                code_unit = cu_len;
                state = None;
            } else {
                let cu_len = text.encode_utf16().count();
                runs.push(StyleRun { start: 0, end: cu_len, style_key: rule.style_key.clone() });
                return (runs, state);
            }
        }

        while pos < text.len() {
            if let Some((idx, start_end_byte)) = self.find_multiline_start(text, pos) {
                let rule = &self.language.multiline_rules()[idx];
                let open_end_cu = code_unit + text[pos..start_end_byte].encode_utf16().count();
                if let Some(close) = rule.end.find(&text[start_end_byte..]) {
                    let close_end_byte = start_end_byte + close.end();
                    let close_end_cu = open_end_cu + text[start_end_byte..close_end_byte].encode_utf16().count();
                    runs.push(StyleRun { start: code_unit, end: close_end_cu, style_key: rule.style_key.clone() });
                    pos = close_end_byte;
                    code_unit = close_end_cu;
                    continue;
                } else {
                    let cu_len = text.encode_utf16().count();
                    runs.push(StyleRun { start: code_unit, end: cu_len, style_key: rule.style_key.clone() });
                    return (runs, Some(idx));
                }
            }
            if let Some((rule, end_byte)) = self.find_rule_match(text, pos) {
                let end_cu = code_unit + text[pos..end_byte].encode_utf16().count();
                runs.push(StyleRun { start: code_unit, end: end_cu, style_key: rule.style_key.clone() });
                pos = end_byte;
                code_unit = end_cu;
                continue;
            }
            let ch = text[pos..].chars().next().expect("pos < text.len()");
            let cu = ch.len_utf16();
            runs.push(StyleRun { start: code_unit, end: code_unit + cu, style_key: "default".to_string() });
            pos += ch.len_utf8();
            code_unit += cu;
        }
        (runs, state)
    }

    /// Returns the rule index and the absolute byte offset where its start
    /// match ends, if a multi-line rule starts exactly at `pos`.
    fn find_multiline_start(&self, text: &str, pos: usize) -> Option<(usize, usize)> {
        self.language
            .multiline_rules()
            .iter()
            .enumerate()
            .find_map(|(idx, rule)| rule.start.find(&text[pos..]).filter(|m| m.start() == 0).map(|m| (idx, pos + m.end())))
    }

    /// Returns the rule and the absolute byte offset where its match ends,
    /// if a rule matches exactly at `pos`.
    fn find_rule_match(&self, text: &str, pos: usize) -> Option<(&Rule, usize)> {
        self.language
            .rules()
            .iter()
            .find_map(|rule| rule.pattern.find(&text[pos..]).filter(|m| m.start() == 0).map(|m| (rule, pos + m.end())))
    }
}

fn coalesce(runs: Vec<StyleRun>) -> Vec<StyleRun> {
    let mut out: Vec<StyleRun> = Vec::with_capacity(runs.len());
    for run in runs {
        if let Some(last) = out.last_mut()
            && last.style_key == run.style_key
            && last.end == run.start
        {
            last.end = run.end;
            continue;
        }
        out.push(run);
    }
    out
}

/// Splits `base` runs by `overrides`' boundaries, letting a semantic
/// override win over the lexical style for its range: `semantic > regex >
/// default`.
pub fn merge_semantic(base: &[StyleRun], overrides: &[SemanticOverride]) -> Vec<StyleRun> {
    if overrides.is_empty() {
        return base.to_vec();
    }
    let mut points = std::collections::BTreeSet::new();
    for r in base {
        points.insert(r.start);
        points.insert(r.end);
    }
    for o in overrides {
        points.insert(o.start_col);
        points.insert(o.start_col + o.length);
    }
    let pts: Vec<usize> = points.into_iter().collect();
    let mut result = Vec::new();
    for w in pts.windows(2) {
        let (s, e) = (w[0], w[1]);
        if s >= e {
            continue;
        }
        let style = overrides
            .iter()
            .find(|o| o.start_col <= s && s < o.start_col + o.length)
            .map(|o| o.style_key.clone())
            .or_else(|| base.iter().find(|r| r.start <= s && s < r.end).map(|r| r.style_key.clone()))
            .unwrap_or_else(|| "default".to_string());
        result.push(StyleRun { start: s, end: e, style_key: style });
    }
    coalesce(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct TestLang {
        rules: Vec<Rule>,
        multiline: Vec<MultilineRule>,
    }

    impl TestLang {
        fn new() -> Self {
            TestLang {
                rules: vec![
                    Rule { style_key: "keyword".into(), pattern: Regex::new(r"\b(fn|let)\b").unwrap() },
                    Rule { style_key: "number".into(), pattern: Regex::new(r"\d+").unwrap() },
                ],
                multiline: vec![MultilineRule {
                    style_key: "comment".into(),
                    start: Regex::new(r"/\*").unwrap(),
                    end: Regex::new(r"\*/").unwrap(),
                }],
            }
        }
    }

    impl LanguageMode for TestLang {
        fn rules(&self) -> &[Rule] {
            &self.rules
        }
        fn multiline_rules(&self) -> &[MultilineRule] {
            &self.multiline
        }
    }

    #[test]
    fn tokenizes_keyword_and_default_chars() {
        let h = Highlighter::new(TestLang::new());
        let rope = Rope::new("let x = 1\n");
        let runs = h.highlight_line(&rope, 0).unwrap();
        assert_eq!(runs[0].style_key, "keyword");
        assert_eq!(runs[0].end, 3);
        assert!(runs.iter().any(|r| r.style_key == "number"));
    }

    #[test]
    fn multiline_comment_spans_lines_and_closes() {
        let mut h = Highlighter::new(TestLang::new());
        let rope = Rope::new("/* start\nstill in comment\nend */ let x\n");
        h.retokenize_all(&rope).unwrap();
        let line0 = h.highlight_line(&rope, 0).unwrap();
        assert_eq!(line0[0].style_key, "comment");
        let line1 = h.highlight_line(&rope, 1).unwrap();
        assert!(line1.iter().all(|r| r.style_key == "comment"));
        let line2 = h.highlight_line(&rope, 2).unwrap();
        assert_eq!(line2[0].style_key, "comment");
        assert!(line2.iter().any(|r| r.style_key == "keyword"));
    }

    #[test]
    fn edit_inside_comment_recomputes_only_until_state_stabilizes() {
        let mut h = Highlighter::new(TestLang::new());
        let rope = Rope::new("/* a\nb\nc */\nlet x\n");
        h.retokenize_all(&rope).unwrap();
        let invalidated = h.apply_document_edit(&rope, 1, 1, 1).unwrap();
        // line 1 is still inside the comment either way, so the cascade
        // should stop at line 1 without touching line 3.
        assert!(!invalidated.contains(&3));
    }

    #[test]
    fn incremental_matches_cold_retokenize() {
        let mut incremental = Highlighter::new(TestLang::new());
        let mut cold = Highlighter::new(TestLang::new());
        let mut rope = Rope::new("fn main() {\nlet x = 1\n}\n");
        incremental.retokenize_all(&rope).unwrap();
        rope.insert(rope.length(), "let y = 2\n").unwrap();
        incremental.apply_document_edit(&rope, 3, 1, 2).unwrap();
        cold.retokenize_all(&rope).unwrap();
        for line in 0..rope.line_count() {
            assert_eq!(
                incremental.highlight_line(&rope, line).unwrap(),
                cold.highlight_line(&rope, line).unwrap()
            );
        }
    }

    #[test]
    fn semantic_override_wins_over_lexical() {
        let base = vec![StyleRun { start: 0, end: 3, style_key: "keyword".into() }];
        let overrides = vec![SemanticOverride { start_col: 1, length: 1, style_key: "semantic-type".into() }];
        let merged = merge_semantic(&base, &overrides);
        assert!(merged.iter().any(|r| r.style_key == "semantic-type" && r.start == 1 && r.end == 2));
        assert!(merged.iter().any(|r| r.style_key == "keyword" && r.start == 0 && r.end == 1));
    }
}
