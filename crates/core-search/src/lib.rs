//! Literal and regex search with a current-match cursor (component C5, §4.5).

use core_text::{CoreError, CoreResult, Rope};
use regex::Regex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub regex: bool,
    pub case_sensitive: bool,
    pub whole_word: bool,
}

/// Word character per §4.5: ASCII word chars plus the Arabic, Syriac/Thaana
/// and Hebrew blocks, matching the editor's word-motion class.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        || matches!(c as u32, 0x0600..=0x06FF | 0x08A0..=0x08FF | 0x0590..=0x05FF)
}

#[derive(Debug, Default)]
pub struct SearchState {
    pattern: String,
    options: SearchOptions,
    matches: Vec<Match>,
    current: Option<usize>,
    dirty: bool,
}

impl SearchState {
    pub fn new() -> Self {
        SearchState::default()
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn current_match(&self) -> Option<Match> {
        self.current.map(|i| self.matches[i])
    }

    /// Compile/scan `pattern` against `rope` and reset the current-match
    /// pointer to the first match at or after offset 0.
    pub fn find(&mut self, rope: &Rope, pattern: &str, options: SearchOptions) -> CoreResult<()> {
        self.pattern = pattern.to_string();
        self.options = options;
        self.rescan(rope)?;
        self.current = if self.matches.is_empty() { None } else { Some(0) };
        trace!(target: "search", pattern, count = self.matches.len(), "find");
        Ok(())
    }

    /// Mark the match list stale; call after any edit whose range intersects
    /// an existing match. The next `find`/`next`/`previous`/`current_match`
    /// access re-runs the scan lazily.
    pub fn invalidate_if_intersects(&mut self, edit_start: usize, edit_end: usize) {
        let intersects = self
            .matches
            .iter()
            .any(|m| m.start < edit_end && m.end > edit_start);
        if intersects {
            trace!(target: "search", edit_start, edit_end, "invalidate");
            self.dirty = true;
        }
    }

    fn ensure_fresh(&mut self, rope: &Rope) -> CoreResult<()> {
        if self.dirty {
            self.rescan(rope)?;
        }
        Ok(())
    }

    fn rescan(&mut self, rope: &Rope) -> CoreResult<()> {
        let text = rope.substring(0, rope.length())?;
        self.matches = if self.options.regex {
            scan_regex(&text, &self.pattern, &self.options)?
        } else {
            scan_literal(&text, &self.pattern, &self.options)
        };
        self.dirty = false;
        if let Some(cur) = self.current
            && cur >= self.matches.len()
        {
            self.current = if self.matches.is_empty() { None } else { Some(0) };
        }
        Ok(())
    }

    pub fn next(&mut self, rope: &Rope) -> CoreResult<Option<Match>> {
        self.ensure_fresh(rope)?;
        if self.matches.is_empty() {
            self.current = None;
            return Ok(None);
        }
        let next = match self.current {
            Some(i) => (i + 1) % self.matches.len(),
            None => 0,
        };
        self.current = Some(next);
        Ok(Some(self.matches[next]))
    }

    pub fn previous(&mut self, rope: &Rope) -> CoreResult<Option<Match>> {
        self.ensure_fresh(rope)?;
        if self.matches.is_empty() {
            self.current = None;
            return Ok(None);
        }
        let prev = match self.current {
            Some(0) | None => self.matches.len() - 1,
            Some(i) => i - 1,
        };
        self.current = Some(prev);
        Ok(Some(self.matches[prev]))
    }

    /// Replace the current match, returning its range so the caller can
    /// route it through `core-document`'s `replace_range`. The match list
    /// is left dirty; a subsequent access re-scans.
    pub fn replace_current(&mut self) -> CoreResult<Match> {
        let m = self.current_match().ok_or(CoreError::InvalidRange)?;
        self.dirty = true;
        Ok(m)
    }

    /// All current matches, in ascending order, for the caller to apply as
    /// a single undo transaction (descending-offset order to keep earlier
    /// offsets valid).
    pub fn replace_all(&mut self) -> Vec<Match> {
        let mut all = self.matches.clone();
        all.sort_by(|a, b| b.start.cmp(&a.start));
        self.dirty = true;
        all
    }
}

fn scan_literal(text: &str, pattern: &str, opts: &SearchOptions) -> Vec<Match> {
    if pattern.is_empty() {
        return Vec::new();
    }
    let haystack: Vec<u16> = text.encode_utf16().collect();
    let needle: Vec<u16> = pattern.encode_utf16().collect();
    let fold = |u: u16| -> u16 {
        if opts.case_sensitive {
            u
        } else {
            (char::from_u32(u as u32).unwrap_or('\0'))
                .to_ascii_lowercase() as u16
        }
    };
    let needle_folded: Vec<u16> = needle.iter().map(|&u| fold(u)).collect();
    let chars: Vec<char> = text.chars().collect();
    let mut char_offsets = Vec::with_capacity(chars.len() + 1);
    let mut off = 0usize;
    for c in &chars {
        char_offsets.push(off);
        off += c.len_utf16();
    }
    char_offsets.push(off);

    let mut out = Vec::new();
    if haystack.len() < needle_folded.len() {
        return out;
    }
    for start in 0..=(haystack.len() - needle_folded.len()) {
        let window = &haystack[start..start + needle_folded.len()];
        let matches = window
            .iter()
            .zip(needle_folded.iter())
            .all(|(&h, &n)| fold(h) == n);
        if !matches {
            continue;
        }
        let end = start + needle_folded.len();
        if opts.whole_word && !is_word_boundary(&chars, &char_offsets, start, end) {
            continue;
        }
        out.push(Match { start, end });
    }
    out
}

fn is_word_boundary(chars: &[char], offsets: &[usize], start: usize, end: usize) -> bool {
    let start_idx = offsets.iter().position(|&o| o == start);
    let end_idx = offsets.iter().position(|&o| o == end);
    let (Some(si), Some(ei)) = (start_idx, end_idx) else {
        return true;
    };
    let before_ok = si == 0 || !is_word_char(chars[si - 1]);
    let after_ok = ei >= chars.len() || !is_word_char(chars[ei]);
    before_ok && after_ok
}

fn scan_regex(text: &str, pattern: &str, opts: &SearchOptions) -> CoreResult<Vec<Match>> {
    let built = if opts.case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    let re = Regex::new(&built).map_err(|e| CoreError::ParseError(e.to_string()))?;
    let utf16_offset = |byte_idx: usize| -> usize { text[..byte_idx].encode_utf16().count() };
    let chars: Vec<char> = text.chars().collect();
    let mut byte_to_char16 = Vec::new();
    {
        let mut off = 0usize;
        for (byte_idx, c) in text.char_indices() {
            byte_to_char16.push((byte_idx, off));
            off += c.len_utf16();
        }
        byte_to_char16.push((text.len(), off));
    }
    let mut out = Vec::new();
    for m in re.find_iter(text) {
        let start = utf16_offset(m.start());
        let end = utf16_offset(m.end());
        if opts.whole_word {
            let offsets: Vec<usize> = byte_to_char16.iter().map(|&(_, u)| u).collect();
            if !is_word_boundary(&chars, &offsets, start, end) {
                continue;
            }
        }
        out.push(Match { start, end });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_find_case_insensitive() {
        let rope = Rope::new("Hello hello HELLO");
        let mut s = SearchState::new();
        s.find(&rope, "hello", SearchOptions::default()).unwrap();
        assert_eq!(s.matches().len(), 3);
    }

    #[test]
    fn literal_find_case_sensitive() {
        let rope = Rope::new("Hello hello HELLO");
        let mut s = SearchState::new();
        s.find(
            &rope,
            "hello",
            SearchOptions { case_sensitive: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(s.matches().len(), 1);
        assert_eq!(s.matches()[0], Match { start: 6, end: 11 });
    }

    #[test]
    fn whole_word_excludes_substring_matches() {
        let rope = Rope::new("cat catalog concatenate cat");
        let mut s = SearchState::new();
        s.find(
            &rope,
            "cat",
            SearchOptions { whole_word: true, case_sensitive: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(s.matches().len(), 2);
    }

    #[test]
    fn regex_find_matches() {
        let rope = Rope::new("foo1 foo22 bar3");
        let mut s = SearchState::new();
        s.find(
            &rope,
            r"foo\d+",
            SearchOptions { regex: true, case_sensitive: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(s.matches().len(), 2);
    }

    #[test]
    fn next_cycles_and_wraps() {
        let rope = Rope::new("a a a");
        let mut s = SearchState::new();
        s.find(&rope, "a", SearchOptions { case_sensitive: true, ..Default::default() })
            .unwrap();
        assert_eq!(s.next(&rope).unwrap().unwrap().start, 2);
        assert_eq!(s.next(&rope).unwrap().unwrap().start, 4);
        assert_eq!(s.next(&rope).unwrap().unwrap().start, 0);
    }

    #[test]
    fn previous_wraps_backward() {
        let rope = Rope::new("a a a");
        let mut s = SearchState::new();
        s.find(&rope, "a", SearchOptions { case_sensitive: true, ..Default::default() })
            .unwrap();
        assert_eq!(s.previous(&rope).unwrap().unwrap().start, 4);
    }

    #[test]
    fn invalidate_on_intersecting_edit_forces_rescan() {
        let mut rope = Rope::new("foo bar foo");
        let mut s = SearchState::new();
        s.find(&rope, "foo", SearchOptions { case_sensitive: true, ..Default::default() })
            .unwrap();
        assert_eq!(s.matches().len(), 2);
        rope.delete(0, 3).unwrap();
        s.invalidate_if_intersects(0, 3);
        s.next(&rope).unwrap();
        assert_eq!(s.matches().len(), 1);
    }

    #[test]
    fn non_intersecting_edit_does_not_invalidate() {
        let mut rope = Rope::new("foo bar foo");
        let mut s = SearchState::new();
        s.find(&rope, "foo", SearchOptions { case_sensitive: true, ..Default::default() })
            .unwrap();
        rope.insert(rope.length(), "!").unwrap();
        s.invalidate_if_intersects(11, 12);
        assert!(!s.dirty);
    }

    #[test]
    fn replace_all_returns_descending_offsets() {
        let rope = Rope::new("a a a");
        let mut s = SearchState::new();
        s.find(&rope, "a", SearchOptions { case_sensitive: true, ..Default::default() })
            .unwrap();
        let all = s.replace_all();
        assert_eq!(all[0].start, 4);
        assert_eq!(all[2].start, 0);
    }
}
