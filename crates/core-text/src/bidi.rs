//! Bidirectional-text classification (§4.1).
//!
//! Classification follows Unicode strong-direction block ranges: Arabic,
//! Hebrew, Syriac, Thaana and NKo are RTL; Latin, Greek and Cyrillic are
//! LTR; everything else is neutral. Segments are maximal runs of one
//! strong direction; neutral characters extend whichever run is open.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ltr,
    Rtl,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strength {
    Ltr,
    Rtl,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BidiSegment {
    pub start: usize,
    pub end: usize,
    pub dir: Direction,
}

/// Classify a single character's strong direction per §4.1's ranges.
pub(crate) fn classify(c: char) -> Strength {
    let u = c as u32;
    let rtl = matches!(u,
        0x0590..=0x05FF // Hebrew
        | 0x0600..=0x06FF // Arabic
        | 0x0700..=0x074F // Syriac
        | 0x0750..=0x077F // Arabic Supplement
        | 0x0780..=0x07BF // Thaana
        | 0x07C0..=0x07FF // NKo
        | 0x08A0..=0x08FF // Arabic Extended-A
    );
    if rtl {
        return Strength::Rtl;
    }
    let ltr = matches!(u,
        0x0041..=0x005A | 0x0061..=0x007A // Basic Latin
        | 0x00C0..=0x024F // Latin-1 Supplement / Extended
        | 0x0370..=0x03FF // Greek
        | 0x0400..=0x04FF // Cyrillic
    );
    if ltr {
        Strength::Ltr
    } else {
        Strength::Neutral
    }
}

/// Compute maximal bidi segments for `text`, whose first code-unit sits at
/// `base_offset` (in UTF-16 code units) within the owning rope.
pub(crate) fn segments_for(text: &str, base_offset: usize) -> Vec<BidiSegment> {
    let mut segments = Vec::new();
    let mut current: Option<(Direction, usize, usize)> = None; // (dir, start, end) in code units
    let mut offset = base_offset;
    for c in text.chars() {
        let units = c.len_utf16();
        let strength = classify(c);
        match strength {
            Strength::Neutral => {
                if let Some((_, _, end)) = current.as_mut() {
                    *end = offset + units;
                }
            }
            Strength::Ltr | Strength::Rtl => {
                let dir = if strength == Strength::Ltr {
                    Direction::Ltr
                } else {
                    Direction::Rtl
                };
                match current {
                    Some((cur_dir, start, _)) if cur_dir == dir => {
                        current = Some((cur_dir, start, offset + units));
                    }
                    _ => {
                        if let Some((d, s, e)) = current.take() {
                            segments.push(BidiSegment { start: s, end: e, dir: d });
                        }
                        current = Some((dir, offset, offset + units));
                    }
                }
            }
        }
        offset += units;
    }
    if let Some((d, s, e)) = current {
        segments.push(BidiSegment { start: s, end: e, dir: d });
    }
    segments
}

/// Reduce a slice of segments to a single top-level direction.
pub(crate) fn overall_direction(segments: &[BidiSegment]) -> Direction {
    let mut saw_ltr = false;
    let mut saw_rtl = false;
    for seg in segments {
        match seg.dir {
            Direction::Ltr => saw_ltr = true,
            Direction::Rtl => saw_rtl = true,
            Direction::Mixed => {
                saw_ltr = true;
                saw_rtl = true;
            }
        }
    }
    match (saw_ltr, saw_rtl) {
        (true, true) => Direction::Mixed,
        (false, true) => Direction::Rtl,
        _ => Direction::Ltr,
    }
}
