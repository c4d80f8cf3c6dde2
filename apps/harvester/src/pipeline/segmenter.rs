//! Boundary segmenter. Cuts a normalized page at posting anchors.
//!
//! Each posting on the thread is preceded by its upvote anchor (`id="up_<N>"`).
//! A unit runs from one anchor to the next; text ahead of the first anchor is
//! folded into the first unit so the cut is lossless. Pages without anchors
//! fall back to fixed-size slicing.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::pipeline::balancer::split_oversized;
use crate::pipeline::models::Unit;

static POSTING_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a\b[^>]*?\bid=["']?up_\d+"#)
        .unwrap_or_else(|e| panic!("posting marker pattern: {e}"))
});

/// How a page was cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Cut at `markers` posting anchors.
    Postings { markers: usize },
    /// No anchors found; sliced every `chunk_size` bytes.
    FixedSize,
}

#[derive(Debug, Clone)]
pub struct Segmentation {
    pub kind: SegmentKind,
    pub units: Vec<Unit>,
}

/// Splits `text` into index-tagged units.
///
/// Postings larger than `max_unit_size` are handed straight to the sentence
/// splitter, and fallback chunks never exceed it either, so every emitted unit
/// respects the bound.
pub fn segment(text: &str, max_unit_size: usize, chunk_size: usize) -> Segmentation {
    let starts: Vec<usize> = POSTING_MARKER.find_iter(text).map(|m| m.start()).collect();

    if starts.is_empty() {
        let chunk_size = chunk_size.min(max_unit_size);
        info!("No posting anchors found, slicing into {chunk_size}-byte chunks");
        let units = slice_fixed(text, chunk_size)
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Unit::new(index, piece))
            .collect();
        return Segmentation {
            kind: SegmentKind::FixedSize,
            units,
        };
    }

    info!("Found {} job postings to segment", starts.len());

    let mut pieces = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let begin = if i == 0 { 0 } else { start };
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let posting = &text[begin..end];

        if posting.len() > max_unit_size {
            let parts = split_oversized(posting, max_unit_size);
            debug!(
                "Posting {} is {} bytes, split into {} parts",
                i,
                posting.len(),
                parts.len()
            );
            pieces.extend(parts);
        } else {
            pieces.push(posting.to_string());
        }
    }

    Segmentation {
        kind: SegmentKind::Postings {
            markers: starts.len(),
        },
        units: pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| Unit::new(index, piece))
            .collect(),
    }
}

/// Cuts `text` into consecutive slices of at most `size` bytes, never
/// splitting a UTF-8 character.
pub fn slice_fixed(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let mut slices = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let mut cut = size.min(rest.len());
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // A single character wider than `size`; emit it whole.
            cut = rest
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(cut);
        slices.push(head.to_string());
        rest = tail;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(id: u32, body: &str) -> String {
        format!(r#"<a href="vote?id={id}" id="up_{id}"></a> {body} "#)
    }

    #[test]
    fn test_segment_cuts_at_each_anchor() {
        let text = format!(
            "{}{}{}",
            posting(1, "Acme | Rust"),
            posting(2, "Globex | Go"),
            posting(3, "Initech | Java")
        );
        let seg = segment(&text, 30_000, 30_000);
        assert_eq!(seg.kind, SegmentKind::Postings { markers: 3 });
        assert_eq!(seg.units.len(), 3);
        assert!(seg.units[1].text.starts_with(r#"<a href="vote?id=2""#));
        assert!(seg.units[2].text.contains("Initech"));
    }

    #[test]
    fn test_segment_is_lossless_with_preamble() {
        let text = format!(
            "Ask HN: Who is hiring? {}{}",
            posting(10, "Acme | Rust | Remote"),
            posting(11, "Globex | TypeScript")
        );
        let seg = segment(&text, 30_000, 30_000);
        let rebuilt: String = seg.units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        assert!(seg.units[0].text.starts_with("Ask HN"));
    }

    #[test]
    fn test_segment_indices_are_sequential() {
        let text = format!("{}{}", posting(1, "a"), posting(2, "b"));
        let seg = segment(&text, 30_000, 30_000);
        let indices: Vec<usize> = seg.units.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_segment_accepts_single_quoted_anchor() {
        let text = "<a id='up_5' href='x'></a> Acme";
        let seg = segment(text, 100, 100);
        assert_eq!(seg.kind, SegmentKind::Postings { markers: 1 });
    }

    #[test]
    fn test_segment_splits_oversized_posting() {
        let body = "We build compilers. ".repeat(20);
        let text = posting(1, &body);
        let seg = segment(&text, 100, 100);
        assert!(seg.units.len() > 1);
        assert!(seg.units.iter().all(|u| u.approx_size() <= 100));
    }

    #[test]
    fn test_segment_falls_back_to_fixed_chunks() {
        let text = "x".repeat(3 * 50);
        let seg = segment(&text, 50, 50);
        assert_eq!(seg.kind, SegmentKind::FixedSize);
        assert_eq!(seg.units.len(), 3);
        assert!(seg.units.iter().all(|u| u.text.len() == 50));
    }

    #[test]
    fn test_fixed_chunks_never_exceed_max_unit_size() {
        let text = "x".repeat(400);
        let seg = segment(&text, 50, 200);
        assert_eq!(seg.kind, SegmentKind::FixedSize);
        assert_eq!(seg.units.len(), 8);
        assert!(seg.units.iter().all(|u| u.approx_size() <= 50));
    }

    #[test]
    fn test_segment_empty_text() {
        let seg = segment("", 50, 50);
        assert!(seg.units.is_empty());
    }

    #[test]
    fn test_slice_fixed_respects_char_boundaries() {
        let slices = slice_fixed("ééé", 3);
        assert_eq!(slices, vec!["é", "é", "é"]);
        assert_eq!(slice_fixed("abcde", 2), vec!["ab", "cd", "e"]);
    }

    #[test]
    fn test_slice_fixed_wide_char_larger_than_size() {
        assert_eq!(slice_fixed("é", 1), vec!["é"]);
    }
}
