//! Size balancer. Keeps every unit at or under the payload bound.
//!
//! `split_oversized` breaks one large posting at sentence ends; `merge` packs
//! adjacent small units together with a single greedy left-to-right scan.

use tracing::debug;

use crate::pipeline::models::Unit;
use crate::pipeline::segmenter::slice_fixed;

/// Preferred split point inside an oversized posting.
const SENTENCE_BREAK: &str = ". ";

/// Joins postings packed into one unit.
pub const UNIT_SEPARATOR: &str = "\n\n";

/// Breaks `text` at sentence boundaries into parts of at most `max_size` bytes.
///
/// Sentences keep their `". "` break so parts concatenate back to the input.
/// The trailing sentence gets a closing `"."` when it lacks one. A single
/// sentence longer than `max_size` is sliced at byte boundaries.
pub fn split_oversized(text: &str, max_size: usize) -> Vec<String> {
    let sentences: Vec<&str> = text.split(SENTENCE_BREAK).collect();
    let last = sentences.len().saturating_sub(1);

    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, raw) in sentences.iter().enumerate() {
        let sentence = if i < last {
            format!("{raw}{SENTENCE_BREAK}")
        } else if raw.trim().is_empty() || raw.ends_with('.') {
            raw.to_string()
        } else {
            format!("{raw}.")
        };
        if sentence.is_empty() {
            continue;
        }

        if !current.is_empty() && current.len() + sentence.len() > max_size {
            parts.push(std::mem::take(&mut current));
        }

        if sentence.len() > max_size {
            parts.extend(slice_fixed(&sentence, max_size));
        } else {
            current.push_str(&sentence);
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

/// Packs adjacent units into as few units as a single greedy scan allows.
///
/// Output is re-indexed from zero. Running `merge` on its own output returns
/// the same sequence.
pub fn merge(units: Vec<Unit>, max_size: usize) -> Vec<Unit> {
    let before = units.len();
    let mut merged: Vec<String> = Vec::new();
    let mut current = String::new();

    for unit in units {
        let joined = if current.is_empty() {
            unit.approx_size()
        } else {
            current.len() + UNIT_SEPARATOR.len() + unit.approx_size()
        };

        if joined <= max_size {
            if !current.is_empty() {
                current.push_str(UNIT_SEPARATOR);
            }
            current.push_str(&unit.text);
        } else {
            if !current.is_empty() {
                merged.push(std::mem::take(&mut current));
            }
            current = unit.text;
        }
    }

    if !current.is_empty() {
        merged.push(current);
    }

    debug!(
        "Combined {} postings into {} units (max {} bytes)",
        before,
        merged.len(),
        max_size
    );

    merged
        .into_iter()
        .enumerate()
        .map(|(index, text)| Unit::new(index, text))
        .collect()
}
