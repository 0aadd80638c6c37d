//! Full-text search result assembly.
//!
//! The FTS engine reports each hit as a flat sequence of 4-integer quadruples
//! `(column, term, byte_offset, byte_len)`. This module turns a raw user
//! string into a safe MATCH expression and those quadruples into ordered
//! highlight ranges: phrase queries merge adjacent term hits into one
//! contiguous span, keyword queries keep every hit independent.

use crate::domain::MatchRange;

/// How the MATCH expression should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// The user wrapped the query in quotes: one exact phrase
    Phrase,
    /// Engine-default term matching
    Keyword,
}

/// A sanitized MATCH expression and its interpretation mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtsQuery {
    pub expression: String,
    pub mode: QueryMode,
}

/// Build a MATCH expression from a raw user string.
///
/// Literal quote characters are stripped; they otherwise break MATCH syntax
/// or crash the query engine. A string originally wrapped in a quote pair is
/// re-wrapped and run as an exact phrase.
pub fn build_query(raw: &str) -> FtsQuery {
    let is_phrase = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
    let stripped: String = raw.chars().filter(|&c| c != '"').collect();

    if is_phrase {
        FtsQuery {
            expression: format!("\"{}\"", stripped),
            mode: QueryMode::Phrase,
        }
    } else {
        FtsQuery {
            expression: stripped,
            mode: QueryMode::Keyword,
        }
    }
}

/// Parse an `offsets()` string into highlight ranges, in ascending
/// byte-offset order (the order the engine emits them in).
///
/// Malformed input (non-integer tokens or a trailing partial quadruple)
/// yields no ranges rather than an error.
pub fn match_ranges(offsets: &str, mode: QueryMode) -> Vec<MatchRange> {
    let mut values = Vec::new();
    for token in offsets.split_whitespace() {
        match token.parse::<usize>() {
            Ok(value) => values.push(value),
            Err(_) => return Vec::new(),
        }
    }
    if values.len() % 4 != 0 {
        return Vec::new();
    }

    let mut ranges: Vec<MatchRange> = Vec::new();
    for quad in values.chunks_exact(4) {
        let term_index = quad[1];
        let range = MatchRange::new(quad[2], quad[3]);

        if mode == QueryMode::Phrase && term_index != 0 {
            if let Some(last) = ranges.pop() {
                // Extend the open phrase span through the end of this term.
                // A continuation behind the open range's start saturates to
                // an empty span instead of panicking.
                let merged = MatchRange::new(
                    last.byte_offset,
                    range.end().saturating_sub(last.byte_offset),
                );
                ranges.push(merged);
                continue;
            }
        }
        ranges.push(range);
    }
    ranges
}
