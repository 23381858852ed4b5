//! Plot-promise hint detectors
//!
//! Keyword scanners for "setup" language (a promise made to the reader) and
//! "resolution" language (a promise paid off). These are heuristics that
//! flag text worth a closer look; they prove nothing.

use super::text::{ChangeKind, TextChange};
use crate::analysis::PlotPromise;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A resolution only pays off promises made at most this many bytes earlier
pub const PROMISE_LOOKAHEAD: usize = 10_000;

static SETUP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(promised|swore|vowed|someday|one day|secret|mystery|mysterious|prophecy|little did|had no idea|would never forget|never told|locked (?:box|door|drawer|room))\b",
    )
    .expect("setup pattern is valid")
});

static RESOLUTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(finally|at last|revealed|the truth was|kept (?:his|her|their|my) (?:promise|word)|fulfilled|solved|now understood|the secret was|came true)\b",
    )
    .expect("resolution pattern is valid")
});

/// A promise-related span noticed inside changed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromiseHint {
    /// Offset of the matched language in the chunk's new text
    pub offset: usize,
    pub excerpt: String,
    /// For resolution hints, the offset of the promise it appears to resolve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promise_offset: Option<usize>,
}

/// Setup matches in `text` as `(offset, excerpt)`
pub fn find_setups(text: &str) -> Vec<(usize, String)> {
    SETUP_PATTERN
        .find_iter(text)
        .map(|m| (m.start(), excerpt(text, m.start(), m.end())))
        .collect()
}

/// Offsets of resolution language in `text`
pub fn find_resolutions(text: &str) -> Vec<usize> {
    RESOLUTION_PATTERN.find_iter(text).map(|m| m.start()).collect()
}

/// Setup language in inserted or modified text
pub fn new_promise_hints(changes: &[TextChange]) -> Vec<PromiseHint> {
    changes
        .iter()
        .filter(|c| c.kind != ChangeKind::Delete)
        .filter_map(|c| c.new_text.as_deref().map(|text| (c.start, text)))
        .flat_map(|(base, text)| {
            find_setups(text)
                .into_iter()
                .map(move |(offset, excerpt)| PromiseHint {
                    offset: base + offset,
                    excerpt,
                    promise_offset: None,
                })
        })
        .collect()
}

/// Resolution language in inserted or modified text, paired with the
/// closest earlier promise inside the lookahead window
pub fn resolved_promise_hints(changes: &[TextChange], known: &[PlotPromise]) -> Vec<PromiseHint> {
    let mut hints = Vec::new();
    for change in changes.iter().filter(|c| c.kind != ChangeKind::Delete) {
        let Some(text) = change.new_text.as_deref() else {
            continue;
        };
        for local in find_resolutions(text) {
            let offset = change.start + local;
            let target = known
                .iter()
                .filter(|p| !p.resolved)
                .filter(|p| p.offset < offset && offset - p.offset <= PROMISE_LOOKAHEAD)
                .max_by_key(|p| p.offset);
            if let Some(promise) = target {
                hints.push(PromiseHint {
                    offset,
                    excerpt: excerpt(text, local, local),
                    promise_offset: Some(promise.offset),
                });
            }
        }
    }
    hints
}

/// Up to 40 bytes of context either side of `[start, end)`
pub(crate) fn excerpt(text: &str, start: usize, end: usize) -> String {
    let from = crate::analysis::floor_boundary(text, start.saturating_sub(40));
    let to = crate::analysis::floor_boundary(text, (end + 40).min(text.len()));
    text[from..to].trim().to_string()
}
