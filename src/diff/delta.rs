//! Delta: everything downstream consumers need to know about one commit

use super::hints::{new_promise_hints, resolved_promise_hints, PromiseHint};
use super::invalidation::{affected_entities, invalidated_sections};
use super::text::{DiffResult, TextChange};
use crate::analysis::{EntityGraph, PlotPromise};
use crate::hash::{content_hash, ContentHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The change summary recorded for a chapter when an edit is committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub changed_ranges: Vec<TextChange>,
    pub invalidated_section_ids: Vec<usize>,
    pub affected_entity_ids: Vec<String>,
    pub new_promise_hints: Vec<PromiseHint>,
    pub resolved_promise_hints: Vec<PromiseHint>,
    pub content_hash: ContentHash,
    pub processed_at: DateTime<Utc>,
}

impl Delta {
    /// Assemble the delta for `diff`, which turned some old text into `new_text`.
    ///
    /// `graph` and `known_promises` describe the previous analysis; pass
    /// `None` / an empty slice when the chapter has never been analyzed.
    pub fn build(
        diff: &DiffResult,
        new_text: &str,
        graph: Option<&EntityGraph>,
        known_promises: &[PlotPromise],
    ) -> Self {
        Self {
            changed_ranges: diff.changes.clone(),
            invalidated_section_ids: invalidated_sections(&diff.changes, new_text.len()),
            affected_entity_ids: graph
                .map(|g| affected_entities(&diff.changes, g))
                .unwrap_or_default(),
            new_promise_hints: new_promise_hints(&diff.changes),
            resolved_promise_hints: resolved_promise_hints(&diff.changes, known_promises),
            content_hash: content_hash(new_text),
            processed_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_ranges.is_empty()
    }
}
