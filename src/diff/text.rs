//! Single-hunk prefix/suffix text diff
//!
//! Finds the longest common prefix and suffix of two versions of a chunk and
//! reports the remaining core as one change. This is exact for contiguous
//! typing and pasting; multi-cursor or document-wide find/replace edits are
//! reported as one hunk spanning the first through the last change.

use serde::{Deserialize, Serialize};

/// What happened to the changed core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Delete,
    Modify,
}

/// One changed byte range.
///
/// `insert` and `modify` ranges are in new-text coordinates, `delete` ranges
/// in old-text coordinates. Offsets always sit on character boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChange {
    pub kind: ChangeKind,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_text: Option<String>,
}

impl TextChange {
    pub fn insert(start: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: ChangeKind::Insert,
            start,
            end: start + text.len(),
            old_text: None,
            new_text: Some(text),
        }
    }

    pub fn delete(start: usize, removed: impl Into<String>) -> Self {
        let removed = removed.into();
        Self {
            kind: ChangeKind::Delete,
            start,
            end: start + removed.len(),
            old_text: Some(removed),
            new_text: None,
        }
    }

    pub fn modify(start: usize, removed: impl Into<String>, inserted: impl Into<String>) -> Self {
        let inserted = inserted.into();
        Self {
            kind: ChangeKind::Modify,
            start,
            end: start + inserted.len(),
            old_text: Some(removed.into()),
            new_text: Some(inserted),
        }
    }

    /// Bytes removed from the old text
    pub fn removed_len(&self) -> usize {
        self.old_text.as_ref().map_or(0, String::len)
    }

    /// Bytes added to the new text
    pub fn inserted_len(&self) -> usize {
        self.new_text.as_ref().map_or(0, String::len)
    }

    /// Characters touched by this change, counted on the larger side
    pub fn volume(&self) -> usize {
        self.removed_len().max(self.inserted_len())
    }
}

/// Result of diffing two texts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub changes: Vec<TextChange>,
    pub has_changes: bool,
}

impl DiffResult {
    fn unchanged() -> Self {
        Self::default()
    }

    fn single(change: TextChange) -> Self {
        Self {
            changes: vec![change],
            has_changes: true,
        }
    }

    /// Sum of `volume()` over every change
    pub fn total_volume(&self) -> usize {
        self.changes.iter().map(TextChange::volume).sum()
    }
}

/// Diff two versions of the same chunk.
pub fn diff(old: &str, new: &str) -> DiffResult {
    if old == new {
        return DiffResult::unchanged();
    }
    if old.is_empty() {
        return DiffResult::single(TextChange::insert(0, new));
    }
    if new.is_empty() {
        return DiffResult::single(TextChange::delete(0, old));
    }

    let prefix = common_prefix_len(old, new);
    // Measured on the remainders, so the suffix can never overlap the prefix.
    let suffix = common_suffix_len(&old[prefix..], &new[prefix..]);

    let old_core = &old[prefix..old.len() - suffix];
    let new_core = &new[prefix..new.len() - suffix];

    let change = match (old_core.is_empty(), new_core.is_empty()) {
        (true, _) => TextChange::insert(prefix, new_core),
        (_, true) => TextChange::delete(prefix, old_core),
        _ => TextChange::modify(prefix, old_core, new_core),
    };
    DiffResult::single(change)
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((i, _), _)| i)
        .unwrap_or_else(|| a.len().min(b.len()))
}

fn common_suffix_len(a: &str, b: &str) -> usize {
    a.chars()
        .rev()
        .zip(b.chars().rev())
        .take_while(|(ca, cb)| ca == cb)
        .map(|(c, _)| c.len_utf8())
        .sum()
}
