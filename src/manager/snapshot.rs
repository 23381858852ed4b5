//! Persistable engine state

use super::error::EngineResult;
use crate::chunk::{TreeSnapshot, TreeStats};
use crate::policy::StructuralFingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An edit that had not been committed when the snapshot was taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEditSnapshot {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Everything needed to rebuild an `IncrementalManager`.
///
/// Serializes as `{ chunks, aggregates, dirtyQueue, lastFullRebuild,
/// editsApplied, chapterTexts, fingerprints, pendingEdits }`. Timers are
/// not persisted; pending edits are re-armed on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    #[serde(flatten)]
    pub tree: TreeSnapshot,
    pub chapter_texts: BTreeMap<String, String>,
    #[serde(default)]
    pub fingerprints: BTreeMap<String, StructuralFingerprint>,
    #[serde(default)]
    pub pending_edits: BTreeMap<String, PendingEditSnapshot>,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Tree counts plus scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    #[serde(flatten)]
    pub tree: TreeStats,
    pub chapters: usize,
    pub pending_edits: usize,
    pub batch_active: bool,
    pub paused: bool,
}
