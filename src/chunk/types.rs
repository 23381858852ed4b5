//! Chunk records and the values that describe them

use crate::analysis::{AnalysisFragment, PlotPromise, RiskHotspot};
use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Deterministic chunk identifier.
///
/// `book`, `act-<n>`, `chapter-<id>`, `chapter-<id>-scene-<n>`. Stable across
/// edits unless scene boundaries change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    const CHAPTER_PREFIX: &'static str = "chapter-";

    pub fn book() -> Self {
        Self("book".to_string())
    }

    pub fn act(n: u32) -> Self {
        Self(format!("act-{n}"))
    }

    pub fn chapter(chapter_id: &str) -> Self {
        Self(format!("{}{chapter_id}", Self::CHAPTER_PREFIX))
    }

    pub fn scene(chapter_id: &str, n: usize) -> Self {
        Self(format!("{}{chapter_id}-scene-{n}", Self::CHAPTER_PREFIX))
    }

    /// Wrap an existing id string
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The chapter key for a chapter-level id (`chapter-ch1` -> `ch1`).
    ///
    /// Scene ids also start with the chapter prefix, so only call this on
    /// ids known to be chapter-level; use the record's level to check.
    pub fn chapter_key(&self) -> Option<&str> {
        self.0.strip_prefix(Self::CHAPTER_PREFIX)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Position in the document hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    Scene,
    Chapter,
    Act,
    Book,
}

impl ChunkLevel {
    /// Dequeue priority: smaller units first
    pub fn rank(self) -> u8 {
        match self {
            Self::Scene => 0,
            Self::Chapter => 1,
            Self::Act => 2,
            Self::Book => 3,
        }
    }

    /// Levels whose analysis is derived purely from their children
    pub fn is_aggregation_level(self) -> bool {
        matches!(self, Self::Act | Self::Book)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Fresh,
    Dirty,
    Processing,
    Error,
}

/// One node of the chunk index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub level: ChunkLevel,
    pub start_index: usize,
    pub end_index: usize,
    pub content_hash: ContentHash,
    pub status: ChunkStatus,
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last analysis; kept (stale but readable) while dirty or errored
    pub analysis: Option<Arc<AnalysisFragment>>,
    pub parent_id: Option<ChunkId>,
    pub child_ids: Vec<ChunkId>,
}

impl ChunkRecord {
    pub fn is_fresh(&self) -> bool {
        self.status == ChunkStatus::Fresh && self.analysis.is_some()
    }

    pub fn len(&self) -> usize {
        self.end_index.saturating_sub(self.start_index)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Roll-up over a chunk's children, computed only when all of them are fresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub chunk_id: ChunkId,
    pub child_count: usize,
    pub total_word_count: usize,
    pub avg_dialogue_ratio: f64,
    pub avg_tension: f64,
    pub entity_names: BTreeSet<String>,
    pub location_names: BTreeSet<String>,
    pub unresolved_promises: Vec<PlotPromise>,
    pub risk_hotspots: Vec<RiskHotspot>,
    pub generated_at: DateTime<Utc>,
}

impl AggregateSummary {
    /// Number of hotspots kept in a summary
    pub const TOP_HOTSPOTS: usize = 10;

    /// Roll up `children` (id, analysis) into a summary for `chunk_id`.
    ///
    /// Averages are weighted by word count; with no words at all they fall
    /// back to a plain mean.
    pub fn from_children(chunk_id: &ChunkId, children: &[(&ChunkId, &AnalysisFragment)]) -> Self {
        let total_word_count: usize = children.iter().map(|(_, a)| a.word_count).sum();
        let weighted = |value: fn(&AnalysisFragment) -> f64| -> f64 {
            if children.is_empty() {
                0.0
            } else if total_word_count == 0 {
                children.iter().map(|(_, a)| value(a)).sum::<f64>() / children.len() as f64
            } else {
                children
                    .iter()
                    .map(|(_, a)| value(a) * a.word_count as f64)
                    .sum::<f64>()
                    / total_word_count as f64
            }
        };

        let mut entity_names = BTreeSet::new();
        let mut location_names = BTreeSet::new();
        let mut unresolved_promises = Vec::new();
        let mut risk_hotspots = Vec::new();
        for (_, analysis) in children {
            entity_names.extend(analysis.entities.iter().map(|e| e.name.clone()));
            location_names.extend(analysis.locations.iter().cloned());
            unresolved_promises.extend(analysis.unresolved_promises().cloned());
            risk_hotspots.extend(analysis.risk_hotspots.iter().cloned());
        }
        risk_hotspots.sort_by(|a, b| b.score.total_cmp(&a.score));
        risk_hotspots.truncate(Self::TOP_HOTSPOTS);

        Self {
            chunk_id: chunk_id.clone(),
            child_count: children.len(),
            total_word_count,
            avg_dialogue_ratio: weighted(|a| a.dialogue_ratio),
            avg_tension: weighted(|a| a.tension),
            entity_names,
            location_names,
            unresolved_promises,
            risk_hotspots,
            generated_at: Utc::now(),
        }
    }

    /// The analysis an aggregation-level chunk exposes for itself
    pub fn to_fragment(&self) -> AnalysisFragment {
        AnalysisFragment {
            chunk_id: self.chunk_id.to_string(),
            word_count: self.total_word_count,
            dialogue_ratio: self.avg_dialogue_ratio,
            tension: self.avg_tension,
            entities: self
                .entity_names
                .iter()
                .map(|name| crate::analysis::EntityMention {
                    name: name.clone(),
                    offsets: Vec::new(),
                })
                .collect(),
            locations: self.location_names.iter().cloned().collect(),
            promises: self.unresolved_promises.clone(),
            risk_hotspots: self.risk_hotspots.clone(),
            ..AnalysisFragment::default()
        }
    }
}

/// A text-range replacement within one chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDescriptor {
    pub start: usize,
    pub end: usize,
    pub new_length: usize,
    pub chapter_id: String,
    pub timestamp: DateTime<Utc>,
}
