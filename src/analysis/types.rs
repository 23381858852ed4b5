//! Core types produced by chunk analyzers
//!
//! An `AnalysisFragment` is the output of analyzing one chunk of text. Each
//! built-in analyzer fills the fields it owns and leaves the rest at their
//! zero values; the pipeline merges them into a single fragment.

use serde::{Deserialize, Serialize};

/// How a scene boundary was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    /// Text before the first break, or the whole chapter when there are none
    Opening,
    /// Follows an explicit break line (`***`, `* * *`, `#`, `---`)
    Break,
    /// Follows a markdown heading
    Heading,
}

/// One scene of a chapter as found by the structural pass.
///
/// Offsets are byte offsets into the chapter text and always lie on
/// character boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneBoundary {
    pub index: usize,
    pub kind: SceneKind,
    pub start: usize,
    pub end: usize,
    /// Point-of-view character, when known
    #[serde(default)]
    pub pov: Option<String>,
    /// Where the scene takes place, when known
    #[serde(default)]
    pub location: Option<String>,
}

impl SceneBoundary {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `[start, end)` intersects this scene's range
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && self.start < end.max(start + 1)
    }
}

/// A named entity and every offset at which it is mentioned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    pub offsets: Vec<usize>,
}

impl EntityMention {
    pub fn count(&self) -> usize {
        self.offsets.len()
    }
}

/// A plot promise ("setup") found in the text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPromise {
    /// Short excerpt around the setup language
    pub text: String,
    pub offset: usize,
    pub resolved: bool,
}

/// A span the style pass considers risky for readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskHotspot {
    /// Chunk the hotspot was found in
    pub chunk_id: String,
    pub start: usize,
    pub end: usize,
    /// 0.0 - 1.0, higher is worse
    pub score: f64,
    pub reason: String,
}

/// Analysis output for a single chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFragment {
    pub chunk_id: String,
    pub word_count: usize,
    pub sentence_count: usize,
    /// Fraction of words inside quoted dialogue
    pub dialogue_ratio: f64,
    /// 0.0 - 1.0 density of tension vocabulary
    pub tension: f64,
    pub pov: Option<String>,
    pub location: Option<String>,
    pub scenes: Vec<SceneBoundary>,
    pub entities: Vec<EntityMention>,
    pub locations: Vec<String>,
    pub promises: Vec<PlotPromise>,
    pub risk_hotspots: Vec<RiskHotspot>,
    /// Non-fatal notes from analyzers
    pub warnings: Vec<String>,
}

impl AnalysisFragment {
    /// The well-defined zero fragment returned for empty text
    pub fn empty(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            ..Self::default()
        }
    }

    /// Merge another analyzer's output into this one.
    ///
    /// Scalars are taken from `other` when it set them; collections are
    /// concatenated; optional metadata keeps the first value seen.
    pub fn merge(&mut self, other: AnalysisFragment) {
        if other.word_count > 0 {
            self.word_count = other.word_count;
        }
        if other.sentence_count > 0 {
            self.sentence_count = other.sentence_count;
        }
        if other.dialogue_ratio > 0.0 {
            self.dialogue_ratio = other.dialogue_ratio;
        }
        if other.tension > 0.0 {
            self.tension = other.tension;
        }
        if self.pov.is_none() {
            self.pov = other.pov;
        }
        if self.location.is_none() {
            self.location = other.location;
        }
        self.scenes.extend(other.scenes);
        self.entities.extend(other.entities);
        for location in other.locations {
            if !self.locations.contains(&location) {
                self.locations.push(location);
            }
        }
        self.promises.extend(other.promises);
        self.risk_hotspots.extend(other.risk_hotspots);
        self.warnings.extend(other.warnings);
    }

    /// Move the fragment to another chunk id. Hotspots found in the old
    /// chunk follow it; offsets are slice-relative and stay as they are.
    pub fn relabel(&mut self, chunk_id: &str) {
        let old = std::mem::replace(&mut self.chunk_id, chunk_id.to_string());
        for hotspot in &mut self.risk_hotspots {
            if hotspot.chunk_id == old {
                hotspot.chunk_id = chunk_id.to_string();
            }
        }
    }

    pub fn unresolved_promises(&self) -> impl Iterator<Item = &PlotPromise> {
        self.promises.iter().filter(|p| !p.resolved)
    }
}

/// Error types for analysis
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: usize, max: usize },

    #[error("Analyzer '{analyzer}' failed: {message}")]
    AnalyzerFailed { analyzer: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fragment_is_zero_valued() {
        let fragment = AnalysisFragment::empty("scene-1");
        assert_eq!(fragment.chunk_id, "scene-1");
        assert_eq!(fragment.word_count, 0);
        assert!(fragment.entities.is_empty());
        assert!(fragment.pov.is_none());
    }

    #[test]
    fn merge_keeps_first_metadata_and_concatenates_lists() {
        let mut base = AnalysisFragment::empty("c");
        base.pov = Some("Mara".into());
        base.locations.push("Harbor".into());

        let mut other = AnalysisFragment::empty("c");
        other.word_count = 42;
        other.pov = Some("Tomas".into());
        other.locations = vec!["Harbor".into(), "Tower".into()];
        other.warnings.push("odd".into());

        base.merge(other);
        assert_eq!(base.word_count, 42);
        assert_eq!(base.pov.as_deref(), Some("Mara"));
        assert_eq!(base.locations, vec!["Harbor".to_string(), "Tower".to_string()]);
        assert_eq!(base.warnings.len(), 1);
    }

    #[test]
    fn relabel_moves_own_hotspots() {
        let mut fragment = AnalysisFragment::empty("ch-scene-1");
        for owner in ["ch-scene-1", "elsewhere"] {
            fragment.risk_hotspots.push(RiskHotspot {
                chunk_id: owner.into(),
                start: 4,
                end: 9,
                score: 0.7,
                reason: "long sentence".into(),
            });
        }

        fragment.relabel("ch-scene-2");
        assert_eq!(fragment.chunk_id, "ch-scene-2");
        assert_eq!(fragment.risk_hotspots[0].chunk_id, "ch-scene-2");
        assert_eq!(fragment.risk_hotspots[0].start, 4);
        assert_eq!(fragment.risk_hotspots[1].chunk_id, "elsewhere");
    }

    #[test]
    fn scene_overlap_handles_zero_width_ranges() {
        let scene = SceneBoundary {
            index: 0,
            kind: SceneKind::Opening,
            start: 10,
            end: 20,
            pov: None,
            location: None,
        };
        assert!(scene.overlaps(15, 15));
        assert!(scene.overlaps(0, 11));
        assert!(!scene.overlaps(20, 30));
        assert!(!scene.overlaps(0, 10));
    }
}
