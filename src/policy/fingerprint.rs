//! Structural fingerprint of a chapter

use crate::analysis::SceneBoundary;
use crate::hash::{content_hash, ContentHash};
use serde::{Deserialize, Serialize};

/// What the cheap structural pass saw the last time a chapter was committed.
///
/// This is the baseline the policy compares an edit against. Scene metadata
/// (`pov`, `location`) is refined as scene analyses come back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralFingerprint {
    pub content_hash: ContentHash,
    pub text_length: usize,
    pub scenes: Vec<SceneBoundary>,
}

impl StructuralFingerprint {
    pub fn new(text: &str, scenes: Vec<SceneBoundary>) -> Self {
        Self {
            content_hash: content_hash(text),
            text_length: text.len(),
            scenes,
        }
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn scene_at(&self, start: usize) -> Option<&SceneBoundary> {
        self.scenes.iter().find(|s| s.start == start)
    }

    /// Fill in metadata for the scene starting at `start` without
    /// overwriting known values
    pub fn refine_scene(&mut self, start: usize, pov: Option<&str>, location: Option<&str>) {
        let Some(scene) = self.scenes.iter_mut().find(|s| s.start == start) else {
            return;
        };
        if scene.pov.is_none() {
            scene.pov = pov.map(str::to_string);
        }
        if scene.location.is_none() {
            scene.location = location.map(str::to_string);
        }
    }
}
