//! Patch-vs-full decision and metadata carry-forward

use super::config::PolicyConfig;
use super::fingerprint::StructuralFingerprint;
use crate::analysis::SceneBoundary;
use crate::diff::TextChange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Keep untouched units and carry their metadata forward
    Patch,
    /// Discard prior results and recompute everything
    Full,
}

impl PolicyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub mode: PolicyMode,
    pub reason: Option<String>,
    /// Indices of prior scenes the change touches
    pub affected_units: Vec<usize>,
}

impl PolicyDecision {
    pub fn full(reason: impl Into<String>) -> Self {
        Self {
            mode: PolicyMode::Full,
            reason: Some(reason.into()),
            affected_units: Vec::new(),
        }
    }

    pub fn patch(affected_units: Vec<usize>) -> Self {
        Self {
            mode: PolicyMode::Patch,
            reason: None,
            affected_units,
        }
    }

    pub fn is_patch(&self) -> bool {
        self.mode == PolicyMode::Patch
    }
}

/// Decides how much prior work an edit lets us keep
#[derive(Debug, Clone, Default)]
pub struct IncrementalPolicy {
    config: PolicyConfig,
}

impl IncrementalPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide between patching and a full reprocess of one chapter.
    ///
    /// Change offsets are compared against the scenes of `prev`, which are
    /// in old-text coordinates: every change covers
    /// `[start, start + removed_len)` of the old text.
    pub fn decide(
        &self,
        prev: Option<&StructuralFingerprint>,
        changes: &[TextChange],
    ) -> PolicyDecision {
        let Some(prev) = prev else {
            return PolicyDecision::full("no structural baseline");
        };
        if changes.is_empty() {
            return PolicyDecision::patch(Vec::new());
        }
        if changes.len() > self.config.max_change_regions {
            return PolicyDecision::full(format!(
                "{} change regions exceed {}",
                changes.len(),
                self.config.max_change_regions
            ));
        }
        let volume: usize = changes.iter().map(TextChange::volume).sum();
        if volume > self.config.max_changed_chars {
            return PolicyDecision::full(format!(
                "{volume} changed chars exceed {}",
                self.config.max_changed_chars
            ));
        }
        if prev.scenes.is_empty() {
            return PolicyDecision::full("no known scenes");
        }

        let buffer = self.config.overlap_buffer;
        let affected: Vec<usize> = prev
            .scenes
            .iter()
            .enumerate()
            .filter(|(_, scene)| {
                changes.iter().any(|change| {
                    let lo = change.start.saturating_sub(buffer);
                    let hi = change.start + change.removed_len() + buffer;
                    scene.overlaps(lo, hi)
                })
            })
            .map(|(i, _)| i)
            .collect();

        let fraction = affected.len() as f64 / prev.scenes.len() as f64;
        if fraction > self.config.max_affected_fraction {
            return PolicyDecision::full(format!(
                "{} of {} scenes affected",
                affected.len(),
                prev.scenes.len()
            ));
        }
        debug!(
            affected = affected.len(),
            scenes = prev.scenes.len(),
            volume,
            "patch decision"
        );
        PolicyDecision::patch(affected)
    }

    /// Copy `pov`/`location` from matching prior scenes into `new_scenes`
    /// where the fresh parse found none.
    ///
    /// A prior scene matches when it has the same kind and its start lies
    /// within the match tolerance; the closest one wins. Prior scenes are
    /// bucketed by `start / tolerance` and only neighbouring buckets are
    /// searched. Returns how many new scenes found a match.
    pub fn carry_forward(&self, prev: &[SceneBoundary], new_scenes: &mut [SceneBoundary]) -> usize {
        let tolerance = self.config.match_tolerance.max(1);
        let mut buckets: HashMap<usize, Vec<&SceneBoundary>> = HashMap::new();
        for scene in prev {
            buckets.entry(scene.start / tolerance).or_default().push(scene);
        }

        let mut matched = 0;
        for scene in new_scenes.iter_mut() {
            let key = scene.start / tolerance;
            let candidate = [key.checked_sub(1), Some(key), Some(key + 1)]
                .into_iter()
                .flatten()
                .filter_map(|k| buckets.get(&k))
                .flatten()
                .filter(|old| old.kind == scene.kind && old.start.abs_diff(scene.start) <= tolerance)
                .min_by_key(|old| old.start.abs_diff(scene.start));

            if let Some(old) = candidate {
                matched += 1;
                if scene.pov.is_none() {
                    scene.pov = old.pov.clone();
                }
                if scene.location.is_none() {
                    scene.location = old.location.clone();
                }
            }
        }
        matched
    }

    /// Decide whether an entity graph can be patched given the entities an
    /// edit touched and how many were known before
    pub fn decide_entities(&self, affected: &[String], known: usize) -> PolicyDecision {
        if known == 0 {
            return PolicyDecision::full("no known entities");
        }
        if affected.len() > self.config.max_affected_entities {
            return PolicyDecision::full(format!(
                "{} affected entities exceed {}",
                affected.len(),
                self.config.max_affected_entities
            ));
        }
        let fraction = affected.len() as f64 / known as f64;
        if fraction > self.config.max_affected_entity_fraction {
            return PolicyDecision::full(format!("{} of {known} entities affected", affected.len()));
        }
        PolicyDecision::patch(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SceneKind;

    fn scene(index: usize, start: usize, end: usize) -> SceneBoundary {
        SceneBoundary {
            index,
            kind: if index == 0 {
                SceneKind::Opening
            } else {
                SceneKind::Break
            },
            start,
            end,
            pov: None,
            location: None,
        }
    }

    /// Five scenes of 190 bytes, 10 bytes of break between them
    fn five_scenes() -> StructuralFingerprint {
        let text = "x".repeat(1000);
        let scenes = (0..5).map(|i| scene(i, i * 200, i * 200 + 190)).collect();
        StructuralFingerprint::new(&text, scenes)
    }

    #[test]
    fn no_baseline_means_full() {
        let policy = IncrementalPolicy::default();
        let decision = policy.decide(None, &[TextChange::insert(0, "abc")]);
        assert_eq!(decision.mode, PolicyMode::Full);
        assert_eq!(decision.reason.as_deref(), Some("no structural baseline"));
    }

    #[test]
    fn small_edit_in_one_scene_patches() {
        let policy = IncrementalPolicy::default();
        let prev = five_scenes();
        let decision = policy.decide(Some(&prev), &[TextChange::modify(500, "abcde", "vwxyz")]);
        assert_eq!(decision.mode, PolicyMode::Patch);
        assert_eq!(decision.affected_units, vec![2]);
    }

    #[test]
    fn buffer_reaches_neighbouring_scene() {
        let policy = IncrementalPolicy::default();
        let prev = five_scenes();
        let decision = policy.decide(Some(&prev), &[TextChange::insert(420, "hi")]);
        assert_eq!(decision.affected_units, vec![1, 2]);
    }

    #[test]
    fn large_volume_forces_full() {
        let policy = IncrementalPolicy::default();
        let prev = five_scenes();
        let decision = policy.decide(Some(&prev), &[TextChange::insert(10, "y".repeat(2001))]);
        assert_eq!(decision.mode, PolicyMode::Full);
    }

    #[test]
    fn too_many_regions_forces_full() {
        let policy = IncrementalPolicy::new(PolicyConfig {
            max_change_regions: 2,
            ..PolicyConfig::default()
        });
        let prev = five_scenes();
        let changes: Vec<TextChange> = (0..3).map(|i| TextChange::insert(i * 10, "a")).collect();
        assert_eq!(policy.decide(Some(&prev), &changes).mode, PolicyMode::Full);
    }

    #[test]
    fn touching_most_scenes_forces_full() {
        let policy = IncrementalPolicy::default();
        let prev = five_scenes();
        let changes = vec![
            TextChange::insert(100, "a"),
            TextChange::insert(300, "a"),
            TextChange::insert(500, "a"),
        ];
        let decision = policy.decide(Some(&prev), &changes);
        assert_eq!(decision.mode, PolicyMode::Full);
        assert_eq!(decision.reason.as_deref(), Some("3 of 5 scenes affected"));
    }

    #[test]
    fn carry_forward_copies_metadata_from_nearby_scene() {
        let policy = IncrementalPolicy::default();
        let mut prev = vec![scene(0, 0, 190), scene(1, 200, 390), scene(2, 400, 590)];
        prev[1].pov = Some("Mara".into());
        prev[1].location = Some("Harbor".into());
        prev[2].pov = Some("Tomas".into());

        // five bytes inserted in the first scene shift the rest
        let mut new_scenes = vec![scene(0, 0, 195), scene(1, 205, 395), scene(2, 405, 595)];
        new_scenes[2].pov = Some("Ilse".into());

        assert_eq!(policy.carry_forward(&prev, &mut new_scenes), 3);
        assert_eq!(new_scenes[1].pov.as_deref(), Some("Mara"));
        assert_eq!(new_scenes[1].location.as_deref(), Some("Harbor"));
        assert_eq!(new_scenes[2].pov.as_deref(), Some("Ilse"));
        assert!(new_scenes[0].pov.is_none());
    }

    #[test]
    fn carry_forward_ignores_distant_or_different_scenes() {
        let policy = IncrementalPolicy::default();
        let mut prev = vec![scene(1, 200, 390)];
        prev[0].pov = Some("Mara".into());

        let mut moved = vec![scene(1, 450, 600)];
        assert_eq!(policy.carry_forward(&prev, &mut moved), 0);
        assert!(moved[0].pov.is_none());

        let mut heading = vec![SceneBoundary {
            kind: SceneKind::Heading,
            ..scene(1, 210, 390)
        }];
        assert_eq!(policy.carry_forward(&prev, &mut heading), 0);
    }

    #[test]
    fn entity_decisions_follow_thresholds() {
        let policy = IncrementalPolicy::default();
        let names = |n: usize| (0..n).map(|i| format!("E{i}")).collect::<Vec<_>>();
        assert!(policy.decide_entities(&names(2), 10).is_patch());
        assert!(!policy.decide_entities(&names(6), 10).is_patch());
        assert!(!policy.decide_entities(&names(51), 200).is_patch());
        assert!(!policy.decide_entities(&[], 0).is_patch());
    }
}
