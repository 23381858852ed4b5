//! Thresholds for the patch-vs-full decision

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// More disjoint change regions than this forces a full reprocess
    pub max_change_regions: usize,
    /// Removed plus inserted bytes above this forces a full reprocess
    pub max_changed_chars: usize,
    /// Slack around a change when testing which scenes it touches
    pub overlap_buffer: usize,
    /// Touching more than this fraction of known scenes forces a full reprocess
    pub max_affected_fraction: f64,
    /// How far a scene's start may move and still match its prior self
    pub match_tolerance: usize,
    pub max_affected_entities: usize,
    pub max_affected_entity_fraction: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_change_regions: 20,
            max_changed_chars: 2000,
            overlap_buffer: 50,
            max_affected_fraction: 0.5,
            match_tolerance: 100,
            max_affected_entities: 50,
            max_affected_entity_fraction: 0.5,
        }
    }
}

impl PolicyConfig {
    /// Describe the first invalid setting, if any
    pub fn problems(&self) -> Option<String> {
        let fraction_ok = |f: f64| f > 0.0 && f <= 1.0;
        if !fraction_ok(self.max_affected_fraction) {
            return Some(format!(
                "policy.max_affected_fraction must be in (0, 1], got {}",
                self.max_affected_fraction
            ));
        }
        if !fraction_ok(self.max_affected_entity_fraction) {
            return Some(format!(
                "policy.max_affected_entity_fraction must be in (0, 1], got {}",
                self.max_affected_entity_fraction
            ));
        }
        if self.match_tolerance == 0 {
            return Some("policy.match_tolerance must be positive".to_string());
        }
        None
    }
}
