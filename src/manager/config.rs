//! Scheduler timing

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Quiet time after the last keystroke before an edit is committed
    pub debounce_ms: u64,
    /// Quiet time after the last edit before a processing batch may start
    pub idle_threshold_ms: u64,
    /// Chunks processed per batch
    pub max_batch_size: usize,
    /// Pause between chunks inside a batch
    pub processing_interval_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            idle_threshold_ms: 1000,
            max_batch_size: 3,
            processing_interval_ms: 50,
        }
    }
}

impl ManagerConfig {
    /// Describe the first invalid setting, if any
    pub fn problems(&self) -> Option<String> {
        if self.max_batch_size == 0 {
            return Some("manager.max_batch_size must be at least 1".to_string());
        }
        None
    }
}
