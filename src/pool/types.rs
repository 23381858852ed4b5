use crate::analysis::{AnalysisError, AnalysisFragment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Outcome of one whole-chapter job
pub type JobResult = Result<Arc<AnalysisFragment>, AnalysisError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Dispatch rank, lower goes first
    pub fn rank(self) -> u8 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

/// An independent analysis of one chapter's full text
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    pub chapter_id: String,
    pub text: String,
    pub priority: JobPriority,
}

impl AnalysisJob {
    pub fn new(chapter_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            text: text.into(),
            priority: JobPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Parallel workers. Zero runs every job on the caller.
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub workers: usize,
    pub parallel: bool,
    pub queued: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}
