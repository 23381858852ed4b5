//! Analysis pipeline coordinating multiple analyzers
//!
//! Runs every registered analyzer over a chunk in priority order and merges
//! their fragments. The pipeline is itself a `ChunkAnalyzer`, so the engine
//! only ever sees one analyzer.

use super::analyzers::{EntityAnalyzer, PromiseAnalyzer, StructureAnalyzer, StyleAnalyzer};
use super::traits::{AnalyzerRegistry, ChunkAnalyzer};
use super::types::{AnalysisError, AnalysisFragment};
use tracing::debug;

/// Runs a set of analyzers over one chunk and merges the results
pub struct AnalysisPipeline {
    registry: AnalyzerRegistry,
    max_content_size: Option<usize>,
}

impl Default for AnalysisPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisPipeline {
    /// Create an empty pipeline that accepts text of any size
    pub fn new() -> Self {
        Self {
            registry: AnalyzerRegistry::new(),
            max_content_size: None,
        }
    }

    /// Pipeline with every built-in analyzer registered
    pub fn with_builtin_analyzers() -> Self {
        let mut pipeline = Self::new();
        pipeline.register(StructureAnalyzer::new());
        pipeline.register(EntityAnalyzer::new());
        pipeline.register(StyleAnalyzer::new());
        pipeline.register(PromiseAnalyzer::new());
        pipeline
    }

    /// Limit (or lift, with `None`) the accepted text size. A capped
    /// pipeline reports oversized chunks as errors instead of analyzing them.
    pub fn with_max_content_size(mut self, max: Option<usize>) -> Self {
        self.max_content_size = max;
        self
    }

    /// Register an analyzer
    pub fn register<A: ChunkAnalyzer + 'static>(&mut self, analyzer: A) {
        self.registry.register(analyzer);
    }

    /// Get the analyzer registry
    pub fn registry(&self) -> &AnalyzerRegistry {
        &self.registry
    }

    /// Get list of registered analyzer IDs
    pub fn analyzer_ids(&self) -> Vec<&str> {
        self.registry.analyzers().iter().map(|a| a.id()).collect()
    }
}

impl ChunkAnalyzer for AnalysisPipeline {
    fn id(&self) -> &str {
        "pipeline"
    }

    fn name(&self) -> &str {
        "Analysis Pipeline"
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        if let Some(max) = self.max_content_size {
            if text.len() > max {
                return Err(AnalysisError::ContentTooLarge {
                    size: text.len(),
                    max,
                });
            }
        }

        let mut merged = AnalysisFragment::empty(chunk_id);
        for analyzer in self.registry.analyzers() {
            let fragment = analyzer
                .analyze(text, chunk_id)
                .map_err(|e| AnalysisError::AnalyzerFailed {
                    analyzer: analyzer.id().to_string(),
                    message: e.to_string(),
                })?;
            merged.merge(fragment);
        }

        debug!(
            chunk = chunk_id,
            words = merged.word_count,
            entities = merged.entities.len(),
            "chunk analyzed"
        );
        Ok(merged)
    }
}
