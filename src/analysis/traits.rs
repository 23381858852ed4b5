//! Analyzer traits defining the chunk analysis interface

use super::types::{AnalysisError, AnalysisFragment};

/// Trait for chunk analyzers
///
/// Analyzers are pure functions of their input text: no hidden state, no
/// side effects. Empty text must produce a zero-valued fragment rather than
/// an error. The engine treats a call as synchronous CPU work.
///
/// # Example
///
/// ```ignore
/// struct WordCounter;
///
/// impl ChunkAnalyzer for WordCounter {
///     fn id(&self) -> &str { "word-counter" }
///     fn name(&self) -> &str { "Word Counter" }
///
///     fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
///         let mut fragment = AnalysisFragment::empty(chunk_id);
///         fragment.word_count = text.split_whitespace().count();
///         Ok(fragment)
///     }
/// }
/// ```
pub trait ChunkAnalyzer: Send + Sync {
    /// Unique identifier for this analyzer
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Priority for execution order (lower = earlier)
    ///
    /// Default is 100. Structural passes run before content passes so their
    /// metadata wins when fragments are merged.
    fn priority(&self) -> u32 {
        100
    }

    /// Analyze the text of one chunk
    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError>;
}

/// Analyzers keyed by id, iterated in priority order
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn ChunkAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an analyzer. An analyzer with the same id is replaced in place;
    /// returns whether that happened.
    pub fn register<A: ChunkAnalyzer + 'static>(&mut self, analyzer: A) -> bool {
        let boxed: Box<dyn ChunkAnalyzer> = Box::new(analyzer);
        match self.analyzers.iter_mut().find(|a| a.id() == boxed.id()) {
            Some(slot) => {
                *slot = boxed;
                true
            }
            None => {
                self.analyzers.push(boxed);
                false
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&dyn ChunkAnalyzer> {
        self.analyzers
            .iter()
            .find(|a| a.id() == id)
            .map(|a| a.as_ref())
    }

    /// Analyzers sorted by priority; equal priorities keep registration order
    pub fn analyzers(&self) -> Vec<&dyn ChunkAnalyzer> {
        let mut analyzers: Vec<_> = self.analyzers.iter().map(|a| a.as_ref()).collect();
        analyzers.sort_by_key(|a| a.priority());
        analyzers
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }
}
