//! Instrumented analyzers

use draftline::{AnalysisError, AnalysisFragment, ChunkAnalyzer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wraps another analyzer and records every chunk id it is called with
pub struct CountingAnalyzer {
    inner: Arc<dyn ChunkAnalyzer>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl CountingAnalyzer {
    pub fn new(inner: Arc<dyn ChunkAnalyzer>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Chunk ids analyzed so far, in call order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.seen.lock().unwrap().clear();
    }
}

impl ChunkAnalyzer for CountingAnalyzer {
    fn id(&self) -> &str {
        "counting"
    }

    fn name(&self) -> &str {
        "Counting wrapper"
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(chunk_id.to_string());
        self.inner.analyze(text, chunk_id)
    }
}

/// Fails for any text containing the marker, otherwise counts words
pub struct FailingOn(pub &'static str);

impl ChunkAnalyzer for FailingOn {
    fn id(&self) -> &str {
        "failing-on"
    }

    fn name(&self) -> &str {
        "Failing on marker"
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        if text.contains(self.0) {
            return Err(AnalysisError::AnalyzerFailed {
                analyzer: self.id().to_string(),
                message: format!("found {:?}", self.0),
            });
        }
        let mut fragment = AnalysisFragment::empty(chunk_id);
        fragment.word_count = text.split_whitespace().count();
        Ok(fragment)
    }
}
