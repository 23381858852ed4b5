//! Plot-promise tracking within a chunk

use crate::analysis::traits::ChunkAnalyzer;
use crate::analysis::types::{AnalysisError, AnalysisFragment, PlotPromise};
use crate::diff::{find_resolutions, find_setups, PROMISE_LOOKAHEAD};

/// Finds setup language and marks a setup resolved when resolution language
/// follows it within the lookahead window
pub struct PromiseAnalyzer;

impl PromiseAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PromiseAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAnalyzer for PromiseAnalyzer {
    fn id(&self) -> &str {
        "promises"
    }

    fn name(&self) -> &str {
        "Plot Promise Tracker"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
        let mut fragment = AnalysisFragment::empty(chunk_id);
        let resolutions = find_resolutions(text);

        fragment.promises = find_setups(text)
            .into_iter()
            .map(|(offset, excerpt)| PlotPromise {
                resolved: resolutions
                    .iter()
                    .any(|&r| r > offset && r - offset <= PROMISE_LOOKAHEAD),
                text: excerpt,
                offset,
            })
            .collect();
        Ok(fragment)
    }
}
