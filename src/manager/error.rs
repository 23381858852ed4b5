use crate::analysis::AnalysisError;
use crate::chunk::ChunkId;
use thiserror::Error;

/// Errors raised while processing a chunk or restoring engine state.
///
/// Per-chunk errors never escape a batch: they become the chunk's error
/// state and an `EngineEvent::ChunkError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("no text cached for chapter {0}")]
    MissingText(String),

    #[error("bounds {start}..{end} of {chunk} do not fit chapter text of {len} bytes")]
    InvalidBounds {
        chunk: ChunkId,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("children of {0} are not all fresh")]
    ChildrenNotReady(ChunkId),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
