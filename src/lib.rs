//! Draftline: incremental hierarchical analysis for long manuscripts
//!
//! A manuscript is indexed as a tree of chunks (`book -> act -> chapter ->
//! scene`). Edits are debounced, diffed and mapped onto the tree; only the
//! chunks whose text changed are re-analyzed, and summaries bubble up once
//! every child of a chunk is fresh again.
//!
//! # Core Concepts
//!
//! - **Chunks**: hashed text ranges with a freshness status and their last
//!   analysis
//! - **Policy**: decides per edit whether prior work can be patched or must be
//!   recomputed
//! - **Manager**: clock-driven scheduler that commits edits and drains the
//!   dirty queue in small batches while the writer is idle
//!
//! # Example
//!
//! ```
//! use draftline::{AnalysisPipeline, ChunkStatus, IncrementalManager, ManualClock};
//! use std::sync::Arc;
//!
//! let mut manager = IncrementalManager::new(Arc::new(AnalysisPipeline::with_builtin_analyzers()))
//!     .with_clock(Arc::new(ManualClock::new(0)));
//! manager.register_chapter("ch1", "Mara ran.\n***\nTomas waited.");
//! manager.process_all_dirty();
//!
//! assert_eq!(manager.get_chapter_chunk("ch1").unwrap().status, ChunkStatus::Fresh);
//! assert_eq!(manager.get_book_summary().unwrap().total_word_count, 4);
//! ```

pub mod analysis;
pub mod chunk;
pub mod config;
pub mod diff;
pub mod hash;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod storage;

pub use analysis::{AnalysisError, AnalysisFragment, AnalysisPipeline, ChunkAnalyzer};
pub use chunk::{
    AggregateSummary, ChunkId, ChunkLevel, ChunkRecord, ChunkStatus, ChunkTree, EngineEvent,
    EventBus,
};
pub use config::{ConfigError, EngineConfig};
pub use diff::{diff, Delta, DiffResult, TextChange};
pub use hash::{content_hash, ContentHash};
pub use manager::{
    Clock, EngineError, EngineResult, EngineSnapshot, IncrementalManager, ManagerConfig,
    ManagerStats, ManualClock, TokioClock,
};
pub use policy::{IncrementalPolicy, PolicyConfig, PolicyDecision, PolicyMode};
pub use pool::{AnalysisJob, JobPriority, PoolConfig, WorkerPool};
pub use storage::{OpenStore, SnapshotInfo, SqliteStateStore, StateStore, StorageError, StorageResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
