//! Chunk analysis seam
//!
//! The engine treats analysis as an external, pure function of text. This
//! module defines that seam and ships deterministic built-ins so the engine
//! works end to end.
//!
//! # Architecture
//!
//! - **ChunkAnalyzer trait**: `text -> AnalysisFragment`, synchronous and pure
//! - **AnalysisPipeline**: runs registered analyzers in priority order and
//!   merges their fragments
//! - **EntityGraph**: per-chapter entity relationships built from a fragment
//!
//! # Built-in Analyzers
//!
//! - **StructureAnalyzer**: scene boundaries, POV/location markers
//! - **EntityAnalyzer**: proper nouns with mention offsets, locations
//! - **StyleAnalyzer**: counts, dialogue ratio, tension, risk hotspots
//! - **PromiseAnalyzer**: plot promises and whether they are paid off
//!
//! # Example
//!
//! ```
//! use draftline::analysis::{AnalysisPipeline, ChunkAnalyzer};
//!
//! let pipeline = AnalysisPipeline::with_builtin_analyzers();
//! let fragment = pipeline.analyze("It was late. Mara waited for Tomas.", "scene-1").unwrap();
//! assert_eq!(fragment.word_count, 7);
//! ```

pub mod analyzers;
mod graph;
mod pipeline;
mod traits;
mod types;

pub(crate) use graph::floor_boundary;
pub use graph::{EntityGraph, EntityNode, RelationEdge, CO_MENTION_WINDOW};
pub use pipeline::AnalysisPipeline;
pub use traits::{AnalyzerRegistry, ChunkAnalyzer};
pub use types::{
    AnalysisError, AnalysisFragment, EntityMention, PlotPromise, RiskHotspot, SceneBoundary,
    SceneKind,
};
