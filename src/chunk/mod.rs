//! Hierarchical chunk index
//!
//! A manuscript is indexed as `book -> act -> chapter -> scene`. Each chunk
//! tracks a content hash, a freshness status and its last analysis. Dirty
//! chunks wait in a priority queue; aggregates bubble up once every child
//! of a chunk is fresh.

mod events;
mod queue;
mod tree;
mod types;

pub use events::{drain_events, EngineEvent, EventBus};
pub use queue::DirtyQueue;
pub use tree::{ChunkTree, TreeSnapshot, TreeStats};
pub use types::{
    AggregateSummary, ChunkId, ChunkLevel, ChunkRecord, ChunkStatus, EditDescriptor,
};
