//! Incremental-vs-full reprocess policy
//!
//! Given the changes of a committed edit and the chapter's previous
//! structural fingerprint, decide whether prior work can be patched or has
//! to be thrown away. Patching keeps untouched scenes and relationship
//! history; content-derived scores are always recomputed.

mod config;
mod decision;
mod entities;
mod fingerprint;

pub use config::PolicyConfig;
pub use decision::{IncrementalPolicy, PolicyDecision, PolicyMode};
pub use entities::patch_entity_graph;
pub use fingerprint::StructuralFingerprint;
