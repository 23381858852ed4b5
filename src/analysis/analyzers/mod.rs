//! Built-in chunk analyzers
//!
//! Deterministic, programmatic passes. Each fills only the fragment fields it
//! owns, so the pipeline can merge them without conflicts.

mod entities;
mod promises;
mod structure;
mod style;

pub use entities::EntityAnalyzer;
pub use promises::PromiseAnalyzer;
pub use structure::{location_marker, pov_marker, SceneParser, StructureAnalyzer};
pub use style::StyleAnalyzer;
