//! Incremental manager: debounced edits, scheduling and dispatch
//!
//! The manager is synchronous and clock-driven. Embedders either call
//! [`IncrementalManager::tick`] themselves at [`IncrementalManager::next_deadline`]
//! or hand it to [`spawn_driver`], which does so on a tokio task.
//!
//! # Example
//!
//! ```
//! use draftline::analysis::AnalysisPipeline;
//! use draftline::manager::{IncrementalManager, ManualClock};
//! use std::sync::Arc;
//!
//! let mut manager = IncrementalManager::new(Arc::new(AnalysisPipeline::with_builtin_analyzers()))
//!     .with_clock(Arc::new(ManualClock::new(0)));
//! manager.register_chapter("ch1", "Mara ran.\n***\nTomas waited.");
//! manager.process_all_dirty();
//! assert!(manager.get_book_summary().is_some());
//! ```

mod clock;
mod config;
mod driver;
mod engine;
mod error;
mod snapshot;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ManagerConfig;
pub use driver::{shared, spawn_driver, DriverHandle, SharedManager};
pub use engine::{IncrementalManager, TickOutcome};
pub use error::{EngineError, EngineResult};
pub use snapshot::{EngineSnapshot, ManagerStats, PendingEditSnapshot};
