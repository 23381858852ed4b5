//! Common test utilities for draftline integration tests
//!
//! Manuscript generators, instrumented analyzers and a manager wired to a
//! manual clock.

#![allow(dead_code)]

pub mod analyzers;
pub mod manuscript;

pub use analyzers::{CountingAnalyzer, FailingOn};
pub use manuscript::{chapter, insert_at, prose, scene_names, SCENE_BREAK};

use draftline::{
    AnalysisPipeline, ChunkAnalyzer, EngineEvent, IncrementalManager, ManagerConfig, ManualClock,
};
use std::sync::Arc;
use tokio::sync::broadcast;

pub fn pipeline() -> Arc<dyn ChunkAnalyzer> {
    Arc::new(AnalysisPipeline::with_builtin_analyzers())
}

/// Manager with default timing on a manual clock starting at zero
pub fn manual_manager(analyzer: Arc<dyn ChunkAnalyzer>) -> (IncrementalManager, Arc<ManualClock>) {
    manual_manager_with(analyzer, ManagerConfig::default())
}

pub fn manual_manager_with(
    analyzer: Arc<dyn ChunkAnalyzer>,
    config: ManagerConfig,
) -> (IncrementalManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let manager = IncrementalManager::new(analyzer)
        .with_config(config)
        .with_clock(clock.clone());
    (manager, clock)
}

/// Advance the clock to each deadline in turn, ticking, until nothing is
/// scheduled or `until_ms` is reached
pub fn run_until(manager: &mut IncrementalManager, clock: &ManualClock, until_ms: u64) {
    manager.tick();
    for _ in 0..10_000 {
        let Some(deadline) = manager.next_deadline() else {
            break;
        };
        if deadline > until_ms {
            break;
        }
        clock.set(deadline.max(manager.now_ms()));
        manager.tick();
    }
    clock.set(until_ms.max(manager.now_ms()));
    manager.tick();
}

pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    draftline::chunk::drain_events(rx)
}
