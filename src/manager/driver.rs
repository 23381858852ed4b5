//! Background task that keeps a shared manager's timers firing

use super::engine::IncrementalManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

pub type SharedManager = Arc<Mutex<IncrementalManager>>;

/// Wrap a manager for use with [`spawn_driver`]
pub fn shared(manager: IncrementalManager) -> SharedManager {
    Arc::new(Mutex::new(manager))
}

/// Handle to a running driver
pub struct DriverHandle {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    /// Re-read deadlines. Call after feeding the manager an edit.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        let _ = self.task.await;
    }
}

/// Tick `manager` whenever its next deadline passes or the handle is woken.
///
/// The loop exits on [`DriverHandle::shutdown`] or once the manager is
/// destroyed.
pub fn spawn_driver(manager: SharedManager) -> DriverHandle {
    let stopped = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let task = tokio::spawn(run(manager, Arc::clone(&stopped), Arc::clone(&wake)));
    DriverHandle {
        stopped,
        wake,
        task,
    }
}

async fn run(manager: SharedManager, stopped: Arc<AtomicBool>, wake: Arc<Notify>) {
    debug!("driver started");
    while !stopped.load(Ordering::SeqCst) {
        let wait_ms = {
            let mut manager = manager.lock().await;
            if manager.is_destroyed() {
                break;
            }
            let outcome = manager.tick();
            if !outcome.is_empty() {
                debug!(
                    committed = outcome.committed.len(),
                    processed = outcome.processed.len(),
                    "driver tick"
                );
            }
            let now = manager.now_ms();
            manager.next_deadline().map(|d| d.saturating_sub(now))
        };

        match wait_ms {
            Some(ms) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = wake.notified() => {}
                }
            }
            None => wake.notified().await,
        }
    }
    debug!("driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisPipeline, ChunkAnalyzer};
    use crate::chunk::ChunkStatus;

    fn pipeline() -> Arc<dyn ChunkAnalyzer> {
        Arc::new(AnalysisPipeline::with_builtin_analyzers())
    }

    #[tokio::test(start_paused = true)]
    async fn driver_processes_registered_chapters() {
        let manager = shared(IncrementalManager::new(pipeline()));
        manager
            .lock()
            .await
            .register_chapter("ch1", "Mara ran.\n***\nTomas waited.\n***\nThe end came.");
        let handle = spawn_driver(Arc::clone(&manager));
        handle.wake();

        tokio::time::sleep(Duration::from_secs(2)).await;
        {
            let m = manager.lock().await;
            assert_eq!(m.get_stats().tree.dirty, 0);
            assert!(m.get_book_summary().is_some());
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn driver_commits_edits_after_debounce() {
        let manager = shared(IncrementalManager::new(pipeline()));
        manager.lock().await.register_chapter("ch1", "Mara ran home.");
        let handle = spawn_driver(Arc::clone(&manager));
        tokio::time::sleep(Duration::from_secs(2)).await;

        manager
            .lock()
            .await
            .handle_edit("ch1", "Mara ran home quickly.", 13, 13);
        handle.wake();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(manager.lock().await.has_pending_edit("ch1"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        {
            let m = manager.lock().await;
            assert!(!m.has_pending_edit("ch1"));
            assert_eq!(m.chapter_text("ch1"), Some("Mara ran home quickly."));
            assert_eq!(m.get_chapter_chunk("ch1").unwrap().status, ChunkStatus::Fresh);
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn driver_exits_when_manager_destroyed() {
        let manager = shared(IncrementalManager::new(pipeline()));
        let handle = spawn_driver(Arc::clone(&manager));
        manager.lock().await.destroy();
        handle.wake();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_stopped());
    }
}
