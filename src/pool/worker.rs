//! Bounded fan-out of whole-chapter analysis jobs

use super::types::{AnalysisJob, JobId, JobResult, PoolConfig, PoolStats};
use crate::analysis::{AnalysisError, ChunkAnalyzer};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

type JobCallback = Box<dyn FnOnce(JobId, JobResult) + Send + 'static>;

struct QueuedJob {
    id: JobId,
    job: AnalysisJob,
    callback: JobCallback,
}

#[derive(Default)]
struct PoolState {
    /// Keyed by (priority rank, job id): priority first, FIFO within one
    queue: BTreeMap<(u8, u64), QueuedJob>,
    active: usize,
    next_id: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    runtime: Option<Handle>,
}

struct PoolInner {
    analyzer: Arc<dyn ChunkAnalyzer>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Runs independent chapter analyses on up to `workers` tokio blocking
/// tasks.
///
/// The host owns the lifecycle: [`WorkerPool::init`] binds the pool to the
/// current tokio runtime and [`WorkerPool::shutdown`] drops queued jobs.
/// Without a runtime, before `init` or with `workers = 0`, every job runs on
/// the caller inside `submit_job`. Both modes call the same analyzer with the
/// same input, so results are identical.
///
/// Jobs share nothing: each gets its own `(chapter_id, text)` and returns a
/// fresh fragment.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, result: &JobResult, was_active: bool) {
        let mut state = self.lock();
        if was_active {
            state.active = state.active.saturating_sub(1);
        }
        match result {
            Ok(_) => state.completed += 1,
            Err(_) => state.failed += 1,
        }
    }

    /// Start queued jobs while workers are free
    fn dispatch(self: &Arc<Self>) {
        loop {
            let (queued, handle) = {
                let mut state = self.lock();
                let Some(handle) = state.runtime.clone() else {
                    return;
                };
                if state.active >= self.config.workers {
                    return;
                }
                let Some((_, queued)) = state.queue.pop_first() else {
                    return;
                };
                state.active += 1;
                (queued, handle)
            };

            let inner = Arc::clone(self);
            handle.spawn(async move {
                let QueuedJob { id, job, callback } = queued;
                debug!(job = %id, chapter = %job.chapter_id, "job dispatched");
                let analyzer = Arc::clone(&inner.analyzer);
                let result = tokio::task::spawn_blocking(move || {
                    analyzer.analyze(&job.text, &job.chapter_id).map(Arc::new)
                })
                .await
                .unwrap_or_else(|e| Err(AnalysisError::Internal(format!("worker task failed: {e}"))));

                inner.record(&result, true);
                callback(id, result);
                inner.dispatch();
            });
        }
    }
}

impl WorkerPool {
    pub fn new(analyzer: Arc<dyn ChunkAnalyzer>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                analyzer,
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Bind to the current tokio runtime. Returns whether jobs will run in
    /// parallel.
    pub fn init(&self) -> bool {
        let workers = self.inner.config.workers;
        let parallel = {
            let mut state = self.inner.lock();
            state.runtime = if workers > 0 {
                Handle::try_current().ok()
            } else {
                None
            };
            state.runtime.is_some()
        };
        info!(workers, parallel, "worker pool initialized");
        self.inner.dispatch();
        parallel
    }

    /// Detach from the runtime and drop every queued job without calling its
    /// callback. In-flight jobs still complete. Returns the number dropped.
    pub fn shutdown(&self) -> usize {
        let dropped = {
            let mut state = self.inner.lock();
            state.runtime = None;
            let dropped = std::mem::take(&mut state.queue);
            state.cancelled += dropped.len() as u64;
            dropped
        };
        info!(dropped = dropped.len(), "worker pool shut down");
        dropped.len()
    }

    /// Queue a job; `callback` receives its result.
    ///
    /// In sequential mode the job runs, and the callback fires, before this
    /// returns.
    pub fn submit_job<F>(&self, job: AnalysisJob, callback: F) -> JobId
    where
        F: FnOnce(JobId, JobResult) + Send + 'static,
    {
        let (id, parallel) = {
            let mut state = self.inner.lock();
            let id = JobId(state.next_id);
            state.next_id += 1;
            (id, state.runtime.is_some())
        };

        if !parallel {
            debug!(job = %id, chapter = %job.chapter_id, "job run on caller");
            let result = self
                .inner
                .analyzer
                .analyze(&job.text, &job.chapter_id)
                .map(Arc::new);
            self.inner.record(&result, false);
            callback(id, result);
            return id;
        }

        {
            let mut state = self.inner.lock();
            state.queue.insert(
                (job.priority.rank(), id.0),
                QueuedJob {
                    id,
                    job,
                    callback: Box::new(callback),
                },
            );
        }
        self.inner.dispatch();
        id
    }

    /// Cancel a job that has not been dispatched yet
    pub fn cancel(&self, id: JobId) -> bool {
        let mut state = self.inner.lock();
        let key = state.queue.keys().find(|(_, seq)| *seq == id.0).copied();
        match key.and_then(|key| state.queue.remove(&key)) {
            Some(_) => {
                state.cancelled += 1;
                debug!(job = %id, "job cancelled");
                true
            }
            None => false,
        }
    }

    /// Analyze every chapter and collect the results by chapter id.
    ///
    /// A job dropped by [`WorkerPool::shutdown`] reports an internal error.
    pub async fn process_chapters<I>(&self, chapters: I) -> HashMap<String, JobResult>
    where
        I: IntoIterator<Item = AnalysisJob>,
    {
        let mut receivers = Vec::new();
        for job in chapters {
            let chapter_id = job.chapter_id.clone();
            let (tx, rx) = oneshot::channel();
            self.submit_job(job, move |_, result| {
                let _ = tx.send(result);
            });
            receivers.push((chapter_id, rx));
        }

        let mut results = HashMap::with_capacity(receivers.len());
        for (chapter_id, rx) in receivers {
            let result = rx
                .await
                .unwrap_or_else(|_| Err(AnalysisError::Internal("job cancelled".to_string())));
            results.insert(chapter_id, result);
        }
        results
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            workers: self.inner.config.workers,
            parallel: state.runtime.is_some(),
            queued: state.queue.len(),
            active: state.active,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
        }
    }
}
