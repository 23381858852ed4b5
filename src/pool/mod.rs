//! Optional parallel fan-out for independent whole-chapter analyses
//!
//! Not part of the dirty-queue pipeline: the manager processes chunks one at
//! a time. The pool is for bulk work such as "analyze every chapter now".

mod types;
mod worker;

pub use types::{AnalysisJob, JobId, JobPriority, JobResult, PoolConfig, PoolStats};
pub use worker::WorkerPool;
