//! Engine events
//!
//! Every state change the host might care about is published on a broadcast
//! channel. Subscribers that fall behind lose the oldest events; publishing
//! never blocks and never fails when nobody is listening.

use super::types::ChunkId;
use tokio::sync::broadcast;

/// An event fired by the chunk tree or the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A chunk was marked dirty and queued
    ChunkDirty { chunk_id: ChunkId },
    /// A chunk was handed to an analyzer or to aggregation
    ChunkProcessing { chunk_id: ChunkId },
    /// A chunk received fresh analysis
    ChunkFresh { chunk_id: ChunkId },
    /// Processing a chunk failed; the batch continued
    ChunkError { chunk_id: ChunkId, message: String },
    /// A chunk and its subtree were removed
    ChunkRemoved { chunk_id: ChunkId },
    /// An aggregate summary was recomputed
    AggregateUpdated { chunk_id: ChunkId },
    /// The dirty queue changed length
    QueueUpdated { queue_len: usize },
    /// An edit was buffered for a chapter and is waiting for debounce
    EditQueued { chapter_id: String },
    /// Buffered edits for a chapter were committed to the index
    EditCommitted {
        chapter_id: String,
        /// "patch" or "full"
        mode: String,
        dirty: Vec<ChunkId>,
    },
    BatchStarted { queue_len: usize },
    BatchFinished { processed: usize, aborted: bool },
}

/// Fan-out publisher for [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        // Err only means there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Drain everything currently buffered for a receiver
pub fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}
