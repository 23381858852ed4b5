//! Priority queue of dirty chunks
//!
//! Ordered by level rank (scenes first), then by enqueue order. A chunk is
//! present at most once; re-enqueueing a queued chunk keeps its position.

use super::types::{ChunkId, ChunkLevel};
use std::collections::{BTreeSet, HashMap};

type QueueKey = (u8, u64, ChunkId);

#[derive(Debug, Default, Clone)]
pub struct DirtyQueue {
    ordered: BTreeSet<QueueKey>,
    index: HashMap<ChunkId, (u8, u64)>,
    next_seq: u64,
}

impl DirtyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the chunk was already queued
    pub fn push(&mut self, id: ChunkId, level: ChunkLevel) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let key = (level.rank(), self.next_seq);
        self.next_seq += 1;
        self.ordered.insert((key.0, key.1, id.clone()));
        self.index.insert(id, key);
        true
    }

    pub fn pop(&mut self) -> Option<ChunkId> {
        let (_, _, id) = self.ordered.pop_first()?;
        self.index.remove(&id);
        Some(id)
    }

    pub fn remove(&mut self, id: &ChunkId) -> bool {
        match self.index.remove(id) {
            Some((rank, seq)) => self.ordered.remove(&(rank, seq, id.clone())),
            None => false,
        }
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Queued ids in dequeue order
    pub fn ids(&self) -> Vec<ChunkId> {
        self.ordered.iter().map(|(_, _, id)| id.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.index.clear();
    }
}
