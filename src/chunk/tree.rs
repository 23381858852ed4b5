//! The hierarchical chunk index
//!
//! An arena of [`ChunkRecord`]s keyed by [`ChunkId`], with parent/child links
//! stored as ids. The tree owns the dirty queue and the aggregate cache and
//! is the only place chunk status changes.
//!
//! # Freshness rules
//!
//! - Marking a chunk dirty invalidates the cached aggregate of every ancestor
//!   up to `book`. Siblings are never touched.
//! - `act` and `book` are aggregation levels: their analysis is their
//!   aggregate, so losing the aggregate also makes them dirty and queued.
//! - A `chapter` above a dirty scene keeps its own status and analysis; only
//!   its aggregate goes away.
//! - Aggregates exist only while every child is fresh.

use super::events::{EngineEvent, EventBus};
use super::queue::DirtyQueue;
use super::types::{
    AggregateSummary, ChunkId, ChunkLevel, ChunkRecord, ChunkStatus, EditDescriptor,
};
use crate::analysis::{AnalysisFragment, SceneBoundary};
use crate::hash::{content_hash, ContentHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Serializable state of a [`ChunkTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    pub chunks: BTreeMap<ChunkId, ChunkRecord>,
    pub aggregates: BTreeMap<ChunkId, AggregateSummary>,
    pub dirty_queue: Vec<ChunkId>,
    pub last_full_rebuild: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edits_applied: u64,
}

/// Counts over the current tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    pub total_chunks: usize,
    pub scenes: usize,
    pub chapters: usize,
    pub acts: usize,
    pub fresh: usize,
    pub dirty: usize,
    pub processing: usize,
    pub errored: usize,
    pub queue_len: usize,
    pub aggregates: usize,
    pub edits_applied: u64,
    pub last_full_rebuild: Option<DateTime<Utc>>,
}

pub struct ChunkTree {
    chunks: BTreeMap<ChunkId, ChunkRecord>,
    aggregates: BTreeMap<ChunkId, AggregateSummary>,
    queue: DirtyQueue,
    /// Re-dirtied while processing: the in-flight result lands but the
    /// chunk stays dirty
    superseded: BTreeSet<ChunkId>,
    last_full_rebuild: Option<DateTime<Utc>>,
    edits_applied: u64,
    events: EventBus,
}

fn new_record(
    id: ChunkId,
    level: ChunkLevel,
    start: usize,
    end: usize,
    hash: ContentHash,
    parent_id: Option<ChunkId>,
) -> ChunkRecord {
    ChunkRecord {
        id,
        level,
        start_index: start,
        end_index: end,
        content_hash: hash,
        status: ChunkStatus::Dirty,
        last_processed_at: None,
        error_message: None,
        analysis: None,
        parent_id,
        child_ids: Vec::new(),
    }
}

impl ChunkTree {
    pub fn new() -> Self {
        Self::with_events(EventBus::default())
    }

    /// Create a tree that publishes on an existing bus
    pub fn with_events(events: EventBus) -> Self {
        let mut tree = Self {
            chunks: BTreeMap::new(),
            aggregates: BTreeMap::new(),
            queue: DirtyQueue::new(),
            superseded: BTreeSet::new(),
            last_full_rebuild: None,
            edits_applied: 0,
            events,
        };
        tree.insert_root();
        tree
    }

    fn insert_root(&mut self) {
        let id = ChunkId::book();
        let mut root = new_record(id.clone(), ChunkLevel::Book, 0, 0, content_hash(""), None);
        root.status = ChunkStatus::Fresh;
        root.analysis = Some(Arc::new(AnalysisFragment::empty(id.as_str())));
        self.chunks.insert(id, root);
    }

    // --- Queries ---

    pub fn get_chunk(&self, id: &ChunkId) -> Option<&ChunkRecord> {
        self.chunks.get(id)
    }

    pub fn get_aggregate(&self, id: &ChunkId) -> Option<&AggregateSummary> {
        self.aggregates.get(id)
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.chunks.contains_key(id)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }

    pub fn children(&self, id: &ChunkId) -> Vec<&ChunkRecord> {
        self.chunks
            .get(id)
            .map(|record| {
                record
                    .child_ids
                    .iter()
                    .filter_map(|child| self.chunks.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queued ids in dequeue order
    pub fn queue_ids(&self) -> Vec<ChunkId> {
        self.queue.ids()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, id: &ChunkId) -> bool {
        self.queue.contains(id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn last_full_rebuild(&self) -> Option<DateTime<Utc>> {
        self.last_full_rebuild
    }

    pub fn set_last_full_rebuild(&mut self, at: DateTime<Utc>) {
        self.last_full_rebuild = Some(at);
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            total_chunks: self.chunks.len(),
            queue_len: self.queue.len(),
            aggregates: self.aggregates.len(),
            edits_applied: self.edits_applied,
            last_full_rebuild: self.last_full_rebuild,
            ..TreeStats::default()
        };
        for record in self.chunks.values() {
            match record.level {
                ChunkLevel::Scene => stats.scenes += 1,
                ChunkLevel::Chapter => stats.chapters += 1,
                ChunkLevel::Act => stats.acts += 1,
                ChunkLevel::Book => {}
            }
            match record.status {
                ChunkStatus::Fresh => stats.fresh += 1,
                ChunkStatus::Dirty => stats.dirty += 1,
                ChunkStatus::Processing => stats.processing += 1,
                ChunkStatus::Error => stats.errored += 1,
            }
        }
        stats
    }

    // --- Registration ---

    /// Create or overwrite a chunk.
    ///
    /// The chunk starts dirty and queued. An overwritten chunk keeps its
    /// children and its last analysis (stale until reprocessed). A missing
    /// or absent parent attaches the chunk to `book`.
    pub fn register_chunk(
        &mut self,
        id: ChunkId,
        level: ChunkLevel,
        start: usize,
        end: usize,
        text: &str,
        parent_id: Option<ChunkId>,
    ) -> &ChunkRecord {
        let parent_id = self.resolve_parent(&id, parent_id);
        let previous = self.chunks.remove(&id);

        let mut record = new_record(
            id.clone(),
            level,
            start,
            end,
            content_hash(text),
            parent_id.clone(),
        );
        if let Some(prev) = previous {
            if prev.parent_id != parent_id {
                if let Some(old_parent) = &prev.parent_id {
                    self.unlink_child(old_parent, &id);
                }
            }
            record.analysis = prev.analysis;
            record.child_ids = prev.child_ids;
        }
        self.chunks.insert(id.clone(), record);
        if let Some(parent) = &parent_id {
            self.link_child(parent, &id);
        }
        self.superseded.remove(&id);
        self.enqueue(&id, level);
        self.propagate_dirty(parent_id.as_ref());
        self.debug_check();

        &self.chunks[&id]
    }

    /// Make sure `act-<n>` exists under `book`
    pub fn ensure_act(&mut self, n: u32) -> ChunkId {
        let id = ChunkId::act(n);
        if !self.chunks.contains_key(&id) {
            self.register_chunk(id.clone(), ChunkLevel::Act, 0, 0, "", Some(ChunkId::book()));
        }
        id
    }

    fn resolve_parent(&self, id: &ChunkId, requested: Option<ChunkId>) -> Option<ChunkId> {
        let root = ChunkId::book();
        if *id == root {
            return None;
        }
        match requested {
            Some(parent) if parent != *id && self.chunks.contains_key(&parent) => Some(parent),
            Some(parent) => {
                debug!(chunk = %id, parent = %parent, "parent not found, attaching to book");
                Some(root)
            }
            None => Some(root),
        }
    }

    fn link_child(&mut self, parent: &ChunkId, child: &ChunkId) {
        if let Some(record) = self.chunks.get_mut(parent) {
            if !record.child_ids.contains(child) {
                record.child_ids.push(child.clone());
            }
        }
    }

    fn unlink_child(&mut self, parent: &ChunkId, child: &ChunkId) {
        if let Some(record) = self.chunks.get_mut(parent) {
            record.child_ids.retain(|c| c != child);
        }
    }

    /// Record a committed edit against its chapter.
    ///
    /// Creates the chapter if it does not exist. When the text hash is
    /// unchanged nothing happens and the result is empty.
    pub fn apply_edit(&mut self, edit: &EditDescriptor, new_full_text: &str) -> Vec<ChunkId> {
        let id = ChunkId::chapter(&edit.chapter_id);
        let hash = content_hash(new_full_text);
        self.edits_applied += 1;

        let Some(record) = self.chunks.get_mut(&id) else {
            self.register_chunk(
                id.clone(),
                ChunkLevel::Chapter,
                0,
                new_full_text.len(),
                new_full_text,
                None,
            );
            return vec![id];
        };
        if record.content_hash == hash {
            debug!(chunk = %id, "edit left content unchanged");
            return Vec::new();
        }
        record.content_hash = hash;
        record.start_index = 0;
        record.end_index = new_full_text.len();
        self.mark_dirty(&id);
        vec![id]
    }

    /// Replace every scene of a chapter with the given boundaries.
    ///
    /// Old scene chunks are always deleted. With `reuse_unchanged`, a new
    /// scene whose content hash matches a fresh old scene is registered
    /// fresh and takes over that scene's analysis (the same `Arc` when the
    /// id is unchanged, a relabeled copy otherwise); every other scene
    /// starts dirty. Returns the new scene ids in order.
    pub fn register_scenes_for_chapter(
        &mut self,
        chapter_key: &str,
        chapter_text: &str,
        scenes: &[SceneBoundary],
        reuse_unchanged: bool,
    ) -> Vec<ChunkId> {
        let chapter_id = ChunkId::chapter(chapter_key);
        let Some(chapter) = self.chunks.get(&chapter_id) else {
            return Vec::new();
        };

        let old_scenes: Vec<ChunkId> = chapter
            .child_ids
            .iter()
            .filter(|c| {
                self.chunks
                    .get(c)
                    .map_or(false, |r| r.level == ChunkLevel::Scene)
            })
            .cloned()
            .collect();

        let mut reusable: HashMap<ContentHash, (ChunkId, Arc<AnalysisFragment>, Option<DateTime<Utc>>)> =
            HashMap::new();
        if reuse_unchanged {
            for old in &old_scenes {
                let Some(record) = self.chunks.get(old).filter(|r| r.is_fresh()) else {
                    continue;
                };
                if let Some(analysis) = &record.analysis {
                    reusable
                        .entry(record.content_hash.clone())
                        .or_insert_with(|| {
                            (old.clone(), Arc::clone(analysis), record.last_processed_at)
                        });
                }
            }
        }

        for old in &old_scenes {
            self.detach(old);
        }
        if let Some(chapter) = self.chunks.get_mut(&chapter_id) {
            chapter.child_ids.retain(|c| !old_scenes.contains(c));
        }
        self.aggregates.remove(&chapter_id);

        let mut created = Vec::with_capacity(scenes.len());
        let mut any_dirty = false;
        let mut reused = 0usize;
        for scene in scenes {
            let Some(text) = chapter_text.get(scene.start..scene.end) else {
                debug_assert!(
                    false,
                    "scene {}..{} outside chapter {chapter_key} ({} bytes)",
                    scene.start,
                    scene.end,
                    chapter_text.len()
                );
                continue;
            };
            let id = ChunkId::scene(chapter_key, scene.index);
            let hash = content_hash(text);
            let mut record = new_record(
                id.clone(),
                ChunkLevel::Scene,
                scene.start,
                scene.end,
                hash.clone(),
                Some(chapter_id.clone()),
            );
            if let Some((old_id, analysis, processed_at)) = reusable.get(&hash) {
                record.status = ChunkStatus::Fresh;
                record.analysis = Some(if *old_id == id {
                    Arc::clone(analysis)
                } else {
                    // shifted scene: same text, new id
                    let mut moved = AnalysisFragment::clone(analysis);
                    moved.relabel(id.as_str());
                    Arc::new(moved)
                });
                record.last_processed_at = *processed_at;
                reused += 1;
            }
            let fresh = record.status == ChunkStatus::Fresh;
            self.chunks.insert(id.clone(), record);
            self.link_child(&chapter_id, &id);
            if !fresh {
                any_dirty = true;
                self.enqueue(&id, ChunkLevel::Scene);
            }
            created.push(id);
        }
        debug!(chapter = chapter_key, scenes = created.len(), reused, "scenes registered");

        if any_dirty {
            self.propagate_dirty(Some(&chapter_id));
        } else if !created.is_empty() {
            self.try_aggregate(&chapter_id);
        }
        self.debug_check();
        created
    }

    // --- Status transitions ---

    /// Mark a chunk dirty, queue it and invalidate its ancestors' aggregates
    pub fn mark_dirty(&mut self, id: &ChunkId) -> bool {
        let Some(record) = self.chunks.get_mut(id) else {
            return false;
        };
        if record.status == ChunkStatus::Processing {
            self.superseded.insert(id.clone());
        }
        record.status = ChunkStatus::Dirty;
        record.error_message = None;
        let level = record.level;
        let parent = record.parent_id.clone();

        self.enqueue(id, level);
        self.propagate_dirty(parent.as_ref());
        true
    }

    pub fn mark_processing(&mut self, id: &ChunkId) {
        let Some(record) = self.chunks.get_mut(id) else {
            return;
        };
        record.status = ChunkStatus::Processing;
        if self.queue.remove(id) {
            self.publish_queue_len();
        }
        self.events.publish(EngineEvent::ChunkProcessing {
            chunk_id: id.clone(),
        });
    }

    /// Store analysis for a chunk and mark it fresh.
    ///
    /// If the chunk was re-dirtied while processing, the result is stored
    /// but the chunk stays dirty and queued.
    pub fn update_analysis(&mut self, id: &ChunkId, analysis: impl Into<Arc<AnalysisFragment>>) {
        let Some(record) = self.chunks.get_mut(id) else {
            return;
        };
        record.analysis = Some(analysis.into());
        record.last_processed_at = Some(Utc::now());
        record.error_message = None;
        let level = record.level;
        let parent = record.parent_id.clone();
        let has_children = !record.child_ids.is_empty();

        if self.superseded.remove(id) {
            record.status = ChunkStatus::Dirty;
            debug!(chunk = %id, "result stored, chunk was re-dirtied while processing");
            self.enqueue(id, level);
            return;
        }

        record.status = ChunkStatus::Fresh;
        if self.queue.remove(id) {
            self.publish_queue_len();
        }
        self.events.publish(EngineEvent::ChunkFresh {
            chunk_id: id.clone(),
        });

        if let Some(parent) = parent {
            self.try_aggregate(&parent);
        }
        if has_children && !level.is_aggregation_level() && !self.aggregates.contains_key(id) {
            self.try_aggregate(id);
        }
    }

    /// Put a chunk in error state; its last analysis stays readable
    pub fn mark_error(&mut self, id: &ChunkId, message: impl Into<String>) {
        let Some(record) = self.chunks.get_mut(id) else {
            return;
        };
        let message = message.into();
        if self.superseded.remove(id) {
            debug!(chunk = %id, %message, "error ignored, chunk was re-dirtied while processing");
            let level = record.level;
            self.enqueue(id, level);
            return;
        }
        record.status = ChunkStatus::Error;
        record.error_message = Some(message.clone());
        if self.queue.remove(id) {
            self.publish_queue_len();
        }
        self.events.publish(EngineEvent::ChunkError {
            chunk_id: id.clone(),
            message,
        });
    }

    /// Recompute the aggregate of `id` if every child is fresh.
    ///
    /// For `act`/`book` the aggregate also becomes the chunk's analysis, the
    /// chunk turns fresh and aggregation continues upward. Returns whether
    /// an aggregate was produced.
    pub fn try_aggregate(&mut self, id: &ChunkId) -> bool {
        let Some(record) = self.chunks.get(id) else {
            return false;
        };
        let mut children = Vec::with_capacity(record.child_ids.len());
        for child_id in &record.child_ids {
            let analysis = self
                .chunks
                .get(child_id)
                .filter(|c| c.is_fresh())
                .and_then(|c| c.analysis.as_deref());
            match analysis {
                Some(analysis) => children.push((child_id, analysis)),
                None => return false,
            }
        }
        let summary = AggregateSummary::from_children(id, &children);
        let level = record.level;
        let parent = record.parent_id.clone();

        let fragment = level
            .is_aggregation_level()
            .then(|| Arc::new(summary.to_fragment()));
        self.aggregates.insert(id.clone(), summary);
        self.events.publish(EngineEvent::AggregateUpdated {
            chunk_id: id.clone(),
        });

        let Some(fragment) = fragment else {
            return true;
        };
        if let Some(record) = self.chunks.get_mut(id) {
            record.analysis = Some(fragment);
            record.status = ChunkStatus::Fresh;
            record.last_processed_at = Some(Utc::now());
            record.error_message = None;
        }
        self.superseded.remove(id);
        if self.queue.remove(id) {
            self.publish_queue_len();
        }
        self.events.publish(EngineEvent::ChunkFresh {
            chunk_id: id.clone(),
        });
        if let Some(parent) = parent {
            self.try_aggregate(&parent);
        }
        true
    }

    /// Pop the next dirty chunk: smallest level first, then enqueue order
    pub fn dequeue_next(&mut self) -> Option<ChunkId> {
        let id = self.queue.pop()?;
        debug_assert!(
            self.chunks
                .get(&id)
                .map_or(false, |c| c.status == ChunkStatus::Dirty),
            "queued chunk {id} is not dirty"
        );
        self.publish_queue_len();
        Some(id)
    }

    /// Re-dirty every errored chunk so it re-enters the pipeline
    pub fn retry_errored_chunks(&mut self) -> Vec<ChunkId> {
        let errored: Vec<ChunkId> = self
            .chunks
            .values()
            .filter(|c| c.status == ChunkStatus::Error)
            .map(|c| c.id.clone())
            .collect();
        for id in &errored {
            self.mark_dirty(id);
        }
        errored
    }

    // --- Removal ---

    /// Remove a chunk and its whole subtree. The root cannot be removed.
    pub fn remove_chunk(&mut self, id: &ChunkId) -> Vec<ChunkId> {
        if *id == ChunkId::book() {
            return Vec::new();
        }
        let Some(record) = self.chunks.get(id) else {
            return Vec::new();
        };
        let parent = record.parent_id.clone();

        let mut subtree = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(record) = self.chunks.get(&current) {
                stack.extend(record.child_ids.iter().cloned());
            }
            subtree.push(current);
        }

        if let Some(parent) = &parent {
            self.unlink_child(parent, id);
        }
        for chunk_id in &subtree {
            self.detach(chunk_id);
        }
        self.publish_queue_len();
        self.propagate_dirty(parent.as_ref());
        self.debug_check();
        subtree
    }

    /// Drop one record and everything keyed by it
    fn detach(&mut self, id: &ChunkId) {
        self.chunks.remove(id);
        self.aggregates.remove(id);
        self.queue.remove(id);
        self.superseded.remove(id);
        self.events.publish(EngineEvent::ChunkRemoved {
            chunk_id: id.clone(),
        });
    }

    /// Reset to a tree holding only the root
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.aggregates.clear();
        self.queue.clear();
        self.superseded.clear();
        self.last_full_rebuild = None;
        self.edits_applied = 0;
        self.insert_root();
        self.publish_queue_len();
    }

    // --- Persistence ---

    pub fn export_state(&self) -> TreeSnapshot {
        TreeSnapshot {
            chunks: self.chunks.clone(),
            aggregates: self.aggregates.clone(),
            dirty_queue: self.queue.ids(),
            last_full_rebuild: self.last_full_rebuild,
            edits_applied: self.edits_applied,
        }
    }

    /// Replace the whole tree with a snapshot.
    ///
    /// Chunks that were processing when exported come back dirty. The queue
    /// keeps the persisted order; dirty chunks missing from it are appended.
    pub fn load_state(&mut self, snapshot: TreeSnapshot) {
        self.chunks = snapshot.chunks;
        self.aggregates = snapshot.aggregates;
        self.last_full_rebuild = snapshot.last_full_rebuild;
        self.edits_applied = snapshot.edits_applied;
        self.queue.clear();
        self.superseded.clear();

        if !self.chunks.contains_key(&ChunkId::book()) {
            self.insert_root();
        }
        for record in self.chunks.values_mut() {
            if record.status == ChunkStatus::Processing {
                record.status = ChunkStatus::Dirty;
            }
        }
        for id in &snapshot.dirty_queue {
            if let Some(record) = self
                .chunks
                .get(id)
                .filter(|r| r.status == ChunkStatus::Dirty)
            {
                self.queue.push(id.clone(), record.level);
            }
        }
        let stragglers: Vec<(ChunkId, ChunkLevel)> = self
            .chunks
            .values()
            .filter(|r| r.status == ChunkStatus::Dirty && !self.queue.contains(&r.id))
            .map(|r| (r.id.clone(), r.level))
            .collect();
        for (id, level) in stragglers {
            self.queue.push(id, level);
        }
        self.publish_queue_len();
        self.debug_check();
    }

    // --- Internals ---

    fn enqueue(&mut self, id: &ChunkId, level: ChunkLevel) {
        if self.queue.push(id.clone(), level) {
            self.events.publish(EngineEvent::ChunkDirty {
                chunk_id: id.clone(),
            });
            self.publish_queue_len();
        }
    }

    fn publish_queue_len(&self) {
        self.events.publish(EngineEvent::QueueUpdated {
            queue_len: self.queue.len(),
        });
    }

    /// Walk from `from` to the root clearing aggregates; aggregation levels
    /// also become dirty
    fn propagate_dirty(&mut self, from: Option<&ChunkId>) {
        let mut cursor = from.cloned();
        while let Some(id) = cursor {
            if self.aggregates.remove(&id).is_some() {
                debug!(chunk = %id, "aggregate invalidated");
            }
            let Some(record) = self.chunks.get_mut(&id) else {
                break;
            };
            let next = record.parent_id.clone();
            let level = record.level;
            let mut requeue = false;
            if level.is_aggregation_level() {
                match record.status {
                    ChunkStatus::Fresh => {
                        record.status = ChunkStatus::Dirty;
                        requeue = true;
                    }
                    ChunkStatus::Processing => {
                        record.status = ChunkStatus::Dirty;
                        self.superseded.insert(id.clone());
                        requeue = true;
                    }
                    ChunkStatus::Dirty => requeue = true,
                    ChunkStatus::Error => {}
                }
            }
            if requeue {
                self.enqueue(&id, level);
            }
            cursor = next;
        }
    }

    /// Check the structural invariants; the error names the first violation
    pub fn check_invariants(&self) -> Result<(), String> {
        let roots: Vec<&ChunkRecord> = self
            .chunks
            .values()
            .filter(|c| c.parent_id.is_none())
            .collect();
        if roots.len() != 1 || roots[0].id != ChunkId::book() {
            return Err(format!("expected a single book root, found {}", roots.len()));
        }
        for record in self.chunks.values() {
            if let Some(parent_id) = &record.parent_id {
                let linked = self
                    .chunks
                    .get(parent_id)
                    .map_or(false, |p| p.child_ids.contains(&record.id));
                if !linked {
                    return Err(format!("{} is not a child of its parent {parent_id}", record.id));
                }
            }
            for child_id in &record.child_ids {
                let back = self
                    .chunks
                    .get(child_id)
                    .map_or(false, |c| c.parent_id.as_ref() == Some(&record.id));
                if !back {
                    return Err(format!("child {child_id} of {} does not point back", record.id));
                }
            }
            if record.status == ChunkStatus::Fresh && record.analysis.is_none() {
                return Err(format!("{} is fresh without analysis", record.id));
            }
        }
        for id in self.queue.ids() {
            let dirty = self
                .chunks
                .get(&id)
                .map_or(false, |c| c.status == ChunkStatus::Dirty);
            if !dirty {
                return Err(format!("queued chunk {id} is not dirty"));
            }
        }
        Ok(())
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.check_invariants(), Ok(()));
    }
}

impl Default for ChunkTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SceneKind;
    use crate::chunk::drain_events;

    fn fragment(id: &ChunkId, words: usize) -> AnalysisFragment {
        let mut f = AnalysisFragment::empty(id.as_str());
        f.word_count = words;
        f
    }

    fn scene(index: usize, start: usize, end: usize) -> SceneBoundary {
        SceneBoundary {
            index,
            kind: if index == 0 {
                SceneKind::Opening
            } else {
                SceneKind::Break
            },
            start,
            end,
            pov: None,
            location: None,
        }
    }

    /// Process the queue the way the manager does, 10 words per leaf
    fn drain(tree: &mut ChunkTree) -> Vec<ChunkId> {
        let mut order = Vec::new();
        while let Some(id) = tree.dequeue_next() {
            let level = tree.get_chunk(&id).unwrap().level;
            tree.mark_processing(&id);
            if level.is_aggregation_level() {
                if !tree.try_aggregate(&id) {
                    tree.mark_error(&id, "children not ready");
                }
            } else {
                tree.update_analysis(&id, fragment(&id, 10));
            }
            order.push(id);
        }
        order
    }

    const TEXT_A: &str = "First scene.\n***\nSecond scene.";

    /// book -> act-1 -> {chapter-a (2 scenes), chapter-b}
    fn sample_tree() -> ChunkTree {
        let mut tree = ChunkTree::new();
        let act = tree.ensure_act(1);
        tree.register_chunk(
            ChunkId::chapter("a"),
            ChunkLevel::Chapter,
            0,
            TEXT_A.len(),
            TEXT_A,
            Some(act.clone()),
        );
        tree.register_chunk(ChunkId::chapter("b"), ChunkLevel::Chapter, 0, 5, "hello", Some(act));
        tree.register_scenes_for_chapter("a", TEXT_A, &[scene(0, 0, 12), scene(1, 17, 30)], false);
        tree
    }

    #[test]
    fn new_tree_has_fresh_root() {
        let tree = ChunkTree::new();
        let root = tree.get_chunk(&ChunkId::book()).unwrap();
        assert_eq!(root.status, ChunkStatus::Fresh);
        assert!(root.analysis.is_some());
        assert!(root.parent_id.is_none());
        assert!(tree.get_aggregate(&ChunkId::book()).is_none());
        assert_eq!(tree.queue_len(), 0);
    }

    #[test]
    fn register_chunk_links_and_queues() {
        let mut tree = ChunkTree::new();
        let mut rx = tree.events().subscribe();
        let record = tree.register_chunk(
            ChunkId::chapter("x"),
            ChunkLevel::Chapter,
            0,
            4,
            "text",
            None,
        );
        assert_eq!(record.status, ChunkStatus::Dirty);
        assert_eq!(record.parent_id, Some(ChunkId::book()));

        let root = tree.get_chunk(&ChunkId::book()).unwrap();
        assert_eq!(root.child_ids, vec![ChunkId::chapter("x")]);
        assert_eq!(root.status, ChunkStatus::Dirty);
        assert!(tree.is_queued(&ChunkId::chapter("x")));

        let events = drain_events(&mut rx);
        assert!(events.contains(&EngineEvent::ChunkDirty {
            chunk_id: ChunkId::chapter("x")
        }));
    }

    #[test]
    fn unknown_parent_falls_back_to_book() {
        let mut tree = ChunkTree::new();
        let record = tree.register_chunk(
            ChunkId::chapter("x"),
            ChunkLevel::Chapter,
            0,
            0,
            "",
            Some(ChunkId::act(9)),
        );
        assert_eq!(record.parent_id, Some(ChunkId::book()));
    }

    #[test]
    fn apply_edit_with_same_text_is_idempotent() {
        let mut tree = ChunkTree::new();
        let edit = EditDescriptor {
            start: 0,
            end: 5,
            new_length: 5,
            chapter_id: "ch1".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(tree.apply_edit(&edit, "hello"), vec![ChunkId::chapter("ch1")]);
        drain(&mut tree);
        let before = tree.get_chunk(&ChunkId::chapter("ch1")).unwrap().clone();

        assert!(tree.apply_edit(&edit, "hello").is_empty());
        assert_eq!(tree.get_chunk(&ChunkId::chapter("ch1")).unwrap(), &before);
        assert_eq!(tree.queue_len(), 0);

        assert_eq!(tree.apply_edit(&edit, "hullo").len(), 1);
        let after = tree.get_chunk(&ChunkId::chapter("ch1")).unwrap();
        assert_eq!(after.status, ChunkStatus::Dirty);
        assert_ne!(after.content_hash, before.content_hash);
    }

    #[test]
    fn draining_bubbles_aggregates_to_root() {
        let mut tree = sample_tree();
        drain(&mut tree);

        assert_eq!(tree.stats().dirty, 0);
        assert_eq!(tree.stats().fresh, tree.stats().total_chunks);
        assert!(tree.get_aggregate(&ChunkId::chapter("a")).is_some());
        assert_eq!(
            tree.get_aggregate(&ChunkId::act(1)).unwrap().total_word_count,
            20
        );
        assert_eq!(tree.get_aggregate(&ChunkId::book()).unwrap().total_word_count, 20);
        assert_eq!(
            tree.get_chunk(&ChunkId::book())
                .unwrap()
                .analysis
                .as_ref()
                .unwrap()
                .word_count,
            20
        );
        assert_eq!(tree.check_invariants(), Ok(()));
    }

    #[test]
    fn dirty_propagation_reaches_root_but_not_siblings() {
        let mut tree = sample_tree();
        drain(&mut tree);
        let sibling = ChunkId::scene("a", 1);
        let sibling_analysis = tree.get_chunk(&sibling).unwrap().analysis.clone().unwrap();

        assert!(tree.mark_dirty(&ChunkId::scene("a", 0)));

        for ancestor in [ChunkId::chapter("a"), ChunkId::act(1), ChunkId::book()] {
            assert!(tree.get_aggregate(&ancestor).is_none(), "{ancestor} kept its aggregate");
        }
        let chapter = tree.get_chunk(&ChunkId::chapter("a")).unwrap();
        assert_eq!(chapter.status, ChunkStatus::Fresh);
        assert!(chapter.analysis.is_some());
        assert_eq!(tree.get_chunk(&ChunkId::act(1)).unwrap().status, ChunkStatus::Dirty);
        assert_eq!(tree.get_chunk(&ChunkId::book()).unwrap().status, ChunkStatus::Dirty);

        let sibling = tree.get_chunk(&sibling).unwrap();
        assert_eq!(sibling.status, ChunkStatus::Fresh);
        assert!(Arc::ptr_eq(sibling.analysis.as_ref().unwrap(), &sibling_analysis));
        assert_eq!(
            tree.get_chunk(&ChunkId::chapter("b")).unwrap().status,
            ChunkStatus::Fresh
        );
    }

    #[test]
    fn aggregation_requires_every_child_fresh() {
        let mut tree = sample_tree();
        let chapter = ChunkId::chapter("a");
        tree.update_analysis(&ChunkId::scene("a", 0), fragment(&chapter, 5));
        assert!(!tree.try_aggregate(&chapter));
        assert!(tree.get_aggregate(&chapter).is_none());

        tree.update_analysis(&ChunkId::scene("a", 1), fragment(&chapter, 7));
        assert_eq!(tree.get_aggregate(&chapter).unwrap().total_word_count, 12);

        tree.remove_chunk(&ChunkId::scene("a", 1));
        assert!(tree.get_aggregate(&chapter).is_none());
        assert!(tree.try_aggregate(&chapter));
        assert_eq!(tree.get_aggregate(&chapter).unwrap().child_count, 1);
    }

    #[test]
    fn dequeue_prefers_smaller_levels() {
        let tree_order = drain(&mut sample_tree());
        let levels: Vec<&str> = tree_order
            .iter()
            .map(|id| id.as_str())
            .collect();
        // act and book become fresh through aggregation before they are dequeued
        assert_eq!(
            levels,
            vec!["chapter-a-scene-0", "chapter-a-scene-1", "chapter-a", "chapter-b"]
        );
    }

    #[test]
    fn redirtied_during_processing_stays_dirty() {
        let mut tree = ChunkTree::new();
        tree.register_chunk(ChunkId::chapter("x"), ChunkLevel::Chapter, 0, 4, "text", None);
        let id = tree.dequeue_next().unwrap();
        assert_eq!(id, ChunkId::chapter("x"));

        tree.mark_processing(&id);
        tree.mark_dirty(&id);
        tree.update_analysis(&id, fragment(&id, 3));

        let record = tree.get_chunk(&id).unwrap();
        assert_eq!(record.status, ChunkStatus::Dirty);
        assert_eq!(record.analysis.as_ref().unwrap().word_count, 3);
        assert!(tree.is_queued(&id));

        tree.dequeue_next();
        tree.mark_processing(&id);
        tree.update_analysis(&id, fragment(&id, 4));
        assert_eq!(tree.get_chunk(&id).unwrap().status, ChunkStatus::Fresh);
    }

    #[test]
    fn errors_keep_last_analysis_and_can_be_retried() {
        let mut tree = sample_tree();
        drain(&mut tree);
        let id = ChunkId::chapter("b");
        tree.mark_dirty(&id);
        tree.mark_processing(&id);
        tree.mark_error(&id, "boom");

        let record = tree.get_chunk(&id).unwrap();
        assert_eq!(record.status, ChunkStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
        assert!(record.analysis.is_some());
        assert!(!tree.is_queued(&id));

        assert_eq!(tree.retry_errored_chunks(), vec![id.clone()]);
        let record = tree.get_chunk(&id).unwrap();
        assert_eq!(record.status, ChunkStatus::Dirty);
        assert!(record.error_message.is_none());
        assert!(tree.is_queued(&id));
    }

    #[test]
    fn scene_reuse_shares_analysis_for_unchanged_text() {
        let mut tree = sample_tree();
        drain(&mut tree);
        let kept = tree
            .get_chunk(&ChunkId::scene("a", 1))
            .unwrap()
            .analysis
            .clone()
            .unwrap();

        let edited = "Primary scene.\n***\nSecond scene.";
        tree.register_scenes_for_chapter("a", edited, &[scene(0, 0, 14), scene(1, 19, 32)], true);

        let first = tree.get_chunk(&ChunkId::scene("a", 0)).unwrap();
        assert_eq!(first.status, ChunkStatus::Dirty);
        let second = tree.get_chunk(&ChunkId::scene("a", 1)).unwrap();
        assert_eq!(second.status, ChunkStatus::Fresh);
        assert!(Arc::ptr_eq(second.analysis.as_ref().unwrap(), &kept));

        tree.register_scenes_for_chapter("a", edited, &[scene(0, 0, 14), scene(1, 19, 32)], false);
        assert_eq!(
            tree.get_chunk(&ChunkId::scene("a", 1)).unwrap().status,
            ChunkStatus::Dirty
        );
    }

    #[test]
    fn shifted_scene_reuse_is_relabeled() {
        let mut tree = sample_tree();
        drain(&mut tree);
        let old_second = tree
            .get_chunk(&ChunkId::scene("a", 1))
            .unwrap()
            .analysis
            .clone()
            .unwrap();

        // a new opening scene pushes both old scenes down one index
        let edited = "Opening.\n***\nFirst scene.\n***\nSecond scene.";
        tree.register_scenes_for_chapter(
            "a",
            edited,
            &[scene(0, 0, 8), scene(1, 13, 25), scene(2, 30, 43)],
            true,
        );

        assert_eq!(
            tree.get_chunk(&ChunkId::scene("a", 0)).unwrap().status,
            ChunkStatus::Dirty
        );
        for index in [1, 2] {
            let id = ChunkId::scene("a", index);
            let record = tree.get_chunk(&id).unwrap();
            assert_eq!(record.status, ChunkStatus::Fresh);
            assert_eq!(record.analysis.as_ref().unwrap().chunk_id, id.as_str());
        }
        let third = tree.get_chunk(&ChunkId::scene("a", 2)).unwrap();
        assert!(!Arc::ptr_eq(third.analysis.as_ref().unwrap(), &old_second));
        assert_eq!(third.analysis.as_ref().unwrap().word_count, old_second.word_count);
    }

    #[test]
    fn remove_chunk_drops_subtree() {
        let mut tree = sample_tree();
        let removed = tree.remove_chunk(&ChunkId::chapter("a"));
        assert_eq!(removed.len(), 3);
        assert!(!tree.contains(&ChunkId::scene("a", 0)));
        assert!(!tree.is_queued(&ChunkId::scene("a", 1)));
        assert_eq!(
            tree.get_chunk(&ChunkId::act(1)).unwrap().child_ids,
            vec![ChunkId::chapter("b")]
        );
        assert!(tree.remove_chunk(&ChunkId::book()).is_empty());
        assert_eq!(tree.check_invariants(), Ok(()));
    }

    #[test]
    fn missing_ids_are_noops() {
        let mut tree = ChunkTree::new();
        let ghost = ChunkId::from("ghost");
        assert!(!tree.mark_dirty(&ghost));
        tree.mark_processing(&ghost);
        tree.update_analysis(&ghost, AnalysisFragment::empty("ghost"));
        tree.mark_error(&ghost, "nope");
        assert!(!tree.try_aggregate(&ghost));
        assert!(tree.remove_chunk(&ghost).is_empty());
        assert_eq!(tree.stats().total_chunks, 1);
    }

    #[test]
    fn export_load_round_trip() {
        let mut tree = sample_tree();
        drain(&mut tree);
        tree.mark_dirty(&ChunkId::scene("a", 0));
        tree.set_last_full_rebuild(Utc::now());

        let snapshot = tree.export_state();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: TreeSnapshot = serde_json::from_str(&json).unwrap();

        let mut other = ChunkTree::new();
        other.load_state(restored);
        assert_eq!(other.stats(), tree.stats());
        assert_eq!(other.queue_ids(), tree.queue_ids());
        for record in tree.chunks() {
            assert_eq!(other.get_chunk(&record.id), Some(record));
        }
    }

    #[test]
    fn processing_chunks_load_as_dirty() {
        let mut tree = ChunkTree::new();
        tree.register_chunk(ChunkId::chapter("x"), ChunkLevel::Chapter, 0, 1, "x", None);
        let id = tree.dequeue_next().unwrap();
        tree.mark_processing(&id);

        let mut other = ChunkTree::new();
        other.load_state(tree.export_state());
        assert_eq!(other.get_chunk(&id).unwrap().status, ChunkStatus::Dirty);
        assert!(other.is_queued(&id));
    }

    #[test]
    fn clear_resets_to_root() {
        let mut tree = sample_tree();
        tree.clear();
        assert_eq!(tree.stats().total_chunks, 1);
        assert_eq!(tree.queue_len(), 0);
        assert_eq!(
            tree.get_chunk(&ChunkId::book()).unwrap().status,
            ChunkStatus::Fresh
        );
    }
}
