//! The incremental manager
//!
//! Owns the chunk tree, the per-chapter text cache and everything derived
//! from it. Edits flow through three timers, all plain deadlines on the
//! injected [`Clock`]:
//!
//! 1. **Debounce** (per chapter): keystrokes coalesce into one pending edit
//!    whose range is the union of every edit's range. When it fires the
//!    edit is committed: diff, policy decision, index update, scene
//!    re-parse.
//! 2. **Processing**: once something is dirty, waits until the idle
//!    threshold has passed since the last edit, then starts a batch.
//! 3. **Batch step**: up to `max_batch_size` chunks, one every
//!    `processing_interval_ms`. A batch stops early if an edit arrived
//!    within the idle threshold.
//!
//! Nothing here sleeps. [`IncrementalManager::tick`] fires whatever is due
//! and [`IncrementalManager::next_deadline`] says when to call it again.

use super::clock::{Clock, TokioClock};
use super::config::ManagerConfig;
use super::error::{EngineError, EngineResult};
use super::snapshot::{EngineSnapshot, ManagerStats, PendingEditSnapshot};
use crate::analysis::analyzers::SceneParser;
use crate::analysis::{AnalysisFragment, ChunkAnalyzer, EntityGraph, PlotPromise};
use crate::chunk::{
    AggregateSummary, ChunkId, ChunkLevel, ChunkRecord, ChunkStatus, ChunkTree, EditDescriptor,
    EngineEvent, EventBus,
};
use crate::diff::{diff, Delta};
use crate::policy::{
    patch_entity_graph, IncrementalPolicy, PolicyConfig, PolicyDecision, StructuralFingerprint,
};
use crate::pool::{AnalysisJob, WorkerPool};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Range;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct PendingEdit {
    text: String,
    start: usize,
    end: usize,
    deadline_ms: u64,
}

#[derive(Debug, Clone)]
struct BatchState {
    remaining: usize,
    processed: usize,
    next_at_ms: u64,
}

/// What one call to [`IncrementalManager::tick`] did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Chapters whose pending edits were committed
    pub committed: Vec<String>,
    /// Chunks processed, in order
    pub processed: Vec<ChunkId>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.processed.is_empty()
    }
}

pub struct IncrementalManager {
    config: ManagerConfig,
    tree: ChunkTree,
    texts: BTreeMap<String, Arc<str>>,
    fingerprints: HashMap<String, StructuralFingerprint>,
    entity_graphs: HashMap<String, EntityGraph>,
    /// Entities touched by commits since the chapter was last analyzed
    touched_entities: HashMap<String, BTreeSet<String>>,
    deltas: HashMap<String, Delta>,
    decisions: HashMap<String, PolicyDecision>,
    pending: BTreeMap<String, PendingEdit>,
    processing_deadline: Option<u64>,
    batch: Option<BatchState>,
    last_edit_ms: Option<u64>,
    paused: bool,
    destroyed: bool,
    analyzer: Arc<dyn ChunkAnalyzer>,
    parser: SceneParser,
    policy: IncrementalPolicy,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl IncrementalManager {
    /// Manager with default timing and policy on the tokio clock
    pub fn new(analyzer: Arc<dyn ChunkAnalyzer>) -> Self {
        let events = EventBus::default();
        Self {
            config: ManagerConfig::default(),
            tree: ChunkTree::with_events(events.clone()),
            texts: BTreeMap::new(),
            fingerprints: HashMap::new(),
            entity_graphs: HashMap::new(),
            touched_entities: HashMap::new(),
            deltas: HashMap::new(),
            decisions: HashMap::new(),
            pending: BTreeMap::new(),
            processing_deadline: None,
            batch: None,
            last_edit_ms: None,
            paused: false,
            destroyed: false,
            analyzer,
            parser: SceneParser::new(),
            policy: IncrementalPolicy::default(),
            clock: Arc::new(TokioClock::new()),
            events,
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_policy(mut self, config: PolicyConfig) -> Self {
        self.policy = IncrementalPolicy::new(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn tree(&self) -> &ChunkTree {
        &self.tree
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // --- Chapters and edits ---

    /// Index a chapter directly under `book`, replacing any previous text
    pub fn register_chapter(&mut self, chapter_id: &str, text: &str) -> Vec<ChunkId> {
        self.register_chapter_under(chapter_id, None, text)
    }

    /// Index a chapter under `act-<act>`, creating the act if needed
    pub fn register_chapter_in_act(&mut self, chapter_id: &str, act: u32, text: &str) -> Vec<ChunkId> {
        if self.destroyed {
            return Vec::new();
        }
        let act_id = self.tree.ensure_act(act);
        self.register_chapter_under(chapter_id, Some(act_id), text)
    }

    fn register_chapter_under(
        &mut self,
        chapter_id: &str,
        parent: Option<ChunkId>,
        text: &str,
    ) -> Vec<ChunkId> {
        if self.destroyed {
            return Vec::new();
        }
        self.pending.remove(chapter_id);
        let id = ChunkId::chapter(chapter_id);
        let parent = parent.or_else(|| self.tree.get_chunk(&id).and_then(|c| c.parent_id.clone()));
        self.tree
            .register_chunk(id.clone(), ChunkLevel::Chapter, 0, text.len(), text, parent);

        let scenes = self.parser.parse(text);
        let mut registered = vec![id];
        registered.extend(
            self.tree
                .register_scenes_for_chapter(chapter_id, text, &scenes, false),
        );

        self.texts.insert(chapter_id.to_string(), Arc::from(text));
        self.fingerprints
            .insert(chapter_id.to_string(), StructuralFingerprint::new(text, scenes));
        self.deltas.remove(chapter_id);
        self.decisions.remove(chapter_id);
        self.touched_entities.remove(chapter_id);

        info!(
            chapter = chapter_id,
            bytes = text.len(),
            scenes = registered.len() - 1,
            "chapter registered"
        );
        let now = self.clock.now_ms();
        self.arm_processing(now);
        registered
    }

    /// Buffer an edit. `new_text` is the whole chapter after the edit and
    /// `[start, end)` the range the editor touched.
    ///
    /// Edits to the same chapter coalesce: the latest text wins and ranges
    /// merge. The debounce and processing timers restart.
    pub fn handle_edit(&mut self, chapter_id: &str, new_text: impl Into<String>, start: usize, end: usize) {
        if self.destroyed {
            return;
        }
        let now = self.clock.now_ms();
        let deadline_ms = now + self.config.debounce_ms;
        let text = new_text.into();
        let (start, end) = (start.min(end), start.max(end));

        match self.pending.get_mut(chapter_id) {
            Some(pending) => {
                pending.text = text;
                pending.start = pending.start.min(start);
                pending.end = pending.end.max(end);
                pending.deadline_ms = deadline_ms;
            }
            None => {
                self.pending.insert(
                    chapter_id.to_string(),
                    PendingEdit {
                        text,
                        start,
                        end,
                        deadline_ms,
                    },
                );
            }
        }

        self.last_edit_ms = Some(now);
        if self.processing_deadline.is_some() {
            self.processing_deadline = Some(now + self.config.idle_threshold_ms);
        }
        self.events.publish(EngineEvent::EditQueued {
            chapter_id: chapter_id.to_string(),
        });
        debug!(chapter = chapter_id, start, end, "edit buffered");
    }

    /// Whether a chapter has an uncommitted edit
    pub fn has_pending_edit(&self, chapter_id: &str) -> bool {
        self.pending.contains_key(chapter_id)
    }

    fn commit(&mut self, chapter_id: &str, edit: PendingEdit) {
        let now = self.clock.now_ms();
        let old_text = self.texts.get(chapter_id).cloned();
        let result = diff(old_text.as_deref().unwrap_or(""), &edit.text);
        let prev_fingerprint = self.fingerprints.get(chapter_id).cloned();
        let decision = self.policy.decide(prev_fingerprint.as_ref(), &result.changes);

        let chapter = ChunkId::chapter(chapter_id);
        let known_promises: Vec<PlotPromise> = self
            .tree
            .get_chunk(&chapter)
            .and_then(|c| c.analysis.as_ref())
            .map(|a| a.promises.clone())
            .unwrap_or_default();
        let delta = Delta::build(
            &result,
            &edit.text,
            self.entity_graphs.get(chapter_id),
            &known_promises,
        );
        self.touched_entities
            .entry(chapter_id.to_string())
            .or_default()
            .extend(delta.affected_entity_ids.iter().cloned());

        let text: Arc<str> = Arc::from(edit.text);
        self.texts.insert(chapter_id.to_string(), Arc::clone(&text));
        let descriptor = EditDescriptor {
            start: edit.start,
            end: edit.end,
            new_length: text.len(),
            chapter_id: chapter_id.to_string(),
            timestamp: Utc::now(),
        };

        let mut dirty = self.tree.apply_edit(&descriptor, &text);
        if !dirty.is_empty() {
            let mut scenes = self.parser.parse(&text);
            if let Some(prev) = prev_fingerprint.as_ref().filter(|_| decision.is_patch()) {
                self.policy.carry_forward(&prev.scenes, &mut scenes);
            }
            let created = self.tree.register_scenes_for_chapter(
                chapter_id,
                &text,
                &scenes,
                decision.is_patch(),
            );
            dirty.extend(created.into_iter().filter(|id| self.tree.is_queued(id)));
            self.fingerprints
                .insert(chapter_id.to_string(), StructuralFingerprint::new(&text, scenes));
        }

        info!(
            chapter = chapter_id,
            mode = %decision.mode,
            reason = decision.reason.as_deref().unwrap_or(""),
            changes = result.changes.len(),
            dirty = dirty.len(),
            "edit committed"
        );
        self.events.publish(EngineEvent::EditCommitted {
            chapter_id: chapter_id.to_string(),
            mode: decision.mode.to_string(),
            dirty,
        });
        self.decisions.insert(chapter_id.to_string(), decision);
        self.deltas.insert(chapter_id.to_string(), delta);
        self.arm_processing(now);
    }

    /// Remove a chapter with all its scenes and cached state
    pub fn remove_chapter(&mut self, chapter_id: &str) -> bool {
        self.pending.remove(chapter_id);
        let had_text = self.texts.remove(chapter_id).is_some();
        self.fingerprints.remove(chapter_id);
        self.entity_graphs.remove(chapter_id);
        self.touched_entities.remove(chapter_id);
        self.deltas.remove(chapter_id);
        self.decisions.remove(chapter_id);
        let removed = self.tree.remove_chunk(&ChunkId::chapter(chapter_id));
        if !removed.is_empty() {
            info!(chapter = chapter_id, chunks = removed.len(), "chapter removed");
        }
        let now = self.clock.now_ms();
        self.arm_processing(now);
        had_text || !removed.is_empty()
    }

    // --- Timers ---

    /// Fire every timer that is due
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.paused || self.destroyed {
            return outcome;
        }
        let now = self.clock.now_ms();

        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline_ms <= now)
            .map(|(chapter, _)| chapter.clone())
            .collect();
        for chapter in due {
            if let Some(edit) = self.pending.remove(&chapter) {
                self.commit(&chapter, edit);
                outcome.committed.push(chapter);
            }
        }

        if self.processing_deadline.map_or(false, |d| d <= now) {
            self.processing_deadline = None;
            self.start_batch(now);
        }
        self.step_batch(now, &mut outcome);
        outcome
    }

    /// Earliest pending deadline, in clock milliseconds
    pub fn next_deadline(&self) -> Option<u64> {
        if self.paused || self.destroyed {
            return None;
        }
        self.pending
            .values()
            .map(|p| p.deadline_ms)
            .chain(self.processing_deadline)
            .chain(self.batch.as_ref().map(|b| b.next_at_ms))
            .min()
    }

    /// Milliseconds until the idle threshold has passed since the last edit
    fn idle_remaining(&self, now: u64) -> Option<u64> {
        let ready = self.last_edit_ms? + self.config.idle_threshold_ms;
        (ready > now).then(|| ready - now)
    }

    fn arm_processing(&mut self, now: u64) {
        if self.paused || self.destroyed || self.batch.is_some() || self.tree.queue_len() == 0 {
            return;
        }
        let deadline = now + self.idle_remaining(now).unwrap_or(0);
        self.processing_deadline = Some(deadline);
        debug!(deadline, queue = self.tree.queue_len(), "processing armed");
    }

    fn start_batch(&mut self, now: u64) {
        if self.batch.is_some() || self.tree.queue_len() == 0 {
            return;
        }
        if let Some(wait) = self.idle_remaining(now) {
            self.processing_deadline = Some(now + wait);
            return;
        }
        self.batch = Some(BatchState {
            remaining: self.config.max_batch_size.max(1),
            processed: 0,
            next_at_ms: now,
        });
        self.events.publish(EngineEvent::BatchStarted {
            queue_len: self.tree.queue_len(),
        });
        debug!(queue = self.tree.queue_len(), "batch started");
    }

    fn step_batch(&mut self, now: u64, outcome: &mut TickOutcome) {
        loop {
            let due = matches!(&self.batch, Some(b) if b.next_at_ms <= now);
            if !due {
                return;
            }
            if self.idle_remaining(now).is_some() {
                self.finish_batch(now, true);
                return;
            }
            let Some(id) = self.tree.dequeue_next() else {
                self.finish_batch(now, false);
                return;
            };
            self.process_chunk(&id);
            outcome.processed.push(id);

            let interval = self.config.processing_interval_ms;
            let exhausted = match self.batch.as_mut() {
                Some(batch) => {
                    batch.processed += 1;
                    batch.remaining = batch.remaining.saturating_sub(1);
                    batch.next_at_ms = now + interval;
                    batch.remaining == 0
                }
                None => true,
            };
            if exhausted || self.tree.queue_len() == 0 {
                self.finish_batch(now, false);
                return;
            }
        }
    }

    fn finish_batch(&mut self, now: u64, aborted: bool) {
        let Some(batch) = self.batch.take() else {
            return;
        };
        self.events.publish(EngineEvent::BatchFinished {
            processed: batch.processed,
            aborted,
        });
        debug!(processed = batch.processed, aborted, "batch finished");
        if self.tree.queue_len() > 0 {
            let wait = self
                .idle_remaining(now)
                .unwrap_or(self.config.processing_interval_ms);
            self.processing_deadline = Some(now + wait);
        }
    }

    // --- Processing ---

    /// Analyze (leaf) or aggregate (act/book) one chunk. Failures become the
    /// chunk's error state; returns whether the chunk ended up processed.
    fn process_chunk(&mut self, id: &ChunkId) -> bool {
        let Some(level) = self.tree.get_chunk(id).map(|c| c.level) else {
            return false;
        };
        self.tree.mark_processing(id);

        let result = if level.is_aggregation_level() {
            if self.tree.try_aggregate(id) {
                Ok(())
            } else {
                Err(EngineError::ChildrenNotReady(id.clone()))
            }
        } else {
            self.analyze_chunk(id, level)
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(chunk = %id, error = %err, "chunk processing failed");
                self.tree.mark_error(id, err.to_string());
                false
            }
        }
    }

    fn analyze_chunk(&mut self, id: &ChunkId, level: ChunkLevel) -> EngineResult<()> {
        let (chapter_key, text, range) = self.resolve_text(id)?;
        let slice = &text[range.clone()];
        let mut fragment = self.analyzer.analyze(slice, id.as_str())?;

        // scene metadata the analyzer missed comes from the fingerprint,
        // which holds what was carried forward at commit
        if level == ChunkLevel::Scene {
            if let Some(fingerprint) = self.fingerprints.get_mut(&chapter_key) {
                fingerprint.refine_scene(
                    range.start,
                    fragment.pov.as_deref(),
                    fragment.location.as_deref(),
                );
                if let Some(known) = fingerprint.scene_at(range.start) {
                    if fragment.pov.is_none() {
                        fragment.pov = known.pov.clone();
                    }
                    if fragment.location.is_none() {
                        fragment.location = known.location.clone();
                    }
                }
            }
        }

        let fragment = Arc::new(fragment);
        self.tree.update_analysis(id, Arc::clone(&fragment));
        if level == ChunkLevel::Chapter {
            self.refresh_entity_graph(&chapter_key, &fragment, slice);
        }
        Ok(())
    }

    /// The chapter key, the chapter text and the chunk's byte range in it
    fn resolve_text(&self, id: &ChunkId) -> EngineResult<(String, Arc<str>, Range<usize>)> {
        let record = self
            .tree
            .get_chunk(id)
            .ok_or_else(|| EngineError::ChunkNotFound(id.clone()))?;
        let chapter_id = match record.level {
            ChunkLevel::Scene => record
                .parent_id
                .clone()
                .ok_or_else(|| EngineError::MissingText(id.to_string()))?,
            _ => record.id.clone(),
        };
        let key = chapter_id
            .chapter_key()
            .ok_or_else(|| EngineError::MissingText(chapter_id.to_string()))?
            .to_string();
        let text = self
            .texts
            .get(&key)
            .cloned()
            .ok_or_else(|| EngineError::MissingText(key.clone()))?;

        let range = match record.level {
            ChunkLevel::Scene => record.start_index..record.end_index,
            _ => 0..text.len(),
        };
        if text.get(range.clone()).is_none() {
            return Err(EngineError::InvalidBounds {
                chunk: id.clone(),
                start: range.start,
                end: range.end,
                len: text.len(),
            });
        }
        Ok((key, text, range))
    }

    fn refresh_entity_graph(&mut self, chapter_key: &str, fragment: &AnalysisFragment, text: &str) {
        let fresh = EntityGraph::from_fragment(fragment, text);
        let affected: Vec<String> = self
            .touched_entities
            .remove(chapter_key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let graph = match self.entity_graphs.get(chapter_key) {
            Some(prev) => {
                let decision = self.policy.decide_entities(&affected, prev.entity_count());
                if decision.is_patch() {
                    patch_entity_graph(prev, fresh, &affected)
                } else {
                    debug!(
                        chapter = chapter_key,
                        reason = decision.reason.as_deref().unwrap_or(""),
                        "entity graph rebuilt"
                    );
                    fresh
                }
            }
            None => fresh,
        };
        self.entity_graphs.insert(chapter_key.to_string(), graph);
    }

    // --- Manual controls ---

    /// Commit every pending edit and drain the queue now, ignoring idle
    /// gating. Returns the number of chunks processed.
    pub fn process_all_dirty(&mut self) -> usize {
        if self.destroyed {
            return 0;
        }
        let pending = std::mem::take(&mut self.pending);
        for (chapter_id, edit) in pending {
            self.commit(&chapter_id, edit);
        }
        self.batch = None;

        let mut processed = 0;
        while let Some(id) = self.tree.dequeue_next() {
            self.process_chunk(&id);
            processed += 1;
        }
        self.processing_deadline = None;
        self.tree.set_last_full_rebuild(Utc::now());
        info!(processed, errored = self.tree.stats().errored, "processed all dirty chunks");
        processed
    }

    /// Process one chunk immediately, whatever its status
    pub fn reprocess_chunk(&mut self, id: &ChunkId) -> bool {
        if self.destroyed || !self.tree.contains(id) {
            return false;
        }
        self.process_chunk(id)
    }

    /// Store a chapter analysis computed outside the manager, typically by
    /// a [`WorkerPool`](crate::pool::WorkerPool) during a bulk run.
    ///
    /// Accepted only when `analyzed_text` is the chapter's committed text
    /// and no edit is pending. The chapter turns fresh without an analyzer
    /// call; its scenes are untouched.
    pub fn apply_chapter_analysis(
        &mut self,
        chapter_id: &str,
        analyzed_text: &str,
        fragment: Arc<AnalysisFragment>,
    ) -> bool {
        if self.destroyed || self.pending.contains_key(chapter_id) {
            return false;
        }
        let text = match self.texts.get(chapter_id) {
            Some(text) if text.as_ref() == analyzed_text => Arc::clone(text),
            _ => {
                debug!(chapter = chapter_id, "stale chapter analysis ignored");
                return false;
            }
        };
        let id = ChunkId::chapter(chapter_id);
        if !self.tree.contains(&id) {
            return false;
        }
        let fragment = if fragment.chunk_id == id.as_str() {
            fragment
        } else {
            let mut moved = AnalysisFragment::clone(&fragment);
            moved.relabel(id.as_str());
            Arc::new(moved)
        };
        self.tree.mark_processing(&id);
        self.tree.update_analysis(&id, Arc::clone(&fragment));
        self.refresh_entity_graph(chapter_id, &fragment, &text);
        true
    }

    /// Analyze every dirty chapter through `pool` and store the results.
    ///
    /// Scenes stay queued for the normal dirty pass. Failed jobs leave their
    /// chapter dirty so the manager records the error itself. Returns the
    /// number of chapter analyses applied.
    pub async fn analyze_chapters_with(&mut self, pool: &WorkerPool) -> usize {
        if self.destroyed {
            return 0;
        }
        let jobs: Vec<AnalysisJob> = self
            .texts
            .iter()
            .filter(|(chapter_id, _)| !self.pending.contains_key(chapter_id.as_str()))
            .filter(|(chapter_id, _)| {
                self.tree
                    .get_chunk(&ChunkId::chapter(chapter_id.as_str()))
                    .is_some_and(|c| c.status == ChunkStatus::Dirty)
            })
            .map(|(chapter_id, text)| AnalysisJob::new(chapter_id.clone(), text.to_string()))
            .collect();
        if jobs.is_empty() {
            return 0;
        }
        let analyzed: HashMap<String, String> = jobs
            .iter()
            .map(|job| (job.chapter_id.clone(), job.text.clone()))
            .collect();

        let results = pool.process_chapters(jobs).await;
        let mut applied = 0;
        for (chapter_id, result) in results {
            match result {
                Ok(fragment) => {
                    let text = analyzed.get(&chapter_id).map(String::as_str).unwrap_or_default();
                    if self.apply_chapter_analysis(&chapter_id, text, fragment) {
                        applied += 1;
                    }
                }
                Err(e) => debug!(chapter = %chapter_id, error = %e, "pooled chapter analysis failed"),
            }
        }
        info!(applied, stats = ?pool.stats(), "pooled chapter analyses applied");
        applied
    }

    /// Stop all timers. Dirty state and pending edits are kept.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        let now = self.clock.now_ms();
        self.finish_batch(now, true);
        self.processing_deadline = None;
        info!("manager paused");
    }

    /// Restart timers: pending edits get a fresh debounce and processing is
    /// re-armed if anything is dirty
    pub fn resume(&mut self) {
        if !self.paused || self.destroyed {
            return;
        }
        self.paused = false;
        let now = self.clock.now_ms();
        for pending in self.pending.values_mut() {
            pending.deadline_ms = now + self.config.debounce_ms;
        }
        self.arm_processing(now);
        info!(pending = self.pending.len(), queue = self.tree.queue_len(), "manager resumed");
    }

    /// Re-dirty every errored chunk
    pub fn retry_errors(&mut self) -> Vec<ChunkId> {
        let retried = self.tree.retry_errored_chunks();
        if !retried.is_empty() {
            info!(chunks = retried.len(), "retrying errored chunks");
            let now = self.clock.now_ms();
            self.arm_processing(now);
        }
        retried
    }

    fn reset_runtime(&mut self) {
        self.pending.clear();
        self.processing_deadline = None;
        self.batch = None;
        self.last_edit_ms = None;
        self.entity_graphs.clear();
        self.touched_entities.clear();
        self.deltas.clear();
        self.decisions.clear();
    }

    /// Drop every chapter and all derived state
    pub fn clear(&mut self) {
        self.reset_runtime();
        self.texts.clear();
        self.fingerprints.clear();
        self.tree.clear();
    }

    /// Clear and refuse further work
    pub fn destroy(&mut self) {
        self.clear();
        self.destroyed = true;
        info!("manager destroyed");
    }

    // --- Queries ---

    pub fn get_chunk(&self, id: &ChunkId) -> Option<&ChunkRecord> {
        self.tree.get_chunk(id)
    }

    pub fn get_chapter_chunk(&self, chapter_id: &str) -> Option<&ChunkRecord> {
        self.tree.get_chunk(&ChunkId::chapter(chapter_id))
    }

    pub fn get_aggregate(&self, id: &ChunkId) -> Option<&AggregateSummary> {
        self.tree.get_aggregate(id)
    }

    /// The innermost chunk at `offset` that has an analysis: the scene
    /// containing the cursor, else the chapter. Check `status` to tell
    /// fresh results from stale ones.
    pub fn get_analysis_at_cursor(&self, chapter_id: &str, offset: usize) -> Option<&ChunkRecord> {
        let chapter = self.get_chapter_chunk(chapter_id)?;
        self.tree
            .children(&chapter.id)
            .into_iter()
            .find(|s| {
                s.level == ChunkLevel::Scene
                    && s.analysis.is_some()
                    && s.start_index <= offset
                    && offset < s.end_index
            })
            .or_else(|| chapter.analysis.is_some().then_some(chapter))
    }

    /// Last analysis of every chapter that has one, keyed by chapter id
    pub fn get_all_chapter_analyses(&self) -> BTreeMap<String, Arc<AnalysisFragment>> {
        self.tree
            .chunks()
            .filter(|c| c.level == ChunkLevel::Chapter)
            .filter_map(|c| {
                let key = c.id.chapter_key()?;
                let analysis = c.analysis.as_ref()?;
                Some((key.to_string(), Arc::clone(analysis)))
            })
            .collect()
    }

    pub fn get_book_summary(&self) -> Option<&AggregateSummary> {
        self.tree.get_aggregate(&ChunkId::book())
    }

    pub fn get_stats(&self) -> ManagerStats {
        ManagerStats {
            tree: self.tree.stats(),
            chapters: self.texts.len(),
            pending_edits: self.pending.len(),
            batch_active: self.batch.is_some(),
            paused: self.paused,
        }
    }

    /// The delta recorded by the chapter's last commit
    pub fn get_delta(&self, chapter_id: &str) -> Option<&Delta> {
        self.deltas.get(chapter_id)
    }

    pub fn get_entity_graph(&self, chapter_id: &str) -> Option<&EntityGraph> {
        self.entity_graphs.get(chapter_id)
    }

    /// The policy decision taken by the chapter's last commit
    pub fn last_decision(&self, chapter_id: &str) -> Option<&PolicyDecision> {
        self.decisions.get(chapter_id)
    }

    pub fn fingerprint(&self, chapter_id: &str) -> Option<&StructuralFingerprint> {
        self.fingerprints.get(chapter_id)
    }

    /// Committed text of a chapter
    pub fn chapter_text(&self, chapter_id: &str) -> Option<&str> {
        self.texts.get(chapter_id).map(|t| t.as_ref())
    }

    // --- Persistence ---

    pub fn export_state(&self) -> EngineSnapshot {
        EngineSnapshot {
            tree: self.tree.export_state(),
            chapter_texts: self
                .texts
                .iter()
                .map(|(k, v)| (k.clone(), v.to_string()))
                .collect(),
            fingerprints: self
                .fingerprints
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            pending_edits: self
                .pending
                .iter()
                .map(|(k, p)| {
                    (
                        k.clone(),
                        PendingEditSnapshot {
                            text: p.text.clone(),
                            start: p.start,
                            end: p.end,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Replace all state with a snapshot.
    ///
    /// Missing fingerprints are rebuilt from the text; entity graphs are
    /// rebuilt from fresh chapter analyses. Pending edits get a fresh
    /// debounce.
    pub fn load_state(&mut self, snapshot: EngineSnapshot) {
        if self.destroyed {
            return;
        }
        let now = self.clock.now_ms();
        self.reset_runtime();
        self.tree.load_state(snapshot.tree);
        self.texts = snapshot
            .chapter_texts
            .into_iter()
            .map(|(k, v)| (k, Arc::from(v)))
            .collect();
        self.fingerprints = snapshot.fingerprints.into_iter().collect();

        for (key, text) in &self.texts {
            if !self.fingerprints.contains_key(key) {
                let scenes = self.parser.parse(text);
                self.fingerprints
                    .insert(key.clone(), StructuralFingerprint::new(text, scenes));
            }
            let analysis = self
                .tree
                .get_chunk(&ChunkId::chapter(key))
                .filter(|c| c.is_fresh())
                .and_then(|c| c.analysis.as_deref());
            if let Some(analysis) = analysis {
                self.entity_graphs
                    .insert(key.clone(), EntityGraph::from_fragment(analysis, text));
            }
        }

        for (key, edit) in snapshot.pending_edits {
            self.pending.insert(
                key,
                PendingEdit {
                    text: edit.text,
                    start: edit.start,
                    end: edit.end,
                    deadline_ms: now + self.config.debounce_ms,
                },
            );
        }
        if !self.pending.is_empty() {
            self.last_edit_ms = Some(now);
        }
        self.arm_processing(now);
        info!(
            chunks = self.tree.stats().total_chunks,
            chapters = self.texts.len(),
            pending = self.pending.len(),
            "state loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisError, AnalysisPipeline};
    use crate::chunk::drain_events;
    use crate::manager::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; fails on any text containing "FAIL"
    struct CountingAnalyzer {
        calls: AtomicUsize,
    }

    impl ChunkAnalyzer for CountingAnalyzer {
        fn id(&self) -> &str {
            "counting"
        }

        fn name(&self) -> &str {
            "Counting"
        }

        fn analyze(&self, text: &str, chunk_id: &str) -> Result<AnalysisFragment, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("FAIL") {
                return Err(AnalysisError::Internal("marker found".into()));
            }
            let mut fragment = AnalysisFragment::empty(chunk_id);
            fragment.word_count = text.split_whitespace().count();
            Ok(fragment)
        }
    }

    fn manager() -> (IncrementalManager, Arc<ManualClock>, Arc<CountingAnalyzer>) {
        let clock = Arc::new(ManualClock::new(0));
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
        });
        let manager =
            IncrementalManager::new(analyzer.clone()).with_clock(clock.clone() as Arc<dyn Clock>);
        (manager, clock, analyzer)
    }

    #[test]
    fn edits_coalesce_until_debounce_fires() {
        let (mut m, clock, _) = manager();
        m.register_chapter("ch1", "one two three");
        m.process_all_dirty();

        m.handle_edit("ch1", "one two three four", 13, 13);
        clock.advance(200);
        m.handle_edit("ch1", "one two three four five", 18, 18);
        assert!(m.has_pending_edit("ch1"));
        assert_eq!(m.next_deadline(), Some(700));

        clock.set(699);
        assert!(m.tick().committed.is_empty());
        clock.set(700);
        let outcome = m.tick();
        assert_eq!(outcome.committed, vec!["ch1".to_string()]);
        assert!(outcome.processed.is_empty());
        assert_eq!(m.chapter_text("ch1"), Some("one two three four five"));

        let delta = m.get_delta("ch1").unwrap();
        assert_eq!(delta.changed_ranges.len(), 1);
        assert_eq!(delta.changed_ranges[0].start, 13);
    }

    #[test]
    fn processing_waits_for_idle_threshold() {
        let (mut m, clock, _) = manager();
        m.register_chapter("ch1", "alpha beta");
        m.process_all_dirty();

        m.handle_edit("ch1", "alpha beta gamma", 10, 10);
        clock.set(500);
        m.tick();
        assert!(m.get_chapter_chunk("ch1").unwrap().status == ChunkStatus::Dirty);
        assert_eq!(m.next_deadline(), Some(1000));

        clock.set(999);
        assert!(m.tick().processed.is_empty());
        clock.set(1000);
        let outcome = m.tick();
        assert_eq!(outcome.processed.len(), 1);
    }

    #[test]
    fn batches_are_bounded_and_spaced() {
        let (mut m, clock, _) = manager();
        let text = "Scene one.\n***\nScene two.\n***\nScene three.\n***\nScene four.";
        m.register_chapter("ch1", text);
        // chapter, four scenes and the book are dirty
        assert_eq!(m.tree().queue_len(), 6);

        let first = m.tick();
        assert_eq!(first.processed.len(), 1);
        clock.set(50);
        assert_eq!(m.tick().processed.len(), 1);
        clock.set(100);
        assert_eq!(m.tick().processed.len(), 1);
        assert!(!m.get_stats().batch_active);

        // the next batch starts one interval later
        assert_eq!(m.next_deadline(), Some(150));
        for t in [150, 200, 250, 300] {
            clock.set(t);
            m.tick();
        }
        assert_eq!(m.get_stats().tree.dirty, 0);
        assert!(m.get_book_summary().is_some());
    }

    #[test]
    fn edit_during_batch_aborts_it() {
        let (mut m, clock, _) = manager();
        let mut rx = m.subscribe();
        m.register_chapter("ch1", "Scene one.\n***\nScene two.\n***\nScene three.");
        m.tick();
        m.handle_edit("ch1", "Scene one!\n***\nScene two.\n***\nScene three.", 9, 10);
        clock.set(50);
        let outcome = m.tick();
        assert!(outcome.processed.is_empty());
        assert!(drain_events(&mut rx).contains(&EngineEvent::BatchFinished {
            processed: 1,
            aborted: true
        }));
    }

    #[test]
    fn analyzer_failures_are_isolated() {
        let (mut m, _, analyzer) = manager();
        let mut rx = m.subscribe();
        m.register_chapter("ch1", "Good scene.\n***\nFAIL here.\n***\nAnother good one.");
        m.process_all_dirty();

        let bad = m.get_chunk(&ChunkId::scene("ch1", 1)).unwrap();
        assert_eq!(bad.status, ChunkStatus::Error);
        assert!(bad.error_message.as_deref().unwrap().contains("marker found"));
        assert_eq!(
            m.get_chunk(&ChunkId::scene("ch1", 2)).unwrap().status,
            ChunkStatus::Fresh
        );
        assert!(drain_events(&mut rx)
            .iter()
            .any(|e| matches!(e, EngineEvent::ChunkError { chunk_id, .. } if *chunk_id == ChunkId::scene("ch1", 1))));
        assert!(analyzer.calls.load(Ordering::SeqCst) >= 4);

        // the chapter contains the marker too, and the book cannot aggregate
        assert_eq!(
            m.get_chunk(&ChunkId::book()).unwrap().status,
            ChunkStatus::Error
        );
        assert_eq!(m.retry_errors().len(), 3);
        assert_eq!(m.get_stats().tree.errored, 0);
    }

    #[test]
    fn out_of_range_scene_becomes_error() {
        let (mut m, _, _) = manager();
        m.register_chapter("ch1", "First part.\n***\nSecond part.");
        let mut snapshot = m.export_state();
        snapshot.chapter_texts.insert("ch1".into(), "short".into());
        m.load_state(snapshot);

        assert!(!m.reprocess_chunk(&ChunkId::scene("ch1", 1)));
        let record = m.get_chunk(&ChunkId::scene("ch1", 1)).unwrap();
        assert_eq!(record.status, ChunkStatus::Error);
        assert!(record.error_message.as_deref().unwrap().contains("do not fit"));
    }

    #[test]
    fn pause_stops_timers_and_resume_rearms() {
        let (mut m, clock, _) = manager();
        m.register_chapter("ch1", "alpha");
        m.pause();
        assert_eq!(m.next_deadline(), None);
        assert!(m.tick().is_empty());
        assert_eq!(m.get_stats().tree.dirty, 3);

        clock.set(5_000);
        m.resume();
        assert_eq!(m.next_deadline(), Some(5_000));
        assert_eq!(m.tick().processed.len(), 1);
    }

    #[test]
    fn cursor_lookup_prefers_scene() {
        let pipeline: Arc<dyn ChunkAnalyzer> = Arc::new(AnalysisPipeline::with_builtin_analyzers());
        let mut m = IncrementalManager::new(pipeline).with_clock(Arc::new(ManualClock::new(0)));
        let text = "Mara ran.\n***\nTomas waited.";
        m.register_chapter("ch1", text);
        assert!(m.get_analysis_at_cursor("ch1", 3).is_none());

        m.process_all_dirty();
        assert_eq!(
            m.get_analysis_at_cursor("ch1", 3).unwrap().id,
            ChunkId::scene("ch1", 0)
        );
        assert_eq!(
            m.get_analysis_at_cursor("ch1", 20).unwrap().id,
            ChunkId::scene("ch1", 1)
        );
        // inside the break line
        assert_eq!(
            m.get_analysis_at_cursor("ch1", 11).unwrap().id,
            ChunkId::chapter("ch1")
        );
        assert!(m.get_analysis_at_cursor("nope", 0).is_none());
    }

    #[test]
    fn external_chapter_analysis_needs_current_text() {
        let (mut m, _, analyzer) = manager();
        m.register_chapter("ch1", "One scene.\n***\nTwo scenes.");
        let external = Arc::new(AnalysisFragment::empty("ch1"));

        assert!(!m.apply_chapter_analysis("ch1", "older text", Arc::clone(&external)));
        assert!(!m.apply_chapter_analysis("nope", "older text", Arc::clone(&external)));
        assert!(m.apply_chapter_analysis("ch1", "One scene.\n***\nTwo scenes.", external));

        let chapter = m.get_chapter_chunk("ch1").unwrap();
        assert_eq!(chapter.status, ChunkStatus::Fresh);
        assert_eq!(chapter.analysis.as_ref().unwrap().chunk_id, "chapter-ch1");
        assert!(!m.tree().is_queued(&chapter.id));

        // only the two scenes are left for the analyzer
        m.process_all_dirty();
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
        assert!(m.get_book_summary().is_some());

        m.handle_edit("ch1", "One scene.", 10, 10);
        assert!(!m.apply_chapter_analysis(
            "ch1",
            "One scene.\n***\nTwo scenes.",
            Arc::new(AnalysisFragment::empty("ch1"))
        ));
    }

    #[test]
    fn destroy_refuses_further_work() {
        let (mut m, _, _) = manager();
        m.register_chapter("ch1", "alpha");
        m.destroy();
        assert!(m.register_chapter("ch2", "beta").is_empty());
        m.handle_edit("ch1", "gamma", 0, 5);
        assert_eq!(m.process_all_dirty(), 0);
        assert_eq!(m.get_stats().tree.total_chunks, 1);
        assert_eq!(m.get_stats().pending_edits, 0);
    }
}
