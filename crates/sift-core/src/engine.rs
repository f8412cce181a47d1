//! The orchestrator: ties the merger, stamps, storage, snapshot cache,
//! and rebuild tracker together under concurrent readers and writers.
//!
//! Per (file, index) the engine drives a small state machine derived from
//! the stamp store and the rebuild tracker:
//!
//! ```text
//! NEVER_INDEXED -> INDEXING -> CURRENT
//! CURRENT -> OUTDATED            on any content/filter-relevant change
//! OUTDATED -> INDEXING -> CURRENT
//! any state -> REBUILD_PENDING   on version change or storage fault
//! REBUILD_PENDING -> (wipe index state) -> NEVER_INDEXED
//! ```
//!
//! "Never indexed" is an absent stamp, "current" a stamp equal to the
//! index's live creation stamp, "outdated" everything else; the rebuild
//! flag overrides them all.
//!
//! `ensure_up_to_date` performs any pending rebuild itself (it *is* the
//! full pass), drains the change merger, re-indexes every affected
//! in-scope file whose stamp is not current, and finally indexes unsaved
//! transient content through the buffered overlay. Queries take the
//! engine read lock and fail fast with `RebuildPending` while a rebuild
//! is outstanding — absent results during a rebuild mean "unknown", not
//! "empty".

use crate::changes::ChangeMerger;
use crate::config::EngineConfig;
use crate::corpus::{Corpus, TransientContent};
use crate::error::{Result, SiftError};
use crate::forward::ForwardIndex;
use crate::rebuild::RebuildTracker;
use crate::registry::{DiffMode, IndexDefinition, IndexInput, IndexRegistry};
use crate::scheduler::{SingleFlight, UpdateWorker};
use crate::snapshot::{content_hash, InputMap, SnapshotCache};
use crate::stamps::StampStore;
use crate::storage::BufferedStorage;
use crate::types::{CancelToken, ChangeMask, FileId, FileMeta, IndexName, KeyBytes, Scope, ValueBytes};
use crate::version::{VersionCheck, VersionStore};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, error, info, instrument, warn};

const CORRUPTION_MARKER: &str = "corruption.marker";

/// Work list size above which a pass indexes files in parallel.
const PARALLEL_THRESHOLD: usize = 64;

/// Per-index runtime state owned by the engine.
struct IndexSlot {
    def: Arc<IndexDefinition>,
    storage: BufferedStorage,
    forward: ForwardIndex,
    /// Files known stale for this index: the work queue of the next pass.
    dirty: dashmap::DashMap<FileId, ()>,
    /// Transient content applied to the overlay: file -> (doc version,
    /// the input map currently reflected there).
    transient_applied: Mutex<HashMap<FileId, (u64, InputMap)>>,
    indexer_failures: AtomicU32,
}

/// Outcome of one per-file update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOutcome {
    /// Data and stamp committed.
    Applied,
    /// Left for a later pass (indexer fault, rebuild pending, storage
    /// fault routed to the rebuild tracker).
    Skipped,
}

/// Diagnostic summary of one index.
#[derive(Debug, Clone)]
pub struct IndexStatus {
    /// Index name.
    pub name: IndexName,
    /// Live creation stamp, if the index has ever been built.
    pub creation_stamp: Option<u64>,
    /// Files queued for the next pass.
    pub dirty_files: usize,
    /// Whether a rebuild is outstanding.
    pub rebuild_pending: bool,
    /// Durable keys currently stored.
    pub key_count: usize,
}

/// Builder for [`Engine`]: explicit registration, then freeze-and-open.
pub struct EngineBuilder {
    root: PathBuf,
    config: EngineConfig,
    corpus: Arc<dyn Corpus>,
    definitions: Vec<IndexDefinition>,
}

impl EngineBuilder {
    /// Start building an engine rooted at `root` over `corpus`.
    pub fn new(root: impl AsRef<Path>, corpus: Arc<dyn Corpus>) -> Self {
        EngineBuilder {
            root: root.as_ref().to_path_buf(),
            config: EngineConfig::default(),
            corpus,
            definitions: Vec::new(),
        }
    }

    /// Override the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register one index. All registrations happen before `open`; the
    /// set is frozen for the engine's lifetime.
    pub fn register(mut self, definition: IndexDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Open the engine: corruption-marker check, per-index version
    /// checks, store opening, and the initial staleness sweep all run
    /// here, synchronously — a returned engine is fully bootstrapped.
    pub fn open(self) -> Result<Arc<Engine>> {
        Engine::open(self)
    }
}

/// The incremental indexing engine.
pub struct Engine {
    root: PathBuf,
    config: EngineConfig,
    corpus: Arc<dyn Corpus>,
    registry: IndexRegistry,
    slots: Vec<IndexSlot>,
    merger: ChangeMerger,
    stamps: StampStore,
    versions: VersionStore,
    rebuild: RebuildTracker,
    snapshot: Option<SnapshotCache>,
    transient: TransientContent,
    transient_versions: dashmap::DashMap<FileId, u64>,
    /// Queries take the read side; the per-file stamp commit takes the
    /// write side. Backend writes themselves proceed outside this lock.
    commit_lock: RwLock<()>,
    /// Re-entrancy ledger: (thread, index) pairs currently inside
    /// `ensure_up_to_date`.
    in_progress: Mutex<HashSet<(ThreadId, u16)>>,
    flight: SingleFlight,
    worker: Mutex<Option<UpdateWorker>>,
}

impl Engine {
    #[instrument(skip(builder), fields(root = %builder.root.display()))]
    fn open(builder: EngineBuilder) -> Result<Arc<Engine>> {
        let root = builder.root;
        std::fs::create_dir_all(&root)?;

        // A marker left behind by an unclean shutdown forces a full wipe
        // before any index is opened.
        let marker = root.join(CORRUPTION_MARKER);
        if marker.exists() {
            warn!(root = %root.display(), "corruption marker found; wiping index root");
            std::fs::remove_dir_all(&root)?;
            std::fs::create_dir_all(&root)?;
        }

        let registry = IndexRegistry::freeze(builder.definitions)?;
        let versions = VersionStore::new(&root);
        let stamps = StampStore::open(root.join("stamps.bin"), builder.config.stamp_flush_queue);
        let rebuild = RebuildTracker::new();
        let snapshot = if registry.has_content_addressed() {
            Some(SnapshotCache::open(root.join("snapshot"))?)
        } else {
            None
        };

        let mut slots = Vec::with_capacity(registry.len());
        for (ordinal, def) in registry.iter() {
            let index_dir = root.join(def.name.as_str());

            match versions.check(&def.name, def.schema_version)? {
                VersionCheck::Matches => {}
                VersionCheck::Missing => {
                    rebuild.request_rebuild(ordinal);
                }
                VersionCheck::Mismatch => {
                    // Schema or engine version changed: treat like
                    // corruption and start the index over.
                    info!(index = %def.name, "version mismatch; index will be rebuilt");
                    if index_dir.exists() {
                        std::fs::remove_dir_all(&index_dir)?;
                    }
                    versions.evict(&def.name);
                    rebuild.request_rebuild(ordinal);
                }
            }

            std::fs::create_dir_all(&index_dir)?;
            let storage = match BufferedStorage::open(index_dir.join("storage.bin")) {
                Ok(storage) => storage,
                Err(e) if e.requires_rebuild() => {
                    warn!(index = %def.name, error = %e, "storage unreadable; scheduling rebuild");
                    std::fs::remove_file(index_dir.join("storage.bin")).ok();
                    rebuild.request_rebuild(ordinal);
                    BufferedStorage::open(index_dir.join("storage.bin"))?
                }
                Err(e) => return Err(e),
            };
            let forward = match ForwardIndex::open(index_dir.join("forward.bin")) {
                Ok(forward) => forward,
                Err(e) if e.requires_rebuild() => {
                    warn!(index = %def.name, error = %e, "forward index unreadable; scheduling rebuild");
                    std::fs::remove_file(index_dir.join("forward.bin")).ok();
                    rebuild.request_rebuild(ordinal);
                    ForwardIndex::open(index_dir.join("forward.bin"))?
                }
                Err(e) => return Err(e),
            };

            slots.push(IndexSlot {
                def: Arc::clone(def),
                storage,
                forward,
                dirty: dashmap::DashMap::new(),
                transient_applied: Mutex::new(HashMap::new()),
                indexer_failures: AtomicU32::new(0),
            });
        }

        let engine = Arc::new(Engine {
            root: root.clone(),
            config: builder.config,
            corpus: builder.corpus,
            registry,
            slots,
            merger: ChangeMerger::new(),
            stamps,
            versions,
            rebuild,
            snapshot,
            transient: TransientContent::new(),
            transient_versions: dashmap::DashMap::new(),
            commit_lock: RwLock::new(()),
            in_progress: Mutex::new(HashSet::new()),
            flight: SingleFlight::new(),
            worker: Mutex::new(None),
        });

        engine.bootstrap_sweep()?;

        // Mark the root dirty until a clean close.
        std::fs::write(&marker, b"")?;

        let weak = Arc::downgrade(&engine);
        *engine.worker.lock() = Some(UpdateWorker::spawn(move |name| {
            if let Some(engine) = weak.upgrade() {
                if let Err(e) = engine.ensure_up_to_date(&name, &Scope::Everything) {
                    if !e.is_cancelled() {
                        warn!(index = %name, error = %e, "background update failed");
                    }
                }
            }
        }));

        info!(
            indices = engine.registry.len(),
            files = engine.corpus.all_files().len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Seed per-index dirty sets with every file whose stamp is not
    /// current. Indices with a pending rebuild skip the sweep; their full
    /// pass enumerates the corpus anyway.
    fn bootstrap_sweep(&self) -> Result<()> {
        let files = self.corpus.all_files();
        for (ordinal, def) in self.registry.iter() {
            if !self.rebuild.is_ok(ordinal) {
                continue;
            }
            let Some(stamp) = self.versions.creation_stamp(&def.name)? else {
                continue;
            };
            let slot = &self.slots[ordinal as usize];
            for &file in &files {
                let Some(meta) = self.corpus.meta(file) else {
                    continue;
                };
                if (def.filter)(&meta) && !self.stamps.is_current(file, ordinal, stamp)? {
                    slot.dirty.insert(file, ());
                }
            }
        }
        Ok(())
    }

    fn ordinal(&self, name: &IndexName) -> Result<u16> {
        self.registry
            .ordinal(name)
            .ok_or_else(|| SiftError::UnknownIndex { name: name.clone() })
    }

    // === Change ingestion =================================================

    /// Record that a file appeared or its saved content changed.
    pub fn record_file_event(&self, file: FileId, content_changed: bool) {
        let mask = if content_changed {
            ChangeMask::CONTENT_CHANGED
        } else {
            ChangeMask::ADDED
        };
        self.merger.record_change(file, mask);
    }

    /// Record the pre-event fired before a file's content changes.
    pub fn record_before_file_event(&self, file: FileId, content_changed: bool) {
        let mask = if content_changed {
            ChangeMask::BEFORE_CONTENT_CHANGED.merge(ChangeMask::CONTENT_CHANGED)
        } else {
            ChangeMask::BEFORE_CONTENT_CHANGED
        };
        self.merger.record_change(file, mask);
    }

    /// Record that a file left the corpus. Dominates any pending change.
    pub fn record_file_removed(&self, file: FileId) {
        self.merger.record_change(file, ChangeMask::REMOVED);
    }

    /// Record a transient (unsaved) state change.
    pub fn record_transient_state_change(&self, file: FileId) {
        self.merger.record_change(file, ChangeMask::TRANSIENT_CHANGED);
    }

    /// Number of coalesced changes waiting for the next pass.
    pub fn pending_changes(&self) -> usize {
        self.merger.approximate_count()
    }

    // === Transient content ================================================

    /// Install unsaved in-memory content for a file. It is indexed
    /// through the buffered overlay on the next pass, leaving the durable
    /// backend untouched.
    pub fn set_transient_content(&self, file: FileId, content: impl Into<Vec<u8>>) {
        self.transient.set(file, content);
        self.transient_versions
            .entry(file)
            .and_modify(|v| *v += 1)
            .or_insert(1);
        self.record_transient_state_change(file);
    }

    /// Abandon a file's unsaved content, discarding all speculative
    /// overlay state in one step.
    pub fn clear_transient_content(&self, file: FileId) {
        if !self.transient.clear(file) {
            return;
        }
        self.transient_versions.remove(&file);
        for slot in &self.slots {
            // The overlay is dropped wholesale, so other transient files
            // must be re-applied on the next pass.
            slot.storage.clear_memory();
            slot.storage.set_buffering_enabled(false);
            slot.transient_applied.lock().clear();
        }
        self.record_transient_state_change(file);
    }

    // === Orchestration ====================================================

    /// Schedule a full rebuild of one index. The only externally visible
    /// "temporarily unavailable" signal; queries fail with
    /// `RebuildPending` until a full pass completes.
    pub fn schedule_rebuild(&self, name: &IndexName) -> Result<()> {
        let ordinal = self.ordinal(name)?;
        if self.rebuild.request_rebuild(ordinal) {
            warn!(index = %name, "rebuild scheduled");
        }
        Ok(())
    }

    /// Queue an asynchronous update on the background worker.
    pub fn request_update(&self, name: &IndexName) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.request_update(name.clone());
        }
    }

    /// Bring one index up to date for the given scope.
    pub fn ensure_up_to_date(&self, name: &IndexName, scope: &Scope) -> Result<()> {
        self.ensure_up_to_date_cancellable(name, scope, &CancelToken::new())
    }

    /// Cancellable variant of [`Engine::ensure_up_to_date`].
    ///
    /// Cancellation is checked between files: completed per-file updates
    /// stay committed, the remainder stays queued, and the caller gets
    /// `Cancelled` to signal "not guaranteed fresh".
    #[instrument(skip(self, scope, cancel), fields(index = %name))]
    pub fn ensure_up_to_date_cancellable(
        &self,
        name: &IndexName,
        scope: &Scope,
        cancel: &CancelToken,
    ) -> Result<()> {
        let ordinal = self.ordinal(name)?;

        // A logical thread of control must not re-enter the update for
        // the same index; the outer call will complete the work.
        let key = (thread::current().id(), ordinal);
        if !self.in_progress.lock().insert(key) {
            return Ok(());
        }
        let result = {
            let mut result = Ok(());
            self.flight.run_coalesced(ordinal, || {
                result = self.ensure_inner(ordinal, scope, cancel);
            });
            // A merged outcome means a pass that started after this
            // request already covered the work.
            result
        };
        self.in_progress.lock().remove(&key);
        result
    }

    fn ensure_inner(&self, ordinal: u16, scope: &Scope, cancel: &CancelToken) -> Result<()> {
        let slot = &self.slots[ordinal as usize];

        // (1) Pending rebuild: wipe and enqueue the whole corpus.
        if !self.rebuild.is_ok(ordinal) {
            self.run_rebuild_clear(ordinal)?;
        }

        // (2) Drain coalesced changes into outdated stamps and dirty sets
        // for every registered index; only this index is brought current
        // below.
        self.merger.process_changes(cancel, |file, mask| {
            self.apply_drained_change(file, mask);
            true
        });
        if cancel.is_cancelled() {
            return Err(SiftError::Cancelled);
        }

        // (3) Re-index every dirty in-scope file whose stamp is not
        // current.
        let creation_stamp = self
            .versions
            .creation_stamp(&slot.def.name)?
            .ok_or_else(|| SiftError::Internal(format!("no version for {}", slot.def.name)))?;

        let work: Vec<FileId> = slot
            .dirty
            .iter()
            .map(|entry| *entry.key())
            .filter(|&file| scope.contains(file))
            .collect();

        let mut updated_any = false;
        if work.len() > PARALLEL_THRESHOLD {
            let outcomes: Vec<(FileId, UpdateOutcome)> = work
                .par_iter()
                .map(|&file| {
                    if cancel.is_cancelled() {
                        return (file, UpdateOutcome::Skipped);
                    }
                    (file, self.update_single_index(ordinal, file, creation_stamp))
                })
                .collect();
            for (file, outcome) in outcomes {
                if outcome == UpdateOutcome::Applied {
                    slot.dirty.remove(&file);
                    updated_any = true;
                }
            }
        } else {
            for &file in &work {
                if cancel.is_cancelled() {
                    break;
                }
                if self.update_single_index(ordinal, file, creation_stamp) == UpdateOutcome::Applied
                {
                    slot.dirty.remove(&file);
                    updated_any = true;
                }
            }
        }

        if cancel.is_cancelled() {
            if updated_any {
                self.flush_slot(ordinal)?;
            }
            return Err(SiftError::Cancelled);
        }

        // (4) Index unsaved content through the buffered overlay.
        self.apply_transient_content(ordinal, scope)?;

        if updated_any {
            self.flush_slot(ordinal)?;
        }
        debug!(files = work.len(), "index pass complete");
        Ok(())
    }

    /// Wipe one index's state exactly once under the rebuild flag, then
    /// enqueue every filter-matching corpus file as never-indexed work.
    fn run_rebuild_clear(&self, ordinal: u16) -> Result<()> {
        let slot = &self.slots[ordinal as usize];
        let cleared = self.rebuild.clear_if_necessary(ordinal, || {
            slot.storage.clear()?;
            slot.forward.clear()?;
            if let Some(snapshot) = &self.snapshot {
                snapshot.wipe_index(ordinal);
            }
            self.stamps.wipe_index(ordinal)?;
            self.versions.rewrite(&slot.def.name, slot.def.schema_version)?;
            Ok(())
        })?;

        if cleared {
            info!(index = %slot.def.name, "index cleared for full rebuild");
            for file in self.corpus.all_files() {
                if let Some(meta) = self.corpus.meta(file) {
                    if (slot.def.filter)(&meta) {
                        slot.dirty.insert(file, ());
                    }
                }
            }
        }
        Ok(())
    }

    /// Turn one drained change into outdated stamps and dirty-set entries
    /// for every index it affects.
    fn apply_drained_change(&self, file: FileId, mask: ChangeMask) {
        if mask.is_removed() {
            // Only indices that ever stored data for this file care.
            let ordinals = match self.stamps.nontrivial_states(file) {
                Ok(ordinals) => ordinals,
                Err(e) => {
                    error!(file = %file, error = %e, "stamp read failed during drain");
                    (0..self.registry.len() as u16).collect()
                }
            };
            for ordinal in ordinals {
                if (ordinal as usize) < self.slots.len() {
                    self.invalidate(file, ordinal);
                }
            }
            return;
        }

        if !mask.touches_content() {
            // Pure transient-state changes are picked up by the
            // transient pass; durable stamps stay put.
            return;
        }

        let Some(meta) = self.corpus.meta(file) else {
            return;
        };
        for (ordinal, def) in self.registry.iter() {
            if (def.filter)(&meta) {
                self.invalidate(file, ordinal);
            }
        }
    }

    fn invalidate(&self, file: FileId, ordinal: u16) {
        if let Err(e) = self.stamps.set_outdated(file, ordinal) {
            self.fault_to_rebuild(ordinal, &e, "stamp write");
        }
        self.slots[ordinal as usize].dirty.insert(file, ());
    }

    /// Route a storage-rooted fault into a rebuild of the affected index.
    fn fault_to_rebuild(&self, ordinal: u16, e: &SiftError, context: &str) {
        let name = &self.slots[ordinal as usize].def.name;
        if e.requires_rebuild() {
            error!(index = %name, error = %e, context, "storage fault; scheduling rebuild");
            if self.rebuild.request_rebuild(ordinal) {
                warn!(index = %name, "rebuild scheduled");
            }
        } else {
            error!(index = %name, error = %e, context, "unexpected failure");
        }
    }

    /// Update one (file, index) pair: compute the new map, diff it
    /// against the previous one, apply the diff, and commit the stamp.
    fn update_single_index(&self, ordinal: u16, file: FileId, creation_stamp: u64) -> UpdateOutcome {
        if !self.rebuild.is_ok(ordinal) {
            return UpdateOutcome::Skipped;
        }
        let slot = &self.slots[ordinal as usize];

        let meta = self.corpus.meta(file);
        let removed = meta.as_ref().map(|m| !m.is_valid).unwrap_or(true);

        let new_map = if removed {
            InputMap::new()
        } else {
            let meta = meta.as_ref().expect("checked above");
            match self.compute_input_map(ordinal, meta) {
                Ok(map) => map,
                Err(e) if e.requires_rebuild() => {
                    self.fault_to_rebuild(ordinal, &e, "input computation");
                    return UpdateOutcome::Skipped;
                }
                Err(e) => {
                    // Indexer fault: skip the file, leave it outdated for
                    // the next pass, and count it against the threshold.
                    warn!(index = %slot.def.name, file = %file, error = %e, "indexer failed; file skipped");
                    let failures = slot.indexer_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures >= self.config.max_indexer_failures {
                        error!(index = %slot.def.name, failures, "indexer failure threshold exceeded");
                        self.rebuild.request_rebuild(ordinal);
                        slot.indexer_failures.store(0, Ordering::Relaxed);
                    }
                    return UpdateOutcome::Skipped;
                }
            }
        };

        let old_map = self.previous_input(ordinal, file);

        slot.storage.set_buffering_enabled(false);
        self.apply_diff(slot, file, &old_map, &new_map);

        // Record the new forward entry.
        if slot.def.content_addressed {
            if removed || new_map.is_empty() {
                if let Some(snapshot) = &self.snapshot {
                    snapshot.remove_forward(ordinal, file);
                }
            }
            // Non-empty maps had their forward entry set during
            // compute_input_map.
        } else {
            slot.forward.put(file, new_map.clone());
        }

        // Commit the stamp under the write side of the engine lock so
        // queries never observe a half-committed state.
        let commit = {
            let _guard = self.commit_lock.write();
            if removed {
                self.stamps.clear(file, ordinal)
            } else {
                self.stamps.set_current(file, ordinal, creation_stamp)
            }
        };
        if let Err(e) = commit {
            self.fault_to_rebuild(ordinal, &e, "stamp commit");
            return UpdateOutcome::Skipped;
        }

        UpdateOutcome::Applied
    }

    /// Compute a file's new input map from its saved content, through the
    /// snapshot cache for content-addressed indices.
    fn compute_input_map(&self, ordinal: u16, meta: &FileMeta) -> Result<InputMap> {
        let slot = &self.slots[ordinal as usize];
        let def = &slot.def;

        // Oversized files have no indexable content.
        if meta.len > self.config.max_file_size {
            debug!(index = %def.name, file = %meta.id, len = meta.len, "file oversized; indexing as empty");
            return Ok(InputMap::new());
        }
        if !(def.filter)(meta) {
            return Ok(InputMap::new());
        }

        let content = match self.corpus.content(meta.id) {
            Ok(Some(content)) => content,
            Ok(None) => return Ok(InputMap::new()),
            // A read failure is a per-file fault, not corruption: the
            // file stays outdated and is retried on the next pass.
            Err(e) => {
                return Err(SiftError::IndexerFailed {
                    index: def.name.clone(),
                    file: meta.id,
                    reason: format!("content read failed: {e}"),
                })
            }
        };

        if !def.content_addressed {
            let input = IndexInput {
                file: meta,
                content: &content,
            };
            return (def.indexer)(&input);
        }

        let snapshot = self
            .snapshot
            .as_ref()
            .expect("snapshot cache exists for content-addressed indices");

        // Hash what the indexer will actually see, not necessarily the
        // raw bytes.
        let normalized = def.normalize.as_ref().map(|n| n(&content));
        let hash_input = normalized.as_deref().unwrap_or(&content);
        let hash = content_hash(def.name.as_str(), def.schema_version, hash_input);

        let input = IndexInput {
            file: meta,
            content: &content,
        };

        let data = if let Some(hit) = snapshot.lookup(&hash) {
            if self.config.verify_snapshot_cache {
                // A divergence here means a registered indexer is not a
                // pure function of the hashed content. Surface it loudly;
                // silently preferring either side would hide the bug.
                let fresh = (def.indexer)(&input)?;
                assert!(
                    fresh == hit.map,
                    "snapshot cache divergence for index '{}' on file {}: \
                     cached {} keys, recomputed {} keys",
                    def.name,
                    meta.id,
                    hit.map.len(),
                    fresh.len()
                );
            }
            hit
        } else {
            let fresh = (def.indexer)(&input)?;
            snapshot.put_data(hash, fresh)
        };

        snapshot.set_forward(ordinal, meta.id, data.hash_id);
        Ok(data.map)
    }

    fn previous_input(&self, ordinal: u16, file: FileId) -> InputMap {
        let slot = &self.slots[ordinal as usize];
        if slot.def.content_addressed {
            self.snapshot
                .as_ref()
                .and_then(|s| s.forward(ordinal, file))
                .and_then(|id| self.snapshot.as_ref().and_then(|s| s.read_data(id)))
                .unwrap_or_default()
        } else {
            slot.forward.get(file).unwrap_or_default()
        }
    }

    /// Apply the old→new diff to storage using the index's declared
    /// strategy.
    fn apply_diff(&self, slot: &IndexSlot, file: FileId, old: &InputMap, new: &InputMap) {
        match slot.def.diff_mode {
            DiffMode::SingleEntry => {
                // At most one key on each side; anything beyond that is a
                // registrant contract violation we tolerate by falling
                // back to the general path.
                if old.len() <= 1 && new.len() <= 1 {
                    let old_entry = old.iter().next();
                    let new_entry = new.iter().next();
                    match (old_entry, new_entry) {
                        (Some((ok, ov)), Some((nk, nv))) if ok == nk && ov == nv => {}
                        (old_entry, new_entry) => {
                            if let Some((ok, _)) = old_entry {
                                slot.storage.remove_all(ok, file);
                            }
                            if let Some((nk, nv)) = new_entry {
                                slot.storage.add_value(nk, file, nv.clone());
                            }
                        }
                    }
                    return;
                }
                self.apply_full_diff(slot, file, old, new);
            }
            DiffMode::FullMap => self.apply_full_diff(slot, file, old, new),
        }
    }

    fn apply_full_diff(&self, slot: &IndexSlot, file: FileId, old: &InputMap, new: &InputMap) {
        for key in old.keys() {
            if !new.contains_key(key) {
                slot.storage.remove_all(key, file);
            }
        }
        for (key, value) in new {
            if old.get(key) != Some(value) {
                slot.storage.add_value(key, file, value.clone());
            }
        }
    }

    /// Index unsaved transient content through the buffered overlay,
    /// tracked per (file, doc version) so an unchanged document costs
    /// nothing and a later save never double-counts.
    fn apply_transient_content(&self, ordinal: u16, scope: &Scope) -> Result<()> {
        let slot = &self.slots[ordinal as usize];
        let files = self.transient.file_ids();
        if files.is_empty() {
            return Ok(());
        }

        for file in files {
            if !scope.contains(file) {
                continue;
            }
            let Some(content) = self.transient.get(file) else {
                continue;
            };
            let version = self
                .transient_versions
                .get(&file)
                .map(|v| *v)
                .unwrap_or(0);

            let meta = self.corpus.meta(file).unwrap_or(FileMeta {
                id: file,
                path: String::new(),
                len: content.len() as u64,
                is_valid: true,
            });
            if !(slot.def.filter)(&meta) {
                continue;
            }

            let already = slot
                .transient_applied
                .lock()
                .get(&file)
                .map(|(v, _)| *v == version)
                .unwrap_or(false);
            if already {
                continue;
            }

            let input = IndexInput {
                file: &meta,
                content: &content,
            };
            let new_map = match (slot.def.indexer)(&input) {
                Ok(map) => map,
                Err(e) => {
                    warn!(index = %slot.def.name, file = %file, error = %e, "indexer failed on transient content");
                    continue;
                }
            };

            // Diff against what the overlay currently reflects for this
            // file: a previously applied transient map, else the durable
            // input the backend-seeded containers already contain.
            let old_map = slot
                .transient_applied
                .lock()
                .get(&file)
                .map(|(_, map)| map.clone())
                .unwrap_or_else(|| self.previous_input(ordinal, file));

            slot.storage.set_buffering_enabled(true);
            self.apply_diff(slot, file, &old_map, &new_map);
            slot.transient_applied
                .lock()
                .insert(file, (version, new_map));
        }
        Ok(())
    }

    fn flush_slot(&self, ordinal: u16) -> Result<()> {
        let slot = &self.slots[ordinal as usize];
        slot.storage.flush()?;
        slot.forward.flush()?;
        if let Some(snapshot) = &self.snapshot {
            snapshot.flush()?;
        }
        self.stamps.flush_all()
    }

    // === Queries ==========================================================

    fn query_guard(&self, ordinal: u16) -> Result<()> {
        if !self.rebuild.is_ok(ordinal) && !self.config.allow_stale_reads {
            return Err(SiftError::RebuildPending {
                index: self.slots[ordinal as usize].def.name.clone(),
            });
        }
        Ok(())
    }

    /// All values stored under a key, restricted to `scope`.
    pub fn get_values(&self, name: &IndexName, key: &[u8], scope: &Scope) -> Result<Vec<ValueBytes>> {
        let ordinal = self.ordinal(name)?;
        self.query_guard(ordinal)?;
        let _read = self.commit_lock.read();

        let slot = &self.slots[ordinal as usize];
        let Some(container) = slot.storage.read(key) else {
            return Ok(Vec::new());
        };
        Ok(container
            .iter()
            .filter(|(file, _)| scope.contains(*file))
            .map(|(_, value)| value.clone())
            .collect())
    }

    /// All files contributing a key, restricted to `scope`.
    pub fn get_containing_files(
        &self,
        name: &IndexName,
        key: &[u8],
        scope: &Scope,
    ) -> Result<Vec<FileId>> {
        let ordinal = self.ordinal(name)?;
        self.query_guard(ordinal)?;
        let _read = self.commit_lock.read();

        let slot = &self.slots[ordinal as usize];
        let Some(container) = slot.storage.read(key) else {
            return Ok(Vec::new());
        };
        let mut files: Vec<FileId> = container
            .file_ids()
            .filter(|&file| scope.contains(file))
            .collect();
        files.sort_unstable();
        Ok(files)
    }

    /// Visit every file present under *all* of `keys`, with its values in
    /// key order. The visitor short-circuits the walk by returning false;
    /// the return value is false iff it did.
    pub fn process_files_containing_all_keys(
        &self,
        name: &IndexName,
        keys: &[KeyBytes],
        scope: &Scope,
        mut visitor: impl FnMut(FileId, &[ValueBytes]) -> bool,
    ) -> Result<bool> {
        let ordinal = self.ordinal(name)?;
        self.query_guard(ordinal)?;
        let _read = self.commit_lock.read();

        if keys.is_empty() {
            return Ok(true);
        }

        let slot = &self.slots[ordinal as usize];
        let mut containers = Vec::with_capacity(keys.len());
        for key in keys {
            match slot.storage.read(key) {
                Some(container) => containers.push(container),
                // One key with no files means an empty intersection.
                None => return Ok(true),
            }
        }

        // Iterate the smallest container and probe the rest.
        let (smallest_idx, _) = containers
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.len())
            .expect("keys is non-empty");

        let candidates: Vec<FileId> = containers[smallest_idx]
            .file_ids()
            .filter(|&file| scope.contains(file))
            .collect();

        'candidates: for file in candidates {
            let mut values = Vec::with_capacity(containers.len());
            for container in &containers {
                match container.get(file) {
                    Some(value) => values.push(value.clone()),
                    None => continue 'candidates,
                }
            }
            if !visitor(file, &values) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Visit every live key of an index; stops early when the visitor
    /// returns false.
    pub fn process_keys(
        &self,
        name: &IndexName,
        visitor: impl FnMut(&KeyBytes) -> bool,
    ) -> Result<bool> {
        let ordinal = self.ordinal(name)?;
        self.query_guard(ordinal)?;
        let _read = self.commit_lock.read();
        Ok(self.slots[ordinal as usize].storage.process_keys(visitor))
    }

    // === Diagnostics and lifecycle ========================================

    /// Diagnostic summary of one index.
    pub fn status(&self, name: &IndexName) -> Result<IndexStatus> {
        let ordinal = self.ordinal(name)?;
        let slot = &self.slots[ordinal as usize];
        let mut key_count = 0usize;
        slot.storage.process_keys(|_| {
            key_count += 1;
            true
        });
        Ok(IndexStatus {
            name: slot.def.name.clone(),
            creation_stamp: self.versions.creation_stamp(name)?,
            dirty_files: slot.dirty.len(),
            rebuild_pending: !self.rebuild.is_ok(ordinal),
            key_count,
        })
    }

    /// Names of all registered indices, in registration order.
    pub fn index_names(&self) -> Vec<IndexName> {
        self.registry.iter().map(|(_, def)| def.name.clone()).collect()
    }

    /// Flush every store and remove the dirty marker. Call before drop
    /// for a clean shutdown; a skipped close costs a full wipe at the
    /// next open.
    pub fn close(&self) -> Result<()> {
        drop(self.worker.lock().take());
        for ordinal in 0..self.slots.len() as u16 {
            self.flush_slot(ordinal)?;
        }
        let marker = self.root.join(CORRUPTION_MARKER);
        if marker.exists() {
            std::fs::remove_file(&marker)?;
        }
        info!("engine closed");
        Ok(())
    }
}
