//! Mutation scheduling.
//!
//! A store has exactly one draft slot. The draft in it is owned by the
//! action invocation that opened it. Every state access goes through
//! [`StoreCore::access`], which opens the draft when needed and re-arms a
//! zero-delay flush task on the current tokio runtime; the flush commits the
//! draft on the next scheduler turn unless its owner is still executing.
//!
//! Commit runs in two halves. Sealing the draft and swapping the snapshot
//! happen under the slot lock; diagnostics and subscriber dispatch happen
//! after it is released.

use crate::config::StoreConfig;
use crate::diagnostics::{Diagnostics, EventSink, StoreEvent};
use crate::registry::SubscriptionRegistry;
use crate::{lock_unpoisoned, DirtyPaths, Draft, Node, Snapshot, StoreError, StoreResult};
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::AbortHandle;

/// One call of one action.
#[derive(Debug)]
pub(crate) struct Invocation {
    id: u64,
    name: String,
    running: AtomicBool,
    finished: AtomicBool,
}

impl Invocation {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

struct OpenDraft {
    draft: Draft,
    owner: Arc<Invocation>,
    generation: u64,
}

#[derive(Default)]
struct DraftSlot {
    open: Option<OpenDraft>,
    flush: Option<AbortHandle>,
    next_generation: u64,
}

impl DraftSlot {
    fn cancel_flush(&mut self) {
        if let Some(handle) = self.flush.take() {
            handle.abort();
        }
    }
}

/// Result of sealing a draft, published once the slot lock is released.
struct Committed {
    action: String,
    snapshot: Snapshot,
    dirty: DirtyPaths,
}

/// Shared state behind a store handle and every action context.
pub(crate) struct StoreCore {
    current: ArcSwap<Node>,
    slot: Mutex<DraftSlot>,
    registry: SubscriptionRegistry,
    diagnostics: Diagnostics,
    config: StoreConfig,
    next_invocation: AtomicU64,
}

impl StoreCore {
    pub(crate) fn new(initial: Snapshot, config: StoreConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            current: ArcSwap::new(initial.as_arc().clone()),
            slot: Mutex::new(DraftSlot::default()),
            registry: SubscriptionRegistry::new(),
            diagnostics: Diagnostics::new(config.diagnostics, sink),
            config,
            next_invocation: AtomicU64::new(0),
        }
    }

    /// Latest committed snapshot. Never opens a draft.
    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot::from_arc(self.current.load_full())
    }

    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub(crate) fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn begin(&self, name: &str) -> Arc<Invocation> {
        let id = self.next_invocation.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(invocation = id, action = name, "action invoked");
        Arc::new(Invocation {
            id,
            name: name.to_string(),
            running: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        })
    }

    /// Mark `invocation` as executing until the guard drops.
    pub(crate) fn enter<'a>(&'a self, invocation: &'a Invocation) -> RunningGuard<'a> {
        invocation.running.store(true, Ordering::Release);
        RunningGuard {
            core: self,
            invocation,
        }
    }

    fn slot(&self) -> MutexGuard<'_, DraftSlot> {
        lock_unpoisoned(&self.slot)
    }

    /// Run `f` against the draft owned by `invocation`, opening one if needed.
    ///
    /// `expected` pins the access to one draft generation; a scoped handle
    /// whose draft was already committed gets [`StoreError::StaleDraft`]
    /// instead of a fresh draft. A draft left open by another invocation is
    /// committed first, repeatedly if subscribers of that commit leave yet
    /// another invocation's draft in the slot.
    pub(crate) fn access<R>(
        self: &Arc<Self>,
        invocation: &Arc<Invocation>,
        expected: Option<u64>,
        f: impl FnOnce(&mut Draft, u64) -> StoreResult<R>,
    ) -> StoreResult<R> {
        if invocation.is_finished() {
            return Err(self.reject_stale(invocation));
        }

        let mut slot = self.slot();
        while slot
            .open
            .as_ref()
            .is_some_and(|open| open.owner.id != invocation.id)
        {
            slot.cancel_flush();
            let committed = slot.open.take().and_then(|open| self.seal(open));
            drop(slot);
            if let Some(committed) = committed {
                self.publish(committed);
            }
            slot = self.slot();
        }

        if slot.open.is_none() {
            if expected.is_some() {
                drop(slot);
                return Err(self.reject_stale(invocation));
            }
            let generation = slot.next_generation;
            slot.next_generation += 1;
            slot.open = Some(OpenDraft {
                draft: Draft::new(&self.snapshot()),
                owner: invocation.clone(),
                generation,
            });
            tracing::trace!(action = invocation.name(), generation, "draft opened");
        }

        let Some(open) = slot.open.as_mut() else {
            return Err(StoreError::invalid_operation("draft slot unexpectedly empty"));
        };
        if expected.is_some_and(|g| g != open.generation) {
            drop(slot);
            return Err(self.reject_stale(invocation));
        }

        let generation = open.generation;
        let result = f(&mut open.draft, generation);
        self.arm_flush(&mut slot, generation);
        result
    }

    fn reject_stale(&self, invocation: &Invocation) -> StoreError {
        tracing::warn!(action = invocation.name(), "stale draft access rejected");
        StoreError::stale_draft(invocation.name())
    }

    fn arm_flush(self: &Arc<Self>, slot: &mut DraftSlot, generation: u64) {
        slot.cancel_flush();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let core = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            tokio::task::yield_now().await;
            if let Some(core) = core.upgrade() {
                core.flush_deferred(generation);
            }
        });
        slot.flush = Some(task.abort_handle());
    }

    fn flush_deferred(&self, generation: u64) {
        let mut slot = self.slot();
        let ready = slot
            .open
            .as_ref()
            .is_some_and(|open| open.generation == generation && !open.owner.is_running());
        if !ready {
            return;
        }
        slot.flush = None;
        let committed = slot.open.take().and_then(|open| self.seal(open));
        drop(slot);
        tracing::trace!(generation, "deferred flush fired");
        if let Some(committed) = committed {
            self.publish(committed);
        }
    }

    /// Commit the draft if `invocation` owns it. Returns whether a new
    /// snapshot was published.
    pub(crate) fn commit_owned(&self, invocation: &Invocation) -> bool {
        let mut slot = self.slot();
        if !slot
            .open
            .as_ref()
            .is_some_and(|open| open.owner.id == invocation.id)
        {
            return false;
        }
        slot.cancel_flush();
        let committed = slot.open.take().and_then(|open| self.seal(open));
        drop(slot);
        match committed {
            Some(committed) => {
                self.publish(committed);
                true
            }
            None => false,
        }
    }

    /// Drop the draft owned by `invocation` without committing it.
    pub(crate) fn discard_owned(&self, invocation: &Invocation) {
        let mut slot = self.slot();
        if slot
            .open
            .as_ref()
            .is_some_and(|open| open.owner.id == invocation.id)
        {
            slot.cancel_flush();
            if let Some(open) = slot.open.take() {
                tracing::debug!(
                    action = invocation.name(),
                    edits = open.draft.edits().len(),
                    "draft discarded"
                );
            }
        }
    }

    /// Commit whatever draft is open, regardless of owner.
    pub(crate) fn flush(&self) -> bool {
        let mut slot = self.slot();
        slot.cancel_flush();
        let committed = slot.open.take().and_then(|open| self.seal(open));
        drop(slot);
        match committed {
            Some(committed) => {
                self.publish(committed);
                true
            }
            None => false,
        }
    }

    /// Finalize a draft and swap the current snapshot. Caller holds the slot.
    fn seal(&self, open: OpenDraft) -> Option<Committed> {
        let mut dirty = DirtyPaths::default();
        let snapshot = open
            .draft
            .commit(|edits| dirty = DirtyPaths::from_edits(edits));
        if dirty.is_empty() {
            return None;
        }
        self.current.store(snapshot.as_arc().clone());
        Some(Committed {
            action: open.owner.name.clone(),
            snapshot,
            dirty,
        })
    }

    fn publish(&self, committed: Committed) {
        let Committed {
            action,
            snapshot,
            dirty,
        } = committed;
        tracing::debug!(action = %action, paths = dirty.len(), "commit published");
        self.diagnostics.emit(StoreEvent::MutationCommitted {
            action: &action,
            paths: &dirty,
        });
        self.registry.dispatch(&dirty, &snapshot, &self.diagnostics);
    }
}

impl fmt::Debug for StoreCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCore")
            .field("registry", &self.registry)
            .field("diagnostics", &self.diagnostics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Clears an invocation's running flag on drop.
///
/// When dropped during a panic the invocation's draft is discarded and the
/// invocation is finished.
pub(crate) struct RunningGuard<'a> {
    core: &'a StoreCore,
    invocation: &'a Invocation,
}

impl RunningGuard<'_> {
    /// Leave the running state and settle the invocation: commit on success,
    /// discard otherwise.
    pub(crate) fn settle(self, commit: bool) {
        let (core, invocation) = (self.core, self.invocation);
        drop(self);
        if commit {
            core.commit_owned(invocation);
        } else {
            core.discard_owned(invocation);
        }
        invocation.finish();
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.invocation.running.store(false, Ordering::Release);
        if std::thread::panicking() {
            self.core.discard_owned(self.invocation);
            self.invocation.finish();
        }
    }
}

/// Settles an asynchronous invocation once its future completes or is
/// dropped: the open draft is committed (discarded during a panic) and the
/// invocation is finished.
pub(crate) struct SettleOnDrop {
    core: Arc<StoreCore>,
    invocation: Arc<Invocation>,
}

impl SettleOnDrop {
    pub(crate) fn new(core: Arc<StoreCore>, invocation: Arc<Invocation>) -> Self {
        Self { core, invocation }
    }
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if self.invocation.is_finished() {
            return;
        }
        self.invocation.finish();
        if std::thread::panicking() {
            self.core.discard_owned(&self.invocation);
        } else {
            self.core.commit_owned(&self.invocation);
        }
    }
}
