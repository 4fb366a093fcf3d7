//! Execution context handed to actions.
//!
//! `DraftState` is the explicit accessor facade over the store's open
//! draft. Every read or write goes through the scheduler first, which opens
//! a draft for the invocation if none is open and re-arms the deferred
//! flush.

use crate::scheduler::{Invocation, StoreCore};
use crate::{Node, Number, Op, Path, Snapshot, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Context for one action invocation.
///
/// Cheap to clone and `'static`, so async actions can carry it across
/// `.await` points or hand it to spawned tasks.
pub struct ActionContext<E = ()> {
    core: Arc<StoreCore>,
    invocation: Arc<Invocation>,
    effects: Arc<E>,
}

impl<E> Clone for ActionContext<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            invocation: self.invocation.clone(),
            effects: self.effects.clone(),
        }
    }
}

impl<E> ActionContext<E> {
    pub(crate) fn new(core: Arc<StoreCore>, invocation: Arc<Invocation>, effects: Arc<E>) -> Self {
        Self {
            core,
            invocation,
            effects,
        }
    }

    /// Qualified name of the running action.
    pub fn name(&self) -> &str {
        self.invocation.name()
    }

    /// Root state facade.
    ///
    /// The root facade always targets the invocation's current draft, so it
    /// is the way to re-acquire state after an `.await`.
    pub fn state(&self) -> DraftState {
        DraftState {
            core: self.core.clone(),
            invocation: self.invocation.clone(),
            base: Path::root(),
            generation: None,
        }
    }

    /// Injected side-effect handles.
    pub fn effects(&self) -> &E {
        &self.effects
    }

    /// Latest committed snapshot; does not open a draft.
    pub fn committed(&self) -> Snapshot {
        self.core.snapshot()
    }
}

impl<E> fmt::Debug for ActionContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("action", &self.name())
            .finish_non_exhaustive()
    }
}

/// Mutable-state facade for one action invocation.
///
/// Paths are relative to the facade's base. A facade obtained from
/// [`DraftState::at`] is pinned to the draft that was open when it was
/// created; once that draft commits, every access through it fails with
/// [`StoreError::StaleDraft`](crate::StoreError::StaleDraft).
///
/// # Examples
///
/// ```
/// # use tirea_store::{ActionTree, Store};
/// # use serde_json::json;
/// let actions = ActionTree::new().action("add_todo", |ctx, title| {
///     let state = ctx.state();
///     state.push("todos", title)?;
///     state.increment("count", 1)?;
///     Ok(json!(null))
/// });
/// let store = Store::new(json!({"todos": [], "count": 0}), actions);
/// # drop(store);
/// ```
#[derive(Clone)]
pub struct DraftState {
    core: Arc<StoreCore>,
    invocation: Arc<Invocation>,
    base: Path,
    generation: Option<u64>,
}

impl DraftState {
    fn with_draft<R>(&self, f: impl FnOnce(&mut crate::Draft) -> StoreResult<R>) -> StoreResult<R> {
        self.core
            .access(&self.invocation, self.generation, |draft, _| f(draft))
    }

    fn resolve(&self, path: impl Into<Path>) -> Path {
        self.base.join(&path.into())
    }

    /// Base path of this facade.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Read the draft value at `path` as JSON.
    pub fn get(&self, path: impl Into<Path>) -> StoreResult<Option<Value>> {
        let path = self.resolve(path);
        self.with_draft(|draft| Ok(draft.get(&path).map(Node::to_value)))
    }

    /// Read and deserialize the draft value at `path`.
    pub fn get_as<T: DeserializeOwned>(&self, path: impl Into<Path>) -> StoreResult<Option<T>> {
        let path = self.resolve(path);
        self.with_draft(|draft| draft.get(&path).map(Node::to_typed).transpose())
    }

    /// Whether a value exists at `path`.
    pub fn contains(&self, path: impl Into<Path>) -> StoreResult<bool> {
        let path = self.resolve(path);
        self.with_draft(|draft| Ok(draft.get(&path).is_some()))
    }

    pub fn set(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        self.apply(Op::set(path.into(), value))
    }

    /// Serialize `value` and set it at `path`.
    pub fn set_as<T: Serialize>(&self, path: impl Into<Path>, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(path, value)
    }

    pub fn delete(&self, path: impl Into<Path>) -> StoreResult<()> {
        self.apply(Op::delete(path.into()))
    }

    /// Append to the array at `path`, creating it when absent.
    pub fn push(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        self.apply(Op::append(path.into(), value))
    }

    pub fn insert(&self, path: impl Into<Path>, index: usize, value: impl Into<Value>) -> StoreResult<()> {
        self.apply(Op::insert(path.into(), index, value))
    }

    /// Remove the first element equal to `value` from the array at `path`.
    pub fn remove(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        self.apply(Op::remove(path.into(), value))
    }

    /// Shallow-merge an object into the object at `path`.
    pub fn merge(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        self.apply(Op::merge_object(path.into(), value))
    }

    pub fn increment(&self, path: impl Into<Path>, amount: impl Into<Number>) -> StoreResult<()> {
        self.apply(Op::increment(path.into(), amount))
    }

    pub fn decrement(&self, path: impl Into<Path>, amount: impl Into<Number>) -> StoreResult<()> {
        self.apply(Op::decrement(path.into(), amount))
    }

    /// Apply a raw operation; its path is taken relative to this facade.
    pub fn apply(&self, op: Op) -> StoreResult<()> {
        let op = op.rebased(&self.base);
        self.with_draft(|draft| draft.apply(&op))
    }

    /// A facade scoped to `path` and pinned to the current draft.
    ///
    /// Opens a draft if none is open yet.
    pub fn at(&self, path: impl Into<Path>) -> StoreResult<DraftState> {
        let generation = self
            .core
            .access(&self.invocation, self.generation, |_, generation| Ok(generation))?;
        Ok(DraftState {
            core: self.core.clone(),
            invocation: self.invocation.clone(),
            base: self.resolve(path),
            generation: Some(generation),
        })
    }
}

impl fmt::Debug for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DraftState")
            .field("action", &self.invocation.name())
            .field("base", &self.base)
            .field("generation", &self.generation)
            .finish()
    }
}
