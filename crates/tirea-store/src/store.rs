//! Store facade.

use crate::action::{ActionCall, ActionSurface, ActionTree};
use crate::config::StoreConfig;
use crate::diagnostics::{EventSink, TracingSink};
use crate::registry::{Disposer, Subscriber};
use crate::scheduler::StoreCore;
use crate::{Snapshot, StoreError, StoreResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A reactive state store.
///
/// `state()` is the latest committed snapshot. Actions mutate a draft that
/// is committed as a whole; each commit notifies the subscribers whose
/// interest paths it dirtied, then every global subscriber.
///
/// Cloning a `Store` yields another handle to the same store.
///
/// # Examples
///
/// ```
/// use tirea_store::{ActionTree, Store, Subscriber};
/// use serde_json::json;
/// use std::sync::{Arc, Mutex};
///
/// let store = Store::new(
///     json!({"foo": ["foo", "bar"]}),
///     ActionTree::new().action("push", |ctx, item| {
///         ctx.state().push("foo", item)?;
///         Ok(json!(null))
///     }),
/// );
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let _disposer = store.subscribe(Subscriber::on_paths(["foo"], move |change| {
///     sink.lock().unwrap().push(change.path.map(str::to_owned));
/// }));
///
/// store.call("push", json!("baz")).unwrap().into_done().unwrap().unwrap();
/// assert_eq!(store.state().value_at("foo"), Some(json!(["foo", "bar", "baz"])));
/// assert_eq!(*seen.lock().unwrap(), vec![Some("foo".to_string())]);
/// ```
pub struct Store<E = ()> {
    core: Arc<StoreCore>,
    actions: Arc<ActionSurface<E>>,
    effects: Arc<E>,
}

impl<E> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            actions: self.actions.clone(),
            effects: self.effects.clone(),
        }
    }
}

impl Store<()> {
    /// Store without effects and with default configuration.
    pub fn new(initial: Value, actions: ActionTree<()>) -> Self {
        StoreBuilder::new(initial).actions(actions).build()
    }

    pub fn builder(initial: Value) -> StoreBuilder<()> {
        StoreBuilder::new(initial)
    }
}

impl<E: Send + Sync + 'static> Store<E> {
    /// Latest committed snapshot.
    #[inline]
    pub fn state(&self) -> Snapshot {
        self.core.snapshot()
    }

    /// Register a subscriber; keep the disposer to unsubscribe later.
    pub fn subscribe(&self, subscriber: Subscriber) -> Disposer {
        self.core.registry().subscribe(subscriber)
    }

    /// Callable actions, in the declared shape.
    pub fn actions(&self) -> &ActionSurface<E> {
        &self.actions
    }

    /// Invoke the action with qualified name `name`.
    ///
    /// See [`BoundAction::call`](crate::BoundAction::call): inside a tokio runtime an asynchronous
    /// action runs even if the returned call is dropped; without one it only
    /// runs while the call is awaited.
    pub fn call(&self, name: &str, payload: Value) -> StoreResult<ActionCall> {
        let action = self
            .actions
            .resolve(name)
            .ok_or_else(|| StoreError::unknown_action(name))?;
        Ok(action.call(payload))
    }

    /// Commit any open draft now instead of waiting for the deferred flush.
    ///
    /// Returns whether a new snapshot was published.
    pub fn flush(&self) -> bool {
        self.core.flush()
    }

    pub fn effects(&self) -> &E {
        &self.effects
    }

    pub fn config(&self) -> &StoreConfig {
        self.core.config()
    }
}

impl<E> fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("core", &self.core)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`].
///
/// Set effects first: [`StoreBuilder::effects`] changes the builder's
/// effect type, and actions are declared against that type.
pub struct StoreBuilder<E = ()> {
    initial: Value,
    effects: Arc<E>,
    actions: ActionTree<E>,
    config: StoreConfig,
    sink: Arc<dyn EventSink>,
}

impl StoreBuilder<()> {
    pub fn new(initial: Value) -> Self {
        Self {
            initial,
            effects: Arc::new(()),
            actions: ActionTree::default(),
            config: StoreConfig::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Inject side-effect handles, passed through to every action context.
    pub fn effects<F: Send + Sync + 'static>(self, effects: F) -> StoreBuilder<F> {
        if !self.actions.is_empty() {
            tracing::warn!(
                dropped = self.actions.len(),
                "actions declared before effects were dropped"
            );
        }
        StoreBuilder {
            initial: self.initial,
            effects: Arc::new(effects),
            actions: ActionTree::default(),
            config: self.config,
            sink: self.sink,
        }
    }
}

impl<E: Send + Sync + 'static> StoreBuilder<E> {
    #[must_use]
    pub fn actions(mut self, actions: ActionTree<E>) -> Self {
        self.actions = actions;
        self
    }

    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Diagnostics sink; only used when diagnostics are enabled.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Store<E> {
        let core = Arc::new(StoreCore::new(
            Snapshot::from_value(self.initial),
            self.config,
            self.sink,
        ));
        let actions = Arc::new(ActionSurface::bind(self.actions, &core, &self.effects));
        tracing::debug!(actions = ?actions.names(), "store built");
        Store {
            core,
            actions,
            effects: self.effects,
        }
    }
}
