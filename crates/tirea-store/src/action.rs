//! Action declaration and dispatch.
//!
//! An [`ActionTree`] declares actions as named leaves and nested groups.
//! Binding it to a store produces an [`ActionSurface`] of the same shape,
//! whose leaves are [`BoundAction`]s that run the action inside an
//! [`ActionContext`] and settle its draft.
//!
//! Synchronous actions commit their draft when they return `Ok` and discard
//! it on `Err` or panic. Asynchronous actions commit every time they
//! suspend and once more when they settle, whatever the outcome. Inside a
//! tokio runtime an asynchronous action is spawned as soon as it is called,
//! so it runs to completion whether or not the caller awaits it.

use crate::context::ActionContext;
use crate::scheduler::{Invocation, SettleOnDrop, StoreCore};
use crate::{StoreError, StoreResult};
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Separator between group and leaf names in qualified action names.
pub const ACTION_SEPARATOR: char = '.';

/// Synchronous action body.
pub type SyncFn<E> = dyn Fn(&ActionContext<E>, Value) -> StoreResult<Value> + Send + Sync;
/// Asynchronous action body, already boxed.
pub type AsyncFn<E> = dyn Fn(ActionContext<E>, Value) -> BoxFuture<'static, StoreResult<Value>> + Send + Sync;

/// A declared action body.
pub enum ActionFn<E = ()> {
    Sync(Arc<SyncFn<E>>),
    Async(Arc<AsyncFn<E>>),
}

impl<E> Clone for ActionFn<E> {
    fn clone(&self) -> Self {
        match self {
            ActionFn::Sync(f) => ActionFn::Sync(f.clone()),
            ActionFn::Async(f) => ActionFn::Async(f.clone()),
        }
    }
}

impl<E> fmt::Debug for ActionFn<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionFn::Sync(_) => f.write_str("ActionFn::Sync"),
            ActionFn::Async(_) => f.write_str("ActionFn::Async"),
        }
    }
}

/// A node of an [`ActionTree`].
#[derive(Debug)]
pub enum ActionNode<E = ()> {
    Action(ActionFn<E>),
    Group(ActionTree<E>),
}

/// Declared shape of a store's actions.
///
/// ```
/// use tirea_store::ActionTree;
/// use serde_json::json;
///
/// let actions = ActionTree::<()>::new()
///     .action("reset", |ctx, _| {
///         ctx.state().set("count", 0)?;
///         Ok(json!(null))
///     })
///     .group(
///         "todos",
///         ActionTree::new().action("add", |ctx, title| {
///             ctx.state().push("todos", title)?;
///             Ok(json!(null))
///         }),
///     );
/// assert_eq!(actions.len(), 2);
/// ```
#[derive(Debug)]
pub struct ActionTree<E = ()> {
    nodes: BTreeMap<String, ActionNode<E>>,
}

impl<E> Default for ActionTree<E> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<E: Send + Sync + 'static> ActionTree<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a synchronous action. Redeclaring a name replaces it.
    #[must_use]
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ActionContext<E>, Value) -> StoreResult<Value> + Send + Sync + 'static,
    {
        self.nodes
            .insert(name.into(), ActionNode::Action(ActionFn::Sync(Arc::new(f))));
        self
    }

    /// Declare an asynchronous action.
    #[must_use]
    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActionContext<E>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StoreResult<Value>> + Send + 'static,
    {
        let boxed: Arc<AsyncFn<E>> = Arc::new(move |ctx, payload| f(ctx, payload).boxed());
        self.nodes
            .insert(name.into(), ActionNode::Action(ActionFn::Async(boxed)));
        self
    }

    /// Declare a nested group.
    #[must_use]
    pub fn group(mut self, name: impl Into<String>, tree: ActionTree<E>) -> Self {
        self.nodes.insert(name.into(), ActionNode::Group(tree));
        self
    }
}

impl<E> ActionTree<E> {
    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ActionNode<E>> {
        self.nodes.get(name)
    }
}

enum SurfaceNode<E> {
    Action(BoundAction<E>),
    Group(ActionSurface<E>),
}

/// Callable mirror of an [`ActionTree`].
pub struct ActionSurface<E = ()> {
    nodes: BTreeMap<String, SurfaceNode<E>>,
}

impl<E: Send + Sync + 'static> ActionSurface<E> {
    pub(crate) fn bind(tree: ActionTree<E>, core: &Arc<StoreCore>, effects: &Arc<E>) -> Self {
        Self::bind_under(tree, None, core, effects)
    }

    fn bind_under(
        tree: ActionTree<E>,
        prefix: Option<&str>,
        core: &Arc<StoreCore>,
        effects: &Arc<E>,
    ) -> Self {
        let nodes = tree
            .nodes
            .into_iter()
            .map(|(key, node)| {
                let qualified = match prefix {
                    Some(prefix) => format!("{prefix}{ACTION_SEPARATOR}{key}"),
                    None => key.clone(),
                };
                let bound = match node {
                    ActionNode::Action(action) => SurfaceNode::Action(BoundAction {
                        name: qualified,
                        action,
                        core: core.clone(),
                        effects: effects.clone(),
                    }),
                    ActionNode::Group(group) => {
                        SurfaceNode::Group(Self::bind_under(group, Some(&qualified), core, effects))
                    }
                };
                (key, bound)
            })
            .collect();
        Self { nodes }
    }
}

impl<E> ActionSurface<E> {
    /// Direct leaf named `name`.
    pub fn action(&self, name: &str) -> Option<&BoundAction<E>> {
        match self.nodes.get(name) {
            Some(SurfaceNode::Action(action)) => Some(action),
            _ => None,
        }
    }

    /// Direct group named `name`.
    pub fn group(&self, name: &str) -> Option<&ActionSurface<E>> {
        match self.nodes.get(name) {
            Some(SurfaceNode::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// Look up a leaf by qualified name, e.g. `"todos.add"`.
    pub fn resolve(&self, qualified: &str) -> Option<&BoundAction<E>> {
        let (groups, leaf) = match qualified.rsplit_once(ACTION_SEPARATOR) {
            Some((groups, leaf)) => (Some(groups), leaf),
            None => (None, qualified),
        };
        let mut surface = self;
        if let Some(groups) = groups {
            for name in groups.split(ACTION_SEPARATOR) {
                surface = surface.group(name)?;
            }
        }
        surface.action(leaf)
    }

    /// Qualified names of every leaf, depth-first in key order.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        for node in self.nodes.values() {
            match node {
                SurfaceNode::Action(action) => out.push(action.name.clone()),
                SurfaceNode::Group(group) => group.collect_names(out),
            }
        }
    }
}

impl<E> fmt::Debug for ActionSurface<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSurface")
            .field("actions", &self.names())
            .finish()
    }
}

/// An action bound to a store.
pub struct BoundAction<E = ()> {
    name: String,
    action: ActionFn<E>,
    core: Arc<StoreCore>,
    effects: Arc<E>,
}

impl<E> Clone for BoundAction<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            action: self.action.clone(),
            core: self.core.clone(),
            effects: self.effects.clone(),
        }
    }
}

impl<E> fmt::Debug for BoundAction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction")
            .field("name", &self.name)
            .field("action", &self.action)
            .finish()
    }
}

impl<E: Send + Sync + 'static> BoundAction<E> {
    /// Qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        matches!(self.action, ActionFn::Async(_))
    }

    /// Invoke the action with `payload`.
    ///
    /// Synchronous actions run to completion before this returns.
    /// Asynchronous actions are spawned on the current tokio runtime and the
    /// returned [`ActionCall::Pending`] resolves to their result; awaiting it
    /// is optional. Without a runtime the pending call is the action itself
    /// and must be awaited (or polled) for the body to make progress.
    pub fn call(&self, payload: Value) -> ActionCall {
        let invocation = self.core.begin(&self.name);
        let ctx = ActionContext::new(self.core.clone(), invocation.clone(), self.effects.clone());

        match &self.action {
            ActionFn::Sync(f) => {
                let running = self.core.enter(&invocation);
                let result = f(&ctx, payload);
                running.settle(result.is_ok());
                if let Err(error) = &result {
                    tracing::debug!(action = %self.name, %error, "action failed; draft discarded");
                }
                ActionCall::Done(result)
            }
            ActionFn::Async(f) => {
                let future = {
                    let _running = self.core.enter(&invocation);
                    f(ctx, payload)
                };
                let driven = drive(self.core.clone(), invocation, future).boxed();
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => ActionCall::Pending(join(runtime.spawn(driven)).boxed()),
                    Err(_) => ActionCall::Pending(driven),
                }
            }
        }
    }
}

/// Poll an async action, committing its draft at every suspension and once
/// more on completion.
async fn drive(
    core: Arc<StoreCore>,
    invocation: Arc<Invocation>,
    mut future: BoxFuture<'static, StoreResult<Value>>,
) -> StoreResult<Value> {
    let settle = SettleOnDrop::new(core.clone(), invocation.clone());
    let result = future::poll_fn(|cx| {
        let poll = {
            let _running = core.enter(&invocation);
            future.as_mut().poll(cx)
        };
        if poll.is_pending() {
            core.commit_owned(&invocation);
        }
        poll
    })
    .await;
    drop(settle);

    if let Err(error) = &result {
        tracing::debug!(action = invocation.name(), %error, "async action failed");
    }
    result
}

/// Wait for a spawned action, re-raising its panic in the awaiting caller.
async fn join(task: JoinHandle<StoreResult<Value>>) -> StoreResult<Value> {
    match task.await {
        Ok(result) => result,
        Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
        Err(error) => Err(StoreError::failed(format!("action task cancelled: {error}"))),
    }
}

/// Outcome of [`BoundAction::call`].
///
/// Both variants can be awaited through [`IntoFuture`].
#[must_use = "outside a tokio runtime an asynchronous action only runs while awaited"]
pub enum ActionCall {
    /// A synchronous action's result.
    Done(StoreResult<Value>),
    /// An asynchronous action still to be driven.
    Pending(BoxFuture<'static, StoreResult<Value>>),
}

impl ActionCall {
    pub fn is_pending(&self) -> bool {
        matches!(self, ActionCall::Pending(_))
    }

    /// The result of a synchronous call; `None` for pending calls.
    pub fn into_done(self) -> Option<StoreResult<Value>> {
        match self {
            ActionCall::Done(result) => Some(result),
            ActionCall::Pending(_) => None,
        }
    }
}

impl IntoFuture for ActionCall {
    type Output = StoreResult<Value>;
    type IntoFuture = BoxFuture<'static, StoreResult<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            ActionCall::Done(result) => future::ready(result).boxed(),
            ActionCall::Pending(future) => future,
        }
    }
}

impl fmt::Debug for ActionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCall::Done(result) => f.debug_tuple("Done").field(result).finish(),
            ActionCall::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}
