//! Subscription registry.
//!
//! Path-targeted subscriptions live in one bucket per interest path; a
//! subscription with N interest paths is referenced from N buckets. Global
//! subscriptions live in a separate list and hear every commit.
//!
//! Dispatch never holds the registry lock while a callback runs, so callbacks
//! may subscribe or dispose (themselves or others) re-entrantly. Each bucket
//! is copied before its dispatch starts: subscriptions added meanwhile wait
//! for the next bucket or commit, and subscriptions disposed before their
//! turn are skipped.
//!
//! A panicking callback is not isolated. The panic unwinds out of dispatch
//! and the remaining subscribers of that commit are not notified.

use crate::diagnostics::{Diagnostics, StoreEvent};
use crate::{lock_unpoisoned, DirtyPaths, Snapshot};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type UpdateFn = Arc<dyn Fn(&Change<'_>) + Send + Sync>;

/// What a subscriber's update callback receives.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    /// The dirty path that matched, or `None` for global subscribers.
    pub path: Option<&'a str>,
    /// The freshly committed snapshot.
    pub state: &'a Snapshot,
}

/// A subscription request.
///
/// ```
/// use tirea_store::Subscriber;
///
/// let todos = Subscriber::on_paths(["todos"], |change| {
///     println!("todos changed via {:?}", change.path);
/// })
/// .named("todo-list");
/// let everything = Subscriber::global(|_| {});
/// # drop((todos, everything));
/// ```
pub struct Subscriber {
    update: UpdateFn,
    paths: Option<BTreeSet<String>>,
    name: Option<String>,
}

impl Subscriber {
    /// Subscribe to every commit.
    pub fn global<F>(update: F) -> Self
    where
        F: Fn(&Change<'_>) + Send + Sync + 'static,
    {
        Self {
            update: Arc::new(update),
            paths: None,
            name: None,
        }
    }

    /// Subscribe to commits that dirty any of `paths` (dot-joined).
    pub fn on_paths<I, S, F>(paths: I, update: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Change<'_>) + Send + Sync + 'static,
    {
        Self {
            update: Arc::new(update),
            paths: Some(paths.into_iter().map(Into::into).collect()),
            name: None,
        }
    }

    /// Attach a diagnostic label.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Interest paths, or `None` for a global subscriber.
    pub fn paths(&self) -> Option<&BTreeSet<String>> {
        self.paths.as_ref()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("paths", &self.paths)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct Subscription {
    id: u64,
    name: Option<String>,
    update: UpdateFn,
    active: AtomicBool,
}

impl Subscription {
    fn invoke(&self, path: Option<&str>, state: &Snapshot, diagnostics: &Diagnostics) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        diagnostics.emit(StoreEvent::SubscriberNotified {
            subscriber: self.name.as_deref(),
            path,
        });
        (self.update)(&Change { path, state });
    }
}

type Bucket = BTreeMap<u64, Arc<Subscription>>;

#[derive(Default)]
struct Buckets {
    by_path: HashMap<String, Bucket>,
    global: Bucket,
}

/// Mapping from interest path to subscriptions, plus the global list.
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub(crate) struct SubscriptionRegistry {
    inner: Arc<Mutex<Buckets>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its disposer.
    ///
    /// Ids grow monotonically, so bucket order is subscribe order.
    pub(crate) fn subscribe(&self, subscriber: Subscriber) -> Disposer {
        let Subscriber {
            update,
            paths,
            name,
        } = subscriber;
        let subscription = Arc::new(Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name,
            update,
            active: AtomicBool::new(true),
        });

        let mut buckets = lock_unpoisoned(&self.inner);
        let paths: Option<Vec<String>> = paths.map(|set| set.into_iter().collect());
        match &paths {
            None => {
                buckets
                    .global
                    .insert(subscription.id, subscription.clone());
            }
            Some(paths) => {
                for path in paths {
                    buckets
                        .by_path
                        .entry(path.clone())
                        .or_default()
                        .insert(subscription.id, subscription.clone());
                }
            }
        }
        drop(buckets);

        tracing::trace!(
            id = subscription.id,
            name = subscription.name.as_deref().unwrap_or("<anonymous>"),
            global = paths.is_none(),
            "subscription added"
        );

        Disposer {
            registry: Arc::downgrade(&self.inner),
            subscription,
            paths,
        }
    }

    /// Number of subscriptions currently registered under `path`.
    #[cfg(test)]
    pub(crate) fn path_subscribers(&self, path: &str) -> usize {
        lock_unpoisoned(&self.inner)
            .by_path
            .get(path)
            .map_or(0, BTreeMap::len)
    }

    /// Number of global subscriptions.
    #[cfg(test)]
    pub(crate) fn global_subscribers(&self) -> usize {
        lock_unpoisoned(&self.inner).global.len()
    }

    /// Notify subscribers for one commit.
    ///
    /// Path buckets are dispatched first, one per dirty path, each in
    /// subscribe order; a subscription interested in several dirty paths is
    /// called once per path. Global subscribers follow, once each.
    pub(crate) fn dispatch(&self, dirty: &DirtyPaths, state: &Snapshot, diagnostics: &Diagnostics) {
        for path in dirty.iter() {
            let bucket: Vec<Arc<Subscription>> = {
                let buckets = lock_unpoisoned(&self.inner);
                match buckets.by_path.get(path) {
                    Some(bucket) => bucket.values().cloned().collect(),
                    None => continue,
                }
            };
            for subscription in bucket {
                subscription.invoke(Some(path), state, diagnostics);
            }
        }

        let globals: Vec<Arc<Subscription>> = lock_unpoisoned(&self.inner)
            .global
            .values()
            .cloned()
            .collect();
        for subscription in globals {
            subscription.invoke(None, state, diagnostics);
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buckets = lock_unpoisoned(&self.inner);
        f.debug_struct("SubscriptionRegistry")
            .field("paths", &buckets.by_path.len())
            .field("global", &buckets.global.len())
            .finish()
    }
}

/// Removes one subscription from every bucket it was added to.
///
/// Disposing is idempotent. Dropping a `Disposer` without calling
/// [`Disposer::dispose`] leaves the subscription registered.
pub struct Disposer {
    registry: Weak<Mutex<Buckets>>,
    subscription: Arc<Subscription>,
    paths: Option<Vec<String>>,
}

impl Disposer {
    /// Unsubscribe. Calling this again is a no-op.
    pub fn dispose(&self) {
        if !self.subscription.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let id = self.subscription.id;
        let mut buckets = lock_unpoisoned(&inner);
        match &self.paths {
            None => {
                buckets.global.remove(&id);
            }
            Some(paths) => {
                for path in paths {
                    if let Some(bucket) = buckets.by_path.get_mut(path) {
                        bucket.remove(&id);
                        if bucket.is_empty() {
                            buckets.by_path.remove(path);
                        }
                    }
                }
            }
        }
        tracing::trace!(id, "subscription disposed");
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.subscription.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("id", &self.subscription.id)
            .field("active", &self.is_active())
            .finish()
    }
}
