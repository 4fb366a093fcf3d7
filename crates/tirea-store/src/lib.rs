//! Reactive JSON state store with batched draft commits and path-targeted
//! subscriptions.
//!
//! `tirea-store` keeps an immutable, structurally shared state tree. Actions
//! mutate a copy-on-write draft; committing the draft produces a new
//! snapshot plus the set of dot-joined paths it changed, and only the
//! subscribers interested in those paths are notified.
//!
//! # Core Concepts
//!
//! - **Snapshot**: an immutable committed state tree, cheap to clone
//! - **Draft**: a copy-on-write working view that records structural edits
//! - **DirtyPaths**: the changed paths of one commit, parents included for
//!   membership changes
//! - **Subscriber**: a callback interested in some paths, or in everything
//! - **ActionTree / ActionSurface**: declared actions and their bound,
//!   callable mirror
//!
//! # Commit Rules
//!
//! ```text
//! sync action:   Ok  -> commit, notify      Err/panic -> discard
//! async action:  every suspension -> commit; settle (Ok or Err) -> commit
//! otherwise:     the deferred flush commits on the next runtime turn
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tirea_store::{ActionTree, Store, Subscriber};
//! use serde_json::json;
//!
//! let store = Store::new(
//!     json!({"count": 0}),
//!     ActionTree::new().action("add", |ctx, amount| {
//!         let amount = amount.as_i64().unwrap_or(1);
//!         ctx.state().increment("count", amount)?;
//!         Ok(json!(null))
//!     }),
//! );
//!
//! let disposer = store.subscribe(Subscriber::on_paths(["count"], |change| {
//!     println!("count is now {:?}", change.state.value_at("count"));
//! }));
//!
//! store.call("add", json!(2)).unwrap().into_done().unwrap().unwrap();
//! assert_eq!(store.state().value_at("count"), Some(json!(2)));
//! disposer.dispose();
//! ```

mod action;
mod config;
mod context;
mod diagnostics;
mod dirty;
mod draft;
mod error;
mod node;
mod op;
mod path;
mod registry;
mod scheduler;
mod store;

// State tree
pub use dirty::DirtyPaths;
pub use draft::{Draft, Edit, EditKind};
pub use node::{Node, Snapshot};
pub use op::{Number, Op};
pub use path::{parse_path, Path, Seg, PATH_SEPARATOR};

// Errors and configuration
pub use config::{StoreConfig, DIAGNOSTICS_ENV};
pub use diagnostics::{EventSink, StoreEvent, TracingSink};
pub use error::{StoreError, StoreResult};

// Store surface
pub use action::{
    ActionCall, ActionFn, ActionNode, ActionSurface, ActionTree, AsyncFn, BoundAction, SyncFn,
    ACTION_SEPARATOR,
};
pub use context::{ActionContext, DraftState};
pub use registry::{Change, Disposer, Subscriber};
pub use store::{Store, StoreBuilder};

// Re-export serde_json::Value for convenience
pub use serde_json::Value;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every guarded value is replaced whole or not at all, so a poisoned lock
/// still holds a consistent value.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
