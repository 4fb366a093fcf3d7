//! Observational diagnostics for commits and notifications.
//!
//! Sinks only observe; nothing they do feeds back into commit or dispatch.

use crate::DirtyPaths;
use std::fmt;
use std::sync::Arc;

/// A structured diagnostics event.
#[derive(Debug, Clone, Copy)]
pub enum StoreEvent<'a> {
    /// A draft was committed and produced a non-empty dirty set.
    MutationCommitted {
        /// Name of the action that owned the draft.
        action: &'a str,
        /// Paths changed by the commit.
        paths: &'a DirtyPaths,
    },
    /// A subscriber's update callback is about to run.
    SubscriberNotified {
        /// Label given at subscribe time.
        subscriber: Option<&'a str>,
        /// Dirty path that matched; `None` for global dispatch.
        path: Option<&'a str>,
    },
}

/// Receiver for [`StoreEvent`]s.
pub trait EventSink: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &StoreEvent<'_>);
}

/// Default sink: forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &StoreEvent<'_>) {
        match event {
            StoreEvent::MutationCommitted { action, paths } => {
                let paths: Vec<&str> = paths.iter().collect();
                tracing::debug!(
                    target: "tirea_store::diagnostics",
                    action = %action,
                    paths = ?paths,
                    "mutation committed"
                );
            }
            StoreEvent::SubscriberNotified { subscriber, path } => {
                tracing::debug!(
                    target: "tirea_store::diagnostics",
                    subscriber = subscriber.unwrap_or("<anonymous>"),
                    path = path.unwrap_or("<global>"),
                    "subscriber notified"
                );
            }
        }
    }
}

/// Gate in front of the configured sink.
#[derive(Clone)]
pub(crate) struct Diagnostics {
    enabled: bool,
    sink: Arc<dyn EventSink>,
}

impl Diagnostics {
    pub(crate) fn new(enabled: bool, sink: Arc<dyn EventSink>) -> Self {
        Self { enabled, sink }
    }

    #[inline]
    pub(crate) fn emit(&self, event: StoreEvent<'_>) {
        if self.enabled {
            self.sink.on_event(&event);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
