//! Integration tests for commits, dirty paths and subscriber targeting
//! through the public store surface.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tirea_store::{
    ActionTree, EventSink, Snapshot, Store, StoreBuilder, StoreConfig, StoreError, StoreEvent,
    Subscriber,
};

// ============================================================================
// Helpers
// ============================================================================

type Log = Arc<Mutex<Vec<String>>>;

/// Records one line per notification: `label@path`, `*` for global dispatch.
fn recorder(log: &Log, label: &'static str) -> impl Fn(&tirea_store::Change<'_>) + Send + Sync + 'static {
    let log = log.clone();
    move |change| {
        log.lock()
            .unwrap()
            .push(format!("{label}@{}", change.path.unwrap_or("*")));
    }
}

#[derive(Default)]
struct RecordingSink {
    commits: Mutex<Vec<(String, Vec<String>)>>,
    notified: Mutex<Vec<(Option<String>, Option<String>)>>,
}

impl RecordingSink {
    fn commits(&self) -> Vec<(String, Vec<String>)> {
        self.commits.lock().unwrap().clone()
    }

    fn dirty_sets(&self) -> Vec<Vec<String>> {
        self.commits().into_iter().map(|(_, paths)| paths).collect()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &StoreEvent<'_>) {
        match event {
            StoreEvent::MutationCommitted { action, paths } => {
                let mut paths: Vec<String> = paths.iter().map(str::to_string).collect();
                paths.sort();
                self.commits.lock().unwrap().push((action.to_string(), paths));
            }
            StoreEvent::SubscriberNotified { subscriber, path } => {
                self.notified
                    .lock()
                    .unwrap()
                    .push((subscriber.map(str::to_string), path.map(str::to_string)));
            }
        }
    }
}

fn sorted(paths: &[&str]) -> Vec<String> {
    let mut paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    paths.sort();
    paths
}

fn actions() -> ActionTree {
    ActionTree::new()
        .action("set", |ctx, payload| {
            let path = payload["path"].as_str().unwrap_or_default().to_string();
            ctx.state().set(path, payload["value"].clone())?;
            Ok(Value::Null)
        })
        .action("delete", |ctx, payload| {
            ctx.state().delete(payload.as_str().unwrap_or_default())?;
            Ok(Value::Null)
        })
        .action("push", |ctx, item| {
            ctx.state().push("foo", item)?;
            Ok(Value::Null)
        })
        .action("insert", |ctx, payload| {
            let index = payload["index"].as_u64().unwrap_or_default() as usize;
            let path = payload["path"].as_str().unwrap_or_default();
            ctx.state().insert(path, index, payload["value"].clone())?;
            Ok(Value::Null)
        })
        .action("revert", |ctx, _| {
            let state = ctx.state();
            state.set("a", 2)?;
            state.set("a", 1)?;
            state.set("tmp", true)?;
            state.delete("tmp")?;
            Ok(Value::Null)
        })
        .action("three_writes", |ctx, _| {
            let state = ctx.state();
            state.set("x", 1)?;
            state.set("y", 2)?;
            state.set("z", 3)?;
            Ok(Value::Null)
        })
        .action("peek", |ctx, _| Ok(ctx.state().get("x")?.unwrap_or(Value::Null)))
}

fn store_with_sink(initial: Value) -> (Store, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let store = StoreBuilder::new(initial)
        .actions(actions())
        .config(StoreConfig::default().with_diagnostics(true))
        .sink(sink.clone())
        .build();
    (store, sink)
}

fn run(store: &Store, name: &str, payload: Value) -> Result<Value, StoreError> {
    store
        .call(name, payload)?
        .into_done()
        .expect("synchronous action")
}

// ============================================================================
// Snapshot identity
// ============================================================================

#[test]
fn test_state_read_twice_is_same_snapshot() {
    let (store, _) = store_with_sink(json!({"x": 0}));
    let first = store.state();
    let second = store.state();
    assert!(Snapshot::ptr_eq(&first, &second));
}

#[test]
fn test_read_only_action_keeps_snapshot_and_notifies_nobody() {
    let (store, sink) = store_with_sink(json!({"x": 5}));
    let log = Log::default();
    let _g = store.subscribe(Subscriber::global(recorder(&log, "g")));
    let before = store.state();

    assert_eq!(run(&store, "peek", Value::Null).unwrap(), json!(5));

    assert!(Snapshot::ptr_eq(&before, &store.state()));
    assert!(log.lock().unwrap().is_empty());
    assert!(sink.commits().is_empty());
}

#[test]
fn test_commit_shares_untouched_subtrees() {
    let (store, _) = store_with_sink(json!({"a": {"b": 0}, "big": {"k": [1, 2, 3]}}));
    let before = store.state();
    run(&store, "set", json!({"path": "a.b", "value": 1})).unwrap();
    let after = store.state();

    assert!(!Snapshot::ptr_eq(&before, &after));
    assert!(before.get("big").unwrap().ptr_eq(after.get("big").unwrap()));
    assert_eq!(before.value_at("a.b"), Some(json!(0)));
}

// ============================================================================
// Dirty path sets
// ============================================================================

#[test]
fn test_replace_of_existing_key_dirties_only_itself() {
    let (store, sink) = store_with_sink(json!({"a": {"b": 0}}));
    run(&store, "set", json!({"path": "a.b", "value": 1})).unwrap();
    assert_eq!(sink.dirty_sets(), vec![sorted(&["a.b"])]);
}

#[test]
fn test_new_key_then_delete_synthesize_parent() {
    let (store, sink) = store_with_sink(json!({"obj": {}}));
    run(&store, "set", json!({"path": "obj.newKey", "value": "x"})).unwrap();
    run(&store, "delete", json!("obj.newKey")).unwrap();

    assert_eq!(
        sink.dirty_sets(),
        vec![sorted(&["obj.newKey", "obj"]), sorted(&["obj.newKey", "obj"])]
    );
    assert_eq!(store.state().to_value(), json!({"obj": {}}));
}

#[test]
fn test_three_sync_writes_make_one_commit() {
    let (store, sink) = store_with_sink(json!({"x": 0, "y": 0, "z": 0}));
    let log = Log::default();
    let _g = store.subscribe(Subscriber::global(recorder(&log, "g")));

    run(&store, "three_writes", Value::Null).unwrap();

    assert_eq!(sink.commits(), vec![("three_writes".to_string(), sorted(&["x", "y", "z"]))]);
    assert_eq!(*log.lock().unwrap(), vec!["g@*"]);
}

#[test]
fn test_push_onto_array_scenario() {
    let (store, sink) = store_with_sink(json!({"foo": ["foo", "bar"]}));
    let log = Log::default();
    let _foo = store.subscribe(Subscriber::on_paths(["foo"], recorder(&log, "foo")));

    run(&store, "push", json!("baz")).unwrap();

    assert_eq!(store.state().value_at("foo"), Some(json!(["foo", "bar", "baz"])));
    assert_eq!(sink.dirty_sets(), vec![sorted(&["foo.2", "foo"])]);
    assert_eq!(*log.lock().unwrap(), vec!["foo@foo"]);
}

#[test]
fn test_delete_at_head_notifies_shifted_elements() {
    let (store, sink) = store_with_sink(json!({"list": ["a", "b", "c"]}));
    let log = Log::default();
    let _second = store.subscribe(Subscriber::on_paths(["list.1"], recorder(&log, "second")));

    run(&store, "delete", json!("list.0")).unwrap();

    assert_eq!(store.state().value_at("list"), Some(json!(["b", "c"])));
    assert_eq!(
        sink.dirty_sets(),
        vec![sorted(&["list", "list.0", "list.1", "list.2"])]
    );
    assert_eq!(*log.lock().unwrap(), vec!["second@list.1"]);
}

#[test]
fn test_insert_at_head_notifies_shifted_elements() {
    let (store, sink) = store_with_sink(json!({"list": ["a", "b", "c"]}));
    let log = Log::default();
    let _second = store.subscribe(Subscriber::on_paths(["list.1"], recorder(&log, "second")));

    run(&store, "insert", json!({"path": "list", "index": 0, "value": "z"})).unwrap();

    assert_eq!(store.state().value_at("list"), Some(json!(["z", "a", "b", "c"])));
    assert_eq!(
        sink.dirty_sets(),
        vec![sorted(&["list", "list.0", "list.1", "list.2", "list.3"])]
    );
    assert_eq!(*log.lock().unwrap(), vec!["second@list.1"]);
}

#[test]
fn test_reverted_writes_keep_snapshot_and_notify_nobody() {
    let (store, sink) = store_with_sink(json!({"a": 1}));
    let log = Log::default();
    let _a = store.subscribe(Subscriber::on_paths(["a"], recorder(&log, "a")));
    let _root = store.subscribe(Subscriber::on_paths([""], recorder(&log, "root")));
    let _g = store.subscribe(Subscriber::global(recorder(&log, "g")));
    let before = store.state();

    run(&store, "revert", Value::Null).unwrap();

    assert!(Snapshot::ptr_eq(&before, &store.state()));
    assert_eq!(store.state().to_value(), json!({"a": 1}));
    assert!(log.lock().unwrap().is_empty());
    assert!(sink.commits().is_empty());
}

#[test]
fn test_root_replace_reaches_root_subscribers() {
    let (store, sink) = store_with_sink(json!({"old": true}));
    let log = Log::default();
    let _root = store.subscribe(Subscriber::on_paths([""], recorder(&log, "root")));

    run(&store, "set", json!({"path": "", "value": {"new": true}})).unwrap();

    assert_eq!(store.state().to_value(), json!({"new": true}));
    assert_eq!(sink.dirty_sets(), vec![sorted(&[""])]);
    assert_eq!(*log.lock().unwrap(), vec!["root@"]);
}

// ============================================================================
// Subscriber targeting
// ============================================================================

#[test]
fn test_targeted_subscriber_ignores_other_paths() {
    let (store, _) = store_with_sink(json!({"x": 0, "y": 0}));
    let log = Log::default();
    let _x = store.subscribe(Subscriber::on_paths(["x"], recorder(&log, "x")));
    let _g = store.subscribe(Subscriber::global(recorder(&log, "g")));

    run(&store, "set", json!({"path": "y", "value": 1})).unwrap();
    run(&store, "set", json!({"path": "x", "value": 1})).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["g@*", "x@x", "g@*"]);
}

#[test]
fn test_disposed_subscriber_is_not_called() {
    let (store, _) = store_with_sink(json!({"x": 0}));
    let log = Log::default();
    let disposer = store.subscribe(Subscriber::on_paths(["x"], recorder(&log, "x")));
    let global = store.subscribe(Subscriber::global(recorder(&log, "g")));

    disposer.dispose();
    global.dispose();
    disposer.dispose();
    run(&store, "set", json!({"path": "x", "value": 1})).unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_back_to_back_actions_notify_in_order() {
    let (store, sink) = store_with_sink(json!({"x": 0}));
    let values: Arc<Mutex<Vec<Value>>> = Arc::default();
    let seen = values.clone();
    let _x = store.subscribe(Subscriber::on_paths(["x"], move |change| {
        seen.lock().unwrap().push(change.state.value_at("x").unwrap());
    }));

    run(&store, "set", json!({"path": "x", "value": 1})).unwrap();
    run(&store, "set", json!({"path": "x", "value": 2})).unwrap();

    assert_eq!(*values.lock().unwrap(), vec![json!(1), json!(2)]);
    assert_eq!(sink.commits().len(), 2);
}

#[test]
fn test_subscriber_may_call_actions_reentrantly() {
    let (store, _) = store_with_sink(json!({"x": 0, "mirror": 0}));
    let inner = store.clone();
    let _mirror = store.subscribe(Subscriber::on_paths(["x"], move |change| {
        let value = change.state.value_at("x").unwrap();
        inner
            .call("set", json!({"path": "mirror", "value": value}))
            .unwrap()
            .into_done()
            .unwrap()
            .unwrap();
    }));

    run(&store, "set", json!({"path": "x", "value": 7})).unwrap();

    assert_eq!(store.state().to_value(), json!({"x": 7, "mirror": 7}));
}

#[test]
fn test_subscriber_disposing_itself_mid_dispatch() {
    let (store, _) = store_with_sink(json!({"x": 0}));
    let log = Log::default();
    let slot: Arc<Mutex<Option<tirea_store::Disposer>>> = Arc::default();

    let own = slot.clone();
    let once_log = log.clone();
    let disposer = store.subscribe(Subscriber::on_paths(["x"], move |_| {
        once_log.lock().unwrap().push("once".to_string());
        if let Some(d) = own.lock().unwrap().as_ref() {
            d.dispose();
        }
    }));
    *slot.lock().unwrap() = Some(disposer);
    let _after = store.subscribe(Subscriber::on_paths(["x"], recorder(&log, "after")));

    run(&store, "set", json!({"path": "x", "value": 1})).unwrap();
    run(&store, "set", json!({"path": "x", "value": 2})).unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["once", "after@x", "after@x"]);
}

#[test]
fn test_panicking_subscriber_aborts_rest_of_dispatch() {
    let (store, _) = store_with_sink(json!({"x": 0}));
    let log = Log::default();
    let _first = store.subscribe(Subscriber::on_paths(["x"], recorder(&log, "first")));
    let bomb = store.subscribe(Subscriber::on_paths(["x"], |_| panic!("render failed")));
    let _second = store.subscribe(Subscriber::on_paths(["x"], recorder(&log, "second")));
    let _global = store.subscribe(Subscriber::global(recorder(&log, "g")));

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = store.call("set", json!({"path": "x", "value": 1}));
    }));

    assert!(outcome.is_err());
    assert_eq!(*log.lock().unwrap(), vec!["first@x"]);
    // The commit itself already happened.
    assert_eq!(store.state().value_at("x"), Some(json!(1)));

    bomb.dispose();
    log.lock().unwrap().clear();
    run(&store, "set", json!({"path": "x", "value": 2})).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["first@x", "second@x", "g@*"]);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_sync_error_discards_attempted_mutation() {
    let store = Store::new(
        json!({"x": 0}),
        ActionTree::new().action("fail", |ctx, _| {
            ctx.state().set("x", 99)?;
            Err(StoreError::failed("validation failed"))
        }),
    );
    let log = Log::default();
    let _g = store.subscribe(Subscriber::global(recorder(&log, "g")));

    let err = run(&store, "fail", Value::Null).unwrap_err();

    assert_eq!(err.to_string(), "action failed: validation failed");
    assert_eq!(store.state().value_at("x"), Some(json!(0)));
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_sync_panic_discards_draft_and_store_stays_usable() {
    let store = Store::new(
        json!({"x": 0}),
        ActionTree::new()
            .action("explode", |ctx, _| {
                ctx.state().set("x", 1)?;
                panic!("action blew up");
            })
            .action("ok", |ctx, _| {
                ctx.state().set("x", 2)?;
                Ok(Value::Null)
            }),
    );

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = store.call("explode", Value::Null);
    }));
    assert!(outcome.is_err());
    assert_eq!(store.state().value_at("x"), Some(json!(0)));

    run(&store, "ok", Value::Null).unwrap();
    assert_eq!(store.state().value_at("x"), Some(json!(2)));
}

#[test]
fn test_document_error_surfaces_and_discards() {
    let (store, _) = store_with_sink(json!({"foo": "not an array"}));
    let err = run(&store, "push", json!(1)).unwrap_err();
    assert!(matches!(err, StoreError::AppendRequiresArray { .. }));
    assert_eq!(store.state().value_at("foo"), Some(json!("not an array")));
}

#[test]
fn test_unknown_action_is_reported() {
    let (store, _) = store_with_sink(json!({}));
    let err = store.call("nope", Value::Null).unwrap_err();
    assert_eq!(err.to_string(), "unknown action: nope");
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_diagnostics_events_name_actions_and_subscribers() {
    let (store, sink) = store_with_sink(json!({"foo": []}));
    let _list = store.subscribe(Subscriber::on_paths(["foo"], |_| {}).named("list"));
    let _all = store.subscribe(Subscriber::global(|_| {}));

    run(&store, "push", json!(1)).unwrap();

    assert_eq!(sink.commits(), vec![("push".to_string(), sorted(&["foo", "foo.0"]))]);
    assert_eq!(
        *sink.notified.lock().unwrap(),
        vec![(Some("list".to_string()), Some("foo".to_string())), (None, None)]
    );
}

#[test]
fn test_disabled_diagnostics_emit_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let store = StoreBuilder::new(json!({"foo": []}))
        .actions(actions())
        .sink(sink.clone())
        .build();
    let _all = store.subscribe(Subscriber::global(|_| {}));

    run(&store, "push", json!(1)).unwrap();

    assert!(sink.commits().is_empty());
    assert!(sink.notified.lock().unwrap().is_empty());
}
