//! Behavior of the persistent tier across engine restarts and of the
//! per-target caching flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quiche::{Engine, Flags, Value, params};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::builder()
        .cache_path(dir.path().join("store"))
        .sync_on_write(true)
        .build()
        .unwrap()
}

fn register_counted(e: &mut Engine, target: &str, flags: Flags, runs: &Arc<AtomicUsize>) {
    let r = Arc::clone(runs);
    e.task(&[], &[], target, flags, move |_, _| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(42))
    })
    .unwrap();
}

#[test]
fn durable_results_survive_an_engine_restart() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    {
        let mut e = engine(&dir);
        register_counted(&mut e, "t", Flags::NONE, &runs);
        let (_, v) = e.create("t", &params! {}).unwrap();
        assert_eq!(v, Value::Int(42));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    let mut e = engine(&dir);
    register_counted(&mut e, "t", Flags::NONE, &runs);
    let (_, v) = e.create("t", &params! {}).unwrap();
    assert_eq!(v, Value::Int(42));
    assert_eq!(runs.load(Ordering::SeqCst), 1, "the cached result was reused");
}

#[test]
fn ephemeral_results_are_recomputed_after_a_restart() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    {
        let mut e = engine(&dir);
        register_counted(&mut e, "t", Flags::EPHEMERAL, &runs);
        e.create("t", &params! {}).unwrap();
        // Within one process the in-memory copy still memoizes.
        e.create("t", &params! {}).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    let mut e = engine(&dir);
    register_counted(&mut e, "t", Flags::EPHEMERAL, &runs);
    e.create("t", &params! {}).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2, "nothing was persisted");
}

#[test]
fn volatile_results_are_served_from_disk_without_rerunning() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let mut e = engine(&dir);
    register_counted(&mut e, "t", Flags::VOLATILE, &runs);
    let first = e.create("t", &params! {}).unwrap();
    let second = e.create("t", &params! {}).unwrap();

    assert_eq!(first, second);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn volatile_results_feed_downstream_tasks() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.task(&[], &[], "big", Flags::VOLATILE, |_, _| {
        Ok(Value::Seq(vec![Value::Int(1), Value::Int(2)]))
    })
    .unwrap();
    e.task(&["big"], &[], "summary", Flags::NONE, |inputs, _| {
        let n = inputs[0].as_seq().map_or(0, <[Value]>::len);
        Ok(Value::Int(n as i64))
    })
    .unwrap();

    let (_, v) = e.create("summary", &params! {}).unwrap();
    assert_eq!(v, Value::Int(2));
}

#[test]
fn opaque_blobs_round_trip_through_the_store() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let weights = Value::Opaque {
        format: "h5".into(),
        bytes: vec![0x89, 0x48, 0x44, 0x46, 0x00, 0xff],
    };

    let register = |e: &mut Engine, runs: &Arc<AtomicUsize>| {
        let r = Arc::clone(runs);
        let w = weights.clone();
        e.task(&[], &[], "trained", Flags::NONE, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(w.clone())
        })
        .unwrap();
    };

    {
        let mut e = engine(&dir);
        register(&mut e, &runs);
        let (_, v) = e.create("trained", &params! {}).unwrap();
        assert_eq!(v, weights);
    }

    let mut e = engine(&dir);
    register(&mut e, &runs);
    let (_, v) = e.create("trained", &params! {}).unwrap();
    assert_eq!(v, weights, "the blob decoded from disk intact");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn parameterized_results_persist_under_distinct_keys() {
    let dir = TempDir::new().unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let register = |e: &mut Engine, runs: &Arc<AtomicUsize>| {
        let r = Arc::clone(runs);
        e.task(&[], &["value"], "base", Flags::NONE, move |_, params| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(params.get("value").cloned().unwrap_or(Value::Null))
        })
        .unwrap();
    };

    {
        let mut e = engine(&dir);
        register(&mut e, &runs);
        e.create("base", &params! {"value" => 3}).unwrap();
        e.create("base", &params! {"value" => 5}).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    let mut e = engine(&dir);
    register(&mut e, &runs);
    let (_, v3) = e.create("base", &params! {"value" => 3}).unwrap();
    let (_, v5) = e.create("base", &params! {"value" => 5}).unwrap();
    assert_eq!(v3, Value::Int(3));
    assert_eq!(v5, Value::Int(5));
    assert_eq!(runs.load(Ordering::SeqCst), 2, "both keys were found on disk");
}
