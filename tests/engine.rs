//! End-to-end build scenarios over a real disk store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use quiche::{Engine, Error, Flags, Value, params};
use tempfile::TempDir;

fn engine(dir: &TempDir) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::builder()
        .cache_path(dir.path().join("store"))
        .build()
        .unwrap()
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// `base` returns its `value` parameter; `product` multiplies it by `times`.
fn register_product(e: &mut Engine, base_runs: &Arc<AtomicUsize>, product_runs: &Arc<AtomicUsize>) {
    let runs = Arc::clone(base_runs);
    e.task(&[], &["value"], "base", Flags::NONE, move |_, params| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(params.get("value").cloned().unwrap_or(Value::Int(1)))
    })
    .unwrap();

    let runs = Arc::clone(product_runs);
    e.task(
        &["base"],
        &["times"],
        "product",
        Flags::NONE,
        move |inputs, params| {
            runs.fetch_add(1, Ordering::SeqCst);
            let base = inputs[0].as_int().unwrap_or(1);
            let times = params.get("times").and_then(Value::as_int).unwrap_or(1);
            Ok(Value::Int(base * times))
        },
    )
    .unwrap();
}

#[test]
fn distinct_parameter_bindings_cache_separately() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    register_product(&mut e, &counter(), &counter());

    let (_, p1) = e.create("product", &params! {"value" => 3, "times" => 5}).unwrap();
    let (_, p2) = e.create("product", &params! {"value" => 5, "times" => 6}).unwrap();
    assert_eq!(p1, Value::Int(15));
    assert_eq!(p2, Value::Int(30));

    // Both results are still cached; asking again disturbs neither.
    let (_, p1_again) = e.create("product", &params! {"value" => 3, "times" => 5}).unwrap();
    assert_eq!(p1_again, Value::Int(15));
}

#[test]
fn repeated_creates_are_memoized() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    let base_runs = counter();
    let product_runs = counter();
    register_product(&mut e, &base_runs, &product_runs);

    let params = params! {"value" => 3, "times" => 5};
    let first = e.create("product", &params).unwrap();
    let second = e.create("product", &params).unwrap();

    assert_eq!(first, second);
    assert_eq!(base_runs.load(Ordering::SeqCst), 1);
    assert_eq!(product_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn irrelevant_parameters_do_not_fragment_the_cache() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    let base_runs = counter();
    register_product(&mut e, &base_runs, &counter());

    e.create("base", &params! {"value" => 3}).unwrap();
    e.create("base", &params! {"value" => 3, "times" => 9}).unwrap();
    assert_eq!(base_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn template_targets_generate_per_match() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.template_task(&[], &[], "trained:{model}", Flags::NONE, |m, _, _| {
        Ok(Value::Str(format!("weights-{}", m.group("model").unwrap())))
    })
    .unwrap();
    e.template_task(
        &["trained:{model}"],
        &[],
        "score:{model}",
        Flags::NONE,
        |_, inputs, _| {
            Ok(Value::Str(format!("score({})", inputs[0].as_str().unwrap())))
        },
    )
    .unwrap();

    let spec = e.find_target("score:alpha").unwrap();
    assert_eq!(spec.inputs(), ["trained:alpha"]);
    let spec = e.find_target("score:beta").unwrap();
    assert_eq!(spec.inputs(), ["trained:beta"]);

    let (_, alpha) = e.create("score:alpha", &params! {}).unwrap();
    let (_, beta) = e.create("score:beta", &params! {}).unwrap();
    assert_eq!(alpha, Value::Str("score(weights-alpha)".into()));
    assert_eq!(beta, Value::Str("score(weights-beta)".into()));
}

#[test]
fn template_inputs_may_not_use_unnamed_groups() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.template_task(&["trained:{}"], &[], "score:{}", Flags::NONE, |_, _, _| {
        Ok(Value::Null)
    })
    .unwrap();

    // The generator matches but its factory fails, so the name stays
    // unknown; the report explains why.
    assert!(matches!(
        e.create("score:alpha", &params! {}),
        Err(Error::UnknownTarget(_))
    ));
    let report = e.resolution_report("score:alpha");
    assert!(report.contains("rule generation failed"));
}

#[test]
fn iteration_targets_chain_down_to_start() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.add_object("step_start", Value::Int(0), Flags::NONE).unwrap();
    e.iter_task(
        &["step_{iter}"],
        &[],
        "step_{next}",
        Flags::NONE,
        |next, inputs, _| {
            Ok(Value::Int(inputs[0].as_int().unwrap_or(0) + next as i64))
        },
    )
    .unwrap();

    let spec = e.find_target("step_3").unwrap();
    assert_eq!(spec.inputs(), ["step_2"]);
    let spec = e.find_target("step_0").unwrap();
    assert_eq!(spec.inputs(), ["step_start"]);

    // 0, then +1, +2, +3 down the chain.
    let (_, v) = e.create("step_3", &params! {}).unwrap();
    assert_eq!(v, Value::Int(6));
}

#[test]
fn knockout_forces_the_whole_chain_to_rebuild() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    let runs_a = counter();
    let runs_b = counter();
    let runs_c = counter();

    let runs = Arc::clone(&runs_c);
    e.task(&[], &[], "c", Flags::NONE, move |_, _| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(1))
    })
    .unwrap();
    let runs = Arc::clone(&runs_b);
    e.task(&["c"], &[], "b", Flags::NONE, move |inputs, _| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(inputs[0].as_int().unwrap() + 1))
    })
    .unwrap();
    let runs = Arc::clone(&runs_a);
    e.task(&["b"], &[], "a", Flags::NONE, move |inputs, _| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(inputs[0].as_int().unwrap() + 1))
    })
    .unwrap();

    let (ts1, v1) = e.create("a", &params! {}).unwrap();
    assert_eq!(v1, Value::Int(3));
    let counts = || {
        (
            runs_a.load(Ordering::SeqCst),
            runs_b.load(Ordering::SeqCst),
            runs_c.load(Ordering::SeqCst),
        )
    };
    assert_eq!(counts(), (1, 1, 1));

    // A second plain create touches nothing.
    e.create("a", &params! {}).unwrap();
    assert_eq!(counts(), (1, 1, 1));

    // Knocking out the deepest dependency re-executes c, then b, then a.
    let (ts2, v2) = e.create_with("a", &params! {}, &["c"]).unwrap();
    assert_eq!(v2, Value::Int(3));
    assert_eq!(counts(), (2, 2, 2));
    assert!(ts2 > ts1);
}

#[test]
fn knocked_out_targets_always_run_their_task() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    let runs = counter();

    let r = Arc::clone(&runs);
    e.task(&[], &[], "t", Flags::NONE, move |_, _| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(7))
    })
    .unwrap();

    e.create_with("t", &params! {}, &["t"]).unwrap();
    e.create_with("t", &params! {}, &["t"]).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn aliases_resolve_to_the_same_value_and_cycles_fail() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.task(&[], &[], "model:v3", Flags::NONE, |_, _| {
        Ok(Value::Str("v3-weights".into()))
    })
    .unwrap();
    e.add_alias("latest", "model:v3");

    let (_, via_alias) = e.create("latest", &params! {}).unwrap();
    let (_, direct) = e.create("model:v3", &params! {}).unwrap();
    assert_eq!(via_alias, direct);

    e.add_alias("model:v3", "latest");
    assert!(matches!(
        e.create("latest", &params! {}),
        Err(Error::CycleDetected(_))
    ));
}

#[test]
fn create_brave_returns_the_cached_value_without_checking() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    let runs = counter();

    let r = Arc::clone(&runs);
    e.task(&[], &[], "t", Flags::NONE, move |_, _| {
        r.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(7))
    })
    .unwrap();

    // Cold cache: brave falls back to a full create.
    let (ts, v) = e.create_brave("t", &params! {}).unwrap();
    assert_eq!(v, Value::Int(7));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Warm cache: brave skips freshness entirely, knockout included.
    let (ts2, v2) = e.create_brave_with("t", &params! {}, &["t"]).unwrap();
    assert_eq!((ts2, v2), (ts, Value::Int(7)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn gather_targets_collect_inputs_in_declaration_order() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.add_object("one", Value::Int(1), Flags::NONE).unwrap();
    e.add_object("two", Value::Int(2), Flags::NONE).unwrap();
    e.add_gather(&["two", "one"], "both", Flags::NONE).unwrap();

    let (_, v) = e.create("both", &params! {}).unwrap();
    assert_eq!(v, Value::Seq(vec![Value::Int(2), Value::Int(1)]));
}

#[test]
fn task_failures_carry_the_target_name() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.task(&[], &[], "doomed", Flags::NONE, |_, _| {
        Err("out of cheese".into())
    })
    .unwrap();

    match e.create("doomed", &params! {}) {
        Err(Error::Task { target, source }) => {
            assert_eq!(target, "doomed");
            assert_eq!(source.to_string(), "out of cheese");
        }
        other => panic!("expected a task error, got {other:?}"),
    }
}

#[test]
fn unknown_targets_are_reported() {
    let dir = TempDir::new().unwrap();
    let e = engine(&dir);
    assert!(matches!(
        e.create("ghost", &params! {}),
        Err(Error::UnknownTarget(name)) if name == "ghost"
    ));
}

#[test]
fn dependency_cycles_fail_the_build() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);
    e.task(&["b"], &[], "a", Flags::NONE, |_, _| Ok(Value::Null))
        .unwrap();
    e.task(&["a"], &[], "b", Flags::NONE, |_, _| Ok(Value::Null))
        .unwrap();

    assert!(matches!(
        e.create("a", &params! {}),
        Err(Error::CycleDetected(_))
    ));
    assert!(e.dependency_report("a").contains("circular dependency"));
}

#[test]
fn add_object_overwrites_previous_values() {
    let dir = TempDir::new().unwrap();
    let mut e = engine(&dir);

    e.add_object("config", Value::Int(1), Flags::NONE).unwrap();
    let (_, v) = e.create("config", &params! {}).unwrap();
    assert_eq!(v, Value::Int(1));

    e.add_object("config", Value::Int(2), Flags::NONE).unwrap();
    let (_, v) = e.create("config", &params! {}).unwrap();
    assert_eq!(v, Value::Int(2));
}
