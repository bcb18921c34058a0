//! Tests for meldwork-core: composed methods, super calls, async stacks

use meldwork_core::*;
use std::cell::RefCell;
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn logger(log: &Log, tag: &'static str) -> impl Fn(Invocation) -> Result<Value> + 'static {
    let log = log.clone();
    move |_| {
        log.borrow_mut().push(tag.to_string());
        Ok(Value::Undefined)
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

/// p1 declares `go` with `kind`, p2 inherits p1 and adds its own `go`.
fn two_layers(kind: &str, log: &Log) -> Runtime {
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("go", kind).method("go", logger(log, "p1")))
        .unwrap();
    rt.pattern("p2", "p1", Idea::new().method("go", logger(log, "p2")))
        .unwrap();
    rt
}

fn increment(inv: Invocation) -> Result<Value> {
    Ok(Value::Int(inv.arg(0).as_i64().unwrap_or(0) + 1))
}

fn times_ten(inv: Invocation) -> Result<Value> {
    Ok(Value::Int(inv.arg(0).as_i64().unwrap_or(0) * 10))
}

// ===========================================================================
// Stack order
// ===========================================================================

#[test]
fn method_runs_ancestors_first() {
    let log = Log::default();
    let rt = two_layers("method", &log);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let ret = obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p1", "p2"]);
    assert!(matches!(ret, Value::Object(ref o) if o.ptr_eq(&obj)));
}

#[test]
fn funnel_runs_most_derived_first() {
    let log = Log::default();
    let rt = two_layers("funnel", &log);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let ret = obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p2", "p1"]);
    assert_eq!(ret, Value::Map(Props::new()));
}

#[test]
fn pre_and_post_blocks_wrap_the_main_block() {
    let log = Log::default();
    let rt = Runtime::new();
    rt.pattern(
        "p1",
        (),
        Idea::new()
            .moc("go", "method")
            .method("pre_go", logger(&log, "p1pre"))
            .method("go", logger(&log, "p1"))
            .method("post_go", logger(&log, "p1post")),
    )
    .unwrap();
    rt.pattern(
        "p2",
        "p1",
        Idea::new()
            .method("pre_go", logger(&log, "p2pre"))
            .method("go", logger(&log, "p2")),
    )
    .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p1pre", "p2pre", "p1", "p2", "p1post"]);
}

#[test]
fn stack_entries_remember_their_pattern() {
    let log = Log::default();
    let rt = two_layers("method", &log);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let method = obj.composed("go").unwrap();
    let origins: Vec<Option<String>> = method.stack().into_iter().map(|e| e.origin).collect();
    assert_eq!(origins, vec![Some("p1".to_string()), Some("p2".to_string())]);
}

// ===========================================================================
// Return values
// ===========================================================================

#[test]
fn false_stops_the_stack() {
    let log = Log::default();
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("go", "method").method("go", |_| Ok(Value::Bool(false))))
        .unwrap();
    rt.pattern("p2", "p1", Idea::new().method("go", logger(&log, "p2")))
        .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert_eq!(obj.call("go", vec![]).unwrap(), Value::Bool(false));
    assert!(entries(&log).is_empty());
}

#[test]
fn true_returns_the_object_early() {
    let log = Log::default();
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("go", "method").method("go", |_| Ok(Value::Bool(true))))
        .unwrap();
    rt.pattern("p2", "p1", Idea::new().method("go", logger(&log, "p2")))
        .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let ret = obj.call("go", vec![]).unwrap();
    assert!(matches!(ret, Value::Object(ref o) if o.ptr_eq(&obj)));
    assert!(entries(&log).is_empty());
}

#[test]
fn returned_map_is_melded_into_the_object() {
    let rt = Runtime::new();
    rt.pattern(
        "p1",
        (),
        Idea::new().moc("go", "method").method("go", |_| {
            Ok(Value::Map([("seen", Value::Bool(true))].into_iter().collect()))
        }),
    )
    .unwrap();
    let obj = rt.new_object("p1", Idea::new(), "final").unwrap();
    obj.call("go", vec![]).unwrap();
    assert_eq!(obj.get("seen"), Value::Bool(true));
}

#[test]
fn returned_static_value_reaches_every_instance() {
    let rt = Runtime::new();
    rt.pattern(
        "counter",
        (),
        Idea::new()
            .moc("count", "static")
            .with("count", 0)
            .moc("bump", "method")
            .method("bump", |inv| {
                let next = inv.this.get("count").as_i64().unwrap_or(0) + 1;
                Ok(Value::Map([("count", Value::Int(next))].into_iter().collect()))
            }),
    )
    .unwrap();
    let a = rt.new_object("counter", Idea::new(), "final").unwrap();
    let b = rt.new_object("counter", Idea::new(), "final").unwrap();
    a.call("bump", vec![]).unwrap();
    a.call("bump", vec![]).unwrap();
    assert_eq!(a.get("count"), Value::Int(2));
    assert_eq!(b.get("count"), Value::Int(2));
    assert_eq!(rt.static_value("counter", "count"), Some(Value::Int(2)));
}

#[test]
fn chain_threads_the_first_argument() {
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("calc", "chain").method("calc", increment))
        .unwrap();
    rt.pattern("p2", "p1", Idea::new().method("calc", times_ten))
        .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert_eq!(obj.call("calc", vec![Value::Int(2)]).unwrap(), Value::Int(30));
}

#[test]
fn chain_funnel_threads_most_derived_first() {
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("calc", "chain_funnel").method("calc", increment))
        .unwrap();
    rt.pattern("p2", "p1", Idea::new().method("calc", times_ten))
        .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert_eq!(obj.call("calc", vec![Value::Int(2)]).unwrap(), Value::Int(21));
}

#[test]
fn blender_collects_returned_maps() {
    let rt = Runtime::new();
    rt.pattern(
        "p1",
        (),
        Idea::new().moc("mix", "blender").method("mix", |_| {
            Ok(Value::Map([("a", Value::Int(1))].into_iter().collect()))
        }),
    )
    .unwrap();
    rt.pattern(
        "p2",
        "p1",
        Idea::new().method("mix", |_| {
            Ok(Value::Map([("b", Value::Int(2))].into_iter().collect()))
        }),
    )
    .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let mixed = obj.call("mix", vec![]).unwrap();
    assert_eq!(mixed.field("a"), Value::Int(1));
    assert_eq!(mixed.field("b"), Value::Int(2));
    assert!(!obj.has("a"), "blender leaves the object alone");
}

#[test]
fn calling_plain_data_fails() {
    let rt = Runtime::new();
    let obj = rt
        .new_object("object", Idea::new().with("size", 3), "final")
        .unwrap();
    assert!(matches!(obj.call("size", vec![]), Err(Error::NotCallable(_))));
    assert!(matches!(obj.call("missing", vec![]), Err(Error::NotCallable(_))));
}

// ===========================================================================
// Super calls
// ===========================================================================

fn speakers(policy: Option<&str>) -> Runtime {
    let rt = Runtime::new();
    let mut base = Idea::new().method("speak", |_| Ok(Value::from("p1")));
    if let Some(kind) = policy {
        base = base.moc("speak", kind);
    }
    rt.pattern("p1", (), base).unwrap();
    rt.pattern(
        "p2",
        "p1",
        Idea::new().method("speak", |inv| {
            let below = inv.call_super(vec![])?;
            Ok(Value::from(format!("p2>{}", below.as_str().unwrap_or("?"))))
        }),
    )
    .unwrap();
    rt
}

#[test]
fn call_super_reaches_the_parent_definition() {
    let rt = speakers(None);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert_eq!(obj.call("speak", vec![]).unwrap(), Value::from("p2>p1"));
}

#[test]
fn super_policy_starts_from_the_most_derived() {
    let rt = speakers(Some("super"));
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert!(obj.composed("speak").is_some());
    assert_eq!(obj.call("speak", vec![]).unwrap(), Value::from("p2>p1"));
}

#[test]
fn super_at_the_top_is_undefined() {
    let rt = Runtime::new();
    rt.pattern("solo", (), Idea::new().method("speak", |inv| inv.call_super(vec![])))
        .unwrap();
    let obj = rt.new_object("solo", Idea::new(), "final").unwrap();
    assert_eq!(obj.call("speak", vec![]).unwrap(), Value::Undefined);
}

#[test]
fn supercede_calls_one_pattern_directly() {
    let rt = speakers(None);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert_eq!(obj.supercede("p1", "speak", vec![]).unwrap(), Value::from("p1"));
    assert!(matches!(
        obj.supercede("stranger", "speak", vec![]),
        Err(Error::UnknownPattern(_))
    ));
    assert!(matches!(
        obj.supercede("object", "speak", vec![]),
        Err(Error::NotCallable(_))
    ));
}

// ===========================================================================
// Runtime stack edits
// ===========================================================================

#[test]
fn add_remove_and_cancel() {
    let log = Log::default();
    let rt = two_layers("method", &log);
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let method = obj.composed("go").unwrap();

    let extra = Function::new(logger(&log, "extra"));
    method.add(extra.clone(), true);
    obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p1", "p2", "extra"]);

    assert!(method.remove(&extra));
    assert!(!method.remove(&extra));
    log.borrow_mut().clear();
    obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p1", "p2"]);

    let sub = method.add(Function::new(logger(&log, "temp")), false);
    assert_eq!(method.len(), 3);
    sub.cancel();
    assert_eq!(method.len(), 2);
}

#[test]
fn late_mixin_updates_the_stack() {
    let log = Log::default();
    let rt = two_layers("method", &log);
    rt.pattern("p3", (), Idea::new().method("go", logger(&log, "p3")))
        .unwrap();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let method = obj.composed("go").unwrap();
    method.add(Function::new(logger(&log, "added")), false);

    obj.mixin("p3").unwrap();
    assert!(obj.instance_of("p3"));
    obj.call("go", vec![]).unwrap();
    assert_eq!(entries(&log), vec!["p1", "p2", "p3", "added"]);
}

// ===========================================================================
// Async stacks
// ===========================================================================

fn async_calc() -> Runtime {
    let rt = Runtime::new();
    rt.pattern(
        "p1",
        (),
        Idea::new()
            .moc("load", "async_chain")
            .async_method("load", |inv: Invocation| async move {
                Ok::<_, Error>(Value::Int(inv.arg(0).as_i64().unwrap_or(0) + 1))
            }),
    )
    .unwrap();
    rt.pattern(
        "p2",
        "p1",
        Idea::new().async_method("load", |inv: Invocation| async move {
            Ok::<_, Error>(Value::Int(inv.arg(0).as_i64().unwrap_or(0) * 2))
        }),
    )
    .unwrap();
    rt
}

#[tokio::test]
async fn async_chain_awaits_each_entry() {
    let rt = async_calc();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    let method = obj.composed("load").unwrap();
    assert!(method.is_async());
    let ret = obj.call_async("load", vec![Value::Int(1)]).await.unwrap();
    assert_eq!(ret, Value::Int(4));
}

#[tokio::test]
async fn async_stack_rejects_sync_call() {
    let rt = async_calc();
    let obj = rt.new_object("p2", Idea::new(), "final").unwrap();
    assert!(matches!(
        obj.call("load", vec![Value::Int(1)]),
        Err(Error::AsyncRequired(_))
    ));
}

#[tokio::test]
async fn sync_methods_run_under_call_async() {
    let rt = Runtime::new();
    rt.pattern("p1", (), Idea::new().moc("calc", "chain").method("calc", increment))
        .unwrap();
    let obj = rt.new_object("p1", Idea::new(), "final").unwrap();
    let ret = obj.call_async("calc", vec![Value::Int(5)]).await.unwrap();
    assert_eq!(ret, Value::Int(6));
}

#[test]
fn async_phase_is_not_a_composition() {
    assert!(matches!(
        ComposedMethod::compose("boot", Composition::Phase, true),
        Err(Error::UnknownCompositionKind(_))
    ));
}
