//! Tests for meldwork-core: object construction, phases, nested builds, exports

use meldwork_core::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn shapes() -> Runtime {
    let rt = Runtime::new();
    rt.pattern(
        "shape",
        (),
        Idea::new()
            .moc("measure", "phase")
            .method("measure", |inv| {
                let side = inv.this.get("side").as_i64().unwrap_or(0);
                inv.this.set("area", side * side)?;
                Ok(Value::Undefined)
            }),
    )
    .unwrap();
    rt.pattern("square", "shape", Idea::new().with("side", 4)).unwrap();
    rt
}

// ===========================================================================
// Construction
// ===========================================================================

#[test]
fn square_gets_its_area_in_the_final_phase() {
    let rt = shapes();
    let sq = rt.new_object("square", Idea::new(), "object_phase").unwrap();
    assert_eq!(sq.inherits(), vec!["object", "shape", "square", "idea"]);
    assert_eq!(sq.phase_state("object_phase"), PhaseState::Completed);
    assert_eq!(sq.phase_state("builder_phase"), PhaseState::NotStarted);
    assert_eq!(sq.get("area"), Value::Undefined);

    sq.machine("final").unwrap();
    assert_eq!(sq.get("area"), Value::Int(16));
    assert_eq!(
        sq.completed_phases(),
        vec!["object_phase", "builder_phase", "measure"]
    );
    assert_eq!(sq.built_to(), Some(PhaseTarget::Final));
}

#[test]
fn instance_idea_overrides_pattern_values() {
    let rt = shapes();
    let sq = rt
        .new_object("square", Idea::new().with("side", 5), "final")
        .unwrap();
    assert_eq!(sq.get("area"), Value::Int(25));
    assert_eq!(sq.snapshot("idea").unwrap().get("side"), Some(&Value::Int(5)));
}

#[test]
fn idea_blueprint_names_its_pattern() {
    let rt = shapes();
    let sq = rt
        .new_object(Idea::of("square").with("side", 2), Idea::new(), "final")
        .unwrap();
    assert_eq!(sq.pattern(), "square");
    assert_eq!(sq.get("area"), Value::Int(4));
}

#[test]
fn built_blueprint_only_advances_phases() {
    let rt = shapes();
    let sq = rt.new_object("square", Idea::new(), false).unwrap();
    assert!(!sq.machine_live());
    assert_eq!(sq.phase_state("object_phase"), PhaseState::NotStarted);

    let same = rt.new_object(sq.clone(), Idea::new(), "final").unwrap();
    assert!(same.ptr_eq(&sq));
    assert_eq!(sq.get("area"), Value::Int(16));
}

#[test]
fn build_accepts_ideas_and_names() {
    let rt = shapes();
    let from_idea = rt.build(Idea::of("square").into(), "final").unwrap();
    assert_eq!(from_idea.get("area"), Value::Int(16));
    let from_name = rt.build(Value::from("square"), "final").unwrap();
    assert!(from_name.instance_of("shape"));
    assert!(matches!(
        rt.build(Value::Int(3), "final"),
        Err(Error::InvalidIdea(_))
    ));
}

// ===========================================================================
// Phases
// ===========================================================================

fn counted(count: &Rc<Cell<i32>>, fail: bool) -> Runtime {
    let rt = Runtime::new();
    let count = count.clone();
    rt.pattern(
        "job",
        (),
        Idea::new().moc("boot", "phase").method("boot", move |_| {
            count.set(count.get() + 1);
            if fail {
                return Err(Error::MethodFailed {
                    name: "boot".into(),
                    message: "disk missing".into(),
                });
            }
            Ok(Value::Undefined)
        }),
    )
    .unwrap();
    rt
}

#[test]
fn each_phase_runs_once() {
    let count = Rc::new(Cell::new(0));
    let rt = counted(&count, false);
    let job = rt.new_object("job", Idea::new(), "final").unwrap();
    job.machine("final").unwrap();
    job.machine("boot").unwrap();
    assert_eq!(count.get(), 1);
    assert_eq!(job.phase_state("boot"), PhaseState::Completed);
}

#[test]
fn failed_phase_stays_running() {
    let count = Rc::new(Cell::new(0));
    let rt = counted(&count, true);
    let job = rt.new_object("job", Idea::new(), false).unwrap();
    assert!(matches!(job.machine("final"), Err(Error::MethodFailed { .. })));
    assert_eq!(job.phase_state("boot"), PhaseState::Running);

    job.machine("final").unwrap();
    assert_eq!(count.get(), 1, "a running phase is not re-entered");
}

#[test]
fn phases_run_in_declaration_order() {
    let log: Rc<RefCell<Vec<String>>> = Rc::default();
    let rt = Runtime::new();
    let (first, second) = (log.clone(), log.clone());
    rt.pattern(
        "stage",
        (),
        Idea::new()
            .moc("load", "phase")
            .moc("render", "phase")
            .method("render", move |_| {
                second.borrow_mut().push("render".into());
                Ok(Value::Undefined)
            })
            .method("load", move |_| {
                first.borrow_mut().push("load".into());
                Ok(Value::Undefined)
            }),
    )
    .unwrap();
    let obj = rt.new_object("stage", Idea::new(), "load").unwrap();
    assert_eq!(*log.borrow(), vec!["load"]);
    obj.machine("final").unwrap();
    assert_eq!(*log.borrow(), vec!["load", "render"]);
}

#[test]
fn uuid_state_is_filled_in() {
    let rt = Runtime::new();
    rt.pattern("tracked", (), Idea::new().moc("token", "uuid")).unwrap();
    let a = rt.new_object("tracked", Idea::new(), "final").unwrap();
    let b = rt.new_object("tracked", Idea::new(), "final").unwrap();
    let token = a.get("token");
    assert_eq!(token.as_str().map(str::len), Some(36));
    assert_ne!(token, b.get("token"));

    let fixed = rt
        .new_object("tracked", Idea::new().with("token", "given"), "final")
        .unwrap();
    assert_eq!(fixed.get("token"), Value::from("given"));
}

// ===========================================================================
// Nested builds
// ===========================================================================

fn garage() -> Runtime {
    let rt = Runtime::new();
    rt.pattern("wheel", (), Idea::new().with("size", 15)).unwrap();
    rt.pattern(
        "car",
        (),
        Idea::new()
            .with("front", Idea::of("wheel").with("size", 17))
            .with(
                "spare",
                Value::Map([("tire", Value::from(Idea::of("wheel")))].into_iter().collect()),
            )
            .with("manual", Idea::of("wheel").skip_build()),
    )
    .unwrap();
    rt.pattern(
        "garage",
        (),
        Idea::new().with("name", "downtown").with("car", Idea::of("car")),
    )
    .unwrap();
    rt
}

#[test]
fn nested_ideas_are_built_and_linked() {
    let rt = garage();
    let g = rt.new_object("garage", Idea::new(), "final").unwrap();

    let car = g.child("car").unwrap();
    assert!(matches!(g.get("car"), Value::Object(ref o) if o.ptr_eq(&car)));
    assert_eq!(car.path().as_deref(), Some("car"));
    assert!(car.builder().unwrap().ptr_eq(&g));

    let front = car.child("front").unwrap();
    assert_eq!(front.get("size"), Value::Int(17));
    assert!(front.builder().unwrap().ptr_eq(&car));
    assert_eq!(front.built_to(), Some(PhaseTarget::Final));

    let tire = car.child("spare.tire").unwrap();
    assert_eq!(tire.path().as_deref(), Some("spare.tire"));
    assert_eq!(tire.get("size"), Value::Int(15));
    assert!(matches!(car.get("spare").field("tire"), Value::Object(_)));
}

#[test]
fn lookup_walks_the_builder_chain() {
    let rt = garage();
    let g = rt.new_object("garage", Idea::new(), "final").unwrap();
    let front = g.child("car").unwrap().child("front").unwrap();
    assert_eq!(front.lookup("name"), Value::from("downtown"));
    assert_eq!(front.lookup("nothing"), Value::Undefined);
}

#[test]
fn skip_build_ideas_stay_ideas() {
    let rt = garage();
    let car = rt.new_object("car", Idea::new(), "final").unwrap();
    assert!(car.child("manual").is_none());
    assert!(matches!(car.get("manual"), Value::Idea(_)));
    let paths: Vec<String> = car.built_children().into_iter().map(|(p, _)| p).collect();
    assert_eq!(paths, vec!["front", "spare.tire"]);
}

#[test]
fn children_stop_where_the_parent_stops() {
    let rt = garage();
    let g = rt.new_object("garage", Idea::new(), "builder_phase").unwrap();
    let car = g.child("car").unwrap();
    assert_eq!(car.built_to(), Some(PhaseTarget::Named("builder_phase".into())));
    assert_eq!(car.phase_state("builder_phase"), PhaseState::Completed);
}

// ===========================================================================
// Singletons and constructors
// ===========================================================================

#[test]
fn singleton_pattern_builds_once() {
    let rt = Runtime::new();
    rt.pattern("settings", (), Idea::new().with("is_singleton", true))
        .unwrap();
    rt.pattern("app_settings", "settings", Idea::new()).unwrap();
    let a = rt.new_object("settings", Idea::new(), "final").unwrap();
    let b = rt.new_object("settings", Idea::new(), "final").unwrap();
    assert!(a.ptr_eq(&b));
    assert!(rt.singleton("settings").unwrap().ptr_eq(&a));

    let sub = rt.new_object("app_settings", Idea::new(), "final").unwrap();
    assert!(sub.ptr_eq(&a));
}

#[test]
fn constructor_hooks_shape_args_and_state() {
    let rt = Runtime::new();
    rt.pattern(
        "point",
        (),
        Idea::new()
            .method("pre_constructor", |inv| {
                Ok(array(inv.args.iter().map(|v| Value::Int(v.as_i64().unwrap_or(0) * 2))))
            })
            .method("constructor", |inv| {
                inv.this.set("x", inv.arg(0))?;
                Ok(Value::Undefined)
            }),
    )
    .unwrap();
    let p = rt
        .new_object("point", Idea::new().args(vec![Value::Int(3)]), "final")
        .unwrap();
    assert_eq!(p.get("x"), Value::Int(6));
    assert_eq!(p.args(), vec![Value::Int(6)]);
    assert!(!p.has("constructor"));
    assert!(!p.has("pre_constructor"));
}

struct ArgCount;

impl BaseConstructor for ArgCount {
    fn construct(&self, pattern: &str, args: &[Value]) -> Props {
        [
            ("built_as", Value::from(pattern)),
            ("arg_count", Value::Int(args.len() as i64)),
        ]
        .into_iter()
        .collect()
    }
}

#[test]
fn base_constructor_supplies_the_first_layer() {
    let rt = Runtime::new();
    rt.pattern("thing", (), Idea::new().with("arg_count", 99)).unwrap();
    rt.set_constructor(ArgCount);
    let t = rt
        .new_object("thing", Idea::new().args(vec![Value::Null, Value::Null]), "final")
        .unwrap();
    assert_eq!(t.get("built_as"), Value::from("thing"));
    assert_eq!(t.get("arg_count"), Value::Int(99), "pattern layers meld over the base");

    let rt = Runtime::new();
    rt.set_constructor(LayeredConstructor::new(
        [("kind", Value::from("base"))].into_iter().collect(),
    ));
    let o = rt.new_object("object", Idea::new(), "final").unwrap();
    assert_eq!(o.get("kind"), Value::from("base"));
}

#[test]
fn late_mixin_appends_after_the_idea_layer() {
    let rt = shapes();
    rt.pattern("labelled", (), Idea::new().with("label", "box")).unwrap();
    let sq = rt.new_object("square", Idea::new(), "final").unwrap();
    sq.mixin("labelled").unwrap();
    assert_eq!(
        sq.inherits(),
        vec!["object", "shape", "square", "idea", "labelled"]
    );
    assert_eq!(sq.get("label"), Value::from("box"));
    assert!(rt.instance_of(&sq, "labelled"));
}

// ===========================================================================
// Observers
// ===========================================================================

#[tokio::test]
async fn observers_receive_changes_in_order() {
    let rt = Runtime::new();
    rt.pattern("dial", (), Idea::new().with("level", 0)).unwrap();
    let dial = rt.new_object("dial", Idea::new(), "final").unwrap();
    let seen: Rc<RefCell<Vec<(i64, i64)>>> = Rc::default();
    let sink = seen.clone();
    dial.observe(
        "level",
        Function::new(move |inv| {
            let new = inv.arg(0).as_i64().unwrap_or(-1);
            let old = inv.arg(1).as_i64().unwrap_or(-1);
            sink.borrow_mut().push((new, old));
            Ok(Value::Undefined)
        }),
    );

    dial.set("level", 1).unwrap();
    dial.set("level", 2).unwrap();
    dial.set("level", 2).unwrap();
    assert_eq!(dial.pending_changes(), 2);

    assert_eq!(dial.dispatch_changes().await.unwrap(), 2);
    assert_eq!(*seen.borrow(), vec![(1, 0), (2, 1)]);
    assert_eq!(dial.pending_changes(), 0);
}

#[tokio::test]
async fn observer_queue_is_bounded() {
    let config = RuntimeConfig {
        observer_queue_limit: 2,
        ..Default::default()
    };
    let rt = Runtime::with_config(config);
    let dial = rt
        .new_object("object", Idea::new().with("level", 0), "final")
        .unwrap();
    dial.observe("level", Function::new(|_| Ok(Value::Undefined)));
    dial.set("level", 1).unwrap();
    dial.set("level", 2).unwrap();
    let err = dial.set("level", 3).unwrap_err();
    assert!(matches!(err, Error::ObserverOverflow { limit: 2, .. }));
    assert_eq!(dial.get("level"), Value::Int(2));

    dial.dispatch_changes().await.unwrap();
    dial.set("level", 3).unwrap();
    assert_eq!(dial.pending_changes(), 1);
}

// ===========================================================================
// Exports
// ===========================================================================

fn account() -> Instance {
    let rt = Runtime::new();
    rt.pattern(
        "account",
        (),
        Idea::new()
            .with("owner", "ada")
            .with("secret", "hunter2")
            .moc("secret", "priv")
            .with("scratch", 1)
            .moc("scratch", "ignore")
            .method("greet", |_| Ok(Value::from("hi"))),
    )
    .unwrap();
    rt.pattern("audited", "account", Idea::new().with("audited", true))
        .unwrap();
    rt.new_object("audited", Idea::new(), "final").unwrap()
}

#[test]
fn perspective_hides_private_and_ignored_state() {
    let acct = account();
    let view = acct.perspective(None, false);
    let keys: Vec<&str> = view.keys().collect();
    assert_eq!(keys, vec!["owner", "audited"]);

    let with_methods = acct.perspective(None, true);
    assert!(with_methods.contains_key("greet"));

    let filtered = acct.perspective(Some(&["audited"][..]), false);
    assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["audited"]);
}

#[test]
fn idealize_round_trips_through_new() {
    let acct = account();
    acct.set("owner", "grace").unwrap();

    let active = acct.idealize(None, true);
    assert_eq!(active.pattern.as_deref(), Some("audited"));
    assert_eq!(active.get("owner"), Some(&Value::from("grace")));

    let declared = acct.idealize(None, false);
    assert_eq!(declared.get("owner"), Some(&Value::from("ada")));

    let rt = acct.runtime();
    let copy = rt.new_object(active, Idea::new(), "final").unwrap();
    assert_eq!(copy.get("owner"), Value::from("grace"));
    assert!(copy.instance_of("account"));
}

#[test]
fn to_json_exports_plain_values() {
    let acct = account();
    let json = acct.to_json();
    assert_eq!(json["owner"], "ada");
    assert_eq!(json["audited"], true);
    assert!(json.get("secret").is_none());
    assert!(json.get("greet").is_none());
}
