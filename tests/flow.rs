//! Coils, branches, oneshots, subroutines, and edge contacts.

use ladder_vm::prelude::*;

fn flag(state: &SystemState, name: &str) -> bool {
    state.tag(name).map(Value::truthy).unwrap_or(false)
}

fn number(state: &SystemState, name: &str) -> i64 {
    state
        .tag(name)
        .map(|v| v.scalar().as_i64())
        .unwrap_or_default()
}

fn patch_bool(runner: &mut Runner, name: &str, value: bool) {
    runner
        .patch([(name.to_string(), Value::Bool(value))])
        .expect("patch");
}

#[test]
fn latch_with_reset_scenario() {
    let button = Tag::bool("Button");
    let clear = Tag::bool("Clear");
    let light = Tag::bool("Light");

    let mut b = Program::builder();
    b.rung(bit(&button), |r| {
        r.push(latch(&light));
    });
    b.rung(bit(&clear), |r| {
        r.push(reset(&light));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Button", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Light"));

    patch_bool(&mut runner, "Button", false);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Light"), "latch holds");

    patch_bool(&mut runner, "Clear", true);
    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "Light"));
}

#[test]
fn out_coil_is_inert_while_disabled() {
    let enable = Tag::bool("Enable");
    let lamp = Tag::bool("Lamp");
    let keeper = Tag::bool("Keeper");

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(out(&lamp));
    });
    // A later rung re-latches Keeper from Lamp so we can see whether the
    // coil wrote false (it must not write at all).
    b.rung(bit(&lamp), |r| {
        r.push(latch(&keeper));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Enable", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Lamp"));

    patch_bool(&mut runner, "Enable", false);
    runner.step().unwrap();
    // The coil does not drive false; the stale true persists in the tag
    // map until something else writes it.
    assert!(flag(&runner.current_state(), "Lamp"));
    assert!(flag(&runner.current_state(), "Keeper"));
}

#[test]
fn out_oneshot_fires_once_per_rising_enable() {
    let button = Tag::bool("Button");
    let count = Tag::dint("Count");

    let mut b = Program::builder();
    b.rung(bit(&button), |r| {
        r.push(math(Expr::from(&count) + 1, &count).oneshot());
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Button", true);
    runner.run(3).unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 1);

    patch_bool(&mut runner, "Button", false);
    runner.step().unwrap();
    patch_bool(&mut runner, "Button", true);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 2);
}

#[test]
fn branch_requires_parent_and_local_conditions() {
    let master = Tag::bool("Master");
    let aux = Tag::bool("Aux");
    let main_out = Tag::bool("MainOut");
    let branch_out = Tag::bool("BranchOut");

    let mut b = Program::builder();
    b.rung(bit(&master), |r| {
        r.push(out(&main_out));
        r.branch(bit(&aux), |br| {
            br.push(out(&branch_out));
        });
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Master", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "MainOut"));
    assert!(!flag(&runner.current_state(), "BranchOut"));

    patch_bool(&mut runner, "Aux", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "BranchOut"));

    patch_bool(&mut runner, "Master", false);
    runner
        .patch([("BranchOut".to_string(), Value::Bool(false))])
        .unwrap();
    runner.step().unwrap();
    // Parent disabled defeats the branch even with Aux held.
    assert!(!flag(&runner.current_state(), "BranchOut"));
}

#[test]
fn subroutine_runs_against_the_same_scan() {
    let go = Tag::bool("Go");
    let stage = Tag::int("Stage");
    let done = Tag::bool("Done");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(call("startup"));
    });
    b.rung(eq(&stage, 7), |r| {
        r.push(latch(&done));
    });
    b.subroutine("startup", |s| {
        s.rung((), |r| {
            r.push(copy(7, &stage));
        });
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    // The subroutine's write is visible to the later main rung within
    // the same scan.
    assert_eq!(number(&runner.current_state(), "Stage"), 7);
    assert!(flag(&runner.current_state(), "Done"));
}

#[test]
fn subroutine_return_unwinds_only_the_subroutine() {
    let go = Tag::bool("Go");
    let early = Tag::bool("Early");
    let skipped = Tag::bool("Skipped");
    let after = Tag::bool("After");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(call("guarded"));
    });
    b.rung(bit(&go), |r| {
        r.push(latch(&after));
    });
    b.subroutine("guarded", |s| {
        s.rung(bit(&early), |r| {
            r.push(return_());
        });
        s.rung((), |r| {
            r.push(latch(&skipped));
        });
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    patch_bool(&mut runner, "Early", true);
    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "Skipped"));
    assert!(flag(&runner.current_state(), "After"), "caller continues");

    patch_bool(&mut runner, "Early", false);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Skipped"));
}

#[test]
fn missing_subroutine_is_a_hard_error_at_call_time() {
    let go = Tag::bool("Go");
    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(call("nowhere"));
    });
    let mut runner = Runner::new(b.build().unwrap());

    // Disabled call never resolves the name.
    runner.step().unwrap();

    patch_bool(&mut runner, "Go", true);
    let err = runner.step().unwrap_err();
    assert!(matches!(err, EngineError::MissingSubroutine(name) if name == "nowhere"));

    // The failed scan committed nothing; the runner is restartable.
    assert_eq!(runner.current_state().scan_id(), 1);
    patch_bool(&mut runner, "Go", false);
    runner.step().unwrap();
    assert_eq!(runner.current_state().scan_id(), 2);
}

#[test]
fn rising_edge_fires_for_one_scan() {
    let button = Tag::bool("Button");
    let count = Tag::dint("Count");

    let mut b = Program::builder();
    b.rung(rise(&button), |r| {
        r.push(math(Expr::from(&count) + 1, &count));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Button", true);
    runner.run(3).unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 1);

    patch_bool(&mut runner, "Button", false);
    runner.step().unwrap();
    patch_bool(&mut runner, "Button", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 2);
}

#[test]
fn falling_edge_fires_on_true_to_false() {
    let button = Tag::bool("Button");
    let count = Tag::dint("Count");

    let mut b = Program::builder();
    b.rung(fall(&button), |r| {
        r.push(math(Expr::from(&count) + 1, &count));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Button", true);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 0);

    patch_bool(&mut runner, "Button", false);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 1);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Count"), 1);
}

#[test]
fn rising_edge_on_first_observation_uses_the_default_prior() {
    let button = Tag::bool("Button");
    let hit = Tag::bool("Hit");

    let mut b = Program::builder();
    b.rung(rise(&button), |r| {
        r.push(latch(&hit));
    });
    let initial = SystemState::new().with_tags([("Button".to_string(), Value::Bool(true))]);
    let mut runner = Runner::with_options(b.build().unwrap(), Some(initial), None).unwrap();

    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Hit"), "prior defaults false");
}

#[test]
fn nc_and_compound_conditions() {
    let a = Tag::bool("A");
    let mode = Tag::int("Mode");
    let lamp = Tag::bool("Lamp");

    let mut b = Program::builder();
    b.rung(all_of([nc(&a), any_of([eq(&mode, 1), eq(&mode, 3)])]), |r| {
        r.push(out(&lamp));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Mode".to_string(), Value::Int(3))])
        .unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Lamp"));

    patch_bool(&mut runner, "A", true);
    runner
        .patch([("Lamp".to_string(), Value::Bool(false))])
        .unwrap();
    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "Lamp"));
}

#[test]
fn for_loop_iterates_once_per_enable() {
    let go = Tag::bool("Go");
    let idx = Tag::int("Idx");
    let total = Tag::dint("Total");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(for_loop(
            4,
            &idx,
            [Instruction::from(math(
                Expr::from(&total) + Expr::from(&idx),
                &total,
            ))],
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    // 0 + 1 + 2 + 3
    assert_eq!(number(&runner.current_state(), "Total"), 6);
    assert_eq!(number(&runner.current_state(), "Idx"), 3);

    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "Total"), 6, "latched");

    patch_bool(&mut runner, "Go", false);
    runner.step().unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Total"), 12);
}

#[test]
fn run_function_maps_inputs_and_outputs() {
    let go = Tag::bool("Go");
    let celsius = Tag::real("Celsius");
    let fahrenheit = Tag::real("Fahrenheit");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(run_function(
            |ins: &std::collections::BTreeMap<String, Value>| {
                let c = ins["c"].scalar().as_f64();
                let mut outs = std::collections::BTreeMap::new();
                outs.insert("f".to_string(), Value::Real((c * 9.0 / 5.0 + 32.0) as f32));
                outs.insert("ignored".to_string(), Value::Bool(true));
                outs
            },
            [("c".to_string(), Source::from(&celsius))],
            [("f".to_string(), fahrenheit.clone())],
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Celsius".to_string(), Value::Real(100.0))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(
        runner.current_state().tag("Fahrenheit"),
        Some(&Value::Real(212.0))
    );
}

#[test]
fn run_function_missing_output_key_is_a_hard_error() {
    let go = Tag::bool("Go");
    let dest = Tag::int("Dest");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(run_function(
            |_ins: &std::collections::BTreeMap<String, Value>| Default::default(),
            [],
            [("missing".to_string(), dest.clone())],
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());
    patch_bool(&mut runner, "Go", true);
    assert!(matches!(
        runner.step().unwrap_err(),
        EngineError::MissingFunctionOutput(key) if key == "missing"
    ));
}

#[test]
fn run_enabled_function_observes_the_disabled_transition() {
    use std::sync::{Arc, Mutex};

    let go = Tag::bool("Go");
    let seen: Arc<Mutex<Vec<bool>>> = Arc::default();
    let seen_inner = seen.clone();

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(run_enabled_function(
            move |enabled, _ins| {
                seen_inner.lock().unwrap().push(enabled);
                Default::default()
            },
            [],
            [],
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    patch_bool(&mut runner, "Go", false);
    runner.step().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
}

#[test]
fn strict_build_rejects_conflicting_tag_types() {
    let as_bool = Tag::bool("Shared");
    let as_int = Tag::int("Shared");
    let lamp = Tag::bool("Lamp");

    let mut b = Program::builder();
    b.rung(bit(&as_bool), |r| {
        r.push(out(&lamp));
    });
    b.rung(eq(&as_int, 1), |r| {
        r.push(out(&lamp));
    });
    assert!(matches!(b.build(), Err(EngineError::BadProgram(_))));
}

#[test]
fn strict_build_rejects_duplicate_subroutines() {
    let mut b = Program::builder();
    b.subroutine("twice", |_| {});
    b.subroutine("twice", |_| {});
    assert!(matches!(b.build(), Err(EngineError::BadProgram(_))));
}

#[test]
fn strict_build_rejects_static_length_mismatch() {
    let data = Block::new("DS", TagType::Int, 1, 100);
    let go = Tag::bool("Go");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(blockcopy(
            data.select(1, 4).unwrap(),
            data.select(10, 12).unwrap(),
        ));
    });
    assert!(matches!(
        b.build(),
        Err(EngineError::LengthMismatch { src_len: 4, dest: 3 })
    ));
}
