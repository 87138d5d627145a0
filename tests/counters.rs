//! Counter semantics: scan-driven counting, bidirectional legs, resets,
//! clamps, and mid-scan visibility.

use ladder_vm::prelude::*;

fn number(state: &SystemState, name: &str) -> i64 {
    state
        .tag(name)
        .map(|v| v.scalar().as_i64())
        .unwrap_or_default()
}

fn flag(state: &SystemState, name: &str) -> bool {
    state.tag(name).map(Value::truthy).unwrap_or(false)
}

fn patch_bool(runner: &mut Runner, name: &str, value: bool) {
    runner
        .patch([(name.to_string(), Value::Bool(value))])
        .expect("patch");
}

fn counter_program() -> (Program, Tag, Tag) {
    let sensor = Tag::bool("Sensor");
    let rst = Tag::bool("Rst");
    let done = Tag::bool("ct.Parts");
    let acc = Tag::dint("ctd.Parts_acc");

    let mut b = Program::builder();
    b.rung(bit(&sensor), |r| {
        r.push(count_up(&done, &acc, 5).reset(bit(&rst)));
    });
    (b.build().unwrap(), done, acc)
}

#[test]
fn count_up_increments_every_enabled_scan() {
    let (program, _, _) = counter_program();
    let mut runner = Runner::new(program);

    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), 0);

    patch_bool(&mut runner, "Sensor", true);
    for expected in 1..=3 {
        runner.step().unwrap();
        assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), expected);
    }

    patch_bool(&mut runner, "Sensor", false);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), 3);
}

#[test]
fn count_up_done_bit_latches_at_setpoint_and_counts_past() {
    let (program, _, _) = counter_program();
    let mut runner = Runner::new(program);

    patch_bool(&mut runner, "Sensor", true);
    runner.run(5).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), 5);
    assert!(flag(&runner.current_state(), "ct.Parts"));

    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), 6);
    assert!(flag(&runner.current_state(), "ct.Parts"));
}

#[test]
fn count_up_reset_clears_accumulator_and_done() {
    let (program, _, _) = counter_program();
    let mut runner = Runner::new(program);

    patch_bool(&mut runner, "Sensor", true);
    runner.run(5).unwrap();
    assert!(flag(&runner.current_state(), "ct.Parts"));

    patch_bool(&mut runner, "Rst", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Parts_acc"), 0);
    assert!(!flag(&runner.current_state(), "ct.Parts"));
}

#[test]
fn bidirectional_counter_nets_to_zero_and_counts_down_while_disabled() {
    let enter = Tag::bool("Enter");
    let exit = Tag::bool("Exit");
    let rst = Tag::bool("Rst");
    let done = Tag::bool("ct.Zone");
    let acc = Tag::dint("ctd.Zone_acc");

    let mut b = Program::builder();
    b.rung(bit(&enter), |r| {
        r.push(count_up(&done, &acc, 5).down(bit(&exit)).reset(bit(&rst)));
    });
    let mut runner = Runner::new(b.build().unwrap());

    // Up and down in the same scan: net delta zero.
    patch_bool(&mut runner, "Enter", true);
    patch_bool(&mut runner, "Exit", true);
    runner.run(3).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Zone_acc"), 0);

    // The down leg keeps acting while the rung enable is false.
    patch_bool(&mut runner, "Enter", false);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Zone_acc"), -2);

    patch_bool(&mut runner, "Rst", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Zone_acc"), 0);
    assert!(!flag(&runner.current_state(), "ct.Zone"));
}

#[test]
fn accumulator_clamps_at_dint_bounds() {
    let up = Tag::bool("Up");
    let done = Tag::bool("ct.Max");
    let acc = Tag::dint("ctd.Max_acc");

    let mut b = Program::builder();
    b.rung(bit(&up), |r| {
        r.push(count_up(&done, &acc, 10));
    });
    let initial =
        SystemState::new().with_tags([("ctd.Max_acc".to_string(), Value::Dint(i32::MAX))]);
    let mut runner = Runner::with_options(b.build().unwrap(), Some(initial), None).unwrap();

    patch_bool(&mut runner, "Up", true);
    runner.run(3).unwrap();
    assert_eq!(
        number(&runner.current_state(), "ctd.Max_acc"),
        i32::MAX as i64
    );
}

#[test]
fn count_down_runs_negative_and_sets_done_at_negative_setpoint() {
    let go = Tag::bool("Go");
    let rst = Tag::bool("Rst");
    let done = Tag::bool("ct.Down");
    let acc = Tag::dint("ctd.Down_acc");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(count_down(&done, &acc, 3).reset(bit(&rst)));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Down_acc"), -2);
    assert!(!flag(&runner.current_state(), "ct.Down"));

    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Down_acc"), -3);
    assert!(flag(&runner.current_state(), "ct.Down"));

    patch_bool(&mut runner, "Rst", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.Down_acc"), 0);
    assert!(!flag(&runner.current_state(), "ct.Down"));
}

#[test]
fn dynamic_setpoint_is_reevaluated_every_scan() {
    let go = Tag::bool("Go");
    let limit = Tag::int("Limit");
    let done = Tag::bool("ct.Dyn");
    let acc = Tag::dint("ctd.Dyn_acc");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(count_up(&done, &acc, Source::from(&limit)));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Limit".to_string(), Value::Int(10))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.run(4).unwrap();
    assert!(!flag(&runner.current_state(), "ct.Dyn"));

    // Dropping the setpoint below the accumulator asserts done at once.
    runner
        .patch([("Limit".to_string(), Value::Int(3))])
        .unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "ct.Dyn"));
}

#[test]
fn counter_updates_are_visible_mid_scan() {
    // S4: a later rung in the same scan observes the counter's write.
    let enable = Tag::bool("Enable");
    let done = Tag::bool("ct.C");
    let acc = Tag::dint("ctd.C_acc");
    let captured = Tag::dint("Captured");
    let data_test = Tag::int("DataTest");

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(count_up(&done, &acc, 10));
    });
    b.rung(eq(&acc, 1), |r| {
        r.push(copy(Source::from(&acc), &captured));
    });
    b.rung(bit(&enable), |r| {
        r.push(copy(2, &data_test));
    });
    let initial = SystemState::new().with_tags([("DataTest".to_string(), Value::Int(1))]);
    let mut runner = Runner::with_options(b.build().unwrap(), Some(initial), None).unwrap();

    patch_bool(&mut runner, "Enable", true);
    runner.step().unwrap();

    let state = runner.current_state();
    assert_eq!(number(&state, "ctd.C_acc"), 1);
    assert_eq!(number(&state, "Captured"), 1, "mid-scan write observed");
    assert_eq!(number(&state, "DataTest"), 2);
}

#[test]
fn counter_in_branch_requires_both_condition_layers() {
    let master = Tag::bool("Master");
    let gate = Tag::bool("Gate");
    let done = Tag::bool("ct.B");
    let acc = Tag::dint("ctd.B_acc");

    let mut b = Program::builder();
    b.rung(bit(&master), |r| {
        r.branch(bit(&gate), |br| {
            br.push(count_up(&done, &acc, 100));
        });
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Master", true);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.B_acc"), 0);

    patch_bool(&mut runner, "Gate", true);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.B_acc"), 2);

    patch_bool(&mut runner, "Master", false);
    runner.run(2).unwrap();
    assert_eq!(number(&runner.current_state(), "ctd.B_acc"), 2);
}
