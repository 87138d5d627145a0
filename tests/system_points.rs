//! System points: derived resolution, RTC anchoring and apply commands,
//! fault pulses, command self-clearing, and read-only enforcement.

use ladder_vm::prelude::*;
use ladder_vm::system::SystemPoints;

use time::macros::datetime;

fn empty_runner() -> Runner {
    Runner::new(Program::builder().build().unwrap())
}

fn flag(state: &SystemState, name: &str) -> bool {
    state.tag(name).map(Value::truthy).unwrap_or(false)
}

fn resolved(runner: &Runner, tag: &Tag) -> Value {
    runner.resolve_tag(tag)
}

#[test]
fn always_on_first_scan_and_scan_clock_toggle() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();

    assert_eq!(resolved(&runner, &points.sys.always_on), Value::Bool(true));
    assert_eq!(resolved(&runner, &points.sys.first_scan), Value::Bool(true));

    runner.step().unwrap();
    assert_eq!(resolved(&runner, &points.sys.first_scan), Value::Bool(false));
    assert_eq!(
        resolved(&runner, &points.sys.scan_clock_toggle),
        Value::Bool(true),
        "odd scan counter"
    );

    runner.step().unwrap();
    assert_eq!(
        resolved(&runner, &points.sys.scan_clock_toggle),
        Value::Bool(false)
    );
}

#[test]
fn free_running_clocks_follow_simulated_time() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_time_mode(TimeMode::FixedStep { dt: 0.25 });

    runner.step().unwrap(); // t = 0.25: phase 1 of the 500ms clock
    assert_eq!(resolved(&runner, &points.sys.clock_500ms), Value::Bool(true));
    assert_eq!(resolved(&runner, &points.sys.clock_1s), Value::Bool(false));

    runner.step().unwrap(); // t = 0.50
    assert_eq!(resolved(&runner, &points.sys.clock_500ms), Value::Bool(false));
    assert_eq!(resolved(&runner, &points.sys.clock_1s), Value::Bool(true));
}

#[test]
fn fixed_scan_mode_and_setup_reflect_the_time_mode() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_time_mode(TimeMode::FixedStep { dt: 0.050 });

    assert_eq!(
        resolved(&runner, &points.sys.fixed_scan_mode),
        Value::Bool(true)
    );
    assert_eq!(
        resolved(&runner, &points.sys.scan_time_fixed_setup_ms),
        Value::Int(50)
    );

    runner.set_time_mode(TimeMode::Realtime);
    assert_eq!(
        resolved(&runner, &points.sys.fixed_scan_mode),
        Value::Bool(false)
    );
    assert_eq!(
        resolved(&runner, &points.sys.scan_time_fixed_setup_ms),
        Value::Int(0)
    );
}

#[test]
fn scan_counter_and_scan_time_stats_update_on_scan_end() {
    let mut runner = empty_runner();
    runner.set_time_mode(TimeMode::FixedStep { dt: 0.010 });
    runner.run(3).unwrap();

    let state = runner.current_state();
    assert_eq!(state.tag("sys.scan_counter"), Some(&Value::Int(3)));
    assert_eq!(state.tag("sys.scan_time_current_ms"), Some(&Value::Int(10)));
    assert_eq!(state.tag("sys.scan_time_min_ms"), Some(&Value::Int(10)));
    assert_eq!(state.tag("sys.scan_time_max_ms"), Some(&Value::Int(10)));

    runner.set_time_mode(TimeMode::FixedStep { dt: 0.025 });
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(state.tag("sys.scan_time_min_ms"), Some(&Value::Int(10)));
    assert_eq!(state.tag("sys.scan_time_max_ms"), Some(&Value::Int(25)));
}

#[test]
fn rtc_fields_derive_from_the_anchor() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_rtc(datetime!(2026-01-15 10:20:30 UTC));

    assert_eq!(resolved(&runner, &points.rtc.year4), Value::Int(2026));
    assert_eq!(resolved(&runner, &points.rtc.year2), Value::Int(26));
    assert_eq!(resolved(&runner, &points.rtc.month), Value::Int(1));
    assert_eq!(resolved(&runner, &points.rtc.day), Value::Int(15));
    assert_eq!(resolved(&runner, &points.rtc.hour), Value::Int(10));
    assert_eq!(resolved(&runner, &points.rtc.minute), Value::Int(20));
    assert_eq!(resolved(&runner, &points.rtc.second), Value::Int(30));
    // 2026-01-15 is a Thursday; Sunday=1 ordering.
    assert_eq!(resolved(&runner, &points.rtc.weekday), Value::Int(5));
}

#[test]
fn rtc_advances_deterministically_in_fixed_step_mode() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_time_mode(TimeMode::FixedStep { dt: 1.0 });
    runner.set_rtc(datetime!(2026-01-15 23:59:58 UTC));

    runner.run(2).unwrap();
    assert_eq!(resolved(&runner, &points.rtc.day), Value::Int(16));
    assert_eq!(resolved(&runner, &points.rtc.hour), Value::Int(0));
    assert_eq!(resolved(&runner, &points.rtc.second), Value::Int(0));
}

#[test]
fn rtc_values_are_not_stored_in_the_tag_map() {
    let mut runner = empty_runner();
    runner.set_rtc(datetime!(2026-01-15 10:20:30 UTC));
    runner.run(2).unwrap();
    assert_eq!(runner.current_state().tag("rtc.year4"), None);
    assert_eq!(runner.current_state().tag("sys.first_scan"), None);
}

#[test]
fn rtc_apply_date_rewrites_the_date_and_self_clears() {
    // S6: anchored at 2026-01-15 10:20:30, apply 2030-04-10.
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_time_mode(TimeMode::FixedStep { dt: 0.010 });
    runner.set_rtc(datetime!(2026-01-15 10:20:30 UTC));

    runner
        .patch([
            ("rtc.new_year4".to_string(), Value::Int(2030)),
            ("rtc.new_month".to_string(), Value::Int(4)),
            ("rtc.new_day".to_string(), Value::Int(10)),
            ("rtc.apply_date".to_string(), Value::Bool(true)),
        ])
        .unwrap();
    runner.run(2).unwrap();

    assert_eq!(resolved(&runner, &points.rtc.year4), Value::Int(2030));
    assert_eq!(resolved(&runner, &points.rtc.month), Value::Int(4));
    assert_eq!(resolved(&runner, &points.rtc.day), Value::Int(10));
    // Time of day survives a date apply.
    assert_eq!(resolved(&runner, &points.rtc.hour), Value::Int(10));
    assert_eq!(resolved(&runner, &points.rtc.minute), Value::Int(20));
    assert!(!flag(&runner.current_state(), "rtc.apply_date"));
    assert!(!flag(&runner.current_state(), "rtc.apply_date_error"));
}

#[test]
fn rtc_apply_time_rewrites_the_time_of_day() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();
    runner.set_rtc(datetime!(2026-01-15 10:20:30 UTC));

    runner
        .patch([
            ("rtc.new_hour".to_string(), Value::Int(6)),
            ("rtc.new_minute".to_string(), Value::Int(30)),
            ("rtc.new_second".to_string(), Value::Int(0)),
            ("rtc.apply_time".to_string(), Value::Bool(true)),
        ])
        .unwrap();
    runner.run(2).unwrap();

    assert_eq!(resolved(&runner, &points.rtc.day), Value::Int(15));
    assert_eq!(resolved(&runner, &points.rtc.hour), Value::Int(6));
    assert_eq!(resolved(&runner, &points.rtc.minute), Value::Int(30));
}

#[test]
fn rtc_invalid_date_sets_the_error_bit_for_one_scan() {
    let mut runner = empty_runner();
    runner.set_rtc(datetime!(2026-01-15 10:20:30 UTC));

    runner
        .patch([
            ("rtc.new_year4".to_string(), Value::Int(2026)),
            ("rtc.new_month".to_string(), Value::Int(13)),
            ("rtc.new_day".to_string(), Value::Int(1)),
            ("rtc.apply_date".to_string(), Value::Bool(true)),
        ])
        .unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "rtc.apply_date_error"));

    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "rtc.apply_date_error"));
}

#[test]
fn read_only_system_points_reject_patch_force_and_logic_writes() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();

    assert!(matches!(
        runner.patch([("sys.first_scan".to_string(), Value::Bool(true))]),
        Err(EngineError::ReadOnlyWrite(_))
    ));
    assert!(matches!(
        runner.add_force(&points.sys.scan_counter, Value::Int(5)),
        Err(EngineError::ReadOnlyForce(_))
    ));

    let go = Tag::bool("Go");
    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(copy(1, &points.fault.division_error));
    });
    let mut runner = Runner::new(b.build().unwrap());
    runner
        .patch([("Go".to_string(), Value::Bool(true))])
        .unwrap();
    assert!(matches!(
        runner.step().unwrap_err(),
        EngineError::ReadOnlyWrite(name) if name == "fault.division_error"
    ));
}

#[test]
fn out_of_range_fault_pulses_from_a_bad_dynamic_range() {
    let go = Tag::bool("Go");
    let hi = Tag::int("Hi");
    let data = Block::new("DS", TagType::Int, 1, 50);

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(fill(1, data.select_dyn(1, &hi)));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("Go".to_string(), Value::Bool(true)),
            ("Hi".to_string(), Value::Int(200)),
        ])
        .unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "fault.out_of_range"));

    runner
        .patch([("Go".to_string(), Value::Bool(false))])
        .unwrap();
    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "fault.out_of_range"));
}

#[test]
fn cmd_mode_stop_latches_the_mode_and_self_clears() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();

    assert_eq!(resolved(&runner, &points.sys.mode_run), Value::Bool(true));

    runner
        .patch([("sys.cmd_mode_stop".to_string(), Value::Bool(true))])
        .unwrap();
    runner.step().unwrap();
    assert_eq!(resolved(&runner, &points.sys.mode_run), Value::Bool(false));
    assert!(!flag(&runner.current_state(), "sys.cmd_mode_stop"));

    // The latch holds on later scans.
    runner.step().unwrap();
    assert_eq!(resolved(&runner, &points.sys.mode_run), Value::Bool(false));
}

#[test]
fn math_fault_stops_the_run_mode() {
    let points = SystemPoints::new();
    let go = Tag::bool("Go");
    let dest = Tag::int("Dest");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(math(Expr::from(100_000), &dest));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Go".to_string(), Value::Bool(true))])
        .unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "fault.math_operation_error"));

    runner
        .patch([("Go".to_string(), Value::Bool(false))])
        .unwrap();
    runner.step().unwrap();
    assert_eq!(resolved(&runner, &points.sys.mode_run), Value::Bool(false));
}

#[test]
fn storage_commands_self_clear_and_pulse_write_status() {
    let mut runner = empty_runner();

    runner
        .patch([("storage.sd.save_cmd".to_string(), Value::Bool(true))])
        .unwrap();
    runner.step().unwrap();
    let state = runner.current_state();
    assert!(flag(&state, "storage.sd.write_status"));
    assert!(!flag(&state, "storage.sd.save_cmd"));

    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "storage.sd.write_status"));
}

#[test]
fn storage_eject_drops_the_ready_flag() {
    let points = SystemPoints::new();
    let mut runner = empty_runner();

    assert_eq!(
        resolved(&runner, &points.storage_sd.ready),
        Value::Bool(true)
    );
    runner
        .patch([("storage.sd.eject_cmd".to_string(), Value::Bool(true))])
        .unwrap();
    runner.step().unwrap();
    assert_eq!(
        resolved(&runner, &points.storage_sd.ready),
        Value::Bool(false)
    );
}

#[test]
fn forces_mask_reads_and_discard_writes() {
    let button = Tag::bool("Button");
    let lamp = Tag::bool("Lamp");

    let mut b = Program::builder();
    b.rung(bit(&button), |r| {
        r.push(out(&lamp));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner.add_force(&button, Value::Bool(true)).unwrap();
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Lamp"), "forced read enables the rung");

    // Forcing the output discards the coil's write.
    runner.add_force(&lamp, Value::Bool(false)).unwrap();
    runner
        .patch([("Lamp".to_string(), Value::Bool(false))])
        .unwrap();
    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "Lamp"));
    assert_eq!(runner.resolve_tag(&lamp), Value::Bool(false));

    runner.remove_force("Lamp");
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "Lamp"));
}
