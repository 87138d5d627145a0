//! Data movement: copy coercions, indirect addressing, block copies,
//! fills, pack/unpack, search, shift, and drum sequencing.

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

fn patch_int(runner: &mut Runner, name: &str, value: i16) {
    runner
        .patch([(name.to_string(), Value::Int(value))])
        .expect("patch");
}

#[test]
fn copy_coerces_real_to_int_by_truncation() {
    let go = Tag::bool("Go");
    let source = Tag::real("Source");
    let dest = Tag::int("Dest");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(copy(Source::from(&source), &dest));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Source".to_string(), Value::Real(-3.9))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(runner.current_state().tag("Dest"), Some(&Value::Int(-3)));
}

#[test]
fn copy_int_saturates_at_destination_bounds() {
    let go = Tag::bool("Go");
    let wide = Tag::dint("Wide");
    let narrow = Tag::int("Narrow");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(copy(Source::from(&wide), &narrow));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Wide".to_string(), Value::Dint(1_000_000))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(
        runner.current_state().tag("Narrow"),
        Some(&Value::Int(32_767))
    );
}

#[test]
fn copy_char_and_int_convert_via_ascii_code() {
    let go = Tag::bool("Go");
    let ch = Tag::char("Ch");
    let code = Tag::int("Code");
    let back = Tag::char("Back");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(copy(as_binary(&ch), &code));
        r.push(copy(as_ascii(&code), &back));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("Ch".to_string(), Value::Char(Some(b'A')))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(state.tag("Code"), Some(&Value::Int(65)));
    assert_eq!(state.tag("Back"), Some(&Value::Char(Some(b'A'))));
}

#[test]
fn indirect_copy_with_out_of_range_pointer_pulses_address_error() {
    // S5: the fault asserts for one scan and clears when not retriggered.
    let enable = Tag::bool("Enable");
    let pointer = Tag::int("Pointer");
    let data = Block::new("DS", TagType::Int, 1, 100);
    let chars = Block::new("CH", TagType::Char, 1, 16);

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(copy(as_binary(data.by_pointer(&pointer)), chars.tag(1).unwrap()).oneshot());
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_int(&mut runner, "Pointer", 999);
    patch_bool(&mut runner, "Enable", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "fault.address_error"));

    runner.step().unwrap();
    assert!(!flag(&runner.current_state(), "fault.address_error"));
}

#[test]
fn indirect_expression_addressing_resolves_each_scan() {
    let go = Tag::bool("Go");
    let idx = Tag::int("Idx");
    let data = Block::new("DS", TagType::Int, 1, 10);
    let dest = Tag::int("Dest");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(copy(
            Source::from(data.by_expr(Expr::from(&idx) + 1)),
            &dest,
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("DS3".to_string(), Value::Int(42)),
            ("Idx".to_string(), Value::Int(2)),
            ("Go".to_string(), Value::Bool(true)),
        ])
        .unwrap();
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Dest"), 42);
}

#[test]
fn blockcopy_moves_a_window() {
    let go = Tag::bool("Go");
    let data = Block::new("DS", TagType::Int, 1, 100);

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(blockcopy(
            data.select(1, 3).unwrap(),
            data.select(10, 12).unwrap(),
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("DS1".to_string(), Value::Int(7)),
            ("DS2".to_string(), Value::Int(8)),
            ("DS3".to_string(), Value::Int(9)),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DS10"), 7);
    assert_eq!(number(&state, "DS11"), 8);
    assert_eq!(number(&state, "DS12"), 9);
}

#[test]
fn overlapping_blockcopy_reads_values_as_of_scan_start() {
    let go = Tag::bool("Go");
    let data = Block::new("DS", TagType::Int, 1, 100);

    // Ascending overlap with the destination above the source: a naive
    // forward copy would smear DS1 across the window.
    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(blockcopy(
            data.select(1, 3).unwrap(),
            data.select(2, 4).unwrap(),
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("DS1".to_string(), Value::Int(1)),
            ("DS2".to_string(), Value::Int(2)),
            ("DS3".to_string(), Value::Int(3)),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DS2"), 1);
    assert_eq!(number(&state, "DS3"), 2);
    assert_eq!(number(&state, "DS4"), 3);
}

#[test]
fn reversed_ranges_iterate_high_to_low() {
    let range = Block::new("C", TagType::Bool, 1, 8)
        .select(2, 5)
        .unwrap()
        .reverse();
    assert_eq!(range.addresses(), vec![5, 4, 3, 2]);
}

#[test]
fn fill_broadcasts_one_value() {
    let go = Tag::bool("Go");
    let data = Block::new("DS", TagType::Int, 1, 20);

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(fill(9, data.select(5, 8).unwrap()));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    for addr in 5..=8 {
        assert_eq!(number(&state, &format!("DS{addr}")), 9);
    }
}

#[test]
fn pack_and_unpack_bits_round_trip() {
    let go = Tag::bool("Go");
    let bits = Block::new("C", TagType::Bool, 1, 16);
    let word = Tag::word("W");
    let echo = Block::new("E", TagType::Bool, 1, 16);

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(pack_bits(bits.select(1, 16).unwrap(), &word));
        r.push(unpack_bits(&word, echo.select(1, 16).unwrap()));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("C1".to_string(), Value::Bool(true)),
            ("C3".to_string(), Value::Bool(true)),
            ("C16".to_string(), Value::Bool(true)),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(state.tag("W"), Some(&Value::Word(0x8005)));
    assert!(flag(&state, "E1"));
    assert!(!flag(&state, "E2"));
    assert!(flag(&state, "E3"));
    assert!(flag(&state, "E16"));
}

#[test]
fn pack_bits_into_int_uses_bit_15_as_sign() {
    let go = Tag::bool("Go");
    let bits = Block::new("C", TagType::Bool, 1, 16);
    let dest = Tag::int("D");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(pack_bits(bits.select(1, 16).unwrap(), &dest));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([("C16".to_string(), Value::Bool(true))])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(runner.current_state().tag("D"), Some(&Value::Int(i16::MIN)));
}

#[test]
fn pack_and_unpack_words_round_trip() {
    let go = Tag::bool("Go");
    let words = Block::new("WD", TagType::Word, 1, 8);
    let dword = Tag::dint("DD1");
    let echo = Block::new("WE", TagType::Word, 1, 2);

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(pack_words(words.select(1, 2).unwrap(), &dword));
        r.push(unpack_words(&dword, echo.select(1, 2).unwrap()));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("WD1".to_string(), Value::Word(0x1234)),
            ("WD2".to_string(), Value::Word(0xABCD)),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(state.tag("DD1"), Some(&Value::Dint(0xABCD_1234u32 as i32)));
    assert_eq!(state.tag("WE1"), Some(&Value::Word(0x1234)));
    assert_eq!(state.tag("WE2"), Some(&Value::Word(0xABCD)));
}

#[test]
fn pack_text_parses_and_ignores_garbage() {
    let go = Tag::bool("Go");
    let text = Block::new("TXT", TagType::Char, 1, 8);
    let dest = Tag::int("Parsed");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(pack_text(text.select(1, 5).unwrap(), &dest));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("TXT1".to_string(), Value::Char(Some(b' '))),
            ("TXT2".to_string(), Value::Char(Some(b'-')),),
            ("TXT3".to_string(), Value::Char(Some(b'4'))),
            ("TXT4".to_string(), Value::Char(Some(b'2'))),
            ("TXT5".to_string(), Value::Char(Some(b' '))),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Parsed"), -42);

    // Unparseable text is a silent no-op.
    runner
        .patch([("TXT3".to_string(), Value::Char(Some(b'x')))])
        .unwrap();
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Parsed"), -42);
}

#[test]
fn math_division_by_zero_faults_and_skips_the_store() {
    let go = Tag::bool("Go");
    let divisor = Tag::int("Divisor");
    let dest = Tag::int("Quotient");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(math(Expr::from(100).floor_div(Expr::from(&divisor)), &dest));
    });
    let initial = SystemState::new().with_tags([("Quotient".to_string(), Value::Int(55))]);
    let mut runner = Runner::with_options(b.build().unwrap(), Some(initial), None).unwrap();

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert!(flag(&state, "fault.division_error"));
    assert_eq!(number(&state, "Quotient"), 55, "store skipped");

    patch_int(&mut runner, "Divisor", 4);
    runner.step().unwrap();
    let state = runner.current_state();
    assert!(!flag(&state, "fault.division_error"));
    assert_eq!(number(&state, "Quotient"), 25);
}

#[test]
fn math_overflow_wraps_and_raises_the_operation_fault() {
    let go = Tag::bool("Go");
    let dest = Tag::int("Dest");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(math(Expr::from(40_000), &dest));
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert!(flag(&state, "fault.math_operation_error"));
    assert_eq!(
        state.tag("Dest"),
        Some(&Value::Int(40_000i64 as i16)),
        "wrapped value stored"
    );
}

#[test]
fn search_resumes_from_its_cursor() {
    let go = Tag::bool("Go");
    let data = Block::new("DS", TagType::Int, 1, 10);
    let result = Tag::int("Found_at");
    let found = Tag::bool("Found");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(search(7, data.select(1, 10).unwrap(), &result, &found));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("DS3".to_string(), Value::Int(7)),
            ("DS8".to_string(), Value::Int(7)),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Found_at"), 3);
    assert!(flag(&runner.current_state(), "Found"));

    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Found_at"), 8);

    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "Found_at"), -1, "exhausted");
    assert!(!flag(&state, "Found"));

    // A completed search stays complete until the cursor is rewritten.
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Found_at"), -1);

    patch_int(&mut runner, "Found_at", 0);
    runner.step().unwrap();
    assert_eq!(number(&runner.current_state(), "Found_at"), 3);
}

#[test]
fn search_supports_relations_and_text_needles() {
    let go = Tag::bool("Go");
    let data = Block::new("DS", TagType::Int, 1, 5);
    let text = Block::new("TXT", TagType::Char, 1, 6);
    let num_at = Tag::int("NumAt");
    let num_hit = Tag::bool("NumHit");
    let txt_at = Tag::int("TxtAt");
    let txt_hit = Tag::bool("TxtHit");

    let mut b = Program::builder();
    b.rung(bit(&go), |r| {
        r.push(search(10, data.select(1, 5).unwrap(), &num_at, &num_hit).op(CmpOp::Gt));
        r.push(search("AB", text.select(1, 6).unwrap(), &txt_at, &txt_hit));
    });
    let mut runner = Runner::new(b.build().unwrap());

    runner
        .patch([
            ("DS2".to_string(), Value::Int(11)),
            ("TXT3".to_string(), Value::Char(Some(b'A'))),
            ("TXT4".to_string(), Value::Char(Some(b'B'))),
        ])
        .unwrap();
    patch_bool(&mut runner, "Go", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "NumAt"), 2);
    assert!(flag(&state, "NumHit"));
    assert_eq!(number(&state, "TxtAt"), 3, "window start address");
    assert!(flag(&state, "TxtHit"));
}

#[test]
fn shift_register_clocks_data_through_the_range() {
    let enable = Tag::bool("Enable");
    let data_in = Tag::bool("DataIn");
    let clock = Tag::bool("Clock");
    let rst = Tag::bool("Rst");
    let bits = Block::new("SR", TagType::Bool, 1, 4);

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(shift(
            bits.select(1, 4).unwrap(),
            bit(&data_in),
            bit(&clock),
            bit(&rst),
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());
    patch_bool(&mut runner, "Enable", true);

    // Two rising clock edges with data high, then one with data low.
    for data in [true, true, false] {
        patch_bool(&mut runner, "DataIn", data);
        patch_bool(&mut runner, "Clock", true);
        runner.step().unwrap();
        patch_bool(&mut runner, "Clock", false);
        runner.step().unwrap();
    }
    let state = runner.current_state();
    assert!(!flag(&state, "SR1"));
    assert!(flag(&state, "SR2"));
    assert!(flag(&state, "SR3"));
    assert!(!flag(&state, "SR4"));

    // Holding the clock high produces no further edges.
    patch_bool(&mut runner, "Clock", true);
    runner.run(3).unwrap();
    assert!(flag(&runner.current_state(), "SR3"));

    patch_bool(&mut runner, "Rst", true);
    runner.step().unwrap();
    let state = runner.current_state();
    for addr in 1..=4 {
        assert!(!flag(&state, &format!("SR{addr}")));
    }
}

#[test]
fn event_drum_advances_on_step_events_and_latches_done() {
    let enable = Tag::bool("Enable");
    let ev1 = Tag::bool("Ev1");
    let ev2 = Tag::bool("Ev2");
    let rst = Tag::bool("Rst");
    let step_acc = Tag::int("DrumStep");
    let done = Tag::bool("DrumDone");
    let heat = Tag::bool("Heat");
    let vent = Tag::bool("Vent");

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(
            drum_event(
                &step_acc,
                &done,
                [heat.clone(), vent.clone()],
                [
                    (vec![true, false], bit(&ev1)),
                    (vec![false, true], bit(&ev2)),
                ],
            )
            .reset(bit(&rst)),
        );
    });
    let mut runner = Runner::new(b.build().unwrap());

    patch_bool(&mut runner, "Enable", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DrumStep"), 1);
    assert!(flag(&state, "Heat"));
    assert!(!flag(&state, "Vent"));

    patch_bool(&mut runner, "Ev1", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DrumStep"), 2);
    assert!(!flag(&state, "Heat"));
    assert!(flag(&state, "Vent"));

    patch_bool(&mut runner, "Ev2", true);
    runner.step().unwrap();
    assert!(flag(&runner.current_state(), "DrumDone"));

    patch_bool(&mut runner, "Rst", true);
    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DrumStep"), 1);
    assert!(!flag(&state, "DrumDone"));
}

#[test]
fn timed_drum_advances_when_presets_elapse() {
    let enable = Tag::bool("Enable");
    let step_acc = Tag::int("DrumStep");
    let done = Tag::bool("DrumDone");
    let out1 = Tag::bool("Out1");

    let mut b = Program::builder();
    b.rung(bit(&enable), |r| {
        r.push(drum_timed(
            &step_acc,
            &done,
            [out1.clone()],
            [
                (vec![true], Source::from(30)),
                (vec![false], Source::from(30)),
            ],
            TimeUnit::Ms,
        ));
    });
    let mut runner = Runner::new(b.build().unwrap());
    runner.set_time_mode(TimeMode::FixedStep { dt: 0.010 });

    patch_bool(&mut runner, "Enable", true);
    runner.run(2).unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DrumStep"), 1);
    assert!(flag(&state, "Out1"));

    runner.step().unwrap();
    let state = runner.current_state();
    assert_eq!(number(&state, "DrumStep"), 2);
    assert!(!flag(&state, "Out1"));
}
