//! Retentive persistence round trips and property tests for the value
//! layer.

use ladder_vm::prelude::*;

use quickcheck_macros::quickcheck;

fn retentive_set() -> Vec<Tag> {
    vec![
        Tag::dint("Batch"),
        Tag::real("Ratio"),
        Tag::char("Grade"),
        Tag::int("Limit"),
        Tag::bool("Alarm"), // non-retentive by default
    ]
}

#[test]
fn retentive_round_trip_projects_the_retentive_subset() {
    let tags = retentive_set();
    let state = SystemState::new().with_tags([
        ("Batch".to_string(), Value::Dint(1234)),
        ("Ratio".to_string(), Value::Real(2.5)),
        ("Grade".to_string(), Value::Char(Some(b'B'))),
        ("Alarm".to_string(), Value::Bool(true)),
    ]);

    let payload = save_retentive(&state, &tags).unwrap();
    let restored = load_retentive(&SystemState::new(), &tags, &payload).unwrap();

    assert_eq!(restored.tag("Batch"), Some(&Value::Dint(1234)));
    assert_eq!(restored.tag("Ratio"), Some(&Value::Real(2.5)));
    assert_eq!(restored.tag("Grade"), Some(&Value::Char(Some(b'B'))));
    assert_eq!(restored.tag("Limit"), Some(&Value::Int(0)), "default saved");
    assert_eq!(restored.tag("Alarm"), None, "non-retentive tags are skipped");
}

#[test]
fn schema_hash_is_order_independent_and_type_sensitive() {
    let forward = [Tag::dint("A"), Tag::int("B")];
    let reversed = [Tag::int("B"), Tag::dint("A")];
    assert_eq!(
        ladder_vm::persist::schema_hash(&forward),
        ladder_vm::persist::schema_hash(&reversed)
    );

    let retyped = [Tag::dint("A"), Tag::dint("B")];
    assert_ne!(
        ladder_vm::persist::schema_hash(&forward),
        ladder_vm::persist::schema_hash(&retyped)
    );
}

#[test]
fn schema_mismatch_discards_the_whole_payload() {
    let saved_with = [Tag::dint("Batch")];
    let state = SystemState::new().with_tags([("Batch".to_string(), Value::Dint(7))]);
    let payload = save_retentive(&state, &saved_with).unwrap();

    let loaded_with = [Tag::dint("Batch"), Tag::dint("Extra")];
    let restored = load_retentive(&SystemState::new(), &loaded_with, &payload).unwrap();
    assert_eq!(restored.tag("Batch"), None);
}

#[test]
fn changed_type_or_retention_drops_single_entries() {
    let tags = [Tag::dint("Batch"), Tag::int("Limit")];
    let state = SystemState::new().with_tags([
        ("Batch".to_string(), Value::Dint(7)),
        ("Limit".to_string(), Value::Int(9)),
    ]);
    let payload = save_retentive(&state, &tags).unwrap();

    // Same schema hash is required for anything to load; tamper with one
    // entry's declared type inside the payload instead.
    let tampered = payload.replace("\"Limit\":{\"type\":\"int\"", "\"Limit\":{\"type\":\"word\"");
    let restored = load_retentive(&SystemState::new(), &tags, &tampered).unwrap();
    assert_eq!(restored.tag("Batch"), Some(&Value::Dint(7)));
    assert_eq!(restored.tag("Limit"), None, "type mismatch discarded");
}

#[test]
fn malformed_payload_is_a_hard_error() {
    let tags = retentive_set();
    assert!(matches!(
        load_retentive(&SystemState::new(), &tags, "not json"),
        Err(EngineError::Persist(_))
    ));
}

#[test]
fn loaded_values_pass_through_the_store_path() {
    let tags = [Tag::int("Limit")];
    let payload = format!(
        "{{\"schema\":\"{}\",\"values\":{{\"Limit\":{{\"type\":\"int\",\"value\":100000}}}}}}",
        ladder_vm::persist::schema_hash(&tags)
    );
    let restored = load_retentive(&SystemState::new(), &tags, &payload).unwrap();
    assert_eq!(restored.tag("Limit"), Some(&Value::Int(32767)), "clamped");
}

#[quickcheck]
fn int_clamp_stores_saturate_at_the_type_bounds(value: i64) -> bool {
    let stored = ladder_vm::value::store(
        Scalar::Int(value),
        TagType::Int,
        ladder_vm::value::Overflow::Clamp,
    )
    .unwrap();
    stored == Value::Int(value.clamp(i16::MIN as i64, i16::MAX as i64) as i16)
}

#[quickcheck]
fn dint_clamp_is_idempotent(value: i64) -> bool {
    let once = ladder_vm::value::store(
        Scalar::Int(value),
        TagType::Dint,
        ladder_vm::value::Overflow::Clamp,
    )
    .unwrap();
    let twice = ladder_vm::value::store(
        once.scalar(),
        TagType::Dint,
        ladder_vm::value::Overflow::Clamp,
    )
    .unwrap();
    once == twice
}

#[quickcheck]
fn word_stores_wrap_modulo_2_16(value: i64) -> bool {
    match ladder_vm::value::store(
        Scalar::Int(value),
        TagType::Word,
        ladder_vm::value::Overflow::Clamp,
    ) {
        Ok(Value::Word(w)) => i64::from(w) == value.rem_euclid(1 << 16),
        _ => false,
    }
}

#[quickcheck]
fn pack_unpack_bits_is_the_identity_on_16_bit_patterns(bits: u16) -> bool {
    // Model-level check of the little-endian contract used by the
    // pack/unpack instructions.
    let unpacked: Vec<bool> = (0..16).map(|i| (bits >> i) & 1 == 1).collect();
    let repacked = unpacked
        .iter()
        .enumerate()
        .fold(0u16, |acc, (i, &b)| acc | (u16::from(b) << i));
    repacked == bits
}
