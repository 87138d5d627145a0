//! Retentive-tag persistence
//!
//! Serializes the retentive subset of a snapshot as a JSON payload
//! `{schema, values}`. The schema hash is the sha256-hex of the sorted
//! `name:type` lines of the retentive tag set; on load, entries whose
//! schema, retention, or type no longer match are discarded, and values
//! re-enter through the normal store path.

use crate::error::EngineError;
use crate::state::SystemState;
use crate::tag::Tag;
use crate::value::{store, Overflow, TagType, Value};

use itertools::Itertools;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct RetentiveEntry {
    #[serde(rename = "type")]
    ty: TagType,
    value: Value,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct RetentivePayload {
    schema: String,
    values: BTreeMap<String, RetentiveEntry>,
}

/// Deterministic schema hash over the retentive tag set.
pub fn schema_hash(tags: &[Tag]) -> String {
    let lines = tags
        .iter()
        .filter(|t| t.is_retentive())
        .map(|t| format!("{}:{}", t.name(), t.tag_type()))
        .sorted()
        .join("\n");
    let digest = Sha256::digest(lines.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Serialize the retentive tags of `state` to a JSON payload.
pub fn save_retentive(state: &SystemState, tags: &[Tag]) -> Result<String, EngineError> {
    let mut values = BTreeMap::new();
    for tag in tags.iter().filter(|t| t.is_retentive()) {
        let value = state.tag(tag.name()).copied().unwrap_or(tag.default_value());
        values.insert(
            tag.name().to_string(),
            RetentiveEntry {
                ty: tag.tag_type(),
                value,
            },
        );
    }
    let payload = RetentivePayload {
        schema: schema_hash(tags),
        values,
    };
    Ok(serde_json::to_string(&payload)?)
}

/// Merge a saved payload into `state`.
///
/// A schema-hash mismatch discards the whole payload; per-entry, tags
/// that are unknown, no longer retentive, or typed differently are
/// discarded. Surviving values are coerced through the normal store
/// path.
pub fn load_retentive(
    state: &SystemState,
    tags: &[Tag],
    payload: &str,
) -> Result<SystemState, EngineError> {
    let payload: RetentivePayload = serde_json::from_str(payload)?;
    if payload.schema != schema_hash(tags) {
        tracing::debug!("retentive payload schema mismatch; payload discarded");
        return Ok(state.clone());
    }

    let by_name: BTreeMap<&str, &Tag> = tags.iter().map(|t| (t.name(), t)).collect();
    let mut updates = Vec::new();
    for (name, entry) in payload.values {
        let Some(tag) = by_name.get(name.as_str()) else {
            continue;
        };
        if !tag.is_retentive() || tag.tag_type() != entry.ty {
            continue;
        }
        if let Ok(coerced) = store(entry.value.scalar(), tag.tag_type(), Overflow::Clamp) {
            updates.push((name, coerced));
        }
    }
    Ok(state.with_tags(updates))
}
