//! Scan context and commit protocol
//!
//! A [`ScanContext`] stages one scan's tag and memory writes over an
//! immutable base snapshot. Reads prefer staged values (last-write-wins
//! within the scan, so later rungs observe earlier rungs' writes), forced
//! tags mask both reads and writes, and `commit` produces the next
//! immutable snapshot atomically.

use crate::consts::MEM_PREV_PREFIX;
use crate::error::{EngineError, Fault};
use crate::state::{MemValue, SystemState};
use crate::system;
use crate::tag::Tag;
use crate::value::Value;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Mutable staging area for one scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    base: Arc<SystemState>,
    staged_tags: HashMap<String, Value>,
    staged_memory: HashMap<String, MemValue>,
    forces: BTreeMap<String, Value>,
    dt: f64,
    fixed_step: Option<f64>,
}

impl ScanContext {
    /// Open a scan over `base`, advancing simulated time by `dt`.
    ///
    /// `fixed_step` carries the configured fixed-step interval when the
    /// runner is in fixed-step mode; `forces` is the runner's force table
    /// captured for this scan.
    pub fn new(
        base: Arc<SystemState>,
        dt: f64,
        fixed_step: Option<f64>,
        forces: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            base,
            staged_tags: HashMap::new(),
            staged_memory: HashMap::new(),
            forces,
            dt,
            fixed_step,
        }
    }

    /// Scan id of the base snapshot (the scan being produced is this + 1).
    pub fn scan_id(&self) -> u64 {
        self.base.scan_id()
    }

    /// Simulated time of the scan in progress (base time plus `dt`).
    pub fn timestamp(&self) -> f64 {
        self.base.timestamp() + self.dt
    }

    /// Simulated seconds elapsed since the previous scan.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Fixed-step interval, when the runner is in fixed-step mode.
    pub fn fixed_step(&self) -> Option<f64> {
        self.fixed_step
    }

    /// The immutable snapshot this scan reads from.
    pub fn base(&self) -> &SystemState {
        &self.base
    }

    /// Read a tag: forced value, derived system point, staged write, base
    /// snapshot, or the tag's default, in that order.
    pub fn get_tag(&self, tag: &Tag) -> Value {
        self.read_name(tag.name())
            .unwrap_or_else(|| tag.default_value())
    }

    /// Read by name with an explicit fallback.
    pub fn get_named(&self, name: &str, default: Value) -> Value {
        self.read_name(name).unwrap_or(default)
    }

    fn read_name(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.forces.get(name) {
            return Some(*v);
        }
        if let Some(v) = system::resolve(name, self) {
            return Some(v);
        }
        self.raw_tag(name)
    }

    /// Staged-then-base tag read, bypassing forces and the derived
    /// resolver. The system resolver itself reads through this.
    pub(crate) fn raw_tag(&self, name: &str) -> Option<Value> {
        self.staged_tags
            .get(name)
            .copied()
            .or_else(|| self.base.tag(name).copied())
    }

    pub(crate) fn has_raw_tag(&self, name: &str) -> bool {
        self.staged_tags.contains_key(name) || self.base.tag(name).is_some()
    }

    /// Stage a logic write. Read-only system tags refuse the write;
    /// forced tags discard it silently.
    pub fn set_tag(&mut self, tag: &Tag, value: Value) -> Result<(), EngineError> {
        self.set_named(tag.name(), value)
    }

    /// Stage a logic write by name.
    pub fn set_named(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        if system::is_read_only(name) {
            return Err(EngineError::ReadOnlyWrite(name.into()));
        }
        if self.forces.contains_key(name) {
            return Ok(());
        }
        self.staged_tags.insert(name.into(), value);
        Ok(())
    }

    /// Engine-internal write: bypasses the read-only table and forces.
    pub(crate) fn set_tag_internal(&mut self, name: &str, value: Value) {
        self.staged_tags.insert(name.into(), value);
    }

    /// Raise a fault bit for the remainder of this scan.
    pub fn raise_fault(&mut self, fault: Fault) {
        tracing::debug!(fault = ?fault, "fault raised");
        self.set_tag_internal(fault.tag_name(), Value::Bool(true));
    }

    /// Read an engine memory slot (staged over base).
    pub fn get_memory(&self, key: &str) -> Option<MemValue> {
        self.staged_memory
            .get(key)
            .cloned()
            .or_else(|| self.base.memory_slot(key).cloned())
    }

    /// True when the slot exists staged or committed.
    pub fn has_memory(&self, key: &str) -> bool {
        self.staged_memory.contains_key(key) || self.base.memory_slot(key).is_some()
    }

    /// Stage an engine memory write.
    pub fn set_memory(&mut self, key: impl Into<String>, value: MemValue) {
        self.staged_memory.insert(key.into(), value);
    }

    /// Previous-scan value of an edge-referenced tag.
    pub fn edge_prev(&self, tag: &Tag) -> Value {
        match self.get_memory(&format!("{MEM_PREV_PREFIX}{}", tag.name())) {
            Some(MemValue::Tag(v)) => v,
            _ => tag.default_value(),
        }
    }

    /// Record the current value of an edge-referenced tag for the next
    /// scan's edge detection.
    pub(crate) fn record_edge_prev(&mut self, tag: &Tag) {
        let current = self.get_tag(tag);
        self.set_memory(
            format!("{MEM_PREV_PREFIX}{}", tag.name()),
            MemValue::Tag(current),
        );
    }

    /// Commit the staged writes, producing the next immutable snapshot
    /// with `scan_id + 1` and `timestamp + dt`.
    pub fn commit(self) -> SystemState {
        let next = self.base.next_scan(self.dt);
        let mut tags = next.tags().clone();
        tags.extend(self.staged_tags);
        let mut memory = next.memory().clone();
        memory.extend(self.staged_memory);
        SystemState::assemble(next.scan_id(), next.timestamp(), tags, memory)
    }
}
