//! Bit shift register

use super::RangeSpec;
use crate::condition::Condition;
use crate::consts::MEM_SHIFT_PREFIX;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState, Fault};
use crate::state::MemValue;
use crate::value::Value;

/// Shift register over a bool range.
///
/// On the clock condition's rising edge, every element moves forward one
/// address and the data condition's current value enters at element 0.
/// While the reset condition holds, the whole range zeroes. The previous
/// clock state lives in scan memory and is refreshed even on disabled
/// scans, so re-enabling never sees a phantom edge.
#[derive(Debug, Clone)]
pub struct ShiftInstr {
    pub(crate) range: RangeSpec,
    pub(crate) data: Condition,
    pub(crate) clock: Condition,
    pub(crate) reset: Condition,
    pub(crate) slot: u32,
}

impl ShiftInstr {
    fn clock_key(&self) -> String {
        format!("{MEM_SHIFT_PREFIX}{}:clk", self.slot)
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        let clock_now = match self.clock.evaluate(ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.raise_fault(e.fault());
                false
            }
        };
        let clock_prev = ctx
            .get_memory(&self.clock_key())
            .map(|m| m.as_bool())
            .unwrap_or(false);
        ctx.set_memory(self.clock_key(), MemValue::Bool(clock_now));

        if !enabled {
            return Ok(ExecuteState::Proceed);
        }

        let range = match self.range.resolve(ctx) {
            Ok(r) => r,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let tags = range.tags();

        let reset = match self.reset.evaluate(ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.raise_fault(e.fault());
                false
            }
        };
        if reset {
            for tag in &tags {
                ctx.set_tag(tag, Value::Bool(false))?;
            }
            return Ok(ExecuteState::Proceed);
        }

        if clock_now && !clock_prev {
            let data = match self.data.evaluate(ctx) {
                Ok(v) => v,
                Err(e) => {
                    ctx.raise_fault(e.fault());
                    false
                }
            };
            for i in (1..tags.len()).rev() {
                let prev = ctx.get_tag(&tags[i - 1]);
                ctx.set_tag(&tags[i], Value::Bool(prev.truthy()))?;
            }
            if let Some(first) = tags.first() {
                ctx.set_tag(first, Value::Bool(data))?;
            }
        }
        Ok(ExecuteState::Proceed)
    }

    /// Bit range operand.
    pub fn range(&self) -> &RangeSpec {
        &self.range
    }

    /// Data-in condition.
    pub fn data(&self) -> &Condition {
        &self.data
    }

    /// Clock condition.
    pub fn clock(&self) -> &Condition {
        &self.clock
    }

    /// Reset condition.
    pub fn reset_condition(&self) -> &Condition {
        &self.reset
    }
}

impl From<ShiftInstr> for super::Instruction {
    fn from(i: ShiftInstr) -> Self {
        Self::Shift(i)
    }
}

/// Shift register over `range` clocked by `clock`, loading `data`,
/// cleared by `reset`.
pub fn shift(
    range: impl Into<RangeSpec>,
    data: Condition,
    clock: Condition,
    reset: Condition,
) -> ShiftInstr {
    ShiftInstr {
        range: range.into(),
        data,
        clock,
        reset,
        slot: 0,
    }
}
