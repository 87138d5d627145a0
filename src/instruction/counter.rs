//! Counters: count_up (with optional down leg), count_down
//!
//! Counters are scan-driven, not edge-triggered: the accumulator moves on
//! every scan the relevant condition holds. They are never inert while
//! disabled — the down leg and the reset both act on disabled scans, and
//! the done bit is recomputed from the inequality every scan so setpoint
//! changes take effect immediately.

use super::{resolve_setpoint, Source};
use crate::condition::Condition;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::tag::Tag;
use crate::value::{store, Overflow, Scalar, Value};

fn eval_condition(ctx: &mut ScanContext, cond: &Option<Condition>) -> bool {
    match cond {
        None => false,
        Some(c) => match c.evaluate(ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.raise_fault(e.fault());
                false
            }
        },
    }
}

fn read_acc(ctx: &ScanContext, acc: &Tag) -> i64 {
    ctx.get_tag(acc).scalar().as_i64()
}

fn write_acc(ctx: &mut ScanContext, acc: &Tag, value: i64) -> Result<(), EngineError> {
    // Accumulators saturate at their own type's bounds.
    let coerced = store(Scalar::Int(value), acc.tag_type(), Overflow::Clamp)
        .unwrap_or_else(|_| acc.tag_type().default_value());
    ctx.set_tag(acc, coerced)
}

/// Up / bidirectional counter.
#[derive(Debug, Clone)]
pub struct CountUp {
    pub(crate) done: Tag,
    pub(crate) acc: Tag,
    pub(crate) setpoint: Source,
    pub(crate) down: Option<Condition>,
    pub(crate) reset: Option<Condition>,
}

impl CountUp {
    /// Bind a down leg: while the condition holds, the accumulator also
    /// decrements that scan (net zero when both legs fire).
    pub fn down(mut self, cond: Condition) -> Self {
        self.down = Some(cond);
        self
    }

    /// Bind a reset: while true, accumulator and done bit clear.
    pub fn reset(mut self, cond: Condition) -> Self {
        self.reset = Some(cond);
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if eval_condition(ctx, &self.reset) {
            write_acc(ctx, &self.acc, 0)?;
            ctx.set_tag(&self.done, Value::Bool(false))?;
            return Ok(ExecuteState::Proceed);
        }

        let mut delta: i64 = 0;
        if enabled {
            delta += 1;
        }
        if eval_condition(ctx, &self.down) {
            delta -= 1;
        }
        let next = read_acc(ctx, &self.acc).saturating_add(delta);
        write_acc(ctx, &self.acc, next)?;

        let setpoint = resolve_setpoint(ctx, &self.setpoint).unwrap_or(0);
        let done = read_acc(ctx, &self.acc) >= setpoint;
        ctx.set_tag(&self.done, Value::Bool(done))?;
        Ok(ExecuteState::Proceed)
    }

    /// Done bit tag.
    pub fn done(&self) -> &Tag {
        &self.done
    }

    /// Accumulator tag.
    pub fn acc(&self) -> &Tag {
        &self.acc
    }

    /// Setpoint operand.
    pub fn setpoint(&self) -> &Source {
        &self.setpoint
    }
}

impl From<CountUp> for super::Instruction {
    fn from(i: CountUp) -> Self {
        Self::CountUp(i)
    }
}

/// Count up while the rung is enabled; done when `acc >= setpoint`.
pub fn count_up(done: &Tag, acc: &Tag, setpoint: impl Into<Source>) -> CountUp {
    CountUp {
        done: done.clone(),
        acc: acc.clone(),
        setpoint: setpoint.into(),
        down: None,
        reset: None,
    }
}

/// Down counter: counts from zero into negatives.
#[derive(Debug, Clone)]
pub struct CountDown {
    pub(crate) done: Tag,
    pub(crate) acc: Tag,
    pub(crate) setpoint: Source,
    pub(crate) reset: Option<Condition>,
}

impl CountDown {
    /// Bind a reset: while true, accumulator and done bit clear.
    pub fn reset(mut self, cond: Condition) -> Self {
        self.reset = Some(cond);
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if eval_condition(ctx, &self.reset) {
            write_acc(ctx, &self.acc, 0)?;
            ctx.set_tag(&self.done, Value::Bool(false))?;
            return Ok(ExecuteState::Proceed);
        }

        if enabled {
            let next = read_acc(ctx, &self.acc).saturating_sub(1);
            write_acc(ctx, &self.acc, next)?;
        }

        // The setpoint is the magnitude of the negative threshold.
        let setpoint = resolve_setpoint(ctx, &self.setpoint).unwrap_or(0);
        let done = read_acc(ctx, &self.acc) <= -setpoint;
        ctx.set_tag(&self.done, Value::Bool(done))?;
        Ok(ExecuteState::Proceed)
    }

    /// Done bit tag.
    pub fn done(&self) -> &Tag {
        &self.done
    }

    /// Accumulator tag.
    pub fn acc(&self) -> &Tag {
        &self.acc
    }

    /// Setpoint operand.
    pub fn setpoint(&self) -> &Source {
        &self.setpoint
    }
}

impl From<CountDown> for super::Instruction {
    fn from(i: CountDown) -> Self {
        Self::CountDown(i)
    }
}

/// Count down while the rung is enabled; done when `acc <= -setpoint`.
pub fn count_down(done: &Tag, acc: &Tag, setpoint: impl Into<Source>) -> CountDown {
    CountDown {
        done: done.clone(),
        acc: acc.clone(),
        setpoint: setpoint.into(),
        reset: None,
    }
}
