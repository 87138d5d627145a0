//! Timers: on_delay (TON/RTON), off_delay (TOF)
//!
//! Accumulators count whole units; the sub-unit remainder carries across
//! scans in a fractional memory slot and truncates (never rounds). The
//! accumulator updates before the rung's remaining items run, so later
//! rungs observe the in-progress value within the same scan.

use super::{resolve_setpoint, Source};
use crate::condition::Condition;
use crate::consts::MEM_TIMER_PREFIX;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::state::MemValue;
use crate::tag::Tag;
use crate::value::{store, Overflow, Scalar, Value};

/// Timer accumulation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// Milliseconds (the default).
    #[default]
    Ms,
    /// Seconds.
    S,
    /// Minutes.
    Min,
    /// Hours.
    Hr,
    /// Days.
    Day,
}

impl TimeUnit {
    /// Unit counts per simulated second.
    pub const fn per_second(&self) -> f64 {
        match self {
            Self::Ms => 1000.0,
            Self::S => 1.0,
            Self::Min => 1.0 / 60.0,
            Self::Hr => 1.0 / 3600.0,
            Self::Day => 1.0 / 86_400.0,
        }
    }
}

fn frac_key(slot: u32) -> String {
    format!("{MEM_TIMER_PREFIX}{slot}:frac")
}

fn read_frac(ctx: &ScanContext, slot: u32) -> f64 {
    ctx.get_memory(&frac_key(slot))
        .map(|m| m.as_f64())
        .unwrap_or(0.0)
}

fn write_acc(ctx: &mut ScanContext, acc: &Tag, value: i64) -> Result<(), EngineError> {
    let coerced = store(Scalar::Int(value), acc.tag_type(), Overflow::Clamp)
        .unwrap_or_else(|_| acc.tag_type().default_value());
    ctx.set_tag(acc, coerced)
}

fn accumulate(
    ctx: &mut ScanContext,
    slot: u32,
    acc: &Tag,
    unit: TimeUnit,
) -> Result<i64, EngineError> {
    let raw = ctx.dt() * unit.per_second() + read_frac(ctx, slot);
    let whole = raw.trunc();
    ctx.set_memory(frac_key(slot), MemValue::Float(raw - whole));
    let next = ctx
        .get_tag(acc)
        .scalar()
        .as_i64()
        .saturating_add(whole as i64);
    write_acc(ctx, acc, next)?;
    Ok(ctx.get_tag(acc).scalar().as_i64())
}

fn clear(ctx: &mut ScanContext, slot: u32, acc: &Tag) -> Result<(), EngineError> {
    ctx.set_memory(frac_key(slot), MemValue::Float(0.0));
    write_acc(ctx, acc, 0)
}

fn eval_reset(ctx: &mut ScanContext, cond: &Option<Condition>) -> bool {
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

/// On-delay timer. Without a reset bound this is a TON (the disabled
/// transition clears it); with one it is an RTON (disabled scans hold the
/// accumulated time, only the reset clears).
#[derive(Debug, Clone)]
pub struct OnDelay {
    pub(crate) done: Tag,
    pub(crate) acc: Tag,
    pub(crate) setpoint: Source,
    pub(crate) unit: TimeUnit,
    pub(crate) reset: Option<Condition>,
    pub(crate) slot: u32,
}

impl OnDelay {
    /// Accumulation unit (default milliseconds).
    pub fn unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Bind a reset condition, making this a retentive timer (RTON).
    pub fn reset(mut self, cond: Condition) -> Self {
        self.reset = Some(cond);
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        let retentive = self.reset.is_some();
        if retentive && eval_reset(ctx, &self.reset) {
            clear(ctx, self.slot, &self.acc)?;
            ctx.set_tag(&self.done, Value::Bool(false))?;
            return Ok(ExecuteState::Proceed);
        }

        if enabled {
            let elapsed = accumulate(ctx, self.slot, &self.acc, self.unit)?;
            let setpoint = resolve_setpoint(ctx, &self.setpoint).unwrap_or(0);
            ctx.set_tag(&self.done, Value::Bool(elapsed >= setpoint))?;
        } else if !retentive {
            clear(ctx, self.slot, &self.acc)?;
            ctx.set_tag(&self.done, Value::Bool(false))?;
        } else {
            let elapsed = ctx.get_tag(&self.acc).scalar().as_i64();
            let setpoint = resolve_setpoint(ctx, &self.setpoint).unwrap_or(0);
            ctx.set_tag(&self.done, Value::Bool(elapsed >= setpoint))?;
        }
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

impl From<OnDelay> for super::Instruction {
    fn from(i: OnDelay) -> Self {
        Self::OnDelay(i)
    }
}

/// On-delay timer: done once the enabled time reaches the setpoint.
pub fn on_delay(done: &Tag, acc: &Tag, setpoint: impl Into<Source>) -> OnDelay {
    OnDelay {
        done: done.clone(),
        acc: acc.clone(),
        setpoint: setpoint.into(),
        unit: TimeUnit::Ms,
        reset: None,
        slot: 0,
    }
}

/// Off-delay timer (TOF): done while enabled, and for `setpoint` units
/// after the enable drops.
#[derive(Debug, Clone)]
pub struct OffDelay {
    pub(crate) done: Tag,
    pub(crate) acc: Tag,
    pub(crate) setpoint: Source,
    pub(crate) unit: TimeUnit,
    pub(crate) slot: u32,
}

impl OffDelay {
    /// Accumulation unit (default milliseconds).
    pub fn unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if enabled {
            clear(ctx, self.slot, &self.acc)?;
            ctx.set_tag(&self.done, Value::Bool(true))?;
        } else {
            let elapsed = accumulate(ctx, self.slot, &self.acc, self.unit)?;
            // Recomputed from the inequality, so raising the setpoint
            // above an elapsed accumulator re-asserts done.
            let setpoint = resolve_setpoint(ctx, &self.setpoint).unwrap_or(0);
            ctx.set_tag(&self.done, Value::Bool(elapsed < setpoint))?;
        }
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

impl From<OffDelay> for super::Instruction {
    fn from(i: OffDelay) -> Self {
        Self::OffDelay(i)
    }
}

/// Off-delay timer.
pub fn off_delay(done: &Tag, acc: &Tag, setpoint: impl Into<Source>) -> OffDelay {
    OffDelay {
        done: done.clone(),
        acc: acc.clone(),
        setpoint: setpoint.into(),
        unit: TimeUnit::Ms,
        slot: 0,
    }
}
