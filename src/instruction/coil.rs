//! Coil instructions: out, latch, reset

use super::oneshot_pass;
use crate::block::BlockRange;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::tag::Tag;
use crate::value::Value;

/// A coil target: one bool tag or a bool range.
#[derive(Debug, Clone)]
pub enum CoilTarget {
    /// Single tag.
    Tag(Tag),
    /// Every tag in the range.
    Range(BlockRange),
}

impl From<&Tag> for CoilTarget {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Tag> for CoilTarget {
    fn from(t: Tag) -> Self {
        Self::Tag(t)
    }
}

impl From<BlockRange> for CoilTarget {
    fn from(r: BlockRange) -> Self {
        Self::Range(r)
    }
}

impl CoilTarget {
    fn write(&self, ctx: &mut ScanContext, value: bool) -> Result<(), EngineError> {
        match self {
            Self::Tag(t) => ctx.set_tag(t, Value::Bool(value)),
            Self::Range(r) => {
                for tag in r.tags() {
                    ctx.set_tag(&tag, Value::Bool(value))?;
                }
                Ok(())
            }
        }
    }

    /// Tags driven by this coil.
    pub fn tags(&self) -> Vec<Tag> {
        match self {
            Self::Tag(t) => vec![t.clone()],
            Self::Range(r) => r.tags(),
        }
    }
}

/// Output coil: drives true while the rung is enabled; inert otherwise.
#[derive(Debug, Clone)]
pub struct OutCoil {
    pub(crate) target: CoilTarget,
    pub(crate) oneshot: bool,
    pub(crate) slot: u32,
}

impl OutCoil {
    /// Restrict to one write per rising enable.
    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if oneshot_pass(ctx, self.slot, enabled, self.oneshot) {
            self.target.write(ctx, true)?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// The coil target.
    pub fn target(&self) -> &CoilTarget {
        &self.target
    }
}

impl From<OutCoil> for super::Instruction {
    fn from(i: OutCoil) -> Self {
        Self::Out(i)
    }
}

/// Latch coil: writes true when enabled and holds across disabled scans.
#[derive(Debug, Clone)]
pub struct LatchCoil {
    pub(crate) target: CoilTarget,
}

impl LatchCoil {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if enabled {
            self.target.write(ctx, true)?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// The coil target.
    pub fn target(&self) -> &CoilTarget {
        &self.target
    }
}

impl From<LatchCoil> for super::Instruction {
    fn from(i: LatchCoil) -> Self {
        Self::Latch(i)
    }
}

/// Unlatch coil: writes false when enabled.
#[derive(Debug, Clone)]
pub struct ResetCoil {
    pub(crate) target: CoilTarget,
}

impl ResetCoil {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if enabled {
            self.target.write(ctx, false)?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// The coil target.
    pub fn target(&self) -> &CoilTarget {
        &self.target
    }
}

impl From<ResetCoil> for super::Instruction {
    fn from(i: ResetCoil) -> Self {
        Self::Reset(i)
    }
}

/// Output coil over a bool tag or range.
pub fn out(target: impl Into<CoilTarget>) -> OutCoil {
    OutCoil {
        target: target.into(),
        oneshot: false,
        slot: 0,
    }
}

/// Latch (set) coil.
pub fn latch(target: impl Into<CoilTarget>) -> LatchCoil {
    LatchCoil {
        target: target.into(),
    }
}

/// Unlatch (reset) coil.
pub fn reset(target: impl Into<CoilTarget>) -> ResetCoil {
    ResetCoil {
        target: target.into(),
    }
}
