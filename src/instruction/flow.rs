//! Control flow: call, return, for_loop

use super::{Instruction, Source};
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::program::Program;
use crate::tag::Tag;
use crate::value::{store, Overflow, Scalar};

/// Subroutine call.
#[derive(Debug, Clone)]
pub struct CallInstr {
    pub(crate) name: String,
}

impl CallInstr {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
        program: &Program,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        // Unknown subroutines are hard errors at call time.
        let rungs = program
            .subroutine(&self.name)
            .ok_or_else(|| EngineError::MissingSubroutine(self.name.clone()))?;
        for rung in rungs {
            // A Return unwinds only this subroutine's rung list.
            if rung.evaluate(ctx, program)? == ExecuteState::Return {
                break;
            }
        }
        Ok(ExecuteState::Proceed)
    }

    /// The called subroutine's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<CallInstr> for Instruction {
    fn from(i: CallInstr) -> Self {
        Self::Call(i)
    }
}

/// Call a named subroutine against the same scan context.
pub fn call(name: impl Into<String>) -> CallInstr {
    CallInstr { name: name.into() }
}

/// Subroutine return.
#[derive(Debug, Clone)]
pub struct ReturnInstr;

impl ReturnInstr {
    pub(crate) fn execute(
        &self,
        _ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        Ok(if enabled {
            ExecuteState::Return
        } else {
            ExecuteState::Proceed
        })
    }
}

impl From<ReturnInstr> for Instruction {
    fn from(i: ReturnInstr) -> Self {
        Self::Return(i)
    }
}

/// Early subroutine exit; ignored when the rung is disabled.
pub fn return_() -> ReturnInstr {
    ReturnInstr
}

/// Bounded loop over body instructions, oneshot per enable.
///
/// On entry the count is evaluated once; the loop writes `0..count-1`
/// into the index tag and runs each body instruction per iteration. The
/// loop latches after completion and re-arms only when the enable drops.
#[derive(Debug, Clone)]
pub struct ForLoop {
    pub(crate) count: Source,
    pub(crate) idx: Tag,
    pub(crate) body: Vec<Instruction>,
    pub(crate) slot: u32,
}

impl ForLoop {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
        program: &Program,
    ) -> Result<ExecuteState, EngineError> {
        if !super::oneshot_pass(ctx, self.slot, enabled, true) {
            return Ok(ExecuteState::Proceed);
        }
        let iterations = self.iterations(ctx);
        for i in 0..iterations {
            let idx = store(Scalar::Int(i), self.idx.tag_type(), Overflow::Clamp)
                .unwrap_or_else(|_| self.idx.tag_type().default_value());
            ctx.set_tag(&self.idx, idx)?;
            for child in &self.body {
                if child.execute(ctx, true, program)? == ExecuteState::Return {
                    return Ok(ExecuteState::Return);
                }
            }
        }
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn iterations(&self, ctx: &mut ScanContext) -> i64 {
        match self.count.evaluate(ctx) {
            Ok(v) => v.as_i64().max(0),
            Err(e) => {
                ctx.raise_fault(e.fault());
                0
            }
        }
    }

    /// Loop bound operand.
    pub fn count(&self) -> &Source {
        &self.count
    }

    /// Index tag written each iteration.
    pub fn idx(&self) -> &Tag {
        &self.idx
    }

    /// Body instructions.
    pub fn body(&self) -> &[Instruction] {
        &self.body
    }
}

impl From<ForLoop> for Instruction {
    fn from(i: ForLoop) -> Self {
        Self::ForLoop(i)
    }
}

/// Loop `count` times over `body`, writing the iteration into `idx`.
pub fn for_loop(
    count: impl Into<Source>,
    idx: &Tag,
    body: impl IntoIterator<Item = Instruction>,
) -> ForLoop {
    ForLoop {
        count: count.into(),
        idx: idx.clone(),
        body: body.into_iter().collect(),
        slot: 0,
    }
}
