//! Math instruction

use super::{oneshot_pass, Dest};
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState, Fault};
use crate::expr::Expr;
use crate::value::{overflows, store, Overflow, Scalar};

/// Evaluate an expression and store with wrap semantics.
///
/// Division by zero raises `fault.division_error` and skips the store.
/// A non-finite result raises `fault.math_operation_error` and skips. A
/// result beyond the destination type's range raises
/// `fault.math_operation_error` and stores the wrapped value.
#[derive(Debug, Clone)]
pub struct MathInstr {
    pub(crate) expr: Expr,
    pub(crate) dest: Dest,
    pub(crate) oneshot: bool,
    pub(crate) slot: u32,
}

impl MathInstr {
    /// Restrict to one store per rising enable.
    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !oneshot_pass(ctx, self.slot, enabled, self.oneshot) {
            return Ok(ExecuteState::Proceed);
        }

        let result = match self.expr.evaluate(ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.raise_fault(e.fault());
                return Ok(ExecuteState::Proceed);
            }
        };

        if let Scalar::Float(f) = result {
            if !f.is_finite() {
                ctx.raise_fault(Fault::MathOperationError);
                return Ok(ExecuteState::Proceed);
            }
        }

        let target = match self.dest.resolve(ctx) {
            Ok(t) => t,
            Err(e) => {
                ctx.raise_fault(e.fault());
                return Ok(ExecuteState::Proceed);
            }
        };

        if overflows(&result, target.tag_type()) {
            ctx.raise_fault(Fault::MathOperationError);
        }
        match store(result, target.tag_type(), Overflow::Wrap) {
            Ok(value) => ctx.set_tag(&target, value)?,
            Err(e) => ctx.raise_fault(e.fault()),
        }
        Ok(ExecuteState::Proceed)
    }

    /// The stored expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Destination operand.
    pub fn dest(&self) -> &Dest {
        &self.dest
    }
}

impl From<MathInstr> for super::Instruction {
    fn from(i: MathInstr) -> Self {
        Self::Math(i)
    }
}

/// Math store of `expr` into `dest`.
pub fn math(expr: impl Into<Expr>, dest: impl Into<Dest>) -> MathInstr {
    MathInstr {
        expr: expr.into(),
        dest: dest.into(),
        oneshot: false,
        slot: 0,
    }
}
