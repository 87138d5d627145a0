//! Rung execution graph
//!
//! A rung holds an ordered condition list and an ordered execution-item
//! list; items are instructions or nested branch rungs. A branch carries
//! its parent's conditions ahead of its own local ones so its evaluation
//! is self-contained; `branch_condition_start` marks where the local
//! conditions begin for debugger display.

use crate::condition::Condition;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::instruction::Instruction;
use crate::program::Program;

/// Source location captured when a rung or instruction was authored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    /// Source file.
    pub file: &'static str,
    /// First line.
    pub line: u32,
    /// Last line, when known.
    pub end_line: Option<u32>,
}

impl SourceSpan {
    pub(crate) fn caller(location: &'static std::panic::Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            end_line: None,
        }
    }
}

/// One execution item of a rung.
#[derive(Debug, Clone)]
pub enum ExecItem {
    /// A terminal instruction.
    Instruction(Instruction),
    /// A nested branch rung.
    Branch(Rung),
}

/// An ordered condition list plus an ordered execution-item list.
#[derive(Debug, Clone)]
pub struct Rung {
    pub(crate) conditions: Vec<Condition>,
    pub(crate) items: Vec<ExecItem>,
    pub(crate) branch_condition_start: usize,
    pub(crate) span: Option<SourceSpan>,
}

impl Rung {
    pub(crate) fn new(conditions: Vec<Condition>, span: Option<SourceSpan>) -> Self {
        Self {
            conditions,
            items: Vec::new(),
            branch_condition_start: 0,
            span,
        }
    }

    /// All conditions, inherited ones first for branches.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Conditions local to this rung (excludes inherited branch
    /// conditions).
    pub fn local_conditions(&self) -> &[Condition] {
        &self.conditions[self.branch_condition_start..]
    }

    /// Index where branch-local conditions begin.
    pub fn branch_condition_start(&self) -> usize {
        self.branch_condition_start
    }

    /// Execution items in authored order.
    pub fn items(&self) -> &[ExecItem] {
        &self.items
    }

    /// Authored source span, when captured.
    pub fn span(&self) -> Option<SourceSpan> {
        self.span
    }

    /// Combined enable: short-circuit AND over the condition list. A
    /// condition fault reads as false and raises the matching fault bit.
    pub fn enabled(&self, ctx: &mut ScanContext) -> bool {
        Self::conditions_enabled(&self.conditions, ctx)
    }

    pub(crate) fn conditions_enabled(conditions: &[Condition], ctx: &mut ScanContext) -> bool {
        for cond in conditions {
            match cond.evaluate(ctx) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    ctx.raise_fault(e.fault());
                    return false;
                }
            }
        }
        true
    }

    /// Evaluate the rung: check conditions, then run items in order.
    ///
    /// Disabled rungs still execute non-inert instructions (with
    /// `enabled = false`) so stateful instructions can reset. A
    /// `Return` from any item stops the rung and propagates.
    pub fn evaluate(
        &self,
        ctx: &mut ScanContext,
        program: &Program,
    ) -> Result<ExecuteState, EngineError> {
        let enabled = self.enabled(ctx);
        for item in &self.items {
            match item {
                ExecItem::Instruction(instr) => {
                    let state = if enabled {
                        instr.execute(ctx, true, program)?
                    } else if !instr.is_inert_when_disabled() {
                        instr.execute(ctx, false, program)?
                    } else {
                        ExecuteState::Proceed
                    };
                    if state == ExecuteState::Return {
                        return Ok(ExecuteState::Return);
                    }
                }
                ExecItem::Branch(branch) => {
                    if branch.evaluate(ctx, program)? == ExecuteState::Return {
                        return Ok(ExecuteState::Return);
                    }
                }
            }
        }
        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn assign_slots(&mut self, next: &mut u32) {
        for item in &mut self.items {
            match item {
                ExecItem::Instruction(instr) => instr.assign_slots(next),
                ExecItem::Branch(branch) => branch.assign_slots(next),
            }
        }
    }

    pub(crate) fn collect_edge_tags(&self, out: &mut Vec<crate::tag::Tag>) {
        for cond in &self.conditions {
            cond.collect_edge_tags(out);
        }
        for item in &self.items {
            match item {
                ExecItem::Instruction(instr) => {
                    for cond in instr.embedded_conditions() {
                        cond.collect_edge_tags(out);
                    }
                }
                ExecItem::Branch(branch) => branch.collect_edge_tags(out),
            }
        }
    }
}
