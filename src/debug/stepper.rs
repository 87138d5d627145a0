//! Lazy per-step scan iterator
//!
//! Drives one scan cycle as an explicit frame stack, yielding a
//! [`ScanStep`] per instruction and per rung/branch/subroutine exit in
//! depth-first order. The caller may suspend between steps with the scan
//! context intact; the scan commits when the iterator is exhausted, and
//! dropping it early discards the staged writes.

use super::{CondStatus, ConditionTrace, EnabledState, ScanStep, StepKind, TraceRegion};
use crate::condition::Condition;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::instruction::Instruction;
use crate::program::Program;
use crate::rung::{ExecItem, Rung};
use crate::runner::Runner;
use crate::value::{store, Overflow, Scalar};

use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Scope {
    Main,
    Sub(String),
}

#[derive(Debug, Clone)]
struct RungLoc {
    scope: Scope,
    index: usize,
    branches: Vec<usize>,
}

fn rung_at<'p>(program: &'p Program, loc: &RungLoc) -> &'p Rung {
    let mut rung = match &loc.scope {
        Scope::Main => &program.rungs()[loc.index],
        Scope::Sub(name) => {
            &program.subroutine(name).expect("subroutine checked at call")[loc.index]
        }
    };
    for &b in &loc.branches {
        match &rung.items()[b] {
            ExecItem::Branch(r) => rung = r,
            ExecItem::Instruction(_) => unreachable!("locator branch index"),
        }
    }
    rung
}

#[derive(Debug, Clone)]
struct InstrLoc {
    rung: RungLoc,
    item: usize,
    children: Vec<usize>,
}

fn instr_at<'p>(program: &'p Program, loc: &InstrLoc) -> &'p Instruction {
    let rung = rung_at(program, &loc.rung);
    let mut instr = match &rung.items()[loc.item] {
        ExecItem::Instruction(i) => i,
        ExecItem::Branch(_) => unreachable!("locator item index"),
    };
    for &c in &loc.children {
        match instr {
            Instruction::ForLoop(f) => instr = &f.body()[c],
            _ => unreachable!("locator child index"),
        }
    }
    instr
}

struct RungFrame {
    loc: RungLoc,
    kind: StepKind,
    rung_index: usize,
    depth: usize,
    subroutine: Option<String>,
    call_stack: Vec<String>,
    enabled: bool,
    enabled_state: EnabledState,
    regions: Vec<TraceRegion>,
    branch_states: Vec<Option<(bool, EnabledState, Vec<ConditionTrace>)>>,
    item: usize,
}

struct LoopFrame {
    loc: InstrLoc,
    iterations: i64,
    iter: i64,
    child: usize,
    rung_index: usize,
    depth: usize,
    subroutine: Option<String>,
    call_stack: Vec<String>,
    regions: Vec<TraceRegion>,
}

struct SubFrame {
    name: String,
    next: usize,
    rung_index: usize,
    depth: usize,
    call_stack: Vec<String>,
}

enum Frame {
    Rung(RungFrame),
    Loop(LoopFrame),
    Sub(SubFrame),
}

struct Pending {
    loc: InstrLoc,
    enabled: bool,
}

/// Iterator over one scan's debug steps.
///
/// Yields `Result<ScanStep, EngineError>`; the scan commits on
/// exhaustion. While the iterator lives, no other runner operation is
/// valid (the borrow enforces this).
pub struct ScanSteps<'r> {
    runner: &'r mut Runner,
    program: Arc<Program>,
    ctx: Option<ScanContext>,
    stack: Vec<Frame>,
    queue: VecDeque<ScanStep>,
    pending: Option<Pending>,
    main_index: usize,
    done: bool,
}

impl Runner {
    /// Execute one scan cycle, yielding per-step debug events.
    pub fn scan_steps_debug(&mut self) -> ScanSteps<'_> {
        let ctx = self.prepare_scan();
        let program = self.program_arc();
        ScanSteps {
            runner: self,
            program,
            ctx: Some(ctx),
            stack: Vec::new(),
            queue: VecDeque::new(),
            pending: None,
            main_index: 0,
            done: false,
        }
    }
}

fn trace_one(
    ctx: &mut ScanContext,
    condition: &Condition,
) -> (bool, ConditionTrace) {
    let expression = condition.text();
    match condition.evaluate_detailed(ctx) {
        Ok((value, details)) => {
            let status = if value { CondStatus::True } else { CondStatus::False };
            let summary = format!("{expression}({value})");
            (
                value,
                ConditionTrace {
                    expression,
                    status,
                    value: Some(value),
                    details,
                    summary,
                },
            )
        }
        Err(e) => {
            ctx.raise_fault(e.fault());
            let summary = format!("{expression}(fault)");
            (
                false,
                ConditionTrace {
                    expression,
                    status: CondStatus::False,
                    value: Some(false),
                    details: Vec::new(),
                    summary,
                },
            )
        }
    }
}

fn skipped_trace(condition: &Condition) -> ConditionTrace {
    let expression = condition.text();
    ConditionTrace {
        summary: expression.clone(),
        expression,
        status: CondStatus::Skipped,
        value: None,
        details: Vec::new(),
    }
}

fn trace_conditions(ctx: &mut ScanContext, conditions: &[Condition]) -> (bool, Vec<ConditionTrace>) {
    let mut enabled = true;
    let mut traces = Vec::with_capacity(conditions.len());
    for condition in conditions {
        if !enabled {
            traces.push(skipped_trace(condition));
            continue;
        }
        let (value, trace) = trace_one(ctx, condition);
        if !value {
            enabled = false;
        }
        traces.push(trace);
    }
    (enabled, traces)
}

impl ScanSteps<'_> {
    /// The in-progress scan context (for breakpoint condition
    /// evaluation).
    pub fn context(&self) -> &ScanContext {
        self.ctx.as_ref().expect("scan in progress")
    }

    /// Label the scan once it commits (snapshot logpoints).
    pub fn defer_label(&mut self, label: impl Into<String>) {
        self.runner.defer_label(label);
    }

    fn ctx_mut(&mut self) -> &mut ScanContext {
        self.ctx.as_mut().expect("scan in progress")
    }

    #[allow(clippy::too_many_arguments)]
    fn push_rung_frame(
        &mut self,
        loc: RungLoc,
        kind: StepKind,
        rung_index: usize,
        depth: usize,
        subroutine: Option<String>,
        call_stack: Vec<String>,
        enabled: bool,
        enabled_state: EnabledState,
        own_traces: Vec<ConditionTrace>,
    ) {
        let program = self.program.clone();
        let rung = rung_at(&program, &loc);
        let ctx = self.ctx.as_mut().expect("scan in progress");

        let mut regions = vec![TraceRegion {
            kind: if kind == StepKind::Branch {
                StepKind::Branch
            } else {
                StepKind::Rung
            },
            span: rung.span(),
            enabled_state,
            conditions: own_traces,
        }];

        // Branch enables are precomputed at rung entry so the step trace
        // can report every branch region alongside the rung's own
        // conditions.
        let mut branch_states = Vec::with_capacity(rung.items().len());
        for item in rung.items() {
            match item {
                ExecItem::Branch(branch) => {
                    let locals = branch.local_conditions();
                    let (local_enabled, state, traces) = if enabled {
                        let (local_enabled, traces) = trace_conditions(ctx, locals);
                        let state = if local_enabled {
                            EnabledState::Enabled
                        } else {
                            EnabledState::DisabledLocal
                        };
                        (local_enabled, state, traces)
                    } else {
                        let traces = locals.iter().map(skipped_trace).collect();
                        (false, EnabledState::DisabledParent, traces)
                    };
                    regions.push(TraceRegion {
                        kind: StepKind::Branch,
                        span: branch.span(),
                        enabled_state: state,
                        conditions: traces.clone(),
                    });
                    branch_states.push(Some((local_enabled, state, traces)));
                }
                ExecItem::Instruction(_) => branch_states.push(None),
            }
        }

        self.stack.push(Frame::Rung(RungFrame {
            loc,
            kind,
            rung_index,
            depth,
            subroutine,
            call_stack,
            enabled,
            enabled_state,
            regions,
            branch_states,
            item: 0,
        }));
    }

    fn rung_step(&self, frame: &RungFrame) -> ScanStep {
        let rung = rung_at(&self.program, &frame.loc);
        ScanStep {
            kind: frame.kind,
            rung_index: frame.rung_index,
            depth: frame.depth,
            subroutine: frame.subroutine.clone(),
            call_stack: frame.call_stack.clone(),
            span: rung.span(),
            enabled_state: frame.enabled_state,
            instruction_kind: None,
            regions: frame.regions.clone(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn instruction_step(
        &self,
        rung_index: usize,
        depth: usize,
        subroutine: Option<String>,
        call_stack: Vec<String>,
        span: Option<crate::rung::SourceSpan>,
        enabled_state: EnabledState,
        instruction_kind: &'static str,
        regions: Vec<TraceRegion>,
    ) -> ScanStep {
        ScanStep {
            kind: StepKind::Instruction,
            rung_index,
            depth,
            subroutine,
            call_stack,
            span,
            enabled_state,
            instruction_kind: Some(instruction_kind),
            regions,
        }
    }

    fn exec_pending(&mut self, pending: Pending) -> Result<(), EngineError> {
        let program = self.program.clone();
        let instr = instr_at(&program, &pending.loc);
        let ctx = self.ctx.as_mut().expect("scan in progress");
        let state = instr.execute(ctx, pending.enabled, &program)?;
        if state == ExecuteState::Return {
            self.unwind_return();
        }
        Ok(())
    }

    // Unwind a subroutine return: pop frames up to (and including) the
    // innermost call boundary, emitting exit events for non-branch rung
    // frames on the way out. A top-level return unwinds its own rung
    // only.
    fn unwind_return(&mut self) {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Sub(_) => return,
                Frame::Rung(f) => {
                    let top_level = f.kind == StepKind::Rung;
                    if f.kind != StepKind::Branch {
                        let step = self.rung_step(&f);
                        self.queue.push_back(step);
                    }
                    if top_level {
                        return;
                    }
                }
                Frame::Loop(_) => {}
            }
        }
    }

    fn start_main_rung(&mut self) {
        let index = self.main_index;
        self.main_index += 1;
        let loc = RungLoc {
            scope: Scope::Main,
            index,
            branches: Vec::new(),
        };
        let program = self.program.clone();
        let conditions = rung_at(&program, &loc).conditions().to_vec();
        let (enabled, traces) = trace_conditions(self.ctx_mut(), &conditions);
        let state = if enabled {
            EnabledState::Enabled
        } else {
            EnabledState::DisabledLocal
        };
        self.push_rung_frame(
            loc,
            StepKind::Rung,
            index,
            0,
            None,
            Vec::new(),
            enabled,
            state,
            traces,
        );
    }

    fn finish(&mut self) -> Option<Result<ScanStep, EngineError>> {
        self.done = true;
        let ctx = self.ctx.take().expect("scan in progress");
        match self.runner.finish_scan(ctx) {
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }
    }

    // Advance the top rung frame by one item; returns a step to yield,
    // or None to keep spinning.
    fn advance_rung(&mut self) -> Option<Result<ScanStep, EngineError>> {
        let Some(Frame::Rung(frame)) = self.stack.last() else {
            unreachable!("advance_rung on non-rung frame");
        };
        let loc = frame.loc.clone();
        let item_index = frame.item;
        let program = self.program.clone();
        let rung = rung_at(&program, &loc);

        if item_index >= rung.items().len() {
            let Some(Frame::Rung(frame)) = self.stack.pop() else {
                unreachable!();
            };
            if frame.kind != StepKind::Branch || frame.enabled {
                return Some(Ok(self.rung_step(&frame)));
            }
            return None;
        }

        // Claim the item.
        let (enabled, enabled_state, rung_index, depth, subroutine, call_stack, regions) = {
            let Some(Frame::Rung(frame)) = self.stack.last_mut() else {
                unreachable!();
            };
            frame.item += 1;
            (
                frame.enabled,
                frame.enabled_state,
                frame.rung_index,
                frame.depth,
                frame.subroutine.clone(),
                frame.call_stack.clone(),
                frame.regions.clone(),
            )
        };

        match &rung.items()[item_index] {
            ExecItem::Branch(_) => {
                let Some(Frame::Rung(frame)) = self.stack.last() else {
                    unreachable!();
                };
                let (branch_enabled, state, traces) = frame.branch_states[item_index]
                    .clone()
                    .expect("branch state precomputed");
                let mut branch_loc = loc.clone();
                branch_loc.branches.push(item_index);
                self.push_rung_frame(
                    branch_loc,
                    StepKind::Branch,
                    rung_index,
                    depth + 1,
                    subroutine,
                    call_stack,
                    branch_enabled,
                    state,
                    traces,
                );
                None
            }
            ExecItem::Instruction(instr) => self.handle_instruction(
                InstrLoc {
                    rung: loc,
                    item: item_index,
                    children: Vec::new(),
                },
                instr.kind_name(),
                enabled,
                enabled_state,
                rung_index,
                depth,
                regions,
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_instruction(
        &mut self,
        iloc: InstrLoc,
        kind_name: &'static str,
        enabled: bool,
        enabled_state: EnabledState,
        rung_index: usize,
        depth: usize,
        regions: Vec<TraceRegion>,
    ) -> Option<Result<ScanStep, EngineError>> {
        let program = self.program.clone();
        let instr = instr_at(&program, &iloc);
        let (subroutine, call_stack) = match self.stack.last() {
            Some(Frame::Rung(f)) => (f.subroutine.clone(), f.call_stack.clone()),
            Some(Frame::Loop(f)) => (f.subroutine.clone(), f.call_stack.clone()),
            _ => (None, Vec::new()),
        };
        let span = rung_at(&program, &iloc.rung).span();

        match instr {
            Instruction::Call(call) => {
                if !enabled {
                    return None;
                }
                if self.program.subroutine(call.name()).is_none() {
                    self.done = true;
                    return Some(Err(EngineError::MissingSubroutine(call.name().into())));
                }
                let mut next_stack = call_stack.clone();
                next_stack.push(call.name().into());
                let step = self.instruction_step(
                    rung_index,
                    depth,
                    subroutine,
                    call_stack,
                    span,
                    enabled_state,
                    kind_name,
                    regions,
                );
                self.stack.push(Frame::Sub(SubFrame {
                    name: call.name().into(),
                    next: 0,
                    rung_index,
                    depth: depth + 1,
                    call_stack: next_stack,
                }));
                Some(Ok(step))
            }
            Instruction::ForLoop(for_loop) => {
                let slot = for_loop.slot;
                if !enabled {
                    crate::instruction::oneshot_pass(self.ctx_mut(), slot, false, true);
                    return None;
                }
                if !crate::instruction::oneshot_pass(self.ctx_mut(), slot, true, true) {
                    return None;
                }
                let iterations = {
                    let ctx = self.ctx.as_mut().expect("scan in progress");
                    for_loop.iterations(ctx)
                };
                if iterations > 0 {
                    self.stack.push(Frame::Loop(LoopFrame {
                        loc: iloc,
                        iterations,
                        iter: -1,
                        child: 0,
                        rung_index,
                        depth,
                        subroutine,
                        call_stack,
                        regions,
                    }));
                }
                None
            }
            _ => {
                if !enabled && instr.is_inert_when_disabled() {
                    return None;
                }
                let step = self.instruction_step(
                    rung_index,
                    depth,
                    subroutine,
                    call_stack,
                    span,
                    enabled_state,
                    kind_name,
                    regions,
                );
                self.pending = Some(Pending {
                    loc: iloc,
                    enabled,
                });
                Some(Ok(step))
            }
        }
    }

    fn advance_loop(&mut self) -> Option<Result<ScanStep, EngineError>> {
        let (loc, iterations, iter, child, rung_index, depth, regions) = {
            let Some(Frame::Loop(f)) = self.stack.last() else {
                unreachable!("advance_loop on non-loop frame");
            };
            (
                f.loc.clone(),
                f.iterations,
                f.iter,
                f.child,
                f.rung_index,
                f.depth,
                f.regions.clone(),
            )
        };
        let program = self.program.clone();
        let body_len = match instr_at(&program, &loc) {
            Instruction::ForLoop(f) => f.body().len(),
            _ => unreachable!(),
        };

        // Move to the next iteration when the body is exhausted (or on
        // entry, when iter is -1).
        if iter < 0 || child >= body_len {
            let next_iter = iter + 1;
            if next_iter >= iterations || body_len == 0 {
                self.stack.pop();
                return None;
            }
            let idx_tag = match instr_at(&program, &loc) {
                Instruction::ForLoop(f) => f.idx().clone(),
                _ => unreachable!(),
            };
            let idx = store(Scalar::Int(next_iter), idx_tag.tag_type(), Overflow::Clamp)
                .unwrap_or_else(|_| idx_tag.tag_type().default_value());
            let ctx = self.ctx.as_mut().expect("scan in progress");
            if let Err(e) = ctx.set_tag(&idx_tag, idx) {
                self.done = true;
                return Some(Err(e));
            }
            let Some(Frame::Loop(f)) = self.stack.last_mut() else {
                unreachable!();
            };
            f.iter = next_iter;
            f.child = 0;
            return None;
        }

        {
            let Some(Frame::Loop(f)) = self.stack.last_mut() else {
                unreachable!();
            };
            f.child += 1;
        }
        let mut child_loc = loc;
        child_loc.children.push(child);
        let kind_name = instr_at(&program, &child_loc).kind_name();
        self.handle_instruction(
            child_loc,
            kind_name,
            true,
            EnabledState::Enabled,
            rung_index,
            depth,
            regions,
        )
    }

    fn advance_sub(&mut self) -> Option<Result<ScanStep, EngineError>> {
        let (name, next, rung_index, depth, call_stack) = {
            let Some(Frame::Sub(f)) = self.stack.last() else {
                unreachable!("advance_sub on non-sub frame");
            };
            (
                f.name.clone(),
                f.next,
                f.rung_index,
                f.depth,
                f.call_stack.clone(),
            )
        };
        let program = self.program.clone();
        let rungs = program.subroutine(&name).expect("subroutine checked");
        if next >= rungs.len() {
            self.stack.pop();
            return None;
        }
        {
            let Some(Frame::Sub(f)) = self.stack.last_mut() else {
                unreachable!();
            };
            f.next += 1;
        }
        let loc = RungLoc {
            scope: Scope::Sub(name.clone()),
            index: next,
            branches: Vec::new(),
        };
        let conditions = rung_at(&program, &loc).conditions().to_vec();
        let (enabled, traces) = trace_conditions(self.ctx_mut(), &conditions);
        let state = if enabled {
            EnabledState::Enabled
        } else {
            EnabledState::DisabledLocal
        };
        self.push_rung_frame(
            loc,
            StepKind::Subroutine,
            rung_index,
            depth,
            Some(name),
            call_stack,
            enabled,
            state,
            traces,
        );
        None
    }
}

impl Iterator for ScanSteps<'_> {
    type Item = Result<ScanStep, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(pending) = self.pending.take() {
            if let Err(e) = self.exec_pending(pending) {
                self.done = true;
                return Some(Err(e));
            }
        }
        loop {
            if let Some(step) = self.queue.pop_front() {
                return Some(Ok(step));
            }
            if self.stack.is_empty() {
                if self.main_index < self.program.rungs().len() {
                    self.start_main_rung();
                    continue;
                }
                return self.finish();
            }
            let produced = match self.stack.last() {
                Some(Frame::Rung(_)) => self.advance_rung(),
                Some(Frame::Loop(_)) => self.advance_loop(),
                Some(Frame::Sub(_)) => self.advance_sub(),
                None => unreachable!(),
            };
            if let Some(step) = produced {
                return Some(step);
            }
        }
    }
}
