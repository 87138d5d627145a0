//! Generic, policy-free program walker
//!
//! Walks a program's object graph in canonical order — main rungs first,
//! then subroutines sorted by name; conditions before execution items;
//! branches in place — and emits one normalized [`OperandFact`] per rung
//! condition and instruction operand. External portability validators
//! layer their policy on top of these facts; this module makes no policy
//! decisions.

use crate::condition::Condition;
use crate::instruction::{Dest, Instruction, RangeSpec, Source};
use crate::program::Program;
use crate::rung::{ExecItem, Rung};
use crate::tag::Tag;

/// Which rung list a fact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRef {
    /// The main rung list.
    Main,
    /// A named subroutine.
    Subroutine(String),
}

/// Position of a fact within the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactLocation {
    /// Enclosing rung list.
    pub scope: ScopeRef,
    /// Rung index within the scope.
    pub rung_index: usize,
    /// Branch item indices from the rung down to the fact's rung.
    pub branch_trail: Vec<usize>,
    /// Execution-item index, or `None` for rung conditions.
    pub item_index: Option<usize>,
}

/// Normalized operand classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// Direct tag reference.
    Tag,
    /// Literal scalar.
    Literal,
    /// Literal text.
    Text,
    /// Pointer-indirect reference.
    Indirect,
    /// Expression-indirect reference.
    IndirectExpr,
    /// Expression.
    Expression,
    /// Static block range.
    Range,
    /// Scan-time-resolved block range.
    IndirectRange,
    /// Rung or embedded condition.
    Condition,
    /// User callable.
    Callable,
    /// Subroutine name reference.
    SubroutineRef,
}

/// One operand or condition fact.
#[derive(Debug, Clone)]
pub struct OperandFact {
    /// Where the fact sits in the program.
    pub location: FactLocation,
    /// Instruction kind, or `None` for rung conditions.
    pub instruction: Option<&'static str>,
    /// Operand role within the instruction (`"source"`, `"dest"`, ...).
    pub role: &'static str,
    /// Normalized kind.
    pub kind: OperandKind,
    /// Rendered operand text.
    pub rendered: String,
    tags: Vec<Tag>,
}

impl OperandFact {
    /// Every tag the operand touches (pointer tags included).
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// Walk the program and collect every operand and condition fact in
/// canonical traversal order.
pub fn walk_program(program: &Program) -> Vec<OperandFact> {
    let mut walker = Walker { facts: Vec::new() };
    for (index, rung) in program.rungs().iter().enumerate() {
        walker.walk_rung(rung, ScopeRef::Main, index, Vec::new());
    }
    for (name, rungs) in program.subroutines() {
        for (index, rung) in rungs.iter().enumerate() {
            walker.walk_rung(rung, ScopeRef::Subroutine(name.clone()), index, Vec::new());
        }
    }
    walker.facts
}

struct Walker {
    facts: Vec<OperandFact>,
}

impl Walker {
    fn walk_rung(
        &mut self,
        rung: &Rung,
        scope: ScopeRef,
        rung_index: usize,
        branch_trail: Vec<usize>,
    ) {
        for condition in rung.local_conditions() {
            self.push_condition(
                condition,
                FactLocation {
                    scope: scope.clone(),
                    rung_index,
                    branch_trail: branch_trail.clone(),
                    item_index: None,
                },
                None,
            );
        }
        for (item_index, item) in rung.items().iter().enumerate() {
            match item {
                ExecItem::Branch(branch) => {
                    let mut trail = branch_trail.clone();
                    trail.push(item_index);
                    self.walk_rung(branch, scope.clone(), rung_index, trail);
                }
                ExecItem::Instruction(instr) => {
                    let location = FactLocation {
                        scope: scope.clone(),
                        rung_index,
                        branch_trail: branch_trail.clone(),
                        item_index: Some(item_index),
                    };
                    self.walk_instruction(instr, &location);
                }
            }
        }
    }

    fn walk_instruction(&mut self, instr: &Instruction, location: &FactLocation) {
        let kind = instr.kind_name();
        match instr {
            Instruction::Out(i) => self.push_coil(i.target(), location, kind),
            Instruction::Latch(i) => self.push_coil(i.target(), location, kind),
            Instruction::Reset(i) => self.push_coil(i.target(), location, kind),
            Instruction::Copy(i) => {
                self.push_source(i.source(), "source", location, kind);
                self.push_dest(i.dest(), "dest", location, kind);
            }
            Instruction::BlockCopy(i) => {
                self.push_range(i.source(), "source", location, kind);
                self.push_range(i.dest(), "dest", location, kind);
            }
            Instruction::Fill(i) => {
                self.push_source(i.value(), "value", location, kind);
                self.push_range(i.dest(), "dest", location, kind);
            }
            Instruction::PackBits(i) => {
                self.push_range(i.source(), "source", location, kind);
                self.push_tag(i.dest(), "dest", location, kind);
            }
            Instruction::PackWords(i) => {
                self.push_range(i.source(), "source", location, kind);
                self.push_tag(i.dest(), "dest", location, kind);
            }
            Instruction::PackText(i) => {
                self.push_range(i.source(), "source", location, kind);
                self.push_tag(i.dest(), "dest", location, kind);
            }
            Instruction::UnpackBits(i) => {
                self.push_tag(i.source(), "source", location, kind);
                self.push_range(i.dest(), "dest", location, kind);
            }
            Instruction::UnpackWords(i) => {
                self.push_tag(i.source(), "source", location, kind);
                self.push_range(i.dest(), "dest", location, kind);
            }
            Instruction::Math(i) => {
                let mut tags = Vec::new();
                i.expr().collect_tags(&mut tags);
                self.push_fact(
                    location.clone(),
                    Some(kind),
                    "expression",
                    OperandKind::Expression,
                    i.expr().text(),
                    tags,
                );
                self.push_dest(i.dest(), "dest", location, kind);
            }
            Instruction::Search(i) => {
                self.push_source(i.needle(), "value", location, kind);
                self.push_range(i.range(), "range", location, kind);
                self.push_tag(i.result(), "result", location, kind);
                self.push_tag(i.found(), "found", location, kind);
            }
            Instruction::Shift(i) => {
                self.push_range(i.range(), "range", location, kind);
                self.push_condition(i.data(), location.clone(), Some(kind));
                self.push_condition(i.clock(), location.clone(), Some(kind));
                self.push_condition(i.reset_condition(), location.clone(), Some(kind));
            }
            Instruction::Drum(i) => {
                self.push_tag(i.step_tag(), "step", location, kind);
                self.push_tag(i.done(), "done", location, kind);
                for output in i.outputs() {
                    self.push_tag(output, "output", location, kind);
                }
                for step in i.steps() {
                    if let Some(event) = &step.event {
                        self.push_condition(event, location.clone(), Some(kind));
                    }
                    if let Some(preset) = &step.preset {
                        self.push_source(preset, "preset", location, kind);
                    }
                }
                if let Some((condition, target)) = &i.jump {
                    self.push_condition(condition, location.clone(), Some(kind));
                    self.push_source(target, "jump_target", location, kind);
                }
                if let Some(condition) = &i.jog {
                    self.push_condition(condition, location.clone(), Some(kind));
                }
                if let Some(condition) = &i.reset {
                    self.push_condition(condition, location.clone(), Some(kind));
                }
            }
            Instruction::CountUp(i) => {
                self.push_tag(i.done(), "done", location, kind);
                self.push_tag(i.acc(), "acc", location, kind);
                self.push_source(i.setpoint(), "setpoint", location, kind);
                for condition in instr.embedded_conditions() {
                    self.push_condition(condition, location.clone(), Some(kind));
                }
            }
            Instruction::CountDown(i) => {
                self.push_tag(i.done(), "done", location, kind);
                self.push_tag(i.acc(), "acc", location, kind);
                self.push_source(i.setpoint(), "setpoint", location, kind);
                for condition in instr.embedded_conditions() {
                    self.push_condition(condition, location.clone(), Some(kind));
                }
            }
            Instruction::OnDelay(i) => {
                self.push_tag(i.done(), "done", location, kind);
                self.push_tag(i.acc(), "acc", location, kind);
                self.push_source(i.setpoint(), "setpoint", location, kind);
                for condition in instr.embedded_conditions() {
                    self.push_condition(condition, location.clone(), Some(kind));
                }
            }
            Instruction::OffDelay(i) => {
                self.push_tag(i.done(), "done", location, kind);
                self.push_tag(i.acc(), "acc", location, kind);
                self.push_source(i.setpoint(), "setpoint", location, kind);
            }
            Instruction::Call(i) => {
                self.push_fact(
                    location.clone(),
                    Some(kind),
                    "subroutine",
                    OperandKind::SubroutineRef,
                    i.name().into(),
                    Vec::new(),
                );
            }
            Instruction::Return(_) => {}
            Instruction::ForLoop(i) => {
                self.push_source(i.count(), "count", location, kind);
                self.push_tag(i.idx(), "idx", location, kind);
                for child in i.body() {
                    self.walk_instruction(child, location);
                }
            }
            Instruction::RunFunction(i) => {
                self.push_fact(
                    location.clone(),
                    Some(kind),
                    "callable",
                    OperandKind::Callable,
                    "<fn>".into(),
                    Vec::new(),
                );
                for source in i.ins().values() {
                    self.push_source(source, "in", location, kind);
                }
                for tag in i.outs().values() {
                    self.push_tag(tag, "out", location, kind);
                }
            }
        }
    }

    fn push_fact(
        &mut self,
        location: FactLocation,
        instruction: Option<&'static str>,
        role: &'static str,
        kind: OperandKind,
        rendered: String,
        tags: Vec<Tag>,
    ) {
        self.facts.push(OperandFact {
            location,
            instruction,
            role,
            kind,
            rendered,
            tags,
        });
    }

    fn push_condition(
        &mut self,
        condition: &Condition,
        location: FactLocation,
        instruction: Option<&'static str>,
    ) {
        let mut tags = Vec::new();
        condition.collect_tags(&mut tags);
        self.push_fact(
            location,
            instruction,
            "condition",
            OperandKind::Condition,
            condition.text(),
            tags,
        );
    }

    fn push_tag(
        &mut self,
        tag: &Tag,
        role: &'static str,
        location: &FactLocation,
        instruction: &'static str,
    ) {
        self.push_fact(
            location.clone(),
            Some(instruction),
            role,
            OperandKind::Tag,
            tag.name().into(),
            vec![tag.clone()],
        );
    }

    fn push_coil(
        &mut self,
        target: &crate::instruction::CoilTarget,
        location: &FactLocation,
        instruction: &'static str,
    ) {
        let tags = target.tags();
        let (kind, rendered) = match target {
            crate::instruction::CoilTarget::Tag(t) => (OperandKind::Tag, t.name().to_string()),
            crate::instruction::CoilTarget::Range(r) => (
                OperandKind::Range,
                format!("{}[{}:{}]", r.block().name(), r.start(), r.end()),
            ),
        };
        self.push_fact(
            location.clone(),
            Some(instruction),
            "target",
            kind,
            rendered,
            tags,
        );
    }

    fn push_source(
        &mut self,
        source: &Source,
        role: &'static str,
        location: &FactLocation,
        instruction: &'static str,
    ) {
        let (kind, tags) = classify_source(source);
        self.push_fact(
            location.clone(),
            Some(instruction),
            role,
            kind,
            source.text(),
            tags,
        );
    }

    fn push_dest(
        &mut self,
        dest: &Dest,
        role: &'static str,
        location: &FactLocation,
        instruction: &'static str,
    ) {
        let (kind, tags) = match dest {
            Dest::Tag(t) => (OperandKind::Tag, vec![t.clone()]),
            Dest::Indirect(r) => (OperandKind::Indirect, vec![r.pointer().clone()]),
            Dest::IndirectExpr(r) => {
                let mut tags = Vec::new();
                r.expr().collect_tags(&mut tags);
                (OperandKind::IndirectExpr, tags)
            }
        };
        self.push_fact(
            location.clone(),
            Some(instruction),
            role,
            kind,
            dest.text(),
            tags,
        );
    }

    fn push_range(
        &mut self,
        range: &RangeSpec,
        role: &'static str,
        location: &FactLocation,
        instruction: &'static str,
    ) {
        let (kind, tags) = match range {
            RangeSpec::Static(r) => (OperandKind::Range, r.tags()),
            RangeSpec::Dynamic(r) => {
                let mut tags = Vec::new();
                let (lo, hi) = r.bounds();
                lo.collect_tags(&mut tags);
                hi.collect_tags(&mut tags);
                (OperandKind::IndirectRange, tags)
            }
        };
        self.push_fact(
            location.clone(),
            Some(instruction),
            role,
            kind,
            range.text(),
            tags,
        );
    }
}

fn classify_source(source: &Source) -> (OperandKind, Vec<Tag>) {
    match source {
        Source::Lit(_) => (OperandKind::Literal, Vec::new()),
        Source::Str(_) => (OperandKind::Text, Vec::new()),
        Source::Tag(t) => (OperandKind::Tag, vec![t.clone()]),
        Source::Indirect(r) => (OperandKind::Indirect, vec![r.pointer().clone()]),
        Source::IndirectExpr(r) => {
            let mut tags = Vec::new();
            r.expr().collect_tags(&mut tags);
            (OperandKind::IndirectExpr, tags)
        }
        Source::Expr(e) => {
            let mut tags = Vec::new();
            e.collect_tags(&mut tags);
            (OperandKind::Expression, tags)
        }
        Source::AsValue(inner) | Source::AsBinary(inner) | Source::AsAscii(inner) => {
            classify_source(inner)
        }
    }
}
