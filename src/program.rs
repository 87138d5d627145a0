//! Program container and builder
//!
//! A program is an ordered list of top-level rungs plus a name-keyed map
//! of subroutines. The authoring surface is an explicit builder pair
//! ([`ProgramBuilder`] / [`RungBuilder`]): a closure-scoped port of the
//! original context-manager DSL, with `#[track_caller]` capturing source
//! locations for the debugger.

use crate::condition::Condition;
use crate::context::ScanContext;
use crate::error::EngineError;
use crate::instruction::Instruction;
use crate::rung::{ExecItem, Rung, SourceSpan};
use crate::tag::Tag;
use crate::value::TagType;

use itertools::Itertools;
use std::collections::BTreeMap;
use std::panic::Location;

/// Condition-list input for `rung`/`branch`: a single condition, an
/// array, or a vector.
pub trait IntoConditions {
    /// Convert into the ordered condition list.
    fn into_conditions(self) -> Vec<Condition>;
}

impl IntoConditions for Condition {
    fn into_conditions(self) -> Vec<Condition> {
        vec![self]
    }
}

impl IntoConditions for Vec<Condition> {
    fn into_conditions(self) -> Vec<Condition> {
        self
    }
}

impl<const N: usize> IntoConditions for [Condition; N] {
    fn into_conditions(self) -> Vec<Condition> {
        self.into()
    }
}

impl IntoConditions for () {
    fn into_conditions(self) -> Vec<Condition> {
        Vec::new()
    }
}

/// Ladder program: main rungs plus named subroutines.
#[derive(Debug, Clone)]
pub struct Program {
    rungs: Vec<Rung>,
    subroutines: BTreeMap<String, Vec<Rung>>,
    strict: bool,
    edge_tags: Vec<Tag>,
}

impl Program {
    /// Start building a program.
    pub fn builder() -> ProgramBuilder {
        ProgramBuilder {
            rungs: Vec::new(),
            subroutines: BTreeMap::new(),
            strict: true,
            error: None,
        }
    }

    /// Main rungs in authored order.
    pub fn rungs(&self) -> &[Rung] {
        &self.rungs
    }

    /// Subroutine rung lists, keyed by name.
    pub fn subroutines(&self) -> &BTreeMap<String, Vec<Rung>> {
        &self.subroutines
    }

    /// Rung list of one subroutine.
    pub fn subroutine(&self, name: &str) -> Option<&[Rung]> {
        self.subroutines.get(name).map(Vec::as_slice)
    }

    /// Whether strict build validation was enabled.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Tags referenced by edge conditions anywhere in the program; the
    /// runner records their previous-scan values after each scan.
    pub fn edge_tags(&self) -> &[Tag] {
        &self.edge_tags
    }

    /// Evaluate all main rungs in order against a scan context.
    ///
    /// A `return_` at the top level stops its own rung only; it never
    /// surfaces past the program.
    pub fn evaluate(&self, ctx: &mut ScanContext) -> Result<(), EngineError> {
        for rung in &self.rungs {
            let _ = rung.evaluate(ctx, self)?;
        }
        Ok(())
    }
}

/// Builds a [`Program`].
#[derive(Debug)]
pub struct ProgramBuilder {
    rungs: Vec<Rung>,
    subroutines: BTreeMap<String, Vec<Rung>>,
    strict: bool,
    error: Option<EngineError>,
}

impl ProgramBuilder {
    /// Toggle strict build validation (on by default).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Add a main rung: conditions plus a closure filling its items.
    #[track_caller]
    pub fn rung(
        &mut self,
        conditions: impl IntoConditions,
        build: impl FnOnce(&mut RungBuilder),
    ) -> &mut Self {
        let span = SourceSpan::caller(Location::caller());
        let mut rung = Rung::new(conditions.into_conditions(), Some(span));
        let mut rb = RungBuilder { rung: &mut rung };
        build(&mut rb);
        self.rungs.push(rung);
        self
    }

    /// Define a subroutine. Duplicate names are rejected at `build`.
    pub fn subroutine(
        &mut self,
        name: impl Into<String>,
        build: impl FnOnce(&mut SubroutineBuilder),
    ) -> &mut Self {
        let name = name.into();
        if self.subroutines.contains_key(&name) {
            self.error.get_or_insert(EngineError::BadProgram(format!(
                "subroutine '{name}' defined twice"
            )));
            return self;
        }
        let mut sb = SubroutineBuilder { rungs: Vec::new() };
        build(&mut sb);
        self.subroutines.insert(name, sb.rungs);
        self
    }

    /// Finish the program: assign instruction slots, collect edge tags,
    /// and run strict validation.
    pub fn build(self) -> Result<Program, EngineError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut program = Program {
            rungs: self.rungs,
            subroutines: self.subroutines,
            strict: self.strict,
            edge_tags: Vec::new(),
        };

        let mut next_slot = 1u32;
        for rung in &mut program.rungs {
            rung.assign_slots(&mut next_slot);
        }
        for rungs in program.subroutines.values_mut() {
            for rung in rungs {
                rung.assign_slots(&mut next_slot);
            }
        }

        let mut edge_tags = Vec::new();
        for rung in &program.rungs {
            rung.collect_edge_tags(&mut edge_tags);
        }
        for rungs in program.subroutines.values() {
            for rung in rungs {
                rung.collect_edge_tags(&mut edge_tags);
            }
        }
        program.edge_tags = edge_tags
            .into_iter()
            .unique_by(|t| t.name().to_string())
            .collect();

        if program.strict {
            validate(&program)?;
        }
        Ok(program)
    }
}

/// Builds a subroutine's rung list.
#[derive(Debug)]
pub struct SubroutineBuilder {
    rungs: Vec<Rung>,
}

impl SubroutineBuilder {
    /// Add a rung to the subroutine.
    #[track_caller]
    pub fn rung(
        &mut self,
        conditions: impl IntoConditions,
        build: impl FnOnce(&mut RungBuilder),
    ) -> &mut Self {
        let span = SourceSpan::caller(Location::caller());
        let mut rung = Rung::new(conditions.into_conditions(), Some(span));
        let mut rb = RungBuilder { rung: &mut rung };
        build(&mut rb);
        self.rungs.push(rung);
        self
    }
}

/// Fills one rung's execution items.
#[derive(Debug)]
pub struct RungBuilder<'a> {
    rung: &'a mut Rung,
}

impl RungBuilder<'_> {
    /// Append an instruction.
    pub fn push(&mut self, instruction: impl Into<Instruction>) -> &mut Self {
        self.rung
            .items
            .push(ExecItem::Instruction(instruction.into()));
        self
    }

    /// Append a branch: a nested rung whose enable is the parent enable
    /// AND its local conditions. The parent's conditions are prepended so
    /// branch evaluation is self-contained.
    #[track_caller]
    pub fn branch(
        &mut self,
        conditions: impl IntoConditions,
        build: impl FnOnce(&mut RungBuilder),
    ) -> &mut Self {
        let span = SourceSpan::caller(Location::caller());
        let inherited = self.rung.conditions.clone();
        let offset = inherited.len();
        let mut all = inherited;
        all.extend(conditions.into_conditions());
        let mut branch = Rung::new(all, Some(span));
        branch.branch_condition_start = offset;
        let mut rb = RungBuilder { rung: &mut branch };
        build(&mut rb);
        self.rung.items.push(ExecItem::Branch(branch));
        self
    }
}

fn validate(program: &Program) -> Result<(), EngineError> {
    // One name, one type: conflicting re-declarations are authoring bugs.
    let mut types: BTreeMap<String, TagType> = BTreeMap::new();
    for fact in crate::walker::walk_program(program) {
        for tag in fact.tags() {
            match types.get(tag.name()) {
                Some(seen) if *seen != tag.tag_type() => {
                    return Err(EngineError::BadProgram(format!(
                        "tag '{}' used as both {seen} and {}",
                        tag.name(),
                        tag.tag_type()
                    )));
                }
                _ => {
                    types.insert(tag.name().to_string(), tag.tag_type());
                }
            }
        }
    }

    for rung in program
        .rungs
        .iter()
        .chain(program.subroutines.values().flatten())
    {
        validate_rung(rung)?;
    }
    Ok(())
}

fn validate_rung(rung: &Rung) -> Result<(), EngineError> {
    for item in rung.items() {
        match item {
            ExecItem::Branch(branch) => validate_rung(branch)?,
            ExecItem::Instruction(instr) => validate_instruction(instr)?,
        }
    }
    Ok(())
}

fn validate_instruction(instr: &Instruction) -> Result<(), EngineError> {
    use crate::instruction::pack_capacity;

    match instr {
        Instruction::BlockCopy(i) => {
            if let (Some(source), Some(dest)) = (i.source().static_len(), i.dest().static_len()) {
                if source != dest {
                    return Err(EngineError::LengthMismatch { src_len: source, dest });
                }
            }
        }
        Instruction::PackBits(i) => {
            let width = pack_capacity(i.dest().tag_type());
            if let Some(bits) = i.source().static_len() {
                if bits > width {
                    return Err(EngineError::BadProgram(format!(
                        "pack_bits range of {bits} bits exceeds destination width {width}"
                    )));
                }
            }
        }
        Instruction::UnpackBits(i) => {
            let width = pack_capacity(i.source().tag_type());
            if let Some(bits) = i.dest().static_len() {
                if bits > width {
                    return Err(EngineError::BadProgram(format!(
                        "unpack_bits range of {bits} bits exceeds source width {width}"
                    )));
                }
            }
        }
        Instruction::PackWords(i) => {
            if i.source().static_len().is_some_and(|len| len != 2) {
                return Err(EngineError::BadProgram(
                    "pack_words source range must span exactly two words".into(),
                ));
            }
        }
        Instruction::UnpackWords(i) => {
            if i.dest().static_len().is_some_and(|len| len != 2) {
                return Err(EngineError::BadProgram(
                    "unpack_words destination range must span exactly two words".into(),
                ));
            }
        }
        Instruction::ForLoop(i) => {
            for child in i.body() {
                validate_instruction(child)?;
            }
        }
        _ => {}
    }
    Ok(())
}
