//! Instruction set
//!
//! Terminal behaviors executed by enabled (and, for stateful
//! instructions, disabled) rungs. Every instruction exposes
//! `execute(ctx, enabled, program)` returning an [`ExecuteState`] and an
//! `is_inert_when_disabled` flag: inert instructions are skipped entirely
//! while their rung is false, stateful ones still run so they can reset,
//! decay, or clear oneshot latches.
//!
//! Instruction-level faults set fault bits and skip the write; they never
//! unwind the scan. Programming errors (missing subroutine, length
//! mismatch) propagate as [`EngineError`].

use crate::block::{BlockRange, IndirectBlockRange, IndirectExprRef, IndirectRef};
use crate::consts::MEM_ONESHOT_PREFIX;
use crate::context::ScanContext;
use crate::error::{EngineError, EvalError, ExecuteState};
use crate::expr::Expr;
use crate::program::Program;
use crate::state::MemValue;
use crate::tag::Tag;
use crate::value::{store, Overflow, Scalar};

mod coil;
mod copy;
mod counter;
mod drum;
mod flow;
mod func;
mod math;
mod search;
mod shift;
mod timer;

pub use coil::{latch, out, reset, CoilTarget, LatchCoil, OutCoil, ResetCoil};
pub use copy::{
    as_ascii, as_binary, as_value, blockcopy, copy, fill, pack_bits, pack_capacity, pack_text,
    pack_words, unpack_bits, unpack_words, BlockCopy, Copy, Fill, PackBits, PackText, PackWords,
    UnpackBits, UnpackWords,
};
pub use counter::{count_down, count_up, CountDown, CountUp};
pub use drum::{drum_event, drum_timed, Drum, DrumKind, DrumStep};
pub use flow::{call, for_loop, return_, CallInstr, ForLoop, ReturnInstr};
pub use func::{run_enabled_function, run_function, FnOuts, FnValues, RunFunction, UserCallable};
pub use math::{math, MathInstr};
pub use search::{search, SearchInstr};
pub use shift::{shift, ShiftInstr};
pub use timer::{off_delay, on_delay, OffDelay, OnDelay, TimeUnit};

/// A value producer for copy/fill/math-style inputs.
#[derive(Debug, Clone)]
pub enum Source {
    /// Literal scalar.
    Lit(Scalar),
    /// Literal text (multi-character needles for `search`).
    Str(String),
    /// Direct tag read.
    Tag(Tag),
    /// Pointer-indirect read.
    Indirect(IndirectRef),
    /// Expression-indirect read.
    IndirectExpr(IndirectExprRef),
    /// Expression evaluation.
    Expr(Expr),
    /// Read the wrapped source as a number even in non-math contexts.
    AsValue(Box<Source>),
    /// Read a char source as its ASCII code.
    AsBinary(Box<Source>),
    /// Read an integer source as an ASCII character.
    AsAscii(Box<Source>),
}

impl From<&Tag> for Source {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Tag> for Source {
    fn from(t: Tag) -> Self {
        Self::Tag(t)
    }
}

impl From<IndirectRef> for Source {
    fn from(r: IndirectRef) -> Self {
        Self::Indirect(r)
    }
}

impl From<IndirectExprRef> for Source {
    fn from(r: IndirectExprRef) -> Self {
        Self::IndirectExpr(r)
    }
}

impl From<Expr> for Source {
    fn from(e: Expr) -> Self {
        Self::Expr(e)
    }
}

impl From<i64> for Source {
    fn from(v: i64) -> Self {
        Self::Lit(Scalar::Int(v))
    }
}

impl From<f64> for Source {
    fn from(v: f64) -> Self {
        Self::Lit(Scalar::Float(v))
    }
}

impl From<bool> for Source {
    fn from(v: bool) -> Self {
        Self::Lit(Scalar::Bool(v))
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s.len() {
            0 => Self::Lit(Scalar::Char(None)),
            1 if s.is_ascii() => Self::Lit(Scalar::Char(Some(s.as_bytes()[0]))),
            _ => Self::Str(s.into()),
        }
    }
}

impl Source {
    /// Evaluate to an intermediate scalar.
    pub fn evaluate(&self, ctx: &ScanContext) -> Result<Scalar, EvalError> {
        match self {
            Self::Lit(s) => Ok(*s),
            Self::Str(s) => Err(EvalError::Coerce {
                found: format!("text {s:?}"),
                target: crate::value::TagType::Char,
            }),
            Self::Tag(t) => Ok(ctx.get_tag(t).scalar()),
            Self::Indirect(r) => {
                let tag = r.resolve(ctx)?;
                Ok(ctx.get_tag(&tag).scalar())
            }
            Self::IndirectExpr(r) => {
                let tag = r.resolve(ctx)?;
                Ok(ctx.get_tag(&tag).scalar())
            }
            Self::Expr(e) => e.evaluate(ctx),
            Self::AsValue(inner) => {
                let v = inner.evaluate(ctx)?;
                Ok(match v {
                    Scalar::Char(c) => Scalar::Int(c.map(|b| b as i64).unwrap_or(0)),
                    Scalar::Bool(b) => Scalar::Int(b as i64),
                    other => other,
                })
            }
            Self::AsBinary(inner) => {
                let v = inner.evaluate(ctx)?;
                Ok(Scalar::Int(v.as_i64()))
            }
            Self::AsAscii(inner) => {
                let v = inner.evaluate(ctx)?;
                let code = v.as_i64();
                if (0..=127).contains(&code) {
                    Ok(Scalar::Char(Some(code as u8)))
                } else {
                    Err(EvalError::Coerce {
                        found: format!("code {code}"),
                        target: crate::value::TagType::Char,
                    })
                }
            }
        }
    }

    /// Rendered form for walkers and traces.
    pub fn text(&self) -> String {
        match self {
            Self::Lit(s) => Expr::Lit(*s).text(),
            Self::Str(s) => format!("{s:?}"),
            Self::Tag(t) => t.name().into(),
            Self::Indirect(r) => r.text(),
            Self::IndirectExpr(r) => r.text(),
            Self::Expr(e) => e.text(),
            Self::AsValue(inner) => format!("as_value({})", inner.text()),
            Self::AsBinary(inner) => format!("as_binary({})", inner.text()),
            Self::AsAscii(inner) => format!("as_ascii({})", inner.text()),
        }
    }
}

/// A write target that may resolve indirectly at scan time.
#[derive(Debug, Clone)]
pub enum Dest {
    /// Direct tag.
    Tag(Tag),
    /// Pointer-indirect tag.
    Indirect(IndirectRef),
    /// Expression-indirect tag.
    IndirectExpr(IndirectExprRef),
}

impl From<&Tag> for Dest {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Tag> for Dest {
    fn from(t: Tag) -> Self {
        Self::Tag(t)
    }
}

impl From<IndirectRef> for Dest {
    fn from(r: IndirectRef) -> Self {
        Self::Indirect(r)
    }
}

impl From<IndirectExprRef> for Dest {
    fn from(r: IndirectExprRef) -> Self {
        Self::IndirectExpr(r)
    }
}

impl Dest {
    /// Resolve to the concrete tag being written.
    pub fn resolve(&self, ctx: &ScanContext) -> Result<Tag, EvalError> {
        match self {
            Self::Tag(t) => Ok(t.clone()),
            Self::Indirect(r) => r.resolve(ctx),
            Self::IndirectExpr(r) => r.resolve(ctx),
        }
    }

    /// Rendered form for walkers and traces.
    pub fn text(&self) -> String {
        match self {
            Self::Tag(t) => t.name().into(),
            Self::Indirect(r) => r.text(),
            Self::IndirectExpr(r) => r.text(),
        }
    }
}

/// A block range operand, static or scan-time resolved.
#[derive(Debug, Clone)]
pub enum RangeSpec {
    /// Bounds fixed at build time.
    Static(BlockRange),
    /// Bounds resolved against the scan context.
    Dynamic(IndirectBlockRange),
}

impl From<BlockRange> for RangeSpec {
    fn from(r: BlockRange) -> Self {
        Self::Static(r)
    }
}

impl From<IndirectBlockRange> for RangeSpec {
    fn from(r: IndirectBlockRange) -> Self {
        Self::Dynamic(r)
    }
}

impl RangeSpec {
    /// Resolve to a concrete range.
    pub fn resolve(&self, ctx: &ScanContext) -> Result<BlockRange, EvalError> {
        match self {
            Self::Static(r) => Ok(r.clone()),
            Self::Dynamic(r) => r.resolve(ctx),
        }
    }

    /// Static length when the bounds are fixed at build time.
    pub fn static_len(&self) -> Option<usize> {
        match self {
            Self::Static(r) => Some(r.len()),
            Self::Dynamic(_) => None,
        }
    }

    /// Rendered form for walkers.
    pub fn text(&self) -> String {
        match self {
            Self::Static(r) => format!("{}[{}:{}]", r.block().name(), r.start(), r.end()),
            Self::Dynamic(r) => format!("{}[..]", r.block().name()),
        }
    }
}

/// One ladder instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Output coil.
    Out(OutCoil),
    /// Latch coil.
    Latch(LatchCoil),
    /// Unlatch coil.
    Reset(ResetCoil),
    /// Single-value copy.
    Copy(Copy),
    /// Range-to-range copy.
    BlockCopy(BlockCopy),
    /// Broadcast fill.
    Fill(Fill),
    /// Pack bools into an integer.
    PackBits(PackBits),
    /// Pack two words into a dword.
    PackWords(PackWords),
    /// Parse a char range into a numeric tag.
    PackText(PackText),
    /// Unpack an integer into bools.
    UnpackBits(UnpackBits),
    /// Unpack a dword into two words.
    UnpackWords(UnpackWords),
    /// Math store.
    Math(MathInstr),
    /// Cursor-driven range search.
    Search(SearchInstr),
    /// Bit shift register.
    Shift(ShiftInstr),
    /// Drum sequencer.
    Drum(Drum),
    /// Up / bidirectional counter.
    CountUp(CountUp),
    /// Down counter.
    CountDown(CountDown),
    /// TON / RTON timer.
    OnDelay(OnDelay),
    /// TOF timer.
    OffDelay(OffDelay),
    /// Subroutine call.
    Call(CallInstr),
    /// Subroutine return.
    Return(ReturnInstr),
    /// Bounded loop over body instructions.
    ForLoop(ForLoop),
    /// User callable invocation.
    RunFunction(RunFunction),
}

impl Instruction {
    /// Stable name used in debugger step events.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Out(_) => "Out",
            Self::Latch(_) => "Latch",
            Self::Reset(_) => "Reset",
            Self::Copy(_) => "Copy",
            Self::BlockCopy(_) => "BlockCopy",
            Self::Fill(_) => "Fill",
            Self::PackBits(_) => "PackBits",
            Self::PackWords(_) => "PackWords",
            Self::PackText(_) => "PackText",
            Self::UnpackBits(_) => "UnpackBits",
            Self::UnpackWords(_) => "UnpackWords",
            Self::Math(_) => "Math",
            Self::Search(_) => "Search",
            Self::Shift(_) => "Shift",
            Self::Drum(_) => "Drum",
            Self::CountUp(_) => "CountUp",
            Self::CountDown(_) => "CountDown",
            Self::OnDelay(_) => "OnDelay",
            Self::OffDelay(_) => "OffDelay",
            Self::Call(_) => "Call",
            Self::Return(_) => "Return",
            Self::ForLoop(_) => "ForLoop",
            Self::RunFunction(_) => "RunFunction",
        }
    }

    /// Whether the instruction can be skipped outright while its rung is
    /// false. Stateful instructions must still observe the disabled scan.
    pub fn is_inert_when_disabled(&self) -> bool {
        match self {
            Self::Out(i) => !i.oneshot,
            Self::Latch(_) | Self::Reset(_) => true,
            Self::Copy(i) => !i.oneshot,
            Self::BlockCopy(_) | Self::Fill(_) => true,
            Self::PackBits(_) | Self::PackWords(_) | Self::PackText(_) => true,
            Self::UnpackBits(_) | Self::UnpackWords(_) => true,
            Self::Math(i) => !i.oneshot,
            Self::Search(_) => true,
            Self::Shift(_) | Self::Drum(_) => false,
            Self::CountUp(_) | Self::CountDown(_) => false,
            Self::OnDelay(_) | Self::OffDelay(_) => false,
            Self::Call(_) | Self::Return(_) => true,
            Self::ForLoop(_) => false,
            Self::RunFunction(i) => i.is_inert_when_disabled(),
        }
    }

    /// Execute against the scan context.
    pub fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
        program: &Program,
    ) -> Result<ExecuteState, EngineError> {
        match self {
            Self::Out(i) => i.execute(ctx, enabled),
            Self::Latch(i) => i.execute(ctx, enabled),
            Self::Reset(i) => i.execute(ctx, enabled),
            Self::Copy(i) => i.execute(ctx, enabled),
            Self::BlockCopy(i) => i.execute(ctx, enabled),
            Self::Fill(i) => i.execute(ctx, enabled),
            Self::PackBits(i) => i.execute(ctx, enabled),
            Self::PackWords(i) => i.execute(ctx, enabled),
            Self::PackText(i) => i.execute(ctx, enabled),
            Self::UnpackBits(i) => i.execute(ctx, enabled),
            Self::UnpackWords(i) => i.execute(ctx, enabled),
            Self::Math(i) => i.execute(ctx, enabled),
            Self::Search(i) => i.execute(ctx, enabled),
            Self::Shift(i) => i.execute(ctx, enabled),
            Self::Drum(i) => i.execute(ctx, enabled),
            Self::CountUp(i) => i.execute(ctx, enabled),
            Self::CountDown(i) => i.execute(ctx, enabled),
            Self::OnDelay(i) => i.execute(ctx, enabled),
            Self::OffDelay(i) => i.execute(ctx, enabled),
            Self::Call(i) => i.execute(ctx, enabled, program),
            Self::Return(i) => i.execute(ctx, enabled),
            Self::ForLoop(i) => i.execute(ctx, enabled, program),
            Self::RunFunction(i) => i.execute(ctx, enabled),
        }
    }

    /// Conditions embedded in the instruction itself (counter legs,
    /// timer resets, shift clocks, drum triggers), for edge-tag
    /// collection and the portability walker.
    pub fn embedded_conditions(&self) -> Vec<&crate::condition::Condition> {
        let mut out = Vec::new();
        match self {
            Self::CountUp(i) => {
                out.extend(i.down.iter());
                out.extend(i.reset.iter());
            }
            Self::CountDown(i) => out.extend(i.reset.iter()),
            Self::OnDelay(i) => out.extend(i.reset.iter()),
            Self::Shift(i) => {
                out.push(&i.data);
                out.push(&i.clock);
                out.push(&i.reset);
            }
            Self::Drum(i) => {
                if let Some((cond, _)) = &i.jump {
                    out.push(cond);
                }
                out.extend(i.jog.iter());
                out.extend(i.reset.iter());
                for step in &i.steps {
                    out.extend(step.event.iter());
                }
            }
            Self::ForLoop(i) => {
                for child in &i.body {
                    out.extend(child.embedded_conditions());
                }
            }
            _ => {}
        }
        out
    }

    pub(crate) fn assign_slots(&mut self, next: &mut u32) {
        let slot = *next;
        *next += 1;
        match self {
            Self::Out(i) => i.slot = slot,
            Self::Copy(i) => i.slot = slot,
            Self::Math(i) => i.slot = slot,
            Self::Shift(i) => i.slot = slot,
            Self::Drum(i) => i.slot = slot,
            Self::OnDelay(i) => i.slot = slot,
            Self::OffDelay(i) => i.slot = slot,
            Self::RunFunction(i) => i.slot = slot,
            Self::ForLoop(i) => {
                i.slot = slot;
                for child in &mut i.body {
                    child.assign_slots(next);
                }
            }
            _ => {}
        }
    }
}

/// Evaluate a recoverable step; on failure raise the fault and return
/// `None` (the instruction skips its write).
pub(crate) fn fault_guard<T>(ctx: &mut ScanContext, res: Result<T, EvalError>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            ctx.raise_fault(e.fault());
            None
        }
    }
}

/// Coerce and stage a write. Coercion failures raise a fault and skip;
/// read-only violations propagate as hard errors.
pub(crate) fn store_to_tag(
    ctx: &mut ScanContext,
    tag: &Tag,
    scalar: Scalar,
    overflow: Overflow,
) -> Result<bool, EngineError> {
    match store(scalar, tag.tag_type(), overflow) {
        Ok(value) => {
            ctx.set_tag(tag, value)?;
            Ok(true)
        }
        Err(e) => {
            ctx.raise_fault(e.fault());
            Ok(false)
        }
    }
}

/// Oneshot gate shared by `out`, `copy`, `math`, and `run_function`.
///
/// Returns whether the action fires this scan; maintains the per-slot
/// latch in scan memory so the action runs once per rising enable.
pub(crate) fn oneshot_pass(
    ctx: &mut ScanContext,
    slot: u32,
    enabled: bool,
    oneshot: bool,
) -> bool {
    if !oneshot {
        return enabled;
    }
    let key = format!("{MEM_ONESHOT_PREFIX}{slot}");
    let latched = ctx.get_memory(&key).map(|m| m.as_bool()).unwrap_or(false);
    if enabled {
        if latched {
            false
        } else {
            ctx.set_memory(key, MemValue::Bool(true));
            true
        }
    } else {
        if latched {
            ctx.set_memory(key, MemValue::Bool(false));
        }
        false
    }
}

/// Resolve a literal-or-tag setpoint each scan.
pub(crate) fn resolve_setpoint(ctx: &ScanContext, sp: &Source) -> Result<i64, EvalError> {
    sp.evaluate(ctx).map(|s| s.as_i64())
}
