//! Data movement: copy, blockcopy, fill, pack/unpack

use super::{fault_guard, oneshot_pass, store_to_tag, Dest, RangeSpec, Source};
use crate::block::BlockRange;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState, Fault};
use crate::tag::Tag;
use crate::value::{Overflow, Scalar, TagType, Value};

/// Read the wrapped source as a number even in non-math contexts.
pub fn as_value(source: impl Into<Source>) -> Source {
    Source::AsValue(Box::new(source.into()))
}

/// Treat a char source as its ASCII code.
pub fn as_binary(source: impl Into<Source>) -> Source {
    Source::AsBinary(Box::new(source.into()))
}

/// Treat an integer source as an ASCII character.
pub fn as_ascii(source: impl Into<Source>) -> Source {
    Source::AsAscii(Box::new(source.into()))
}

/// Single-value copy with type coercion on store.
#[derive(Debug, Clone)]
pub struct Copy {
    pub(crate) source: Source,
    pub(crate) dest: Dest,
    pub(crate) oneshot: bool,
    pub(crate) slot: u32,
}

impl Copy {
    /// Restrict to one copy per rising enable.
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
        let Some(value) = fault_guard(ctx, self.source.evaluate(ctx)) else {
            return Ok(ExecuteState::Proceed);
        };
        let Some(target) = fault_guard(ctx, self.dest.resolve(ctx)) else {
            return Ok(ExecuteState::Proceed);
        };
        store_to_tag(ctx, &target, value, Overflow::Clamp)?;
        Ok(ExecuteState::Proceed)
    }

    /// Source operand.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Destination operand.
    pub fn dest(&self) -> &Dest {
        &self.dest
    }
}

impl From<Copy> for super::Instruction {
    fn from(i: Copy) -> Self {
        Self::Copy(i)
    }
}

/// Copy a source value into a destination tag.
pub fn copy(source: impl Into<Source>, dest: impl Into<Dest>) -> Copy {
    Copy {
        source: source.into(),
        dest: dest.into(),
        oneshot: false,
        slot: 0,
    }
}

/// Range-to-range copy with overlap-safe iteration order.
#[derive(Debug, Clone)]
pub struct BlockCopy {
    pub(crate) source: RangeSpec,
    pub(crate) dest: RangeSpec,
}

impl BlockCopy {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let (source, dest) = match (self.source.resolve(ctx), self.dest.resolve(ctx)) {
            (Ok(s), Ok(d)) => (s, d),
            _ => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        if source.len() != dest.len() {
            return Err(EngineError::LengthMismatch {
                src_len: source.len(),
                dest: dest.len(),
            });
        }

        let mut src_addrs = source.addresses();
        let mut dst_addrs = dest.addresses();
        if copy_in_reverse(&source, &dest) {
            src_addrs.reverse();
            dst_addrs.reverse();
        }

        for (sa, da) in src_addrs.into_iter().zip(dst_addrs) {
            let from = source.block().tag_unchecked(sa);
            let to = dest.block().tag_unchecked(da);
            let value = ctx.get_tag(&from).scalar();
            if !store_to_tag(ctx, &to, value, Overflow::Clamp)? {
                break;
            }
        }
        Ok(ExecuteState::Proceed)
    }

    /// Source range operand.
    pub fn source(&self) -> &RangeSpec {
        &self.source
    }

    /// Destination range operand.
    pub fn dest(&self) -> &RangeSpec {
        &self.dest
    }
}

// Overlapping ascending windows in the same block copy back-to-front when
// the destination starts above the source, so each element is read before
// it is overwritten. Explicitly reversed ranges keep their authored order.
fn copy_in_reverse(source: &BlockRange, dest: &BlockRange) -> bool {
    if source.is_reversed() || dest.is_reversed() {
        return false;
    }
    if source.block() != dest.block() {
        return false;
    }
    let overlap = source.start() <= dest.end() && dest.start() <= source.end();
    overlap && dest.start() > source.start()
}

impl From<BlockCopy> for super::Instruction {
    fn from(i: BlockCopy) -> Self {
        Self::BlockCopy(i)
    }
}

/// Copy one range onto another of the same length.
pub fn blockcopy(source: impl Into<RangeSpec>, dest: impl Into<RangeSpec>) -> BlockCopy {
    BlockCopy {
        source: source.into(),
        dest: dest.into(),
    }
}

/// Broadcast one value to every address in a range.
#[derive(Debug, Clone)]
pub struct Fill {
    pub(crate) value: Source,
    pub(crate) dest: RangeSpec,
}

impl Fill {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let Some(value) = fault_guard(ctx, self.value.evaluate(ctx)) else {
            return Ok(ExecuteState::Proceed);
        };
        let dest = match self.dest.resolve(ctx) {
            Ok(d) => d,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        for tag in dest.tags() {
            if !store_to_tag(ctx, &tag, value, Overflow::Clamp)? {
                break;
            }
        }
        Ok(ExecuteState::Proceed)
    }

    /// Fill value operand.
    pub fn value(&self) -> &Source {
        &self.value
    }

    /// Destination range operand.
    pub fn dest(&self) -> &RangeSpec {
        &self.dest
    }
}

impl From<Fill> for super::Instruction {
    fn from(i: Fill) -> Self {
        Self::Fill(i)
    }
}

/// Fill a range with one coerced value.
pub fn fill(value: impl Into<Source>, dest: impl Into<RangeSpec>) -> Fill {
    Fill {
        value: value.into(),
        dest: dest.into(),
    }
}

/// Bit capacity of an integer type for the pack/unpack family.
pub fn pack_capacity(ty: TagType) -> usize {
    match ty {
        TagType::Dint => 32,
        _ => 16,
    }
}

/// Pack a bool range, little-endian, into an integer tag.
#[derive(Debug, Clone)]
pub struct PackBits {
    pub(crate) source: RangeSpec,
    pub(crate) dest: Tag,
}

impl PackBits {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let source = match self.source.resolve(ctx) {
            Ok(s) => s,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let width = pack_capacity(self.dest.tag_type());
        let mut packed: i64 = 0;
        for (i, tag) in source.tags().into_iter().enumerate().take(width) {
            if ctx.get_tag(&tag).truthy() {
                packed |= 1 << i;
            }
        }
        store_to_tag(ctx, &self.dest, Scalar::Int(packed), Overflow::Wrap)?;
        Ok(ExecuteState::Proceed)
    }

    /// Source range operand.
    pub fn source(&self) -> &RangeSpec {
        &self.source
    }

    /// Destination tag.
    pub fn dest(&self) -> &Tag {
        &self.dest
    }
}

impl From<PackBits> for super::Instruction {
    fn from(i: PackBits) -> Self {
        Self::PackBits(i)
    }
}

/// Pack up to 16 (Int/Word) or 32 (Dint) bools into an integer tag.
pub fn pack_bits(source: impl Into<RangeSpec>, dest: &Tag) -> PackBits {
    PackBits {
        source: source.into(),
        dest: dest.clone(),
    }
}

/// Pack two words into a dword: `(hi << 16) | (lo & 0xFFFF)`.
#[derive(Debug, Clone)]
pub struct PackWords {
    pub(crate) source: RangeSpec,
    pub(crate) dest: Tag,
}

impl PackWords {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let source = match self.source.resolve(ctx) {
            Ok(s) => s,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let tags = source.tags();
        if tags.len() != 2 {
            ctx.raise_fault(Fault::OutOfRange);
            return Ok(ExecuteState::Proceed);
        }
        let lo = ctx.get_tag(&tags[0]).scalar().as_i64() & 0xFFFF;
        let hi = ctx.get_tag(&tags[1]).scalar().as_i64() & 0xFFFF;
        store_to_tag(ctx, &self.dest, Scalar::Int((hi << 16) | lo), Overflow::Wrap)?;
        Ok(ExecuteState::Proceed)
    }

    /// Source range operand.
    pub fn source(&self) -> &RangeSpec {
        &self.source
    }

    /// Destination tag.
    pub fn dest(&self) -> &Tag {
        &self.dest
    }
}

impl From<PackWords> for super::Instruction {
    fn from(i: PackWords) -> Self {
        Self::PackWords(i)
    }
}

/// Pack a `[lo, hi]` word pair into a dword tag.
pub fn pack_words(source: impl Into<RangeSpec>, dest: &Tag) -> PackWords {
    PackWords {
        source: source.into(),
        dest: dest.clone(),
    }
}

/// Parse a char range as text into a numeric tag.
#[derive(Debug, Clone)]
pub struct PackText {
    pub(crate) source: RangeSpec,
    pub(crate) dest: Tag,
}

impl PackText {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let source = match self.source.resolve(ctx) {
            Ok(s) => s,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let mut text = String::new();
        for tag in source.tags() {
            if let Value::Char(Some(b)) = ctx.get_tag(&tag) {
                text.push(b as char);
            }
        }
        let text = text.trim();

        // Parse failure is a silent no-op.
        let parsed = match self.dest.tag_type() {
            TagType::Word => i64::from_str_radix(text, 16).ok().map(Scalar::Int),
            TagType::Real => text.parse::<f64>().ok().map(Scalar::Float),
            _ => text.parse::<i64>().ok().map(Scalar::Int),
        };
        if let Some(value) = parsed {
            store_to_tag(ctx, &self.dest, value, Overflow::Clamp)?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// Source range operand.
    pub fn source(&self) -> &RangeSpec {
        &self.source
    }

    /// Destination tag.
    pub fn dest(&self) -> &Tag {
        &self.dest
    }
}

impl From<PackText> for super::Instruction {
    fn from(i: PackText) -> Self {
        Self::PackText(i)
    }
}

/// Concatenate a char range, trim whitespace, and parse into `dest`
/// (decimal for Int/Dint, hex for Word, float for Real).
pub fn pack_text(source: impl Into<RangeSpec>, dest: &Tag) -> PackText {
    PackText {
        source: source.into(),
        dest: dest.clone(),
    }
}

/// Unpack an integer tag into a bool range, little-endian.
#[derive(Debug, Clone)]
pub struct UnpackBits {
    pub(crate) source: Tag,
    pub(crate) dest: RangeSpec,
}

impl UnpackBits {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let dest = match self.dest.resolve(ctx) {
            Ok(d) => d,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let pattern = bit_pattern(ctx.get_tag(&self.source));
        let width = pack_capacity(self.source.tag_type());
        for (i, tag) in dest.tags().into_iter().enumerate().take(width) {
            let bit = (pattern >> i) & 1 == 1;
            ctx.set_tag(&tag, Value::Bool(bit))?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// Source tag.
    pub fn source(&self) -> &Tag {
        &self.source
    }

    /// Destination range operand.
    pub fn dest(&self) -> &RangeSpec {
        &self.dest
    }
}

fn bit_pattern(value: Value) -> u64 {
    match value {
        Value::Int(v) => v as u16 as u64,
        Value::Dint(v) => v as u32 as u64,
        Value::Word(v) => v as u64,
        other => other.scalar().as_i64() as u64,
    }
}

impl From<UnpackBits> for super::Instruction {
    fn from(i: UnpackBits) -> Self {
        Self::UnpackBits(i)
    }
}

/// Unpack an integer tag's bits into a bool range.
pub fn unpack_bits(source: &Tag, dest: impl Into<RangeSpec>) -> UnpackBits {
    UnpackBits {
        source: source.clone(),
        dest: dest.into(),
    }
}

/// Unpack a dword tag into a `[lo, hi]` word pair.
#[derive(Debug, Clone)]
pub struct UnpackWords {
    pub(crate) source: Tag,
    pub(crate) dest: RangeSpec,
}

impl UnpackWords {
    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let dest = match self.dest.resolve(ctx) {
            Ok(d) => d,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let tags = dest.tags();
        if tags.len() != 2 {
            ctx.raise_fault(Fault::OutOfRange);
            return Ok(ExecuteState::Proceed);
        }
        let raw = ctx.get_tag(&self.source).scalar().as_i64() as u32;
        let lo = (raw & 0xFFFF) as i64;
        let hi = (raw >> 16) as i64;
        store_to_tag(ctx, &tags[0], Scalar::Int(lo), Overflow::Wrap)?;
        store_to_tag(ctx, &tags[1], Scalar::Int(hi), Overflow::Wrap)?;
        Ok(ExecuteState::Proceed)
    }

    /// Source tag.
    pub fn source(&self) -> &Tag {
        &self.source
    }

    /// Destination range operand.
    pub fn dest(&self) -> &RangeSpec {
        &self.dest
    }
}

impl From<UnpackWords> for super::Instruction {
    fn from(i: UnpackWords) -> Self {
        Self::UnpackWords(i)
    }
}

/// Unpack a dword tag into a word range: low word, then high word.
pub fn unpack_words(source: &Tag, dest: impl Into<RangeSpec>) -> UnpackWords {
    UnpackWords {
        source: source.clone(),
        dest: dest.into(),
    }
}
