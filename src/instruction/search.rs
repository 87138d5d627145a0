//! Cursor-driven range search

use super::{RangeSpec, Source};
use crate::condition::CmpOp;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState, Fault};
use crate::tag::Tag;
use crate::value::{Scalar, TagType, Value};

/// Scan a range for the first element matching a relation, resuming from
/// a cursor held in the result tag.
///
/// Cursor contract: `0` starts at the first element, `-1` means the
/// search completed (the instruction re-stores `-1`/false until the
/// cursor tag is rewritten), any other value resumes at the first element
/// strictly after that address. On a match, the matching address lands in
/// the result tag and the found bit goes true; with no match, `-1` and
/// false.
#[derive(Debug, Clone)]
pub struct SearchInstr {
    pub(crate) needle: Source,
    pub(crate) range: RangeSpec,
    pub(crate) op: CmpOp,
    pub(crate) result: Tag,
    pub(crate) found: Tag,
}

impl SearchInstr {
    /// Override the relation (default equality).
    pub fn op(mut self, op: CmpOp) -> Self {
        self.op = op;
        self
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }

        let cursor = ctx.get_tag(&self.result).scalar().as_i64();
        if cursor == -1 {
            self.finish(ctx, None)?;
            return Ok(ExecuteState::Proceed);
        }

        let range = match self.range.resolve(ctx) {
            Ok(r) => r,
            Err(_) => {
                ctx.raise_fault(Fault::OutOfRange);
                return Ok(ExecuteState::Proceed);
            }
        };
        let addrs = range.addresses();
        let from = addrs
            .iter()
            .position(|&a| a > cursor)
            .unwrap_or(addrs.len());
        let window = &addrs[if cursor == 0 { 0 } else { from }..];

        let hit = if range.block().tag_type() == TagType::Char {
            self.match_text(ctx, &range, window)
        } else {
            self.match_values(ctx, &range, window)
        };
        let hit = match hit {
            Ok(h) => h,
            Err(e) => {
                ctx.raise_fault(e.fault());
                return Ok(ExecuteState::Proceed);
            }
        };
        self.finish(ctx, hit)?;
        Ok(ExecuteState::Proceed)
    }

    fn match_values(
        &self,
        ctx: &ScanContext,
        range: &crate::block::BlockRange,
        window: &[i64],
    ) -> Result<Option<i64>, crate::error::EvalError> {
        let needle = self.needle.evaluate(ctx)?;
        for &addr in window {
            let value = ctx.get_tag(&range.block().tag_unchecked(addr)).scalar();
            if self.op.holds(value.numeric_cmp(&needle)) {
                return Ok(Some(addr));
            }
        }
        Ok(None)
    }

    // Char ranges support multi-character needles by windowed string
    // equality over the flat iteration order; the matched address is the
    // window start.
    fn match_text(
        &self,
        ctx: &ScanContext,
        range: &crate::block::BlockRange,
        window: &[i64],
    ) -> Result<Option<i64>, crate::error::EvalError> {
        let needle = match &self.needle {
            Source::Str(s) => s.clone(),
            other => match other.evaluate(ctx)? {
                Scalar::Char(Some(b)) => (b as char).to_string(),
                Scalar::Char(None) => String::new(),
                v => v.as_i64().to_string(),
            },
        };
        if needle.is_empty() || needle.len() > window.len() {
            return Ok(None);
        }
        let chars: Vec<char> = window
            .iter()
            .map(|&a| match ctx.get_tag(&range.block().tag_unchecked(a)) {
                Value::Char(Some(b)) => b as char,
                _ => '\0',
            })
            .collect();
        let needle_chars: Vec<char> = needle.chars().collect();
        for start in 0..=(chars.len() - needle_chars.len()) {
            if chars[start..start + needle_chars.len()] == needle_chars[..] {
                return Ok(Some(window[start]));
            }
        }
        Ok(None)
    }

    fn finish(&self, ctx: &mut ScanContext, hit: Option<i64>) -> Result<(), EngineError> {
        match hit {
            Some(addr) => {
                super::store_to_tag(
                    ctx,
                    &self.result,
                    Scalar::Int(addr),
                    crate::value::Overflow::Clamp,
                )?;
                ctx.set_tag(&self.found, Value::Bool(true))?;
            }
            None => {
                super::store_to_tag(
                    ctx,
                    &self.result,
                    Scalar::Int(-1),
                    crate::value::Overflow::Clamp,
                )?;
                ctx.set_tag(&self.found, Value::Bool(false))?;
            }
        }
        Ok(())
    }

    /// Needle operand.
    pub fn needle(&self) -> &Source {
        &self.needle
    }

    /// Range operand.
    pub fn range(&self) -> &RangeSpec {
        &self.range
    }

    /// Result (cursor) tag.
    pub fn result(&self) -> &Tag {
        &self.result
    }

    /// Found bit tag.
    pub fn found(&self) -> &Tag {
        &self.found
    }
}

impl From<SearchInstr> for super::Instruction {
    fn from(i: SearchInstr) -> Self {
        Self::Search(i)
    }
}

/// Search `range` for `needle`, resuming from the cursor in `result`.
pub fn search(
    needle: impl Into<Source>,
    range: impl Into<RangeSpec>,
    result: &Tag,
    found: &Tag,
) -> SearchInstr {
    SearchInstr {
        needle: needle.into(),
        range: range.into(),
        op: CmpOp::Eq,
        result: result.clone(),
        found: found.clone(),
    }
}
