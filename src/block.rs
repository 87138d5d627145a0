//! Typed address windows and indirect addressing
//!
//! A [`Block`] is a factory for tags over a 1-based inclusive address
//! window sharing one type. Indirect references defer address resolution
//! to scan time; block ranges feed the block-copy family of instructions.

use crate::context::ScanContext;
use crate::error::{EngineError, EvalError};
use crate::expr::Expr;
use crate::tag::{Tag, TagKind};
use crate::value::TagType;

use std::fmt;
use std::sync::Arc;

type Formatter = dyn Fn(&str, i64) -> String + Send + Sync;

struct BlockInner {
    name: String,
    ty: TagType,
    start: i64,
    end: i64,
    retentive: bool,
    kind: TagKind,
    valid_ranges: Option<Vec<(i64, i64)>>,
    formatter: Option<Box<Formatter>>,
}

/// A typed window of tags with 1-based inclusive bounds.
#[derive(Clone)]
pub struct Block {
    inner: Arc<BlockInner>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.inner.name)
            .field("type", &self.inner.ty)
            .field("start", &self.inner.start)
            .field("end", &self.inner.end)
            .finish()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Block {
    /// Plain memory block over `[start, end]`.
    ///
    /// # Panics
    ///
    /// Panics if `start < 1` or `end < start`; block geometry is an
    /// authoring-time concern.
    pub fn new(name: impl Into<String>, ty: TagType, start: i64, end: i64) -> Self {
        assert!(start >= 1, "block start must be >= 1");
        assert!(end >= start, "block end must be >= start");
        Self {
            inner: Arc::new(BlockInner {
                name: name.into(),
                ty,
                start,
                end,
                retentive: false,
                kind: TagKind::Plain,
                valid_ranges: None,
                formatter: None,
            }),
        }
    }

    /// Input-image block: tags carry `TagKind::Input` and are never
    /// retentive.
    pub fn input(name: impl Into<String>, ty: TagType, start: i64, end: i64) -> Self {
        let mut b = Self::new(name, ty, start, end);
        Arc::get_mut(&mut b.inner).map(|i| i.kind = TagKind::Input);
        b
    }

    /// Output-image block: tags carry `TagKind::Output` and are never
    /// retentive.
    pub fn output(name: impl Into<String>, ty: TagType, start: i64, end: i64) -> Self {
        let mut b = Self::new(name, ty, start, end);
        Arc::get_mut(&mut b.inner).map(|i| i.kind = TagKind::Output);
        b
    }

    /// Default retention flag for tags minted from this block.
    pub fn retentive(mut self, retentive: bool) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("block not yet shared");
        if inner.kind == TagKind::Plain {
            inner.retentive = retentive;
        }
        self
    }

    /// Restrict the window to sparse valid segments (inclusive pairs).
    ///
    /// # Panics
    ///
    /// Panics if a segment is inverted or leaves the window.
    pub fn valid_ranges(mut self, ranges: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("block not yet shared");
        let ranges: Vec<_> = ranges.into_iter().collect();
        for &(lo, hi) in &ranges {
            assert!(lo <= hi, "valid range segment must have lo <= hi");
            assert!(
                lo >= inner.start && hi <= inner.end,
                "valid range segment must be within the block window"
            );
        }
        inner.valid_ranges = Some(ranges);
        self
    }

    /// Override the `{name}{addr}` tag-name formatter.
    pub fn address_formatter(
        mut self,
        f: impl Fn(&str, i64) -> String + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::get_mut(&mut self.inner).expect("block not yet shared");
        inner.formatter = Some(Box::new(f));
        self
    }

    /// Block prefix.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Shared type of every tag in the window.
    pub fn tag_type(&self) -> TagType {
        self.inner.ty
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> i64 {
        self.inner.start
    }

    /// Inclusive upper bound.
    pub fn end(&self) -> i64 {
        self.inner.end
    }

    fn format_tag_name(&self, addr: i64) -> String {
        match &self.inner.formatter {
            Some(f) => f(&self.inner.name, addr),
            None => format!("{}{}", self.inner.name, addr),
        }
    }

    fn sparse_valid(&self, addr: i64) -> bool {
        match &self.inner.valid_ranges {
            None => true,
            Some(ranges) => ranges.iter().any(|&(lo, hi)| lo <= addr && addr <= hi),
        }
    }

    pub(crate) fn validate_address(&self, addr: i64) -> Result<(), EvalError> {
        if addr >= self.inner.start && addr <= self.inner.end && self.sparse_valid(addr) {
            Ok(())
        } else {
            Err(EvalError::BadAddress {
                block: self.inner.name.clone(),
                addr,
            })
        }
    }

    pub(crate) fn tag_unchecked(&self, addr: i64) -> Tag {
        Tag::new(
            self.format_tag_name(addr),
            self.inner.ty,
            self.inner.retentive,
            self.inner.kind,
        )
    }

    /// Tag at a concrete address.
    ///
    /// Address 0 and anything outside the window (or outside the sparse
    /// segments, when configured) is an address error.
    pub fn tag(&self, addr: i64) -> Result<Tag, EvalError> {
        self.validate_address(addr)?;
        Ok(self.tag_unchecked(addr))
    }

    /// Indirect reference resolved from a pointer tag at scan time.
    pub fn by_pointer(&self, pointer: &Tag) -> IndirectRef {
        IndirectRef {
            block: self.clone(),
            pointer: pointer.clone(),
        }
    }

    /// Indirect reference resolved from an expression at scan time.
    pub fn by_expr(&self, expr: Expr) -> IndirectExprRef {
        IndirectExprRef {
            block: self.clone(),
            expr: Box::new(expr),
        }
    }

    /// Contiguous range over `[lo, hi]`, validated now.
    pub fn select(&self, lo: i64, hi: i64) -> Result<BlockRange, EngineError> {
        if lo > hi {
            return Err(EngineError::BadProgram(format!(
                "select start ({lo}) must be <= end ({hi}) for block {}",
                self.inner.name
            )));
        }
        for bound in [lo, hi] {
            if bound < self.inner.start || bound > self.inner.end {
                return Err(EngineError::BadProgram(format!(
                    "address {bound} out of range for block {} ({}-{})",
                    self.inner.name, self.inner.start, self.inner.end
                )));
            }
        }
        Ok(BlockRange {
            block: self.clone(),
            start: lo,
            end: hi,
            reversed: false,
        })
    }

    /// Range whose endpoints resolve at scan time.
    pub fn select_dyn(
        &self,
        lo: impl Into<AddrBound>,
        hi: impl Into<AddrBound>,
    ) -> IndirectBlockRange {
        IndirectBlockRange {
            block: self.clone(),
            lo: lo.into(),
            hi: hi.into(),
            reversed: false,
        }
    }
}

/// Contiguous (or sparse-filtered) range of addresses for block operations.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRange {
    block: Block,
    start: i64,
    end: i64,
    reversed: bool,
}

impl BlockRange {
    /// Owning block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Inclusive range start as authored.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Inclusive range end as authored.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Whether iteration runs high address to low.
    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// The same window with address iteration reversed.
    pub fn reverse(self) -> Self {
        Self {
            reversed: !self.reversed,
            ..self
        }
    }

    /// Addresses in iteration order, filtered by the block's sparse
    /// segments.
    pub fn addresses(&self) -> Vec<i64> {
        let mut addrs: Vec<i64> = (self.start..=self.end)
            .filter(|&a| self.block.sparse_valid(a))
            .collect();
        if self.reversed {
            addrs.reverse();
        }
        addrs
    }

    /// Tags in iteration order.
    pub fn tags(&self) -> Vec<Tag> {
        self.addresses()
            .into_iter()
            .map(|a| self.block.tag_unchecked(a))
            .collect()
    }

    /// Number of addresses in the window.
    pub fn len(&self) -> usize {
        self.addresses().len()
    }

    /// True when the sparse filter leaves no addresses.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scan-time endpoint of an [`IndirectBlockRange`].
#[derive(Debug, Clone, PartialEq)]
pub enum AddrBound {
    /// Fixed address.
    Lit(i64),
    /// Address read from an integer tag.
    Tag(Tag),
    /// Address computed by an expression.
    Expr(Expr),
}

impl From<i64> for AddrBound {
    fn from(v: i64) -> Self {
        Self::Lit(v)
    }
}

impl From<&Tag> for AddrBound {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Expr> for AddrBound {
    fn from(e: Expr) -> Self {
        Self::Expr(e)
    }
}

impl AddrBound {
    /// Tags this bound reads when resolved.
    pub fn collect_tags(&self, out: &mut Vec<Tag>) {
        match self {
            Self::Lit(_) => {}
            Self::Tag(t) => out.push(t.clone()),
            Self::Expr(e) => e.collect_tags(out),
        }
    }

    fn resolve(&self, ctx: &ScanContext) -> Result<i64, EvalError> {
        match self {
            Self::Lit(v) => Ok(*v),
            Self::Tag(t) => Ok(ctx.get_tag(t).scalar().as_i64()),
            Self::Expr(e) => Ok(e.evaluate(ctx)?.as_i64()),
        }
    }
}

/// Block range whose endpoints resolve at scan time.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectBlockRange {
    block: Block,
    lo: AddrBound,
    hi: AddrBound,
    reversed: bool,
}

impl IndirectBlockRange {
    /// Owning block.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// Scan-time endpoints, low then high.
    pub fn bounds(&self) -> (&AddrBound, &AddrBound) {
        (&self.lo, &self.hi)
    }

    /// The same dynamic window with address iteration reversed.
    pub fn reverse(self) -> Self {
        Self {
            reversed: !self.reversed,
            ..self
        }
    }

    /// Resolve endpoints against the scan context into a concrete range.
    pub fn resolve(&self, ctx: &ScanContext) -> Result<BlockRange, EvalError> {
        let lo = self.lo.resolve(ctx)?;
        let hi = self.hi.resolve(ctx)?;
        if lo > hi {
            return Err(EvalError::BadAddress {
                block: self.block.name().into(),
                addr: lo,
            });
        }
        self.block.validate_address(lo)?;
        self.block.validate_address(hi)?;
        Ok(BlockRange {
            block: self.block.clone(),
            start: lo,
            end: hi,
            reversed: self.reversed,
        })
    }
}

/// Tag with a pointer-resolved address.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectRef {
    block: Block,
    pointer: Tag,
}

impl IndirectRef {
    /// Block the pointer indexes into.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The pointer tag.
    pub fn pointer(&self) -> &Tag {
        &self.pointer
    }

    /// Read the pointer and produce the concrete tag, validating the
    /// address against the block window.
    pub fn resolve(&self, ctx: &ScanContext) -> Result<Tag, EvalError> {
        let addr = ctx.get_tag(&self.pointer).scalar().as_i64();
        self.block.validate_address(addr)?;
        Ok(self.block.tag_unchecked(addr))
    }

    /// Rendered form for traces: `DS[Pointer]`.
    pub fn text(&self) -> String {
        format!("{}[{}]", self.block.name(), self.pointer.name())
    }
}

/// Tag with an expression-resolved address.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectExprRef {
    block: Block,
    expr: Box<Expr>,
}

impl IndirectExprRef {
    /// Block the expression indexes into.
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The address expression.
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate the address expression and produce the concrete tag.
    pub fn resolve(&self, ctx: &ScanContext) -> Result<Tag, EvalError> {
        let addr = self.expr.evaluate(ctx)?.as_i64();
        self.block.validate_address(addr)?;
        Ok(self.block.tag_unchecked(addr))
    }

    /// Rendered form for traces: `DS[<expr>]`.
    pub fn text(&self) -> String {
        format!("{}[{}]", self.block.name(), self.expr.text())
    }
}
