//! Rung conditions
//!
//! A condition evaluates to a bool against a scan context. A rung's
//! combined enable is the short-circuit AND of its conditions, evaluated
//! left to right; `any_of` is the short-circuit OR. Edge conditions
//! compare the current value against the previous committed scan's value,
//! recorded per tag under `_prev:` memory keys.

use crate::block::IndirectRef;
use crate::context::ScanContext;
use crate::error::EvalError;
use crate::expr::Expr;
use crate::tag::Tag;
use crate::value::{Scalar, Value};

use std::cmp::Ordering;

/// Relational operator used by compare conditions and `search`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CmpOp {
    /// Apply the relation to an optional ordering (None means incomparable,
    /// e.g. a NaN operand).
    pub fn holds(&self, ord: Option<Ordering>) -> bool {
        match (self, ord) {
            (Self::Eq, Some(Ordering::Equal)) => true,
            (Self::Ne, Some(Ordering::Equal)) => false,
            (Self::Ne, _) => true,
            (Self::Lt, Some(Ordering::Less)) => true,
            (Self::Le, Some(Ordering::Less | Ordering::Equal)) => true,
            (Self::Gt, Some(Ordering::Greater)) => true,
            (Self::Ge, Some(Ordering::Greater | Ordering::Equal)) => true,
            _ => false,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// One side of a compare condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Literal scalar.
    Lit(Scalar),
    /// Direct tag read.
    Tag(Tag),
    /// Pointer-indirect tag read.
    Indirect(IndirectRef),
    /// Expression.
    Expr(Expr),
}

impl From<&Tag> for Operand {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Tag> for Operand {
    fn from(t: Tag) -> Self {
        Self::Tag(t)
    }
}

impl From<IndirectRef> for Operand {
    fn from(r: IndirectRef) -> Self {
        Self::Indirect(r)
    }
}

impl From<Expr> for Operand {
    fn from(e: Expr) -> Self {
        Self::Expr(e)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Self::Lit(Scalar::Int(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Self::Lit(Scalar::Float(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Self::Lit(Scalar::Bool(v))
    }
}

impl From<&str> for Operand {
    /// Compare operands accept empty or single-ASCII-character text.
    ///
    /// # Panics
    ///
    /// Panics on multi-character or non-ASCII text; char comparisons are
    /// per-element (multi-character needles belong to `search`).
    fn from(s: &str) -> Self {
        assert!(
            s.is_ascii() && s.len() <= 1,
            "char compare operand must be empty or one ASCII character"
        );
        Self::Lit(Scalar::Char(s.bytes().next()))
    }
}

impl Operand {
    pub(crate) fn evaluate(&self, ctx: &ScanContext) -> Result<Scalar, EvalError> {
        match self {
            Self::Lit(s) => Ok(*s),
            Self::Tag(t) => Ok(ctx.get_tag(t).scalar()),
            Self::Indirect(r) => {
                let tag = r.resolve(ctx)?;
                Ok(ctx.get_tag(&tag).scalar())
            }
            Self::Expr(e) => e.evaluate(ctx),
        }
    }

    /// Rendered form for traces and walkers.
    pub fn text(&self) -> String {
        match self {
            Self::Lit(s) => Expr::Lit(*s).text(),
            Self::Tag(t) => t.name().into(),
            Self::Indirect(r) => r.text(),
            Self::Expr(e) => e.text(),
        }
    }

    pub(crate) fn collect_tags(&self, out: &mut Vec<Tag>) {
        match self {
            Self::Lit(_) => {}
            Self::Tag(t) => out.push(t.clone()),
            Self::Indirect(r) => out.push(r.pointer().clone()),
            Self::Expr(e) => e.collect_tags(out),
        }
    }
}

/// A boolean predicate over the scan context.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Truthiness of a bool tag.
    Bit(Tag),
    /// Non-bool tag read as integer; non-zero is true.
    IntTruthy(Tag),
    /// Negated contact.
    NormallyClosed(Tag),
    /// True on the false-to-true transition since the previous scan.
    RisingEdge(Tag),
    /// True on the true-to-false transition since the previous scan.
    FallingEdge(Tag),
    /// Relational compare over two operands (direct, indirect, or
    /// expression on either side).
    Compare {
        /// Relation.
        op: CmpOp,
        /// Left side.
        left: Operand,
        /// Right side.
        right: Operand,
    },
    /// Short-circuit AND over ordered children.
    All(Vec<Condition>),
    /// Short-circuit OR over ordered children.
    Any(Vec<Condition>),
}

impl Condition {
    /// Evaluate to a bool.
    pub fn evaluate(&self, ctx: &ScanContext) -> Result<bool, EvalError> {
        match self {
            Self::Bit(t) | Self::IntTruthy(t) => Ok(ctx.get_tag(t).truthy()),
            Self::NormallyClosed(t) => Ok(!ctx.get_tag(t).truthy()),
            Self::RisingEdge(t) => {
                let cur = ctx.get_tag(t).truthy();
                let prev = ctx.edge_prev(t).truthy();
                Ok(cur && !prev)
            }
            Self::FallingEdge(t) => {
                let cur = ctx.get_tag(t).truthy();
                let prev = ctx.edge_prev(t).truthy();
                Ok(!cur && prev)
            }
            Self::Compare { op, left, right } => {
                let a = left.evaluate(ctx)?;
                let b = right.evaluate(ctx)?;
                Ok(op.holds(a.numeric_cmp(&b)))
            }
            Self::All(children) => {
                for c in children {
                    if !c.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(children) => {
                for c in children {
                    if c.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Evaluate and collect `(name, value)` detail pairs for every tag
    /// read, for the debugger's condition trace.
    pub fn evaluate_detailed(
        &self,
        ctx: &ScanContext,
    ) -> Result<(bool, Vec<(String, Value)>), EvalError> {
        let value = self.evaluate(ctx)?;
        let mut tags = Vec::new();
        self.collect_tags(&mut tags);
        let mut details = Vec::new();
        for tag in tags {
            if details.iter().any(|(n, _): &(String, Value)| n == tag.name()) {
                continue;
            }
            details.push((tag.name().to_string(), ctx.get_tag(&tag)));
        }
        Ok((value, details))
    }

    /// Rendered expression text for traces.
    pub fn text(&self) -> String {
        match self {
            Self::Bit(t) | Self::IntTruthy(t) => t.name().into(),
            Self::NormallyClosed(t) => format!("nc({})", t.name()),
            Self::RisingEdge(t) => format!("rise({})", t.name()),
            Self::FallingEdge(t) => format!("fall({})", t.name()),
            Self::Compare { op, left, right } => {
                format!("{} {} {}", left.text(), op.symbol(), right.text())
            }
            Self::All(children) => {
                let parts: Vec<String> = children.iter().map(Condition::text).collect();
                format!("all_of({})", parts.join(", "))
            }
            Self::Any(children) => {
                let parts: Vec<String> = children.iter().map(Condition::text).collect();
                format!("any_of({})", parts.join(", "))
            }
        }
    }

    /// Collect every tag this condition reads.
    pub fn collect_tags(&self, out: &mut Vec<Tag>) {
        match self {
            Self::Bit(t)
            | Self::IntTruthy(t)
            | Self::NormallyClosed(t)
            | Self::RisingEdge(t)
            | Self::FallingEdge(t) => out.push(t.clone()),
            Self::Compare { left, right, .. } => {
                left.collect_tags(out);
                right.collect_tags(out);
            }
            Self::All(children) | Self::Any(children) => {
                for c in children {
                    c.collect_tags(out);
                }
            }
        }
    }

    /// Collect tags whose previous-scan value must be tracked for edge
    /// detection.
    pub fn collect_edge_tags(&self, out: &mut Vec<Tag>) {
        match self {
            Self::RisingEdge(t) | Self::FallingEdge(t) => out.push(t.clone()),
            Self::All(children) | Self::Any(children) => {
                for c in children {
                    c.collect_edge_tags(out);
                }
            }
            _ => {}
        }
    }
}

impl From<&Tag> for Condition {
    fn from(t: &Tag) -> Self {
        match t.tag_type() {
            crate::value::TagType::Bool => Self::Bit(t.clone()),
            _ => Self::IntTruthy(t.clone()),
        }
    }
}

/// Truthiness contact for a tag (bit contact for bools, integer
/// truthiness otherwise).
pub fn bit(t: &Tag) -> Condition {
    Condition::from(t)
}

/// Normally-closed contact.
pub fn nc(t: &Tag) -> Condition {
    Condition::NormallyClosed(t.clone())
}

/// Rising-edge contact.
pub fn rise(t: &Tag) -> Condition {
    Condition::RisingEdge(t.clone())
}

/// Falling-edge contact.
pub fn fall(t: &Tag) -> Condition {
    Condition::FallingEdge(t.clone())
}

/// `left == right` compare.
pub fn eq(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Eq,
        left: left.into(),
        right: right.into(),
    }
}

/// `left != right` compare.
pub fn ne(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Ne,
        left: left.into(),
        right: right.into(),
    }
}

/// `left < right` compare.
pub fn lt(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Lt,
        left: left.into(),
        right: right.into(),
    }
}

/// `left <= right` compare.
pub fn le(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Le,
        left: left.into(),
        right: right.into(),
    }
}

/// `left > right` compare.
pub fn gt(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Gt,
        left: left.into(),
        right: right.into(),
    }
}

/// `left >= right` compare.
pub fn ge(left: impl Into<Operand>, right: impl Into<Operand>) -> Condition {
    Condition::Compare {
        op: CmpOp::Ge,
        left: left.into(),
        right: right.into(),
    }
}

/// Short-circuit AND of ordered children.
pub fn all_of(children: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::All(children.into_iter().collect())
}

/// Short-circuit OR of ordered children.
pub fn any_of(children: impl IntoIterator<Item = Condition>) -> Condition {
    Condition::Any(children.into_iter().collect())
}
