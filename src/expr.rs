//! Side-effect-free expression trees
//!
//! Expressions combine literals, tag reads, and indirect references with
//! arithmetic, bitwise, and math-function nodes. Evaluation runs over wide
//! intermediates ([`Scalar`]); values only take a concrete width when
//! stored. Division by zero and math domain errors surface as
//! [`EvalError`]s for the fault subsystem, never as panics.

use crate::block::{IndirectExprRef, IndirectRef};
use crate::context::ScanContext;
use crate::error::EvalError;
use crate::tag::Tag;
use crate::value::Scalar;

use std::ops;

/// Unary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Arithmetic identity.
    Pos,
    /// Absolute value.
    Abs,
    /// Bitwise complement over the low 32 bits.
    Not,
}

/// Binary expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// True division; always produces a float.
    Div,
    /// Floor division; integer when both operands are integers.
    FloorDiv,
    /// Modulo with the divisor's sign.
    Rem,
    /// Exponentiation.
    Pow,
    /// Bitwise AND over the low 32 bits.
    BitAnd,
    /// Bitwise OR over the low 32 bits.
    BitOr,
    /// Bitwise XOR over the low 32 bits.
    BitXor,
    /// Left shift over the low 32 bits.
    Shl,
    /// Arithmetic right shift over the low 32 bits.
    Shr,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Rem => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }
}

/// Math function nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum MathFn {
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Log,
    Log10,
    Exp,
    Abs,
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    /// Rotate the low 16 bits left.
    Lro,
}

impl MathFn {
    fn name(&self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Atan2 => "atan2",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Exp => "exp",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Lro => "lro",
        }
    }
}

/// A finite, side-effect-free expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal scalar.
    Lit(Scalar),
    /// Tag read.
    Tag(Tag),
    /// Pointer-indirect tag read.
    Indirect(IndirectRef),
    /// Expression-indirect tag read.
    IndirectExpr(IndirectExprRef),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Math function application.
    Call(MathFn, Vec<Expr>),
}

impl From<&Tag> for Expr {
    fn from(t: &Tag) -> Self {
        Self::Tag(t.clone())
    }
}

impl From<Tag> for Expr {
    fn from(t: Tag) -> Self {
        Self::Tag(t)
    }
}

impl From<IndirectRef> for Expr {
    fn from(r: IndirectRef) -> Self {
        Self::Indirect(r)
    }
}

impl From<IndirectExprRef> for Expr {
    fn from(r: IndirectExprRef) -> Self {
        Self::IndirectExpr(r)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Self::Lit(Scalar::Int(v))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::Lit(Scalar::Float(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Self::Lit(Scalar::Bool(v))
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::Binary($op, Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

expr_binop!(Add, add, BinOp::Add);
expr_binop!(Sub, sub, BinOp::Sub);
expr_binop!(Mul, mul, BinOp::Mul);
expr_binop!(Div, div, BinOp::Div);
expr_binop!(Rem, rem, BinOp::Rem);
expr_binop!(BitAnd, bitand, BinOp::BitAnd);
expr_binop!(BitOr, bitor, BinOp::BitOr);
expr_binop!(BitXor, bitxor, BinOp::BitXor);
expr_binop!(Shl, shl, BinOp::Shl);
expr_binop!(Shr, shr, BinOp::Shr);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }
}

impl ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }
}

impl Expr {
    /// Floor division node.
    pub fn floor_div(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary(BinOp::FloorDiv, Box::new(self), Box::new(rhs.into()))
    }

    /// Exponentiation node.
    pub fn pow(self, rhs: impl Into<Expr>) -> Expr {
        Expr::Binary(BinOp::Pow, Box::new(self), Box::new(rhs.into()))
    }

    /// Evaluate against a scan context.
    pub fn evaluate(&self, ctx: &ScanContext) -> Result<Scalar, EvalError> {
        match self {
            Self::Lit(s) => Ok(*s),
            Self::Tag(t) => Ok(ctx.get_tag(t).scalar()),
            Self::Indirect(r) => {
                let tag = r.resolve(ctx)?;
                Ok(ctx.get_tag(&tag).scalar())
            }
            Self::IndirectExpr(r) => {
                let tag = r.resolve(ctx)?;
                Ok(ctx.get_tag(&tag).scalar())
            }
            Self::Unary(op, e) => eval_unary(*op, e.evaluate(ctx)?),
            Self::Binary(op, a, b) => eval_binary(*op, a.evaluate(ctx)?, b.evaluate(ctx)?),
            Self::Call(f, args) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(a.evaluate(ctx)?);
                }
                eval_call(*f, &vals)
            }
        }
    }

    /// Rendered form for condition traces and walkers.
    pub fn text(&self) -> String {
        match self {
            Self::Lit(Scalar::Bool(b)) => b.to_string(),
            Self::Lit(Scalar::Int(v)) => v.to_string(),
            Self::Lit(Scalar::Float(v)) => v.to_string(),
            Self::Lit(Scalar::Char(None)) => "''".into(),
            Self::Lit(Scalar::Char(Some(b))) => format!("'{}'", *b as char),
            Self::Tag(t) => t.name().into(),
            Self::Indirect(r) => r.text(),
            Self::IndirectExpr(r) => r.text(),
            Self::Unary(UnaryOp::Neg, e) => format!("-{}", e.text()),
            Self::Unary(UnaryOp::Pos, e) => format!("+{}", e.text()),
            Self::Unary(UnaryOp::Abs, e) => format!("abs({})", e.text()),
            Self::Unary(UnaryOp::Not, e) => format!("~{}", e.text()),
            Self::Binary(op, a, b) => format!("({} {} {})", a.text(), op.symbol(), b.text()),
            Self::Call(f, args) => {
                let rendered: Vec<String> = args.iter().map(Expr::text).collect();
                format!("{}({})", f.name(), rendered.join(", "))
            }
        }
    }

    /// Collect every tag this expression reads, pointer tags included.
    pub fn collect_tags(&self, out: &mut Vec<Tag>) {
        match self {
            Self::Lit(_) => {}
            Self::Tag(t) => out.push(t.clone()),
            Self::Indirect(r) => out.push(r.pointer().clone()),
            Self::IndirectExpr(r) => r.expr().collect_tags(out),
            Self::Unary(_, e) => e.collect_tags(out),
            Self::Binary(_, a, b) => {
                a.collect_tags(out);
                b.collect_tags(out);
            }
            Self::Call(_, args) => {
                for a in args {
                    a.collect_tags(out);
                }
            }
        }
    }
}

fn eval_unary(op: UnaryOp, v: Scalar) -> Result<Scalar, EvalError> {
    Ok(match op {
        UnaryOp::Neg => match v {
            Scalar::Float(f) => Scalar::Float(-f),
            other => Scalar::Int(-other.as_i64()),
        },
        UnaryOp::Pos => v,
        UnaryOp::Abs => match v {
            Scalar::Float(f) => Scalar::Float(f.abs()),
            other => Scalar::Int(other.as_i64().abs()),
        },
        UnaryOp::Not => Scalar::Int(!(v.as_i64() as i32) as i64),
    })
}

fn both_int(a: &Scalar, b: &Scalar) -> bool {
    !a.is_float() && !b.is_float()
}

fn eval_binary(op: BinOp, a: Scalar, b: Scalar) -> Result<Scalar, EvalError> {
    match op {
        BinOp::Add if both_int(&a, &b) => Ok(int_or_float(a.as_i64().checked_add(b.as_i64()), || {
            a.as_f64() + b.as_f64()
        })),
        BinOp::Add => Ok(Scalar::Float(a.as_f64() + b.as_f64())),
        BinOp::Sub if both_int(&a, &b) => Ok(int_or_float(a.as_i64().checked_sub(b.as_i64()), || {
            a.as_f64() - b.as_f64()
        })),
        BinOp::Sub => Ok(Scalar::Float(a.as_f64() - b.as_f64())),
        BinOp::Mul if both_int(&a, &b) => Ok(int_or_float(a.as_i64().checked_mul(b.as_i64()), || {
            a.as_f64() * b.as_f64()
        })),
        BinOp::Mul => Ok(Scalar::Float(a.as_f64() * b.as_f64())),
        BinOp::Div => {
            let d = b.as_f64();
            if d == 0.0 {
                Err(EvalError::DivisionByZero)
            } else {
                Ok(Scalar::Float(a.as_f64() / d))
            }
        }
        BinOp::FloorDiv => {
            if both_int(&a, &b) {
                let (x, y) = (a.as_i64(), b.as_i64());
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                let mut q = x / y;
                if x % y != 0 && (x < 0) != (y < 0) {
                    q -= 1;
                }
                Ok(Scalar::Int(q))
            } else {
                let d = b.as_f64();
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Scalar::Float((a.as_f64() / d).floor()))
            }
        }
        BinOp::Rem => {
            if both_int(&a, &b) {
                let (x, y) = (a.as_i64(), b.as_i64());
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                let mut r = x % y;
                if r != 0 && (r < 0) != (y < 0) {
                    r += y;
                }
                Ok(Scalar::Int(r))
            } else {
                let d = b.as_f64();
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                let x = a.as_f64();
                Ok(Scalar::Float(x - d * (x / d).floor()))
            }
        }
        BinOp::Pow => {
            if both_int(&a, &b) && b.as_i64() >= 0 && b.as_i64() <= u32::MAX as i64 {
                match a.as_i64().checked_pow(b.as_i64() as u32) {
                    Some(v) => Ok(Scalar::Int(v)),
                    None => Ok(Scalar::Float(a.as_f64().powf(b.as_f64()))),
                }
            } else {
                Ok(Scalar::Float(a.as_f64().powf(b.as_f64())))
            }
        }
        BinOp::BitAnd => Ok(bits32(a, b, |x, y| x & y)),
        BinOp::BitOr => Ok(bits32(a, b, |x, y| x | y)),
        BinOp::BitXor => Ok(bits32(a, b, |x, y| x ^ y)),
        BinOp::Shl => Ok(bits32(a, b, |x, y| x.wrapping_shl(y as u32))),
        BinOp::Shr => Ok(bits32(a, b, |x, y| x.wrapping_shr(y as u32))),
    }
}

fn int_or_float(checked: Option<i64>, fallback: impl FnOnce() -> f64) -> Scalar {
    match checked {
        Some(v) => Scalar::Int(v),
        None => Scalar::Float(fallback()),
    }
}

fn bits32(a: Scalar, b: Scalar, f: impl FnOnce(i32, i32) -> i32) -> Scalar {
    Scalar::Int(f(a.as_i64() as i32, b.as_i64() as i32) as i64)
}

fn eval_call(f: MathFn, args: &[Scalar]) -> Result<Scalar, EvalError> {
    let unary = |idx: usize| args.get(idx).map(Scalar::as_f64).unwrap_or(0.0);
    let finite = |v: f64| {
        if v.is_nan() {
            Err(EvalError::NonFinite)
        } else {
            Ok(Scalar::Float(v))
        }
    };
    match f {
        MathFn::Sqrt => finite(unary(0).sqrt()),
        MathFn::Sin => finite(unary(0).sin()),
        MathFn::Cos => finite(unary(0).cos()),
        MathFn::Tan => finite(unary(0).tan()),
        MathFn::Asin => finite(unary(0).asin()),
        MathFn::Acos => finite(unary(0).acos()),
        MathFn::Atan => finite(unary(0).atan()),
        MathFn::Atan2 => finite(unary(0).atan2(unary(1))),
        MathFn::Log => finite(unary(0).ln()),
        MathFn::Log10 => finite(unary(0).log10()),
        MathFn::Exp => finite(unary(0).exp()),
        MathFn::Abs => match args.first() {
            Some(Scalar::Float(v)) => Ok(Scalar::Float(v.abs())),
            Some(other) => Ok(Scalar::Int(other.as_i64().abs())),
            None => Ok(Scalar::Int(0)),
        },
        MathFn::Min | MathFn::Max => {
            let (a, b) = (args[0], args[1]);
            let pick_a = match f {
                MathFn::Min => a.as_f64() <= b.as_f64(),
                _ => a.as_f64() >= b.as_f64(),
            };
            Ok(if pick_a { a } else { b })
        }
        MathFn::Round => finite(unary(0).round()),
        MathFn::Floor => finite(unary(0).floor()),
        MathFn::Ceil => finite(unary(0).ceil()),
        MathFn::Lro => {
            let v = args[0].as_i64() & 0xFFFF;
            let n = args[1].as_i64().rem_euclid(16) as u32;
            let rotated = ((v << n) | (v >> (16 - n % 16))) & 0xFFFF;
            Ok(Scalar::Int(if n == 0 { v } else { rotated }))
        }
    }
}

/// `sqrt(e)` node.
pub fn sqrt(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Sqrt, vec![e.into()])
}

/// `sin(e)` node.
pub fn sin(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Sin, vec![e.into()])
}

/// `cos(e)` node.
pub fn cos(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Cos, vec![e.into()])
}

/// `tan(e)` node.
pub fn tan(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Tan, vec![e.into()])
}

/// `asin(e)` node.
pub fn asin(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Asin, vec![e.into()])
}

/// `acos(e)` node.
pub fn acos(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Acos, vec![e.into()])
}

/// `atan(e)` node.
pub fn atan(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Atan, vec![e.into()])
}

/// `atan2(y, x)` node.
pub fn atan2(y: impl Into<Expr>, x: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Atan2, vec![y.into(), x.into()])
}

/// Natural log node.
pub fn log(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Log, vec![e.into()])
}

/// Base-10 log node.
pub fn log10(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Log10, vec![e.into()])
}

/// `exp(e)` node.
pub fn exp(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Exp, vec![e.into()])
}

/// Absolute-value node.
pub fn abs(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Abs, vec![e.into()])
}

/// Two-argument minimum node.
pub fn min(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Min, vec![a.into(), b.into()])
}

/// Two-argument maximum node.
pub fn max(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Max, vec![a.into(), b.into()])
}

/// Rounding node.
pub fn round(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Round, vec![e.into()])
}

/// Floor node.
pub fn floor(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Floor, vec![e.into()])
}

/// Ceiling node.
pub fn ceil(e: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Ceil, vec![e.into()])
}

/// Rotate-left-16 node.
pub fn lro(e: impl Into<Expr>, n: impl Into<Expr>) -> Expr {
    Expr::Call(MathFn::Lro, vec![e.into(), n.into()])
}
