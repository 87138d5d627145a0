//! Tag value representation and type-directed coercion

use crate::consts::*;
use crate::error::EvalError;

use std::cmp::Ordering;
use std::fmt;

/// Data types for tags (IEC 61131-3 naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    /// Boolean.
    Bool,
    /// 16-bit signed integer.
    Int,
    /// 32-bit signed integer.
    Dint,
    /// 32-bit IEEE float.
    Real,
    /// 16-bit unsigned integer.
    Word,
    /// Empty string or one 7-bit ASCII character.
    Char,
}

impl TagType {
    /// Type-appropriate default value.
    pub const fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Dint => Value::Dint(0),
            Self::Real => Value::Real(0.0),
            Self::Word => Value::Word(0),
            Self::Char => Value::Char(None),
        }
    }

    /// Clamp bounds for the signed integer types.
    pub const fn int_bounds(&self) -> Option<(i64, i64)> {
        match self {
            Self::Int => Some((INT_MIN, INT_MAX)),
            Self::Dint => Some((DINT_MIN, DINT_MAX)),
            _ => None,
        }
    }

    /// Canonical lowercase name, used by the persistence schema hash.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Dint => "dint",
            Self::Real => "real",
            Self::Word => "word",
            Self::Char => "char",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored, typed tag value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// `TagType::Bool` payload.
    Bool(bool),
    /// `TagType::Int` payload.
    Int(i16),
    /// `TagType::Dint` payload.
    Dint(i32),
    /// `TagType::Real` payload. Always finite once stored.
    Real(f32),
    /// `TagType::Word` payload.
    Word(u16),
    /// `TagType::Char` payload: `None` is the empty string, `Some(b)` one
    /// ASCII byte.
    Char(Option<u8>),
}

impl Value {
    /// The tag type this value belongs to.
    pub const fn tag_type(&self) -> TagType {
        match self {
            Self::Bool(_) => TagType::Bool,
            Self::Int(_) => TagType::Int,
            Self::Dint(_) => TagType::Dint,
            Self::Real(_) => TagType::Real,
            Self::Word(_) => TagType::Word,
            Self::Char(_) => TagType::Char,
        }
    }

    /// Lift into the evaluation intermediate.
    pub const fn scalar(&self) -> Scalar {
        match self {
            Self::Bool(b) => Scalar::Bool(*b),
            Self::Int(v) => Scalar::Int(*v as i64),
            Self::Dint(v) => Scalar::Int(*v as i64),
            Self::Real(v) => Scalar::Float(*v as f64),
            Self::Word(v) => Scalar::Int(*v as i64),
            Self::Char(c) => Scalar::Char(*c),
        }
    }

    /// Truthiness: non-zero numbers, `true`, and non-empty chars.
    pub fn truthy(&self) -> bool {
        self.scalar().truthy()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Dint(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Word(v) => write!(f, "{v}"),
            Self::Char(None) => write!(f, "''"),
            Self::Char(Some(b)) => write!(f, "'{}'", *b as char),
        }
    }
}

/// Untyped evaluation intermediate.
///
/// Expression arithmetic runs over wide integers and doubles; the result
/// only takes a concrete width when stored through [`store`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Boolean intermediate.
    Bool(bool),
    /// Wide integer intermediate.
    Int(i64),
    /// Double intermediate.
    Float(f64),
    /// Character intermediate (empty or one ASCII byte).
    Char(Option<u8>),
}

impl Scalar {
    /// Truthiness of the intermediate.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Char(c) => c.is_some(),
        }
    }

    /// Numeric view as a double. Chars read as their ASCII code.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(b) => *b as i64 as f64,
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            Self::Char(c) => c.map(|b| b as f64).unwrap_or(0.0),
        }
    }

    /// Numeric view as a wide integer, truncating toward zero.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Bool(b) => *b as i64,
            Self::Int(v) => *v,
            Self::Float(v) => float_to_i64(*v),
            Self::Char(c) => c.map(|b| b as i64).unwrap_or(0),
        }
    }

    /// Return true for the `Float` variant.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Numeric ordering across the integer/float/bool/char variants.
    ///
    /// `None` only when a non-finite float is involved.
    pub fn numeric_cmp(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Char(a), Self::Char(b)) => Some(a.cmp(b)),
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

fn float_to_i64(v: f64) -> i64 {
    if !v.is_finite() {
        return 0;
    }
    let t = v.trunc();
    if t >= i64::MAX as f64 {
        i64::MAX
    } else if t <= i64::MIN as f64 {
        i64::MIN
    } else {
        t as i64
    }
}

/// Behavior when a signed integer store exceeds its type range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Saturate at the type bounds. Used by counters and copies.
    Clamp,
    /// 2's-complement wrap. Used by math stores.
    Wrap,
}

/// Coerce an evaluation intermediate into a stored value of `ty`.
///
/// The single funnel every tag write passes through:
/// - Int/Dint: non-finite floats become 0, otherwise truncate toward zero,
///   then clamp or wrap per `overflow`;
/// - Word: modulo 2^16, always;
/// - Real: f32 cast, non-finite becomes 0;
/// - Bool: truthiness;
/// - Char: empty or one ASCII byte; integer intermediates convert via
///   character code, anything unrepresentable is a coercion error.
pub fn store(scalar: Scalar, ty: TagType, overflow: Overflow) -> Result<Value, EvalError> {
    match ty {
        TagType::Bool => Ok(Value::Bool(scalar.truthy())),
        TagType::Int => Ok(Value::Int(narrow(scalar.as_i64(), INT_MIN, INT_MAX, overflow) as i16)),
        TagType::Dint => {
            Ok(Value::Dint(narrow(scalar.as_i64(), DINT_MIN, DINT_MAX, overflow) as i32))
        }
        TagType::Word => Ok(Value::Word(scalar.as_i64().rem_euclid(WORD_MODULUS) as u16)),
        TagType::Real => {
            let v = scalar.as_f64() as f32;
            Ok(Value::Real(if v.is_finite() { v } else { 0.0 }))
        }
        TagType::Char => match scalar {
            Scalar::Char(c) => Ok(Value::Char(c)),
            Scalar::Int(n) if (0..=127).contains(&n) => Ok(Value::Char(Some(n as u8))),
            Scalar::Float(f) if f.is_finite() && f.trunc() == f && (0.0..=127.0).contains(&f) => {
                Ok(Value::Char(Some(f as u8)))
            }
            other => Err(EvalError::Coerce {
                found: format!("{other:?}"),
                target: TagType::Char,
            }),
        },
    }
}

/// Return true when storing `scalar` into `ty` with wrap semantics would
/// leave the destination type's range. Drives the math overflow fault.
pub fn overflows(scalar: &Scalar, ty: TagType) -> bool {
    match ty.int_bounds() {
        Some((lo, hi)) => {
            let v = scalar.as_i64();
            v < lo || v > hi
        }
        None => false,
    }
}

fn narrow(v: i64, lo: i64, hi: i64, overflow: Overflow) -> i64 {
    match overflow {
        Overflow::Clamp => v.clamp(lo, hi),
        Overflow::Wrap => {
            if lo == INT_MIN {
                v as i16 as i64
            } else {
                v as i32 as i64
            }
        }
    }
}
