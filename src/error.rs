//! Scan engine error implementation

use crate::value::TagType;

use thiserror::Error;

/// Per-scan fault bits raised by instructions.
///
/// Faults never unwind the scan; the offending instruction skips its write,
/// the matching `fault.*` bit goes high for the remainder of the scan, and
/// the bit is cleared again at the start of the next scan unless
/// re-triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Division by zero in a math expression.
    DivisionError,
    /// A block operation walked past its address window.
    OutOfRange,
    /// Indirect addressing resolved to an invalid address, or a value could
    /// not be coerced to the destination type.
    AddressError,
    /// A math result exceeded the destination type's range.
    MathOperationError,
    /// Catch-all processor error.
    PlcError,
}

impl Fault {
    /// Name of the system tag driven by this fault.
    pub const fn tag_name(&self) -> &'static str {
        match self {
            Self::DivisionError => "fault.division_error",
            Self::OutOfRange => "fault.out_of_range",
            Self::AddressError => "fault.address_error",
            Self::MathOperationError => "fault.math_operation_error",
            Self::PlcError => "fault.plc_error",
        }
    }
}

/// Recoverable evaluation failure routed to the fault subsystem.
///
/// Mirrors the split between a well-formed recoverable reason and a hard
/// halt: instructions translate these into fault bits and skip the write.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("division by zero")]
    /// Integer or float division by zero.
    DivisionByZero,
    #[error("address {addr} out of range for block {block}")]
    /// An indirect reference resolved outside its block window.
    BadAddress {
        /// Block name.
        block: String,
        /// The resolved, invalid address.
        addr: i64,
    },
    #[error("cannot coerce {found} into {target:?}")]
    /// A value could not be represented in the destination type.
    Coerce {
        /// Description of the offending value.
        found: String,
        /// Destination type.
        target: TagType,
    },
    #[error("non-finite result")]
    /// An expression produced NaN or an infinity.
    NonFinite,
}

impl EvalError {
    /// The fault bit this failure raises.
    pub const fn fault(&self) -> Fault {
        match self {
            Self::DivisionByZero => Fault::DivisionError,
            Self::BadAddress { .. } => Fault::AddressError,
            Self::Coerce { .. } => Fault::AddressError,
            Self::NonFinite => Fault::MathOperationError,
        }
    }
}

/// Hard errors that escape the scan driver.
///
/// The scan that raised one of these is discarded without committing; the
/// runner's last committed snapshot remains current and the loop is
/// restartable.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `call` referenced a subroutine that was never defined.
    #[error("subroutine '{0}' is not defined")]
    MissingSubroutine(String),

    /// Block copy source and destination resolved to different lengths.
    #[error("block copy length mismatch: source has {src_len} addresses, destination {dest}")]
    LengthMismatch {
        /// Resolved source length.
        src_len: usize,
        /// Resolved destination length.
        dest: usize,
    },

    /// A patch, force, or logic write targeted a read-only system tag.
    #[error("system tag '{0}' is read-only")]
    ReadOnlyWrite(String),

    /// A force targeted a read-only system tag.
    #[error("system tag '{0}' refuses forces")]
    ReadOnlyForce(String),

    /// History lookup for a scan id that is unknown or has been evicted.
    #[error("scan {0} is not retained in history")]
    UnknownScan(u64),

    /// History append out of order.
    #[error("history scan ids must be strictly increasing (got {got} after {tip})")]
    NonMonotonicScan {
        /// The tip scan id at append time.
        tip: u64,
        /// The offending scan id.
        got: u64,
    },

    /// Invalid runner configuration.
    #[error("{0}")]
    InvalidArgument(String),

    /// Program construction rejected by strict-mode validation.
    #[error("program build error: {0}")]
    BadProgram(String),

    /// A user callable bound by `run_function` omitted a required output.
    #[error("function output '{0}' missing from returned map")]
    MissingFunctionOutput(String),

    /// Retentive payload could not be parsed.
    #[error("retentive payload: {0}")]
    Persist(#[from] serde_json::Error),
}

/// Result of executing one instruction or rung.
///
/// `Return` is the subroutine-return sentinel: it unwinds the rungs of the
/// current subroutine only and is never surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecuteState {
    /// Keep evaluating the current rung list.
    #[default]
    Proceed,
    /// A `return_` instruction fired; unwind to the enclosing `call`.
    Return,
}

impl ExecuteState {
    /// Return true if evaluation of the current rung list should continue.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}
