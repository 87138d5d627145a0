//! Deterministic ladder-logic scan engine.
//!
//! Programs are built as data with [`program::Program::builder`], then
//! handed to a [`runner::Runner`] that repeatedly executes a scan cycle
//! over an immutable world snapshot and yields a new snapshot. The engine
//! is single-threaded, time-aware, and rewindable: stepping, forking,
//! forcing, monitoring, and conditional breakpoints are first-class.

#![warn(missing_docs)]

pub mod block;
pub mod condition;
pub mod consts;
pub mod context;
pub mod debug;
pub mod error;
pub mod expr;
pub mod history;
pub mod instruction;
pub mod persist;
pub mod program;
pub mod rung;
pub mod runner;
pub mod state;
pub mod system;
pub mod tag;
pub mod value;
pub mod walker;

/// Commonly used engine types and instruction factories.
pub mod prelude {
    pub use crate::block::{Block, BlockRange, IndirectBlockRange, IndirectExprRef, IndirectRef};
    pub use crate::condition::{
        all_of, any_of, bit, eq, fall, ge, gt, le, lt, nc, ne, rise, CmpOp, Condition, Operand,
    };
    pub use crate::context::ScanContext;
    pub use crate::debug::{
        Breakpoint, CondStatus, DebugEval, Debugger, EnabledState, LogAction, Logpoint, ScanStep,
        ScanSteps, StepKind,
    };
    pub use crate::error::{EngineError, ExecuteState, Fault};
    pub use crate::expr::Expr;
    pub use crate::history::{History, LabelMetadata};
    pub use crate::instruction::{
        as_ascii, as_binary, as_value, blockcopy, call, copy, count_down, count_up, drum_event,
        drum_timed, fill, for_loop, latch, math, off_delay, on_delay, out, pack_bits, pack_text,
        pack_words, reset, return_, run_enabled_function, run_function, search, shift,
        unpack_bits, unpack_words, Instruction, Source, TimeUnit,
    };
    pub use crate::persist::{load_retentive, save_retentive};
    pub use crate::program::{Program, ProgramBuilder, RungBuilder};
    pub use crate::runner::{MonitorEvent, Runner, TimeMode};
    pub use crate::state::{MemValue, SystemState};
    pub use crate::system::SystemPoints;
    pub use crate::tag::{Tag, TagKind};
    pub use crate::value::{Scalar, TagType, Value};
    pub use crate::walker::walk_program;
}
