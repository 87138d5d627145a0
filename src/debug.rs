//! Debugger and trace engine
//!
//! An alternate scan loop yields one event per rung, branch, subroutine,
//! and instruction in depth-first order, each carrying its enabled state
//! and a structured condition trace. Source breakpoints, logpoints,
//! monitors (on the runner), and data breakpoints build a debug adapter
//! on top of these events.

mod stepper;

pub use stepper::ScanSteps;

use crate::condition::Condition;
use crate::context::ScanContext;
use crate::rung::SourceSpan;
use crate::value::Value;

/// What a step event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// A top-level rung finished evaluating.
    Rung,
    /// A branch rung finished evaluating.
    Branch,
    /// A subroutine rung finished evaluating.
    Subroutine,
    /// An instruction is about to execute.
    Instruction,
}

/// Why a region was or was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnabledState {
    /// Conditions passed.
    Enabled,
    /// This rung's own conditions failed.
    DisabledLocal,
    /// An enclosing rung's conditions failed.
    DisabledParent,
}

/// Outcome of one condition inside a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondStatus {
    /// Evaluated true.
    True,
    /// Evaluated false.
    False,
    /// Not evaluated (an earlier condition short-circuited, or the
    /// parent was disabled).
    Skipped,
}

/// Per-condition trace record.
#[derive(Debug, Clone)]
pub struct ConditionTrace {
    /// Rendered condition expression.
    pub expression: String,
    /// Evaluation status.
    pub status: CondStatus,
    /// Evaluated value, absent when skipped.
    pub value: Option<bool>,
    /// `(name, value)` pairs for every tag the condition read.
    pub details: Vec<(String, Value)>,
    /// Annotated summary, e.g. `Button(true)`.
    pub summary: String,
}

/// One region of a step trace: the rung itself plus one region per
/// branch item, separating inherited from local conditions.
#[derive(Debug, Clone)]
pub struct TraceRegion {
    /// Region kind (rung or branch).
    pub kind: StepKind,
    /// Authored location.
    pub span: Option<SourceSpan>,
    /// Whether the region ran.
    pub enabled_state: EnabledState,
    /// Condition trace, in authored order.
    pub conditions: Vec<ConditionTrace>,
}

/// One debugger event.
#[derive(Debug, Clone)]
pub struct ScanStep {
    /// Event kind.
    pub kind: StepKind,
    /// Index of the enclosing top-level rung.
    pub rung_index: usize,
    /// Nesting depth (branches and subroutine rungs increase it).
    pub depth: usize,
    /// Name of the enclosing subroutine, if any.
    pub subroutine: Option<String>,
    /// Subroutine call stack, outermost first.
    pub call_stack: Vec<String>,
    /// Authored location.
    pub span: Option<SourceSpan>,
    /// Whether the described region ran.
    pub enabled_state: EnabledState,
    /// Instruction kind name for instruction events.
    pub instruction_kind: Option<&'static str>,
    /// Structured condition trace.
    pub regions: Vec<TraceRegion>,
}

/// Handle to a registered source breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(u64);

/// A source breakpoint with optional condition and hit-count guards.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    file: String,
    line: u32,
    condition: Option<Condition>,
    hit_condition: Option<u32>,
}

impl Breakpoint {
    /// Breakpoint at a source location.
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            condition: None,
            hit_condition: None,
        }
    }

    /// Fire only while the condition holds against the current context.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Fire on the Nth matching evaluation.
    pub fn hit_condition(mut self, count: u32) -> Self {
        self.hit_condition = Some(count);
        self
    }

    fn matches_location(&self, span: Option<SourceSpan>) -> bool {
        let Some(span) = span else {
            return false;
        };
        span.line == self.line && span.file.ends_with(&self.file)
    }
}

/// Handle to a registered logpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogpointId(u64);

/// A logpoint: emits a console message, or labels the scan that commits
/// the step it was hit on.
#[derive(Debug, Clone)]
pub struct Logpoint {
    file: String,
    line: u32,
    message: Option<String>,
    label: Option<String>,
}

impl Logpoint {
    /// Console-message logpoint.
    pub fn message(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: Some(message.into()),
            label: None,
        }
    }

    /// Snapshot-label logpoint.
    pub fn label(file: impl Into<String>, line: u32, label: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: None,
            label: Some(label.into()),
        }
    }

    fn matches_location(&self, span: Option<SourceSpan>) -> bool {
        let Some(span) = span else {
            return false;
        };
        span.line == self.line && span.file.ends_with(&self.file)
    }
}

/// Action requested by a logpoint hit.
#[derive(Debug, Clone, PartialEq)]
pub enum LogAction {
    /// Emit a console event.
    Console(String),
    /// Label the scan once it commits.
    DeferLabel(String),
}

/// Evaluation result for one step against the breakpoint table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugEval {
    /// No breakpoint fired; keep stepping.
    #[default]
    Continue,
    /// A breakpoint fired; the caller should pause.
    Break(BreakpointId),
}

impl DebugEval {
    /// True when stepping should continue.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

struct BreakpointEntry {
    id: BreakpointId,
    breakpoint: Breakpoint,
    hits: u32,
}

struct LogpointEntry {
    id: LogpointId,
    logpoint: Logpoint,
}

/// Source breakpoint and logpoint table.
///
/// All registrations are explicit handles; `clear` drops everything when
/// a runner detaches.
#[derive(Default)]
pub struct Debugger {
    breakpoints: Vec<BreakpointEntry>,
    logpoints: Vec<LogpointEntry>,
    last_break: Option<BreakpointId>,
    next_id: u64,
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("breakpoints", &self.breakpoints.len())
            .field("logpoints", &self.logpoints.len())
            .finish()
    }
}

impl Debugger {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source breakpoint.
    pub fn set_breakpoint(&mut self, breakpoint: Breakpoint) -> BreakpointId {
        self.next_id += 1;
        let id = BreakpointId(self.next_id);
        self.breakpoints.push(BreakpointEntry {
            id,
            breakpoint,
            hits: 0,
        });
        id
    }

    /// Remove a source breakpoint.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|e| e.id != id);
        self.breakpoints.len() != before
    }

    /// Register a logpoint.
    pub fn set_logpoint(&mut self, logpoint: Logpoint) -> LogpointId {
        self.next_id += 1;
        let id = LogpointId(self.next_id);
        self.logpoints.push(LogpointEntry { id, logpoint });
        id
    }

    /// Remove a logpoint.
    pub fn remove_logpoint(&mut self, id: LogpointId) -> bool {
        let before = self.logpoints.len();
        self.logpoints.retain(|e| e.id != id);
        self.logpoints.len() != before
    }

    /// Drop all registrations (runner detach).
    pub fn clear(&mut self) {
        self.breakpoints.clear();
        self.logpoints.clear();
        self.last_break = None;
    }

    /// Evaluate one step against the breakpoint table.
    ///
    /// The same breakpoint does not re-fire on the step it just paused
    /// on; stepping past it re-arms it.
    pub fn eval_step(&mut self, step: &ScanStep, ctx: &ScanContext) -> DebugEval {
        let last = self.last_break.take();
        for entry in &mut self.breakpoints {
            if !entry.breakpoint.matches_location(step.span) {
                continue;
            }
            if let Some(condition) = &entry.breakpoint.condition {
                if !condition.evaluate(ctx).unwrap_or(false) {
                    continue;
                }
            }
            entry.hits += 1;
            if let Some(required) = entry.breakpoint.hit_condition {
                if entry.hits != required {
                    continue;
                }
            }
            if last == Some(entry.id) {
                continue;
            }
            self.last_break = Some(entry.id);
            return DebugEval::Break(entry.id);
        }
        DebugEval::Continue
    }

    /// Evaluate one step against the logpoint table.
    pub fn eval_logpoints(&mut self, step: &ScanStep) -> Vec<LogAction> {
        self.logpoints
            .iter()
            .filter(|e| e.logpoint.matches_location(step.span))
            .filter_map(|e| {
                e.logpoint
                    .message
                    .clone()
                    .map(LogAction::Console)
                    .or_else(|| e.logpoint.label.clone().map(LogAction::DeferLabel))
            })
            .collect()
    }
}
