//! User callable invocation
//!
//! The only foreign-code entry point in the engine: a pure function from
//! a named-input map to a named-output map. Inputs resolve through the
//! scan context; outputs coerce and store through the normal path.

use super::{fault_guard, oneshot_pass, store_to_tag, Source};
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::tag::Tag;
use crate::value::{Overflow, Value};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Named values passed to and returned from a user callable.
pub type FnValues = BTreeMap<String, Value>;

/// Output bindings: returned key to destination tag.
pub type FnOuts = BTreeMap<String, Tag>;

/// A user-supplied callable.
#[derive(Clone)]
pub enum UserCallable {
    /// Called with the resolved inputs.
    Plain(Arc<dyn Fn(&FnValues) -> FnValues + Send + Sync>),
    /// Called with the rung enable first; still invoked on disabled scans
    /// so the callable can observe the transition.
    Enabled(Arc<dyn Fn(bool, &FnValues) -> FnValues + Send + Sync>),
}

impl fmt::Debug for UserCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("UserCallable::Plain(..)"),
            Self::Enabled(_) => f.write_str("UserCallable::Enabled(..)"),
        }
    }
}

/// Invoke a user callable with resolved inputs and store its outputs.
#[derive(Debug, Clone)]
pub struct RunFunction {
    pub(crate) callable: UserCallable,
    pub(crate) ins: BTreeMap<String, Source>,
    pub(crate) outs: FnOuts,
    pub(crate) oneshot: bool,
    pub(crate) slot: u32,
}

impl RunFunction {
    /// Restrict to one invocation per rising enable.
    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    pub(crate) fn is_inert_when_disabled(&self) -> bool {
        match self.callable {
            // Enable-aware callables observe the disabled transition.
            UserCallable::Enabled(_) => false,
            UserCallable::Plain(_) => !self.oneshot,
        }
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        let fire = oneshot_pass(ctx, self.slot, enabled, self.oneshot);

        let returned = match &self.callable {
            UserCallable::Plain(f) => {
                if !fire {
                    return Ok(ExecuteState::Proceed);
                }
                let Some(ins) = self.resolve_ins(ctx) else {
                    return Ok(ExecuteState::Proceed);
                };
                f(&ins)
            }
            UserCallable::Enabled(f) => {
                if self.oneshot && enabled && !fire {
                    return Ok(ExecuteState::Proceed);
                }
                let Some(ins) = self.resolve_ins(ctx) else {
                    return Ok(ExecuteState::Proceed);
                };
                f(enabled, &ins)
            }
        };

        if !enabled && matches!(self.callable, UserCallable::Enabled(_)) {
            // Disabled notification only; outputs are not stored.
            return Ok(ExecuteState::Proceed);
        }

        for (key, tag) in &self.outs {
            let value = returned
                .get(key)
                .ok_or_else(|| EngineError::MissingFunctionOutput(key.clone()))?;
            store_to_tag(ctx, tag, value.scalar(), Overflow::Clamp)?;
        }
        Ok(ExecuteState::Proceed)
    }

    fn resolve_ins(&self, ctx: &mut ScanContext) -> Option<FnValues> {
        let mut resolved = FnValues::new();
        for (name, source) in &self.ins {
            let scalar = fault_guard(ctx, source.evaluate(ctx))?;
            let value = match scalar {
                crate::value::Scalar::Bool(b) => Value::Bool(b),
                crate::value::Scalar::Int(v) => Value::Dint(v.clamp(
                    crate::consts::DINT_MIN,
                    crate::consts::DINT_MAX,
                ) as i32),
                crate::value::Scalar::Float(v) => Value::Real(v as f32),
                crate::value::Scalar::Char(c) => Value::Char(c),
            };
            resolved.insert(name.clone(), value);
        }
        Some(resolved)
    }

    /// Input bindings.
    pub fn ins(&self) -> &BTreeMap<String, Source> {
        &self.ins
    }

    /// Output bindings.
    pub fn outs(&self) -> &FnOuts {
        &self.outs
    }
}

impl From<RunFunction> for super::Instruction {
    fn from(i: RunFunction) -> Self {
        Self::RunFunction(i)
    }
}

/// Invoke `f` with named inputs; store each bound output.
pub fn run_function(
    f: impl Fn(&FnValues) -> FnValues + Send + Sync + 'static,
    ins: impl IntoIterator<Item = (String, Source)>,
    outs: impl IntoIterator<Item = (String, Tag)>,
) -> RunFunction {
    RunFunction {
        callable: UserCallable::Plain(Arc::new(f)),
        ins: ins.into_iter().collect(),
        outs: outs.into_iter().collect(),
        oneshot: false,
        slot: 0,
    }
}

/// Invoke `f(enabled, ins)`; disabled rungs still call it so external
/// effects can abort in-flight work.
pub fn run_enabled_function(
    f: impl Fn(bool, &FnValues) -> FnValues + Send + Sync + 'static,
    ins: impl IntoIterator<Item = (String, Source)>,
    outs: impl IntoIterator<Item = (String, Tag)>,
) -> RunFunction {
    RunFunction {
        callable: UserCallable::Enabled(Arc::new(f)),
        ins: ins.into_iter().collect(),
        outs: outs.into_iter().collect(),
        oneshot: false,
        slot: 0,
    }
}
