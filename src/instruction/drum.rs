//! Drum sequencer, event-driven and timed

use super::timer::TimeUnit;
use super::{resolve_setpoint, Source};
use crate::condition::Condition;
use crate::consts::MEM_DRUM_PREFIX;
use crate::context::ScanContext;
use crate::error::{EngineError, ExecuteState};
use crate::state::MemValue;
use crate::tag::Tag;
use crate::value::{store, Overflow, Scalar, Value};

/// One drum step: an output pattern plus its advance trigger.
#[derive(Debug, Clone)]
pub struct DrumStep {
    /// Output pattern, one bool per configured output coil.
    pub outputs: Vec<bool>,
    /// Event condition for event-driven drums.
    pub event: Option<Condition>,
    /// Preset (literal or tag) for timed drums, in the drum's time unit.
    pub preset: Option<Source>,
}

/// Advance mode.
#[derive(Debug, Clone, PartialEq)]
pub enum DrumKind {
    /// Advance on the per-step event's rising edge.
    Event,
    /// Advance when the per-step preset elapses.
    Timed(TimeUnit),
}

/// Drum sequencer: steps [1..N] driving an output matrix.
///
/// Jump and jog act on rising edges of their auxiliary conditions. The
/// last step sets the done bit, which latches until reset. Step
/// transitions clear the per-step timing and event arming state. While
/// disabled the drum holds its state and does not drive outputs.
#[derive(Debug, Clone)]
pub struct Drum {
    pub(crate) step_tag: Tag,
    pub(crate) done: Tag,
    pub(crate) outputs: Vec<Tag>,
    pub(crate) steps: Vec<DrumStep>,
    pub(crate) kind: DrumKind,
    pub(crate) jump: Option<(Condition, Source)>,
    pub(crate) jog: Option<Condition>,
    pub(crate) reset: Option<Condition>,
    pub(crate) slot: u32,
}

impl Drum {
    /// Jump to a target step (literal or tag) on the condition's rising
    /// edge.
    pub fn jump(mut self, cond: Condition, target: impl Into<Source>) -> Self {
        self.jump = Some((cond, target.into()));
        self
    }

    /// Advance one step on the condition's rising edge.
    pub fn jog(mut self, cond: Condition) -> Self {
        self.jog = Some(cond);
        self
    }

    /// Return to step 1 and clear the done latch while the condition
    /// holds.
    pub fn reset(mut self, cond: Condition) -> Self {
        self.reset = Some(cond);
        self
    }

    fn key(&self, field: &str) -> String {
        format!("{MEM_DRUM_PREFIX}{}:{field}", self.slot)
    }

    fn mem_f64(&self, ctx: &ScanContext, field: &str) -> f64 {
        ctx.get_memory(&self.key(field))
            .map(|m| m.as_f64())
            .unwrap_or(0.0)
    }

    fn mem_bool(&self, ctx: &ScanContext, field: &str) -> bool {
        ctx.get_memory(&self.key(field))
            .map(|m| m.as_bool())
            .unwrap_or(false)
    }

    fn eval(&self, ctx: &mut ScanContext, cond: &Condition) -> bool {
        match cond.evaluate(ctx) {
            Ok(v) => v,
            Err(e) => {
                ctx.raise_fault(e.fault());
                false
            }
        }
    }

    // Rising-edge helper over a drum-private memory slot.
    fn edge(&self, ctx: &mut ScanContext, field: &str, now: bool) -> bool {
        let prev = self.mem_bool(ctx, field);
        ctx.set_memory(self.key(field), MemValue::Bool(now));
        now && !prev
    }

    fn enter_step(&self, ctx: &mut ScanContext, step: i64) -> Result<(), EngineError> {
        let coerced = store(Scalar::Int(step), self.step_tag.tag_type(), Overflow::Clamp)
            .unwrap_or_else(|_| self.step_tag.tag_type().default_value());
        ctx.set_tag(&self.step_tag, coerced)?;
        ctx.set_memory(self.key("t"), MemValue::Float(0.0));
        ctx.set_memory(self.key("evprev"), MemValue::Bool(false));
        Ok(())
    }

    fn drive_outputs(&self, ctx: &mut ScanContext, step: i64) -> Result<(), EngineError> {
        let Some(pattern) = self.steps.get((step - 1) as usize) else {
            return Ok(());
        };
        for (tag, on) in self.outputs.iter().zip(&pattern.outputs) {
            ctx.set_tag(tag, Value::Bool(*on))?;
        }
        Ok(())
    }

    pub(crate) fn execute(
        &self,
        ctx: &mut ScanContext,
        enabled: bool,
    ) -> Result<ExecuteState, EngineError> {
        if !enabled {
            return Ok(ExecuteState::Proceed);
        }
        let last = self.steps.len() as i64;
        if last == 0 {
            return Ok(ExecuteState::Proceed);
        }

        if let Some(reset) = self.reset.clone() {
            if self.eval(ctx, &reset) {
                self.enter_step(ctx, 1)?;
                ctx.set_tag(&self.done, Value::Bool(false))?;
                self.drive_outputs(ctx, 1)?;
                return Ok(ExecuteState::Proceed);
            }
        }

        let mut step = ctx.get_tag(&self.step_tag).scalar().as_i64();
        if step < 1 || step > last {
            self.enter_step(ctx, 1)?;
            step = 1;
        }

        if ctx.get_tag(&self.done).truthy() {
            self.drive_outputs(ctx, step)?;
            return Ok(ExecuteState::Proceed);
        }

        if let Some((cond, target)) = self.jump.clone() {
            let now = self.eval(ctx, &cond);
            if self.edge(ctx, "jumpprev", now) {
                let target = resolve_setpoint(ctx, &target)
                    .unwrap_or(1)
                    .clamp(1, last);
                self.enter_step(ctx, target)?;
                self.drive_outputs(ctx, target)?;
                return Ok(ExecuteState::Proceed);
            }
        }

        let mut advance = false;
        if let Some(jog) = self.jog.clone() {
            let now = self.eval(ctx, &jog);
            if self.edge(ctx, "jogprev", now) {
                advance = true;
            }
        }

        if !advance {
            match &self.kind {
                DrumKind::Event => {
                    if let Some(event) = self.steps[(step - 1) as usize].event.clone() {
                        let now = self.eval(ctx, &event);
                        if self.edge(ctx, "evprev", now) {
                            advance = true;
                        }
                    }
                }
                DrumKind::Timed(unit) => {
                    let elapsed = self.mem_f64(ctx, "t") + ctx.dt() * unit.per_second();
                    ctx.set_memory(self.key("t"), MemValue::Float(elapsed));
                    let preset = self.steps[(step - 1) as usize]
                        .preset
                        .as_ref()
                        .and_then(|p| resolve_setpoint(ctx, p).ok())
                        .unwrap_or(0);
                    if elapsed >= preset as f64 {
                        advance = true;
                    }
                }
            }
        }

        if advance {
            if step >= last {
                ctx.set_tag(&self.done, Value::Bool(true))?;
            } else {
                step += 1;
                self.enter_step(ctx, step)?;
            }
        }
        self.drive_outputs(ctx, step)?;
        Ok(ExecuteState::Proceed)
    }

    /// Current-step accumulator tag.
    pub fn step_tag(&self) -> &Tag {
        &self.step_tag
    }

    /// Done bit tag.
    pub fn done(&self) -> &Tag {
        &self.done
    }

    /// Output coils, in pattern order.
    pub fn outputs(&self) -> &[Tag] {
        &self.outputs
    }

    /// Configured steps.
    pub fn steps(&self) -> &[DrumStep] {
        &self.steps
    }
}

impl From<Drum> for super::Instruction {
    fn from(i: Drum) -> Self {
        Self::Drum(i)
    }
}

/// Event-driven drum: each step advances on its event's rising edge.
pub fn drum_event(
    step_tag: &Tag,
    done: &Tag,
    outputs: impl IntoIterator<Item = Tag>,
    steps: impl IntoIterator<Item = (Vec<bool>, Condition)>,
) -> Drum {
    Drum {
        step_tag: step_tag.clone(),
        done: done.clone(),
        outputs: outputs.into_iter().collect(),
        steps: steps
            .into_iter()
            .map(|(outputs, event)| DrumStep {
                outputs,
                event: Some(event),
                preset: None,
            })
            .collect(),
        kind: DrumKind::Event,
        jump: None,
        jog: None,
        reset: None,
        slot: 0,
    }
}

/// Timed drum: each step advances when its preset elapses.
pub fn drum_timed(
    step_tag: &Tag,
    done: &Tag,
    outputs: impl IntoIterator<Item = Tag>,
    steps: impl IntoIterator<Item = (Vec<bool>, Source)>,
    unit: TimeUnit,
) -> Drum {
    Drum {
        step_tag: step_tag.clone(),
        done: done.clone(),
        outputs: outputs.into_iter().collect(),
        steps: steps
            .into_iter()
            .map(|(outputs, preset)| DrumStep {
                outputs,
                event: None,
                preset: Some(preset),
            })
            .collect(),
        kind: DrumKind::Timed(unit),
        jump: None,
        jog: None,
        reset: None,
        slot: 0,
    }
}
