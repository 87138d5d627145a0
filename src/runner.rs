//! Scan loop driver
//!
//! A [`Runner`] owns the current snapshot, history, force and patch
//! tables, and time mode, and drives the per-scan cycle: patches merge
//! into the base snapshot, system points run their scan-start hooks,
//! main rungs evaluate in order, scan-end bookkeeping runs, edge-previous
//! values are recorded, and the context commits to a new snapshot that is
//! appended to history before monitor callbacks fire.
//!
//! Runners are single-threaded cooperative: one scan runs start to finish
//! before any external mutation can observe state.

use crate::consts::MEM_RTC_ANCHOR;
use crate::context::ScanContext;
use crate::error::EngineError;
use crate::history::{History, LabelMetadata};
use crate::program::Program;
use crate::state::{MemValue, SystemState};
use crate::system;
use crate::tag::Tag;
use crate::value::Value;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Simulated-time advance policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeMode {
    /// Deterministic fixed step per scan; canonical for testing.
    FixedStep {
        /// Seconds per scan.
        dt: f64,
    },
    /// Wall-clock delta since the previous scan.
    Realtime,
}

impl TimeMode {
    /// The fixed-step interval, when in fixed-step mode.
    pub fn fixed_dt(&self) -> Option<f64> {
        match self {
            Self::FixedStep { dt } => Some(*dt),
            Self::Realtime => None,
        }
    }
}

/// Default fixed step: 10 ms per scan.
pub const DEFAULT_FIXED_DT: f64 = 0.010;

/// Handle to a registered monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(u64);

/// Handle to a registered data breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataBreakpointId(u64);

/// Change notification delivered to monitor callbacks post-commit.
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    /// Monitored tag name.
    pub tag: String,
    /// Value in the just-committed snapshot.
    pub current: Value,
    /// Value in the prior retained snapshot, if the tag existed.
    pub previous: Option<Value>,
    /// Scan id of the just-committed snapshot.
    pub scan_id: u64,
}

/// A pause request raised by a data breakpoint.
#[derive(Debug, Clone)]
pub struct PauseHit {
    /// The breakpoint that fired.
    pub id: DataBreakpointId,
    /// Watched tag name.
    pub tag: String,
    /// Scan id at which it fired.
    pub scan_id: u64,
}

type MonitorCallback = Box<dyn FnMut(&MonitorEvent)>;
type DataPredicate = Box<dyn Fn(&Value) -> bool>;

struct MonitorEntry {
    id: MonitorId,
    tag: String,
    callback: MonitorCallback,
}

struct DataBreakpointEntry {
    id: DataBreakpointId,
    tag: String,
    predicate: Option<DataPredicate>,
    hit_condition: Option<u32>,
    hits: u32,
}

/// Scan loop driver over one program.
pub struct Runner {
    program: Arc<Program>,
    state: Arc<SystemState>,
    history: History,
    playhead: u64,
    forces: BTreeMap<String, Value>,
    pending_patches: BTreeMap<String, Value>,
    time_mode: TimeMode,
    last_instant: Option<Instant>,
    monitors: Vec<MonitorEntry>,
    data_breakpoints: Vec<DataBreakpointEntry>,
    next_observer_id: u64,
    pause_queue: Vec<PauseHit>,
    deferred_labels: Vec<String>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("scan_id", &self.state.scan_id())
            .field("playhead", &self.playhead)
            .field("time_mode", &self.time_mode)
            .field("forces", &self.forces)
            .finish()
    }
}

impl Runner {
    /// Runner over `program` with a fresh initial snapshot and unbounded
    /// history.
    pub fn new(program: Program) -> Self {
        Self::with_options(program, None, None).expect("default runner options are valid")
    }

    /// Runner with an explicit initial snapshot and/or history bound.
    pub fn with_options(
        program: Program,
        initial_state: Option<SystemState>,
        history_limit: Option<usize>,
    ) -> Result<Self, EngineError> {
        if history_limit == Some(0) {
            return Err(EngineError::InvalidArgument(
                "history_limit must be >= 1 or None".into(),
            ));
        }
        let state = Arc::new(initial_state.unwrap_or_default());
        let playhead = state.scan_id();
        let history = History::new(state.clone(), history_limit);
        Ok(Self {
            program: Arc::new(program),
            state,
            history,
            playhead,
            forces: BTreeMap::new(),
            pending_patches: BTreeMap::new(),
            time_mode: TimeMode::FixedStep {
                dt: DEFAULT_FIXED_DT,
            },
            last_instant: None,
            monitors: Vec::new(),
            data_breakpoints: Vec::new(),
            next_observer_id: 1,
            pause_queue: Vec::new(),
            deferred_labels: Vec::new(),
        })
    }

    fn fork_with_state(&self, state: Arc<SystemState>) -> Self {
        Self {
            program: self.program.clone(),
            state: state.clone(),
            playhead: state.scan_id(),
            history: History::new(state, self.history.limit()),
            forces: BTreeMap::new(),
            pending_patches: BTreeMap::new(),
            time_mode: self.time_mode,
            last_instant: None,
            monitors: Vec::new(),
            data_breakpoints: Vec::new(),
            next_observer_id: 1,
            pause_queue: Vec::new(),
            deferred_labels: Vec::new(),
        }
    }

    /// The program under execution.
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn program_arc(&self) -> Arc<Program> {
        self.program.clone()
    }

    /// The last committed snapshot.
    pub fn current_state(&self) -> Arc<SystemState> {
        self.state.clone()
    }

    /// The history cursor (independent of the tip).
    pub fn playhead(&self) -> u64 {
        self.playhead
    }

    /// Retained history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Active forces.
    pub fn forces(&self) -> &BTreeMap<String, Value> {
        &self.forces
    }

    /// Patches staged for the next scan.
    pub fn pending_patches(&self) -> &BTreeMap<String, Value> {
        &self.pending_patches
    }

    /// Current time mode.
    pub fn time_mode(&self) -> TimeMode {
        self.time_mode
    }

    /// Switch time modes. Resets the realtime reference instant.
    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.time_mode = mode;
        self.last_instant = None;
    }

    /// Anchor the RTC so it reads `datetime` at the current simulated
    /// time.
    pub fn set_rtc(&mut self, datetime: time::OffsetDateTime) {
        let anchor =
            system::anchor_for(datetime.unix_timestamp() as f64, self.state.timestamp());
        self.state = Arc::new(
            self.state
                .with_memory([(MEM_RTC_ANCHOR.to_string(), MemValue::Float(anchor))]),
        );
    }

    /// Stage exogenous writes, applied to the snapshot before the next
    /// scan. Patches bypass coercion; read-only system tags refuse
    /// immediately.
    pub fn patch(
        &mut self,
        updates: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), EngineError> {
        for (name, value) in updates {
            if system::is_read_only(&name) {
                return Err(EngineError::ReadOnlyWrite(name));
            }
            self.pending_patches.insert(name, value);
        }
        Ok(())
    }

    /// Force a tag: reads return the forced value, logic writes are
    /// discarded, until the force is removed.
    pub fn add_force(&mut self, tag: &Tag, value: Value) -> Result<(), EngineError> {
        if system::is_read_only(tag.name()) {
            return Err(EngineError::ReadOnlyForce(tag.name().into()));
        }
        self.forces.insert(tag.name().into(), value);
        Ok(())
    }

    /// Remove one force.
    pub fn remove_force(&mut self, name: &str) -> bool {
        self.forces.remove(name).is_some()
    }

    /// Remove all forces.
    pub fn clear_forces(&mut self) {
        self.forces.clear();
    }

    /// Resolve a tag against the current snapshot, including derived
    /// system points and active forces.
    pub fn resolve_tag(&self, tag: &Tag) -> Value {
        let ctx = ScanContext::new(
            self.state.clone(),
            0.0,
            self.time_mode.fixed_dt(),
            self.forces.clone(),
        );
        ctx.get_tag(tag)
    }

    fn next_dt(&mut self) -> f64 {
        match self.time_mode {
            TimeMode::FixedStep { dt } => dt,
            TimeMode::Realtime => {
                let now = Instant::now();
                let dt = self
                    .last_instant
                    .map(|prev| now.duration_since(prev).as_secs_f64())
                    .unwrap_or(0.0);
                self.last_instant = Some(now);
                dt
            }
        }
    }

    /// Open the next scan: merge pending patches into the base snapshot,
    /// advance time, and run scan-start system hooks. The patches stay
    /// pending until the scan commits, so a failed scan leaves them
    /// staged.
    pub(crate) fn prepare_scan(&mut self) -> ScanContext {
        let base = if self.pending_patches.is_empty() {
            self.state.clone()
        } else {
            Arc::new(
                self.state
                    .with_tags(self.pending_patches.clone().into_iter()),
            )
        };
        let dt = self.next_dt();
        tracing::trace!(scan_id = base.scan_id() + 1, dt, "scan start");
        let mut ctx = ScanContext::new(base, dt, self.time_mode.fixed_dt(), self.forces.clone());
        system::on_scan_start(&mut ctx);
        ctx
    }

    /// Close a scan: scan-end hooks, edge bookkeeping, commit, history
    /// append, label flush, playhead tracking, observer dispatch.
    pub(crate) fn finish_scan(
        &mut self,
        mut ctx: ScanContext,
    ) -> Result<Arc<SystemState>, EngineError> {
        system::on_scan_end(&mut ctx);
        let program = self.program.clone();
        for tag in program.edge_tags() {
            ctx.record_edge_prev(tag);
        }

        let committed = Arc::new(ctx.commit());
        let previous = std::mem::replace(&mut self.state, committed.clone());
        self.pending_patches.clear();

        self.history.append(committed.clone())?;
        for label in std::mem::take(&mut self.deferred_labels) {
            self.history
                .label_scan(label, committed.scan_id(), None)?;
        }

        if self.playhead == previous.scan_id() {
            self.playhead = committed.scan_id();
        }
        if self.playhead < self.history.oldest() {
            self.playhead = self.history.oldest();
        }

        self.dispatch_observers(&previous, &committed);
        tracing::debug!(scan_id = committed.scan_id(), "scan committed");
        Ok(committed)
    }

    /// Execute one scan cycle and return the committed snapshot.
    pub fn step(&mut self) -> Result<Arc<SystemState>, EngineError> {
        let mut ctx = self.prepare_scan();
        let program = self.program.clone();
        program.evaluate(&mut ctx)?;
        self.finish_scan(ctx)
    }

    /// Execute `cycles` scans.
    pub fn run(&mut self, cycles: usize) -> Result<Arc<SystemState>, EngineError> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(self.current_state())
    }

    fn dispatch_observers(&mut self, previous: &SystemState, committed: &SystemState) {
        for entry in &mut self.monitors {
            let current = committed.tag(&entry.tag);
            let prior = previous.tag(&entry.tag);
            if let Some(current) = current {
                if prior != Some(current) {
                    (entry.callback)(&MonitorEvent {
                        tag: entry.tag.clone(),
                        current: *current,
                        previous: prior.copied(),
                        scan_id: committed.scan_id(),
                    });
                }
            }
        }

        for entry in &mut self.data_breakpoints {
            let Some(current) = committed.tag(&entry.tag) else {
                continue;
            };
            if previous.tag(&entry.tag) == Some(current) {
                continue;
            }
            if let Some(predicate) = &entry.predicate {
                if !predicate(current) {
                    continue;
                }
            }
            entry.hits += 1;
            if let Some(required) = entry.hit_condition {
                if entry.hits != required {
                    continue;
                }
            }
            self.pause_queue.push(PauseHit {
                id: entry.id,
                tag: entry.tag.clone(),
                scan_id: committed.scan_id(),
            });
        }
    }

    /// Register a monitor fired on every post-commit change of the tag.
    pub fn monitor(
        &mut self,
        tag: &Tag,
        callback: impl FnMut(&MonitorEvent) + 'static,
    ) -> MonitorId {
        let id = MonitorId(self.next_observer_id);
        self.next_observer_id += 1;
        self.monitors.push(MonitorEntry {
            id,
            tag: tag.name().into(),
            callback: Box::new(callback),
        });
        id
    }

    /// Dispose a monitor registration.
    pub fn remove_monitor(&mut self, id: MonitorId) -> bool {
        let before = self.monitors.len();
        self.monitors.retain(|m| m.id != id);
        self.monitors.len() != before
    }

    /// Register a data breakpoint: pause when the tag changes, the
    /// optional predicate holds, and the optional hit count is reached.
    pub fn data_breakpoint(
        &mut self,
        tag: &Tag,
        predicate: Option<Box<dyn Fn(&Value) -> bool>>,
        hit_condition: Option<u32>,
    ) -> DataBreakpointId {
        let id = DataBreakpointId(self.next_observer_id);
        self.next_observer_id += 1;
        self.data_breakpoints.push(DataBreakpointEntry {
            id,
            tag: tag.name().into(),
            predicate,
            hit_condition,
            hits: 0,
        });
        id
    }

    /// Dispose a data breakpoint registration.
    pub fn remove_data_breakpoint(&mut self, id: DataBreakpointId) -> bool {
        let before = self.data_breakpoints.len();
        self.data_breakpoints.retain(|b| b.id != id);
        self.data_breakpoints.len() != before
    }

    /// Drain pause requests raised by data breakpoints.
    pub fn take_pause_requests(&mut self) -> Vec<PauseHit> {
        std::mem::take(&mut self.pause_queue)
    }

    /// Detach all monitors and data breakpoints.
    pub fn clear_observers(&mut self) {
        self.monitors.clear();
        self.data_breakpoints.clear();
        self.pause_queue.clear();
    }

    /// Move the playhead to a retained scan without changing the tip.
    pub fn seek(&mut self, scan_id: u64) -> Result<Arc<SystemState>, EngineError> {
        let snapshot = self.history.at(scan_id)?;
        self.playhead = scan_id;
        Ok(snapshot)
    }

    /// Move the playhead to the most-recent scan at least `seconds`
    /// behind the tip, clamped to the oldest retained scan.
    pub fn rewind(&mut self, seconds: f64) -> Result<Arc<SystemState>, EngineError> {
        if seconds < 0.0 {
            return Err(EngineError::InvalidArgument(
                "seconds must be >= 0".into(),
            ));
        }
        let target = self.state.timestamp() - seconds;
        let snapshot = match self.history.at_or_before(target) {
            Some(s) => s,
            None => self.history.at(self.history.oldest())?,
        };
        self.playhead = snapshot.scan_id();
        Ok(snapshot)
    }

    /// New runner seeded from a retained snapshot (default: current
    /// tip), inheriting history limit and time mode but no forces,
    /// patches, or observers.
    pub fn fork(&self, scan_id: Option<u64>) -> Result<Runner, EngineError> {
        let snapshot = match scan_id {
            Some(id) => self.history.at(id)?,
            None => self.state.clone(),
        };
        Ok(self.fork_with_state(snapshot))
    }

    /// Sorted map of tags whose values differ between two retained
    /// scans; tags absent on one side read as `None`.
    #[allow(clippy::type_complexity)]
    pub fn diff(
        &self,
        a: u64,
        b: u64,
    ) -> Result<BTreeMap<String, (Option<Value>, Option<Value>)>, EngineError> {
        let left = self.history.at(a)?;
        let right = self.history.at(b)?;
        let mut out = BTreeMap::new();
        let names = left.tags().keys().chain(right.tags().keys());
        for name in names {
            let old = left.tag(name).copied();
            let new = right.tag(name).copied();
            if old != new {
                out.insert(name.clone(), (old, new));
            }
        }
        Ok(out)
    }

    /// Attach a label to a retained scan.
    pub fn label_scan(
        &mut self,
        label: impl Into<String>,
        scan_id: u64,
        metadata: Option<LabelMetadata>,
    ) -> Result<(), EngineError> {
        self.history.label_scan(label, scan_id, metadata)
    }

    /// Label the next committed scan (used by snapshot logpoints hit
    /// mid-scan).
    pub fn defer_label(&mut self, label: impl Into<String>) {
        self.deferred_labels.push(label.into());
    }
}
