//! Snapshot history
//!
//! An ordered ring of committed snapshots with optional bounded
//! retention. Labels attach names (and optional metadata) to retained
//! scans; evicting a scan prunes its labels.

use crate::error::EngineError;
use crate::state::SystemState;

use std::collections::VecDeque;
use std::sync::Arc;

/// Optional metadata attached to a label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelMetadata {
    /// RTC reading at label time, ISO formatted.
    pub rtc_iso: Option<String>,
    /// RTC offset from simulated time, in seconds.
    pub rtc_offset_seconds: Option<f64>,
}

/// A label resolved to its snapshot.
#[derive(Debug, Clone)]
pub struct LabeledScan {
    /// The label text.
    pub label: String,
    /// The labeled scan id.
    pub scan_id: u64,
    /// The labeled snapshot.
    pub snapshot: Arc<SystemState>,
    /// Metadata recorded with the label, if any.
    pub metadata: Option<LabelMetadata>,
}

#[derive(Debug, Clone)]
struct LabelEntry {
    label: String,
    scan_id: u64,
    metadata: Option<LabelMetadata>,
}

/// Ordered ring of snapshots with optional bounded capacity.
#[derive(Debug, Clone)]
pub struct History {
    snapshots: VecDeque<Arc<SystemState>>,
    labels: Vec<LabelEntry>,
    limit: Option<usize>,
}

impl History {
    /// History seeded with the initial snapshot.
    ///
    /// `limit` bounds retention to the most-recent contiguous window;
    /// `None` retains everything.
    pub fn new(initial: Arc<SystemState>, limit: Option<usize>) -> Self {
        let mut snapshots = VecDeque::new();
        snapshots.push_back(initial);
        Self {
            snapshots,
            labels: Vec::new(),
            limit,
        }
    }

    /// Retention bound.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Always false: history retains at least the initial snapshot.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Scan id of the newest retained snapshot.
    pub fn tip(&self) -> u64 {
        self.snapshots.back().map(|s| s.scan_id()).unwrap_or(0)
    }

    /// Scan id of the oldest retained snapshot.
    pub fn oldest(&self) -> u64 {
        self.snapshots.front().map(|s| s.scan_id()).unwrap_or(0)
    }

    /// Last `n` snapshots in chronological order.
    pub fn latest(&self, n: usize) -> Vec<Arc<SystemState>> {
        let skip = self.snapshots.len().saturating_sub(n);
        self.snapshots.iter().skip(skip).cloned().collect()
    }

    /// Exact snapshot for a scan id.
    pub fn at(&self, scan_id: u64) -> Result<Arc<SystemState>, EngineError> {
        self.snapshots
            .iter()
            .find(|s| s.scan_id() == scan_id)
            .cloned()
            .ok_or(EngineError::UnknownScan(scan_id))
    }

    /// Snapshots with `start <= scan_id < end`.
    pub fn range(&self, start: u64, end: u64) -> Vec<Arc<SystemState>> {
        self.snapshots
            .iter()
            .filter(|s| s.scan_id() >= start && s.scan_id() < end)
            .cloned()
            .collect()
    }

    /// Most-recent retained snapshot with `timestamp <= target`, if any.
    pub fn at_or_before(&self, target: f64) -> Option<Arc<SystemState>> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.timestamp() <= target)
            .cloned()
    }

    /// Append a committed snapshot. Scan ids must be strictly
    /// increasing; bounded histories evict the oldest snapshot and prune
    /// its labels.
    pub fn append(&mut self, snapshot: Arc<SystemState>) -> Result<(), EngineError> {
        let tip = self.tip();
        if snapshot.scan_id() <= tip {
            return Err(EngineError::NonMonotonicScan {
                tip,
                got: snapshot.scan_id(),
            });
        }
        self.snapshots.push_back(snapshot);
        if let Some(limit) = self.limit {
            while self.snapshots.len() > limit {
                if let Some(evicted) = self.snapshots.pop_front() {
                    tracing::trace!(scan_id = evicted.scan_id(), "history evicted scan");
                    self.labels.retain(|l| l.scan_id != evicted.scan_id());
                }
            }
        }
        Ok(())
    }

    /// Attach a label to a retained scan. Duplicate `(label, scan_id)`
    /// pairs are deduped; the metadata of the first wins.
    pub fn label_scan(
        &mut self,
        label: impl Into<String>,
        scan_id: u64,
        metadata: Option<LabelMetadata>,
    ) -> Result<(), EngineError> {
        let label = label.into();
        self.at(scan_id)?;
        if self
            .labels
            .iter()
            .any(|l| l.label == label && l.scan_id == scan_id)
        {
            return Ok(());
        }
        self.labels.push(LabelEntry {
            label,
            scan_id,
            metadata,
        });
        Ok(())
    }

    /// Most-recent snapshot bearing the label.
    pub fn find(&self, label: &str) -> Option<Arc<SystemState>> {
        self.find_all(label).pop()
    }

    /// All snapshots bearing the label, chronological.
    pub fn find_all(&self, label: &str) -> Vec<Arc<SystemState>> {
        let mut scans: Vec<u64> = self
            .labels
            .iter()
            .filter(|l| l.label == label)
            .map(|l| l.scan_id)
            .collect();
        scans.sort_unstable();
        scans
            .into_iter()
            .filter_map(|id| self.at(id).ok())
            .collect()
    }

    /// Most-recent labeled record, with metadata.
    pub fn find_labeled(&self, label: &str) -> Option<LabeledScan> {
        self.find_all_labeled(label).pop()
    }

    /// All labeled records for the label, chronological.
    pub fn find_all_labeled(&self, label: &str) -> Vec<LabeledScan> {
        let mut entries: Vec<&LabelEntry> =
            self.labels.iter().filter(|l| l.label == label).collect();
        entries.sort_by_key(|l| l.scan_id);
        entries
            .into_iter()
            .filter_map(|entry| {
                self.at(entry.scan_id).ok().map(|snapshot| LabeledScan {
                    label: entry.label.clone(),
                    scan_id: entry.scan_id,
                    snapshot,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect()
    }
}
