//! Exit-time reconciliation of a recorded allocation event log.
//!
//! The analyzer walks the frozen log once, in recording order, and matches every free to the
//! allocation it terminates. Array frees carry their address and match exactly. Scalar frees carry
//! no address, so they are attributed to the largest scalar allocation outstanding at that point.
//! The resulting totals therefore bound the true values: deallocated bytes from below, leaked
//! bytes from above.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bincode::Options;
use leak_track_types::{Address, EventLogDump, SourceLocation, Timestamp};
use serde::{Deserialize, Serialize};

mod reconcile;
mod report;

pub use reconcile::analyze;
pub use report::ANALYSIS_HEADER;

/// Errors reading or writing an event log dump.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("failed to access dump file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed dump: {0}")]
    Codec(#[from] bincode::Error),
}

fn dump_options() -> impl Options {
    bincode::options().with_fixint_encoding()
}

/// Write a frozen event log to `path`, truncating it.
pub fn write_dump(path: &Path, dump: &EventLogDump) -> Result<(), DumpError> {
    let mut writer = BufWriter::new(File::create(path)?);
    dump_options().serialize_into(&mut writer, dump)?;
    writer.flush()?;
    Ok(())
}

/// Read a frozen event log from `path`.
pub fn read_dump(path: &Path) -> Result<EventLogDump, DumpError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(dump_options().deserialize_from(reader)?)
}

/// An allocation never matched to a free.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LeakedAllocation {
    pub location: SourceLocation,
    pub size: usize,
    pub ptr: Address,
    pub timestamp: Timestamp,
}

/// Result of one analysis pass.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LeakReport {
    /// Sum of all allocation sizes.
    pub total_allocated: u64,
    /// Sum of the sizes of matched allocations. A lower bound.
    pub total_freed: u64,
    /// Outstanding arrays. Matched by exact address, so these are certain.
    pub confirmed: Vec<LeakedAllocation>,
    /// Outstanding scalars. Matched by the size heuristic, so these may be false positives.
    pub possible: Vec<LeakedAllocation>,
    /// Scalar frees found with no outstanding scalar to attribute them to.
    pub unmatched_scalar_frees: usize,
    /// Array frees whose address was not outstanding.
    pub unmatched_array_frees: usize,
    /// Scalar entries retired because a later allocation reported the same address.
    pub reused_addresses: usize,
}

impl LeakReport {
    /// Upper bound on leaked bytes.
    pub fn leaked_bytes(&self) -> u64 {
        self.total_allocated.saturating_sub(self.total_freed)
    }

    /// Number of outstanding allocations.
    pub fn leaked_count(&self) -> usize {
        self.confirmed.len() + self.possible.len()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum AnalyzerState {
    Idle,
    Analyzing,
    Done,
}

/// One-shot analyzer. Transitions `Idle -> Analyzing -> Done` on the first [`LeakAnalyzer::run`]
/// and never analyzes again.
#[derive(Debug)]
pub struct LeakAnalyzer {
    state: AnalyzerState,
}

impl Default for LeakAnalyzer {
    fn default() -> Self {
        Self {
            state: AnalyzerState::Idle,
        }
    }
}

impl LeakAnalyzer {
    /// Analyze the finished log. Returns `None` if this analyzer already ran.
    pub fn run(&mut self, events: &[leak_track_types::AllocationEvent]) -> Option<LeakReport> {
        if self.state != AnalyzerState::Idle {
            log::debug!("leak analysis already ran, ignoring");
            return None;
        }
        self.state = AnalyzerState::Analyzing;
        let report = analyze(events);
        self.state = AnalyzerState::Done;
        Some(report)
    }

    /// `true` until [`LeakAnalyzer::run`] is first called.
    pub fn is_idle(&self) -> bool {
        self.state == AnalyzerState::Idle
    }

    /// `true` once the analysis pass completed.
    pub fn is_done(&self) -> bool {
        self.state == AnalyzerState::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leak_track_types::{AllocationEvent, AllocationKind};

    #[test]
    fn analyzer_runs_once() {
        let events = vec![AllocationEvent::allocation(
            SourceLocation::new("a.rs", "f", 1),
            AllocationKind::Scalar,
            4,
            0x10,
        )];
        let mut analyzer = LeakAnalyzer::default();
        assert!(analyzer.is_idle());
        assert!(!analyzer.is_done());
        assert_eq!(analyzer.run(&events).map(|r| r.leaked_bytes()), Some(4));
        assert!(analyzer.is_done());
        assert!(!analyzer.is_idle());
        assert!(analyzer.run(&events).is_none());
    }

    #[test]
    fn dump_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");
        let dump = EventLogDump {
            events: vec![AllocationEvent::allocation(
                SourceLocation::new("a.rs", "f", 3),
                AllocationKind::Array,
                16,
                0x20,
            )],
        };
        write_dump(&path, &dump).unwrap();
        assert_eq!(read_dump(&path).unwrap(), dump);
    }

    #[test]
    fn truncated_dump_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.bin");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        assert!(matches!(read_dump(&path), Err(DumpError::Codec(_))));
    }
}
