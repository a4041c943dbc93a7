//! Types for representing tracked allocation and deallocation events

#![forbid(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Environment symbol for the path of the human-readable trace file.
pub static ENV_LEAK_TRACE_FILE: &str = "LEAK_TRACE_FILE";

/// Environment symbol for the path of the binary event log dump written at shutdown.
pub static ENV_LEAK_TRACE_DUMP: &str = "LEAK_TRACE_DUMP";

/// Nanosecond timestamp type, relative to the creation of the recorder. Can only be used to
/// compare events of the same log to each other.
pub type Timestamp = u64;

/// Opaque address value of a memory region.
pub type Address = u64;

/// The kind of a recorded call.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum AllocKind {
    /// Single object acquisition.
    ScalarAlloc,
    /// Block acquisition for a sequence of elements.
    ArrayAlloc,
    /// Single object release. The address is not observable at the call site.
    ScalarFree,
    /// Block release, always address-identified.
    ArrayFree,
}

impl AllocKind {
    /// Tag used at the start of a trace line.
    pub fn tag(&self) -> &'static str {
        match self {
            AllocKind::ScalarAlloc => "new",
            AllocKind::ArrayAlloc => "new[]",
            AllocKind::ScalarFree => "delete",
            AllocKind::ArrayFree => "delete[]",
        }
    }

    /// `true` for the two acquisition kinds.
    pub fn is_allocation(&self) -> bool {
        matches!(self, AllocKind::ScalarAlloc | AllocKind::ArrayAlloc)
    }
}

/// Allocation kinds accepted by the recorder.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum AllocationKind {
    /// See [`AllocKind::ScalarAlloc`].
    Scalar,
    /// See [`AllocKind::ArrayAlloc`].
    Array,
}

impl From<AllocationKind> for AllocKind {
    fn from(kind: AllocationKind) -> Self {
        match kind {
            AllocationKind::Scalar => AllocKind::ScalarAlloc,
            AllocationKind::Array => AllocKind::ArrayAlloc,
        }
    }
}

/// Free kinds accepted by the recorder. Array frees always know their address, scalar frees
/// never do at the call site.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub enum FreeKind {
    /// See [`AllocKind::ScalarFree`].
    Scalar,
    /// See [`AllocKind::ArrayFree`].
    Array(Address),
}

impl FreeKind {
    /// The released address, if observable.
    pub fn ptr(&self) -> Option<Address> {
        match self {
            FreeKind::Scalar => None,
            FreeKind::Array(ptr) => Some(*ptr),
        }
    }
}

impl From<FreeKind> for AllocKind {
    fn from(kind: FreeKind) -> Self {
        match kind {
            FreeKind::Scalar => AllocKind::ScalarFree,
            FreeKind::Array(_) => AllocKind::ArrayFree,
        }
    }
}

/// Provenance of a recorded call.
#[derive(Debug, Clone, Serialize, Deserialize, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct SourceLocation {
    /// Source file.
    pub file: String,
    /// Name of the calling routine.
    pub function: String,
    /// Line in `file`, at least 1.
    pub line: u32,
}

impl SourceLocation {
    /// Construct a new location. A line of 0 is clamped to 1.
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line: line.max(1),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}:{}", self.function, self.file, self.line)
    }
}

/// Immutable record of one observed call.
///
/// The only mutation ever applied to a recorded event is the promotion of an unresolved
/// [`AllocKind::ScalarFree`] to an [`AllocKind::ArrayFree`] carrying an address.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AllocationEvent {
    /// Where the call happened.
    pub location: SourceLocation,
    /// What kind of call.
    pub kind: AllocKind,
    /// Byte size, only meaningful for allocations.
    pub size: usize,
    /// Address, absent for unresolved scalar frees.
    pub ptr: Option<Address>,
    /// Time of recording.
    pub timestamp: Timestamp,
    /// Opaque id of the recording thread.
    pub thread_id: u64,
}

impl AllocationEvent {
    /// An allocation of `size` bytes at `ptr`.
    pub fn allocation(
        location: SourceLocation,
        kind: AllocationKind,
        size: usize,
        ptr: Address,
    ) -> Self {
        Self {
            location,
            kind: kind.into(),
            size,
            ptr: Some(ptr),
            timestamp: 0,
            thread_id: 0,
        }
    }

    /// A free as observed at the call site.
    pub fn free(location: SourceLocation, kind: FreeKind) -> Self {
        Self {
            location,
            kind: kind.into(),
            size: 0,
            ptr: kind.ptr(),
            timestamp: 0,
            thread_id: 0,
        }
    }

    /// Attach recording time and thread.
    pub fn at(mut self, timestamp: Timestamp, thread_id: u64) -> Self {
        self.timestamp = timestamp;
        self.thread_id = thread_id;
        self
    }

    /// `true` if this is a scalar free still waiting for its address.
    pub fn is_unresolved_scalar_free(&self) -> bool {
        self.kind == AllocKind::ScalarFree && self.ptr.is_none()
    }
}

/// Renders the trace line for this event.
impl fmt::Display for AllocationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind.is_allocation() {
            write!(f, "{} size={}; location={}", self.kind.tag(), self.size, self.location)?;
        } else {
            write!(f, "{} location={}", self.kind.tag(), self.location)?;
        }
        if let Some(ptr) = self.ptr {
            write!(f, "; ptr={:#x}", ptr)?;
        }
        Ok(())
    }
}

/// A frozen event log, as written at shutdown and read by offline analysis.
#[derive(Debug, Default, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EventLogDump {
    /// Events in recording order.
    pub events: Vec<AllocationEvent>,
}
