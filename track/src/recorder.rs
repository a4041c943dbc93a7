use std::alloc::{GlobalAlloc, Layout, System};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use leak_track_types::{
    Address, AllocKind, AllocationEvent, AllocationKind, FreeKind, SourceLocation, Timestamp,
};

use crate::config::TrackerConfig;
use crate::sink::TraceSink;

/// First line written to the sink.
pub const TRACE_HEADER: &str = "===== Runtime trace =====";

/// Shape of the region handed to the underlying release call.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionShape {
    Scalar,
    Array,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    Recording,
    Frozen,
}

/// Everything the analysis needs once recording stopped.
pub(crate) struct FrozenLog {
    pub events: Vec<AllocationEvent>,
    pub sink: TraceSink,
    pub dump_path: Option<PathBuf>,
}

/// The region actually requested from the system. Zero-sized layouts still get one byte so every
/// live allocation has a distinct address.
fn region(layout: Layout) -> Layout {
    Layout::from_size_align(layout.size().max(1), layout.align()).unwrap_or(layout)
}

fn thread_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    ID.try_with(|id| *id).unwrap_or(0)
}

/// Append-only event log mirrored to a trace sink.
///
/// Not synchronized; [`crate::Tracker`] puts it behind a single lock so that appending,
/// writing the line, and promoting a scalar free happen as one unit.
#[derive(Debug)]
pub struct Recorder {
    events: Vec<AllocationEvent>,
    sink: TraceSink,
    dump_path: Option<PathBuf>,
    epoch: Instant,
    phase: Phase,
}

impl Recorder {
    pub fn new(config: TrackerConfig) -> Self {
        let mut sink = TraceSink::open(config.sink);
        sink.line(format_args!("{}", TRACE_HEADER));
        Self {
            events: Vec::with_capacity(1024),
            sink,
            dump_path: config.dump_path,
            epoch: Instant::now(),
            phase: Phase::Recording,
        }
    }

    pub fn events(&self) -> &[AllocationEvent] {
        &self.events
    }

    pub fn is_frozen(&self) -> bool {
        self.phase == Phase::Frozen
    }

    pub fn sink_degraded(&self) -> bool {
        self.sink.is_degraded()
    }

    fn now(&self) -> Timestamp {
        self.epoch.elapsed().as_nanos() as Timestamp
    }

    fn push(&mut self, event: AllocationEvent) {
        if self.is_frozen() {
            return;
        }
        let event = event.at(self.now(), thread_id());
        self.sink.line(format_args!("{}", event));
        self.events.push(event);
    }

    /// Acquire `layout` from the system allocator and record it.
    ///
    /// Zero-sized layouts are backed by a one-byte region and recorded with size 0. A failed
    /// acquisition is recorded and returned as null.
    pub fn record_allocation(
        &mut self,
        location: SourceLocation,
        kind: AllocationKind,
        layout: Layout,
    ) -> *mut u8 {
        let ptr = unsafe { System.alloc(region(layout)) };
        self.push(AllocationEvent::allocation(
            location,
            kind,
            layout.size(),
            ptr as Address,
        ));
        ptr
    }

    /// Record a free observed at a call site. Scalar frees carry no address and may be resolved
    /// later by [`Recorder::release`].
    pub fn record_free(&mut self, location: SourceLocation, kind: FreeKind) {
        self.push(AllocationEvent::free(location, kind));
    }

    /// The underlying release call, intercepted separately from the call site.
    ///
    /// For array regions, the most recent event is promoted to an array free carrying `ptr` if it
    /// is an unresolved scalar free. This assumes the placeholder is the immediately preceding
    /// entry, which concurrent recording between the two calls can violate.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Recorder::record_allocation`] with the same `layout`, and must not
    /// be released twice.
    pub unsafe fn release(&mut self, ptr: *mut u8, layout: Layout, shape: RegionShape) {
        if shape == RegionShape::Array && !self.is_frozen() {
            if let Some(last) = self.events.last_mut() {
                if last.is_unresolved_scalar_free() {
                    last.kind = AllocKind::ArrayFree;
                    last.ptr = Some(ptr as Address);
                }
            }
            self.sink
                .line(format_args!("last delete was delete[] ptr={:#x}", ptr as Address));
        }
        if !ptr.is_null() {
            System.dealloc(ptr, region(layout));
        }
    }

    /// Stop recording and hand out the log. Returns `None` if already frozen.
    pub(crate) fn freeze(&mut self) -> Option<FrozenLog> {
        if self.is_frozen() {
            return None;
        }
        self.phase = Phase::Frozen;
        Some(FrozenLog {
            events: std::mem::take(&mut self.events),
            sink: std::mem::replace(&mut self.sink, TraceSink::disabled()),
            dump_path: self.dump_path.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, SinkConfig};

    fn recorder() -> (Recorder, MemorySink) {
        let memory = MemorySink::new();
        let recorder = Recorder::new(TrackerConfig::new(SinkConfig::Memory(memory.clone())));
        (recorder, memory)
    }

    fn here(line: u32) -> SourceLocation {
        SourceLocation::new("src/recorder.rs", "test", line)
    }

    #[test]
    fn allocation_is_usable_and_logged() {
        let (mut recorder, memory) = recorder();
        let layout = Layout::new::<u64>();
        let ptr = recorder.record_allocation(here(3), AllocationKind::Scalar, layout);
        assert!(!ptr.is_null());
        unsafe {
            (ptr as *mut u64).write(7);
            assert_eq!(*(ptr as *mut u64), 7);
        }
        let event = &recorder.events()[0];
        assert_eq!(event.kind, AllocKind::ScalarAlloc);
        assert_eq!(event.size, 8);
        assert_eq!(event.ptr, Some(ptr as Address));
        let contents = memory.contents();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(TRACE_HEADER));
        assert_eq!(
            lines.next().map(str::to_owned),
            Some(format!("new size=8; location=test in src/recorder.rs:3; ptr={:#x}", ptr as Address))
        );
        unsafe { recorder.release(ptr, layout, RegionShape::Scalar) };
    }

    #[test]
    fn array_release_promotes_placeholder() {
        let (mut recorder, memory) = recorder();
        let layout = Layout::array::<u32>(4).unwrap();
        let ptr = recorder.record_allocation(here(1), AllocationKind::Array, layout);
        recorder.record_free(here(2), FreeKind::Scalar);
        unsafe { recorder.release(ptr, layout, RegionShape::Array) };
        let last = recorder.events().last().unwrap();
        assert_eq!(last.kind, AllocKind::ArrayFree);
        assert_eq!(last.ptr, Some(ptr as Address));
        assert!(memory
            .contents()
            .ends_with(&format!("last delete was delete[] ptr={:#x}\n", ptr as Address)));
    }

    #[test]
    fn scalar_release_leaves_placeholder() {
        let (mut recorder, _memory) = recorder();
        let layout = Layout::new::<u16>();
        let ptr = recorder.record_allocation(here(1), AllocationKind::Scalar, layout);
        recorder.record_free(here(2), FreeKind::Scalar);
        unsafe { recorder.release(ptr, layout, RegionShape::Scalar) };
        assert!(recorder.events()[1].is_unresolved_scalar_free());
    }

    #[test]
    fn array_release_does_not_touch_resolved_events() {
        let (mut recorder, _memory) = recorder();
        let layout = Layout::array::<u8>(3).unwrap();
        let ptr = recorder.record_allocation(here(1), AllocationKind::Array, layout);
        unsafe { recorder.release(ptr, layout, RegionShape::Array) };
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(recorder.events()[0].kind, AllocKind::ArrayAlloc);
    }

    #[test]
    fn zero_sized_allocations_are_aligned_and_distinct() {
        let (mut recorder, _memory) = recorder();
        let layout = Layout::from_size_align(0, 16).unwrap();
        let first = recorder.record_allocation(here(1), AllocationKind::Array, layout);
        let second = recorder.record_allocation(here(2), AllocationKind::Scalar, Layout::new::<()>());
        assert!(!first.is_null());
        assert_eq!(first as usize % 16, 0);
        assert_ne!(first, second);
        assert!(recorder.events().iter().all(|event| event.size == 0));
        unsafe {
            recorder.release(first, layout, RegionShape::Array);
            recorder.release(second, Layout::new::<()>(), RegionShape::Scalar);
        }
    }

    #[test]
    fn frozen_recorder_stops_appending() {
        let (mut recorder, _memory) = recorder();
        recorder.record_free(here(1), FreeKind::Scalar);
        let frozen = recorder.freeze().unwrap();
        assert_eq!(frozen.events.len(), 1);
        assert!(recorder.freeze().is_none());
        let layout = Layout::new::<u8>();
        let ptr = recorder.record_allocation(here(2), AllocationKind::Scalar, layout);
        assert!(recorder.events().is_empty());
        unsafe { recorder.release(ptr, layout, RegionShape::Scalar) };
    }
}
