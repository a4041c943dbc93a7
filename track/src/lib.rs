//! Call-site allocation tracking with an exit-time leak report.
//!
//! A [`Tracker`] records every tracked allocation and free in an append-only log and mirrors each
//! one as a trace line. [`Tracker::shutdown`] freezes the log, reconciles frees against
//! allocations and writes the report.
//!
//! ```no_run
//! use leak_analysis_track::{track_delete, track_new, SinkConfig, Tracker, TrackerConfig};
//!
//! let tracker = Tracker::new(TrackerConfig::new(SinkConfig::Stderr));
//! let _guard = tracker.guard();
//! let value = track_new!(tracker, 42u32);
//! unsafe { track_delete!(tracker, value) };
//! ```

use std::alloc::Layout;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use leak_analysis::{write_dump, LeakAnalyzer, LeakReport};
use leak_track_types::{AllocationEvent, EventLogDump};

pub use leak_track_types::{AllocationKind, FreeKind, SourceLocation};

pub use crate::config::TrackerConfig;
pub use crate::recorder::{Recorder, RegionShape, TRACE_HEADER};
pub use crate::sink::{MemorySink, SinkConfig, SinkError, TraceSink};

mod config;
pub mod global;
#[doc(hidden)]
pub mod macros;
mod recorder;
mod sink;

/// Shared handle to a [`Recorder`] and the analyzer that runs over its log at shutdown. Clones
/// refer to the same log.
#[derive(Clone, Debug)]
pub struct Tracker {
    inner: Arc<Mutex<Recorder>>,
    analyzer: Arc<Mutex<LeakAnalyzer>>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Recorder::new(config))),
            analyzer: Default::default(),
        }
    }

    fn with<R, F: FnOnce(&mut Recorder) -> R>(&self, f: F) -> R {
        let mut recorder = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *recorder)
    }

    /// See [`Recorder::record_allocation`].
    pub fn record_allocation(
        &self,
        location: SourceLocation,
        kind: AllocationKind,
        layout: Layout,
    ) -> *mut u8 {
        self.with(|recorder| recorder.record_allocation(location, kind, layout))
    }

    /// See [`Recorder::record_free`].
    pub fn record_free(&self, location: SourceLocation, kind: FreeKind) {
        self.with(|recorder| recorder.record_free(location, kind))
    }

    /// See [`Recorder::release`].
    ///
    /// # Safety
    ///
    /// Same contract as [`Recorder::release`].
    pub unsafe fn release(&self, ptr: *mut u8, layout: Layout, shape: RegionShape) {
        self.with(|recorder| recorder.release(ptr, layout, shape))
    }

    /// Move `value` into a tracked scalar allocation. Returns null if the allocation failed.
    pub fn new_object<T>(&self, location: SourceLocation, value: T) -> *mut T {
        let ptr = self.record_allocation(location, AllocationKind::Scalar, Layout::new::<T>()) as *mut T;
        if !ptr.is_null() {
            unsafe { ptr.write(value) };
        }
        ptr
    }

    /// Drop and release an object from [`Tracker::new_object`]. Null is a no-op.
    ///
    /// The release is recorded as an address-less scalar free.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Tracker::new_object`] on this tracker and must not be used again.
    pub unsafe fn delete_object<T>(&self, location: SourceLocation, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        // Drop outside the lock, destructors may free tracked memory themselves.
        ptr::drop_in_place(ptr);
        self.with(|recorder| {
            recorder.record_free(location, FreeKind::Scalar);
            recorder.release(ptr as *mut u8, Layout::new::<T>(), RegionShape::Scalar);
        })
    }

    /// Allocate a tracked array of `len` clones of `value`.
    ///
    /// Returns an empty slice pointer at null if the layout overflows or the allocation failed.
    pub fn new_array<T: Clone>(&self, location: SourceLocation, len: usize, value: T) -> *mut [T] {
        let layout = match Layout::array::<T>(len) {
            Ok(layout) => layout,
            Err(err) => {
                log::warn!("array of {} elements at {}: {}", len, location, err);
                return ptr::slice_from_raw_parts_mut(ptr::null_mut(), 0);
            }
        };
        let data = self.record_allocation(location, AllocationKind::Array, layout) as *mut T;
        if data.is_null() {
            return ptr::slice_from_raw_parts_mut(data, 0);
        }
        for index in 0..len {
            unsafe { data.add(index).write(value.clone()) };
        }
        ptr::slice_from_raw_parts_mut(data, len)
    }

    /// Drop and release an array from [`Tracker::new_array`]. Null is a no-op.
    ///
    /// Recorded like a scalar free first; the release then promotes it to an array free.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`Tracker::new_array`] on this tracker and must not be used again.
    pub unsafe fn delete_array<T>(&self, location: SourceLocation, ptr: *mut [T]) {
        let data = ptr as *mut T;
        if data.is_null() {
            return;
        }
        let len = ptr.len();
        ptr::drop_in_place(ptr);
        let layout = match Layout::array::<T>(len) {
            Ok(layout) => layout,
            Err(_) => return,
        };
        self.with(|recorder| {
            recorder.record_free(location, FreeKind::Scalar);
            recorder.release(data as *mut u8, layout, RegionShape::Array);
        })
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<AllocationEvent> {
        self.with(|recorder| recorder.events().to_vec())
    }

    /// `true` once [`Tracker::shutdown`] ran.
    pub fn is_shut_down(&self) -> bool {
        self.with(|recorder| recorder.is_frozen())
    }

    /// Freeze the log, analyze it and write the report to the sink, then close the sink.
    ///
    /// Runs at most once: the analyzer leaves `Idle` on the first call and later calls return
    /// `None`. Recording after shutdown keeps its memory semantics but is no longer logged.
    /// Callers must make sure no other thread is still recording events that should be part of
    /// the report.
    pub fn shutdown(&self) -> Option<LeakReport> {
        let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
        if !analyzer.is_idle() {
            return None;
        }
        let frozen = self.with(|recorder| recorder.freeze())?;
        let mut sink = frozen.sink;
        let report = analyzer.run(&frozen.events)?;
        log::debug!(
            "leak analysis over {} events: {} bytes outstanding in {} allocations",
            frozen.events.len(),
            report.leaked_bytes(),
            report.leaked_count()
        );
        sink.line(format_args!(""));
        sink.block(&report.to_string());
        if let Some(path) = frozen.dump_path {
            let dump = EventLogDump {
                events: frozen.events,
            };
            if let Err(err) = write_dump(&path, &dump) {
                log::warn!("cannot write event log to {}: {}", path.display(), err);
            }
        }
        sink.close();
        Some(report)
    }

    /// Shut down when the returned guard is dropped.
    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            tracker: self.clone(),
        }
    }
}

/// Calls [`Tracker::shutdown`] on drop.
#[must_use = "the tracker shuts down when the guard is dropped"]
#[derive(Debug)]
pub struct ShutdownGuard {
    tracker: Tracker,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        std::mem::drop(self.tracker.shutdown());
    }
}
