use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use leak_track_types::{AllocKind, AllocationEvent, Address};

use crate::{LeakReport, LeakedAllocation};

/// Working state of a single pass. Entries are identified by their index in the log.
struct Reconciler<'a> {
    events: &'a [AllocationEvent],
    /// Address -> indices of outstanding allocations, oldest first.
    outstanding: HashMap<Address, Vec<usize>>,
    /// Outstanding scalars by descending size, earliest first on ties. Entries matched by
    /// address stay in the heap and are skipped when popped.
    pending: BinaryHeap<(usize, Reverse<usize>)>,
    live: Vec<bool>,
    report: LeakReport,
}

impl<'a> Reconciler<'a> {
    fn new(events: &'a [AllocationEvent]) -> Self {
        Self {
            events,
            outstanding: Default::default(),
            pending: Default::default(),
            live: vec![false; events.len()],
            report: Default::default(),
        }
    }

    fn address(&self, index: usize) -> Address {
        self.events[index].ptr.unwrap_or_default()
    }

    fn remove(&mut self, index: usize) {
        self.live[index] = false;
        let ptr = self.address(index);
        if let Some(entries) = self.outstanding.get_mut(&ptr) {
            entries.retain(|entry| *entry != index);
            if entries.is_empty() {
                self.outstanding.remove(&ptr);
            }
        }
    }

    fn credit(&mut self, index: usize) {
        self.report.total_freed = self
            .report
            .total_freed
            .saturating_add(self.events[index].size as u64);
        self.remove(index);
    }

    fn allocate(&mut self, index: usize) {
        let events = self.events;
        let event = &events[index];
        self.report.total_allocated = self.report.total_allocated.saturating_add(event.size as u64);
        let ptr = self.address(index);
        // A live scalar at this address must have been released through a free we attributed
        // elsewhere. Retire it so one address never holds two scalar entries.
        let stale = self.outstanding.get(&ptr).and_then(|entries| {
            entries
                .iter()
                .copied()
                .find(|entry| events[*entry].kind == AllocKind::ScalarAlloc)
        });
        if let Some(stale) = stale {
            log::debug!("address {:#x} reused while scalar entry {} outstanding", ptr, stale);
            self.report.reused_addresses += 1;
            self.remove(stale);
        }
        self.live[index] = true;
        self.outstanding.entry(ptr).or_default().push(index);
        if event.kind == AllocKind::ScalarAlloc {
            self.pending.push((event.size, Reverse(index)));
        }
    }

    /// Attribute an address-less scalar free to the largest outstanding scalar.
    fn free_largest_scalar(&mut self) {
        while let Some((_size, Reverse(index))) = self.pending.pop() {
            if self.live[index] {
                self.credit(index);
                return;
            }
        }
        self.report.unmatched_scalar_frees += 1;
    }

    /// Match a free carrying an address. Prefers the most recent array at that address when
    /// `prefer` is an array kind, the most recent scalar otherwise.
    fn free_by_address(&mut self, ptr: Address, prefer: AllocKind) -> bool {
        let matched = self.outstanding.get(&ptr).and_then(|entries| {
            entries
                .iter()
                .rev()
                .copied()
                .find(|entry| self.events[*entry].kind == prefer)
                .or_else(|| entries.last().copied())
        });
        match matched {
            Some(index) => {
                self.credit(index);
                true
            }
            None => false,
        }
    }

    fn step(&mut self, index: usize) {
        let events = self.events;
        let event = &events[index];
        match (event.kind, event.ptr) {
            (AllocKind::ScalarAlloc | AllocKind::ArrayAlloc, _) => self.allocate(index),
            (AllocKind::ScalarFree, None) => self.free_largest_scalar(),
            (AllocKind::ScalarFree, Some(ptr)) => {
                if !self.free_by_address(ptr, AllocKind::ScalarAlloc) {
                    self.report.unmatched_scalar_frees += 1;
                }
            }
            (AllocKind::ArrayFree, Some(ptr)) => {
                if !self.free_by_address(ptr, AllocKind::ArrayAlloc) {
                    log::trace!("array free of unknown address {:#x}", ptr);
                    self.report.unmatched_array_frees += 1;
                }
            }
            (AllocKind::ArrayFree, None) => self.report.unmatched_array_frees += 1,
        }
    }

    fn finish(mut self) -> LeakReport {
        for (index, event) in self.events.iter().enumerate() {
            if !self.live[index] {
                continue;
            }
            let leaked = LeakedAllocation {
                location: event.location.clone(),
                size: event.size,
                ptr: event.ptr.unwrap_or_default(),
                timestamp: event.timestamp,
            };
            match event.kind {
                AllocKind::ArrayAlloc => self.report.confirmed.push(leaked),
                _ => self.report.possible.push(leaked),
            }
        }
        log::debug!(
            "reconciled {} events: {} unmatched scalar frees, {} unmatched array frees, {} reused addresses",
            self.events.len(),
            self.report.unmatched_scalar_frees,
            self.report.unmatched_array_frees,
            self.report.reused_addresses,
        );
        self.report
    }
}

/// Reconcile a finished event log in a single pass, in recording order.
///
/// This is a pure function of `events`; running it twice over the same log yields equal reports.
pub fn analyze(events: &[AllocationEvent]) -> LeakReport {
    let mut reconciler = Reconciler::new(events);
    for index in 0..events.len() {
        reconciler.step(index);
    }
    reconciler.finish()
}
