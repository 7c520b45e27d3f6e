// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Memory statistics for a plain Rust process.
//!
//! Rust has no collector, so the GC snapshot is always empty. Heap counters are
//! only populated when the binary installs [`CountingAlloc`]:
//!
//! ```no_run
//! #[global_allocator]
//! static ALLOC: pprof_plugin::runtime::process::CountingAlloc =
//!     pprof_plugin::runtime::process::CountingAlloc::system();
//! ```
//!
//! OS-level numbers come from `/proc/self` on Linux and are zero elsewhere.

use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::atomic::{AtomicU64, Ordering},
};

use super::{GcStats, MemStats, StatsSource};

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static FREED_BYTES: AtomicU64 = AtomicU64::new(0);
static MALLOCS: AtomicU64 = AtomicU64::new(0);
static FREES: AtomicU64 = AtomicU64::new(0);

/// A global allocator wrapper counting allocations for [`ProcessStats`].
#[derive(Debug, Default)]
pub struct CountingAlloc<A = System> {
    inner: A,
}

impl CountingAlloc<System> {
    /// Count allocations made through the system allocator.
    pub const fn system() -> Self {
        CountingAlloc { inner: System }
    }
}

impl<A> CountingAlloc<A> {
    /// Count allocations made through `inner`.
    pub const fn new(inner: A) -> Self {
        CountingAlloc { inner }
    }
}

fn record_alloc(size: usize) {
    MALLOCS.fetch_add(1, Ordering::Relaxed);
    ALLOCATED_BYTES.fetch_add(size as u64, Ordering::Relaxed);
}

fn record_free(size: usize) {
    FREES.fetch_add(1, Ordering::Relaxed);
    FREED_BYTES.fetch_add(size as u64, Ordering::Relaxed);
}

// SAFETY: every call is forwarded unchanged to the wrapped allocator.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAlloc<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            record_free(layout.size());
            record_alloc(new_size);
        }
        new_ptr
    }
}

/// OS-level memory figures, in bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OsMemory {
    /// Virtual size, reported as `Sys`.
    vm_size: u64,
    /// Resident data segment, reported as `HeapSys`.
    vm_data: u64,
    /// Main thread stack.
    vm_stack: u64,
}

/// Parse `VmSize`, `VmData` and `VmStk` out of `/proc/self/status`.
fn parse_proc_status(status: &str) -> OsMemory {
    let kib = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|v| v.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0)
    };
    let mut mem = OsMemory::default();
    for line in status.lines() {
        if line.starts_with("VmSize:") {
            mem.vm_size = kib(line);
        } else if line.starts_with("VmData:") {
            mem.vm_data = kib(line);
        } else if line.starts_with("VmStk:") {
            mem.vm_stack = kib(line);
        }
    }
    mem
}

#[cfg(target_os = "linux")]
fn os_memory() -> OsMemory {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => parse_proc_status(&status),
        Err(err) => {
            tracing::debug!(?err, "unable to read /proc/self/status");
            OsMemory::default()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn os_memory() -> OsMemory {
    OsMemory::default()
}

/// [`StatsSource`] for the current Rust process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessStats;

impl StatsSource for ProcessStats {
    fn read_mem_stats(&self) -> MemStats {
        let allocated = ALLOCATED_BYTES.load(Ordering::Relaxed);
        let freed = FREED_BYTES.load(Ordering::Relaxed);
        let mallocs = MALLOCS.load(Ordering::Relaxed);
        let frees = FREES.load(Ordering::Relaxed);
        let os = os_memory();

        let heap_alloc = allocated.saturating_sub(freed);
        let heap_sys = os.vm_data.max(heap_alloc);
        MemStats {
            heap_alloc,
            total_alloc: allocated,
            sys: os.vm_size,
            heap_sys,
            heap_idle: heap_sys - heap_alloc,
            heap_inuse: heap_alloc,
            heap_objects: mallocs.saturating_sub(frees),
            mallocs,
            frees,
            stack_inuse: os.vm_stack,
            stack_sys: os.vm_stack,
            other_sys: os
                .vm_size
                .saturating_sub(heap_sys)
                .saturating_sub(os.vm_stack),
            ..MemStats::default()
        }
    }

    fn read_gc_stats(&self) -> GcStats {
        GcStats::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tcat\nVmPeak:\t    9000 kB\nVmSize:\t    8000 kB\n\
                          VmData:\t     360 kB\nVmStk:\t     132 kB\nThreads:\t1\n";

    #[test]
    fn test_parse_proc_status() {
        assert_eq!(
            parse_proc_status(STATUS),
            OsMemory {
                vm_size: 8000 * 1024,
                vm_data: 360 * 1024,
                vm_stack: 132 * 1024,
            }
        );
        assert_eq!(parse_proc_status("garbage"), OsMemory::default());
    }

    #[test]
    fn test_counting_alloc_records() {
        let alloc = CountingAlloc::system();
        let before = MALLOCS.load(Ordering::Relaxed);
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = alloc.alloc(layout);
            assert!(!ptr.is_null());
            alloc.dealloc(ptr, layout);
        }
        assert!(MALLOCS.load(Ordering::Relaxed) > before);
    }

    #[test]
    fn test_process_stats_consistent() {
        let stats = ProcessStats.read_mem_stats();
        assert_eq!(stats.heap_inuse, stats.heap_alloc);
        assert!(stats.heap_sys >= stats.heap_alloc);
        assert_eq!(stats.num_gc, 0);
        assert_eq!(ProcessStats.read_gc_stats(), GcStats::default());
    }
}
