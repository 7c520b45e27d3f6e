// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use serde::Serialize;

use super::{
    convert_bytes, duration_millis, format_last_gc, format_timestamp, round2, NOT_AVAILABLE,
};
use crate::runtime::MemStats;

const MEM_BANNER: &str =
    "=========================== Runtime Memory Statistics ===========================";

/// JSON rendering of a [`MemStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
#[allow(missing_docs)]
pub struct MemStatsJson {
    pub heap_alloc: String,
    pub total_alloc: String,
    pub sys: String,
    pub heap_sys: String,
    pub heap_idle: String,
    pub heap_inuse: String,
    pub heap_released: String,
    pub heap_objects: u64,
    pub mallocs: u64,
    pub frees: u64,
    #[serde(rename = "NumGC")]
    pub num_gc: u32,
    pub pause_total_ms: f64,
    /// Percent of CPU spent collecting.
    #[serde(rename = "GCCPUFraction")]
    pub gc_cpu_fraction: f64,
    #[serde(rename = "LastGC")]
    pub last_gc: String,
    pub stack_inuse: String,
    pub stack_sys: String,
    #[serde(rename = "MCacheInuse")]
    pub mcache_inuse: String,
    #[serde(rename = "MCacheSys")]
    pub mcache_sys: String,
    #[serde(rename = "MSpanInuse")]
    pub mspan_inuse: String,
    #[serde(rename = "MSpanSys")]
    pub mspan_sys: String,
    pub other_sys: String,
}

/// Human-readable multi-line report, one counter per line.
pub fn mem_stats_text(ms: &MemStats) -> String {
    let mut out = String::with_capacity(2048);
    // writing into a String cannot fail
    let _ = write_mem_stats(&mut out, ms);
    out
}

fn write_mem_stats(out: &mut String, ms: &MemStats) -> std::fmt::Result {
    writeln!(out, "{MEM_BANNER}")?;
    let bytes = [
        ("HeapAlloc:   ", ms.heap_alloc, "Current heap memory in use"),
        ("TotalAlloc:  ", ms.total_alloc, "Cumulative total memory allocated on heap"),
        ("Sys:         ", ms.sys, "Total memory obtained from OS"),
        ("HeapSys:     ", ms.heap_sys, "Memory reserved for heap from OS"),
        ("HeapIdle:    ", ms.heap_idle, "Heap memory reserved but not in use"),
        ("HeapInuse:   ", ms.heap_inuse, "Heap memory currently in use"),
        ("HeapReleased:", ms.heap_released, "Heap memory returned to OS"),
    ];
    for (label, value, help) in bytes {
        writeln!(out, "{label}{} ({help})", convert_bytes(value))?;
    }

    writeln!(out, "HeapObjects: {} (Number of allocated heap objects)", ms.heap_objects)?;
    writeln!(out, "Mallocs:     {} (Total number of mallocs)", ms.mallocs)?;
    writeln!(out, "Frees:       {} (Total number of frees)", ms.frees)?;

    writeln!(out, "NumGC:       {} (Number of garbage collections)", ms.num_gc)?;
    writeln!(
        out,
        "PauseTotal:  {:.2} ms (Total GC pause time)",
        duration_millis(ms.pause_total)
    )?;
    writeln!(
        out,
        "GCCPUFraction: {:.2}% (Fraction of CPU used by GC)",
        round2(ms.gc_cpu_fraction * 100.0)
    )?;
    match ms.last_gc {
        Some(time) => writeln!(
            out,
            "LastGC:      {} (Time of last garbage collection)",
            format_timestamp(time)
        )?,
        None => writeln!(out, "LastGC:      {NOT_AVAILABLE}")?,
    }

    let bytes = [
        ("StackInuse:  ", ms.stack_inuse, "Memory used by stack"),
        ("StackSys:    ", ms.stack_sys, "Memory reserved for stack from OS"),
        ("MCacheInuse: ", ms.mcache_inuse, "Memory used by allocator caches"),
        ("MCacheSys:   ", ms.mcache_sys, "Memory reserved for allocator caches from OS"),
        ("MSpanInuse:  ", ms.mspan_inuse, "Memory used by span metadata"),
        ("MSpanSys:    ", ms.mspan_sys, "Memory reserved for span metadata from OS"),
        ("OtherSys:    ", ms.other_sys, "Other system memory"),
    ];
    for (label, value, help) in bytes {
        writeln!(out, "{label}{} ({help})", convert_bytes(value))?;
    }

    // the footer carries no newline, unlike the GC report
    write!(out, "{MEM_BANNER}")
}

/// Key-value rendering of `ms`, with the same units as [`mem_stats_text`].
pub fn mem_stats_json(ms: &MemStats) -> MemStatsJson {
    MemStatsJson {
        heap_alloc: convert_bytes(ms.heap_alloc),
        total_alloc: convert_bytes(ms.total_alloc),
        sys: convert_bytes(ms.sys),
        heap_sys: convert_bytes(ms.heap_sys),
        heap_idle: convert_bytes(ms.heap_idle),
        heap_inuse: convert_bytes(ms.heap_inuse),
        heap_released: convert_bytes(ms.heap_released),
        heap_objects: ms.heap_objects,
        mallocs: ms.mallocs,
        frees: ms.frees,
        num_gc: ms.num_gc,
        pause_total_ms: duration_millis(ms.pause_total),
        gc_cpu_fraction: round2(ms.gc_cpu_fraction * 100.0),
        last_gc: format_last_gc(ms.last_gc),
        stack_inuse: convert_bytes(ms.stack_inuse),
        stack_sys: convert_bytes(ms.stack_sys),
        mcache_inuse: convert_bytes(ms.mcache_inuse),
        mcache_sys: convert_bytes(ms.mcache_sys),
        mspan_inuse: convert_bytes(ms.mspan_inuse),
        mspan_sys: convert_bytes(ms.mspan_sys),
        other_sys: convert_bytes(ms.other_sys),
    }
}
