// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The runtime facilities the plugin exposes over HTTP.
//!
//! The plugin never samples, traces or counts anything itself. A host hands it
//! implementations of the traits in this module and the plugin only wires them
//! to routes. [`process::ProcessStats`] is a default [`StatsSource`] for plain
//! Rust processes; everything else is optional.

use std::{
    collections::BTreeMap,
    fmt, io,
    sync::Arc,
    time::{Duration, SystemTime},
};

use thiserror::Error;

pub mod process;

/// A write-through handle the runtime streams profile and trace bytes into.
///
/// Over HTTP, every write goes straight to the open response body and blocks
/// while the client is too far behind.
pub type OutputSink = Box<dyn io::Write + Send>;

/// Errors reported by runtime collaborators.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The facility is already recording.
    #[error("already active")]
    AlreadyActive,
    /// The host did not configure this facility.
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    /// The facility refused to start or stop.
    #[error("{0}")]
    Failed(String),
    /// Writing to the sink failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Point-in-time memory counters of the runtime.
///
/// Byte counts are raw bytes; the formatter picks display units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemStats {
    /// Bytes of live heap objects.
    pub heap_alloc: u64,
    /// Cumulative bytes ever allocated on the heap.
    pub total_alloc: u64,
    /// Total bytes obtained from the OS.
    pub sys: u64,
    /// Bytes reserved for the heap.
    pub heap_sys: u64,
    /// Heap bytes reserved but not in use.
    pub heap_idle: u64,
    /// Heap bytes in use.
    pub heap_inuse: u64,
    /// Heap bytes returned to the OS.
    pub heap_released: u64,
    /// Number of live heap objects.
    pub heap_objects: u64,
    /// Cumulative number of allocations.
    pub mallocs: u64,
    /// Cumulative number of frees.
    pub frees: u64,
    /// Number of completed collections.
    pub num_gc: u32,
    /// Cumulative collection pause time.
    pub pause_total: Duration,
    /// Fraction of CPU time spent collecting, in `0.0..=1.0`.
    pub gc_cpu_fraction: f64,
    /// End of the last collection, if any ran.
    pub last_gc: Option<SystemTime>,
    /// Stack bytes in use.
    pub stack_inuse: u64,
    /// Stack bytes obtained from the OS.
    pub stack_sys: u64,
    /// Bytes used by per-thread allocator caches.
    pub mcache_inuse: u64,
    /// Bytes reserved for per-thread allocator caches.
    pub mcache_sys: u64,
    /// Bytes used by allocator span metadata.
    pub mspan_inuse: u64,
    /// Bytes reserved for allocator span metadata.
    pub mspan_sys: u64,
    /// Other runtime-internal bytes.
    pub other_sys: u64,
}

/// Point-in-time collector history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcStats {
    /// Number of completed collections.
    pub num_gc: i64,
    /// Cumulative pause time.
    pub pause_total: Duration,
    /// End of the last collection, if any ran.
    pub last_gc: Option<SystemTime>,
    /// Recent pauses, most recent first.
    pub pause: Vec<Duration>,
    /// End times matching `pause`.
    pub pause_end: Vec<SystemTime>,
}

/// Reads memory and collector snapshots. Reads never fail.
pub trait StatsSource: Send + Sync + 'static {
    /// Take a fresh memory snapshot.
    fn read_mem_stats(&self) -> MemStats;
    /// Take a fresh collector snapshot.
    fn read_gc_stats(&self) -> GcStats;
}

/// A named profile the host keeps, e.g. `heap` or `threads`.
pub trait Profile: Send + Sync + 'static {
    /// The name the profile is served under.
    fn name(&self) -> &str;
    /// Number of entries currently in the profile.
    fn count(&self) -> usize;
    /// Write the profile into `sink`. A nonzero `debug` asks for a
    /// human-readable rendering instead of the binary one.
    fn write_to(&self, sink: &mut dyn io::Write, debug: i32) -> Result<(), RuntimeError>;
}

/// Looks up profiles by name.
pub trait ProfileRegistry: Send + Sync + 'static {
    /// The profile called `name`, if any.
    fn lookup(&self, name: &str) -> Option<Arc<dyn Profile>>;
    /// All profiles, sorted by name.
    fn profiles(&self) -> Vec<Arc<dyn Profile>>;
}

/// A fixed set of profiles registered up front.
#[derive(Default, Clone)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Arc<dyn Profile>>,
}

impl ProfileSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a profile, replacing any previous one with the same name.
    pub fn with_profile(mut self, profile: impl Profile) -> Self {
        self.profiles
            .insert(profile.name().to_owned(), Arc::new(profile));
        self
    }
}

impl fmt::Debug for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.profiles.keys()).finish()
    }
}

impl ProfileRegistry for ProfileSet {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Profile>> {
        self.profiles.get(name).cloned()
    }

    fn profiles(&self) -> Vec<Arc<dyn Profile>> {
        self.profiles.values().cloned().collect()
    }
}

/// The process-wide execution tracer.
///
/// After `start`, the tracer owns the sink and writes events into it as they
/// are produced. `stop` flushes what is left and drops the sink, which ends
/// the stream on the reading side.
pub trait ExecutionTracer: Send + Sync + 'static {
    /// Whether a trace is currently being recorded.
    fn is_enabled(&self) -> bool;
    /// Begin recording into `sink`.
    fn start(&self, sink: OutputSink) -> Result<(), RuntimeError>;
    /// Stop recording and release the sink.
    fn stop(&self) -> Result<(), RuntimeError>;
}

/// A sampling CPU profiler. Same sink ownership rules as [`ExecutionTracer`].
pub trait CpuProfiler: Send + Sync + 'static {
    /// Begin sampling into `sink`. Fails with [`RuntimeError::AlreadyActive`]
    /// if a capture is running.
    fn start(&self, sink: OutputSink) -> Result<(), RuntimeError>;
    /// Stop sampling, write the encoded profile and release the sink.
    fn stop(&self) -> Result<(), RuntimeError>;
}

/// Run a collaborator call on tokio's blocking pool.
///
/// Collaborators write synchronously into sinks that block while the client
/// is behind, so their `start` and `stop` must stay off the runtime threads.
pub(crate) async fn run_blocking<T, F>(call: F) -> Result<T, RuntimeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RuntimeError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| RuntimeError::Failed(format!("collaborator call did not finish: {err}")))?
}

/// Resolves program counters to function names.
pub trait Symbolizer: Send + Sync + 'static {
    /// The function containing `addr`, if known.
    fn lookup(&self, addr: u64) -> Option<String>;
}
