// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Exclusive execution-trace captures.
//!
//! Tracing records the whole process, so only one capture may run against a
//! tracer at a time. [`TraceGate`] is a single try-acquire slot: a second
//! caller is turned away immediately instead of queueing behind the first.
//! The slot belongs to the tracer, so every gate built for the same tracer in
//! this process shares it.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError, Weak,
    },
    time::Duration,
};

use thiserror::Error;

use crate::runtime::{run_blocking, ExecutionTracer, OutputSink, RuntimeError};

type SlotEntry = (Weak<dyn ExecutionTracer>, Weak<AtomicBool>);

static SLOTS: Mutex<Vec<SlotEntry>> = Mutex::new(Vec::new());

/// The process-wide slot of `tracer`, created on first use.
fn slot_for(tracer: &Arc<dyn ExecutionTracer>) -> Arc<AtomicBool> {
    let mut slots = SLOTS.lock().unwrap_or_else(PoisonError::into_inner);
    slots.retain(|(t, held)| t.strong_count() > 0 && held.strong_count() > 0);
    let key = Arc::downgrade(tracer);
    if let Some(held) = slots
        .iter()
        .filter(|(t, _)| t.ptr_eq(&key))
        .find_map(|(_, held)| held.upgrade())
    {
        return held;
    }
    let held = Arc::new(AtomicBool::new(false));
    slots.push((key, Arc::downgrade(&held)));
    held
}

/// Capture length used when `dur` is absent, unparsable or not positive.
pub const DEFAULT_TRACE_DURATION: Duration = Duration::from_secs(10);

/// Parse a trace-control `dur` value such as `5s` or `1m30s`.
///
/// Bad input is not an error; it falls back to [`DEFAULT_TRACE_DURATION`].
pub fn parse_trace_duration(dur: Option<&str>) -> Duration {
    match dur.map(humantime::parse_duration) {
        Some(Ok(d)) if !d.is_zero() => d,
        _ => DEFAULT_TRACE_DURATION,
    }
}

/// Parse a positive number of seconds, e.g. the pprof `seconds` parameter.
pub fn parse_seconds(seconds: Option<&str>, default: Duration) -> Duration {
    seconds
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|s| s.is_finite() && *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or(default)
}

/// Returned when a capture cannot begin right now.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Tracing is already active")]
pub struct GateBusy;

/// The single slot guarding an [`ExecutionTracer`].
///
/// Clones, and any other gate for the same tracer, share the slot.
#[derive(Clone)]
pub struct TraceGate {
    held: Arc<AtomicBool>,
    tracer: Arc<dyn ExecutionTracer>,
}

impl std::fmt::Debug for TraceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceGate")
            .field("held", &self.is_held())
            .finish()
    }
}

impl TraceGate {
    /// A gate in front of `tracer`.
    pub fn new(tracer: Arc<dyn ExecutionTracer>) -> Self {
        TraceGate {
            held: slot_for(&tracer),
            tracer,
        }
    }

    /// Whether a session currently holds the slot.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// Take the slot if it is free and the tracer is idle.
    ///
    /// Never blocks. The slot stays taken until the returned session ends or
    /// is dropped.
    pub fn try_begin(&self) -> Result<TraceSession, GateBusy> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GateBusy);
        }
        let session = TraceSession {
            slot: Some(Slot(self.held.clone())),
            tracer: self.tracer.clone(),
            status: Status::Idle,
        };
        if self.tracer.is_enabled() {
            // dropping the session gives the slot back
            return Err(GateBusy);
        }
        Ok(session)
    }
}

/// A taken slot, given back on drop.
struct Slot(Arc<AtomicBool>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Status {
    Idle,
    Recording,
}

/// A capture holding the gate.
///
/// Dropping the session stops the tracer if it was started and frees the
/// slot, whichever way the capture ends. Inside a tokio runtime that stop runs
/// on a blocking thread, since the tracer may block on its sink.
pub struct TraceSession {
    slot: Option<Slot>,
    tracer: Arc<dyn ExecutionTracer>,
    status: Status,
}

impl std::fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSession")
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl TraceSession {
    /// Start the tracer, streaming into `sink`.
    ///
    /// May block on `sink`; call it off the async runtime threads.
    pub fn start(&mut self, sink: OutputSink) -> Result<(), RuntimeError> {
        self.tracer.start(sink)?;
        self.status = Status::Recording;
        tracing::info!("execution trace started");
        Ok(())
    }

    /// Whether the tracer was started by this session and not yet stopped.
    pub fn is_recording(&self) -> bool {
        matches!(self.status, Status::Recording)
    }

    /// Let the capture run for `duration`, then stop the tracer and end the
    /// session.
    pub async fn run_for(self, duration: Duration) -> Result<(), RuntimeError> {
        tokio::time::sleep(duration).await;
        run_blocking(move || self.end()).await
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        match std::mem::replace(&mut self.status, Status::Idle) {
            Status::Recording => {
                self.tracer.stop()?;
                tracing::info!("execution trace stopped");
                Ok(())
            }
            Status::Idle => Ok(()),
        }
    }

    /// Stop the tracer if needed and give the slot back.
    ///
    /// May block on the sink, like [`TraceSession::start`].
    pub fn end(mut self) -> Result<(), RuntimeError> {
        self.stop()
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if !self.is_recording() {
            // the slot field goes with the session
            return;
        }
        self.status = Status::Idle;
        let slot = self.slot.take();
        let tracer = self.tracer.clone();
        let stop = move || {
            match tracer.stop() {
                Ok(()) => tracing::info!("execution trace stopped"),
                Err(err) => tracing::warn!(?err, "unable to stop execution trace"),
            }
            drop(slot);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(stop);
            }
            Err(_) => stop(),
        }
    }
}

/// Sleep for `duration` while a capture records, then stop it with `stop`.
///
/// Used for the ungated pprof captures, where the collaborator itself rejects
/// overlapping starts.
pub(crate) async fn run_capture<F>(what: &'static str, duration: Duration, stop: F)
where
    F: FnOnce() -> Result<(), RuntimeError> + Send + 'static,
{
    tracing::debug!(what, ?duration, "capture running");
    tokio::time::sleep(duration).await;
    match run_blocking(stop).await {
        Ok(()) => tracing::debug!(what, "capture finished"),
        Err(err) => tracing::warn!(what, ?err, "unable to stop capture"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic;

    use test_case::test_case;

    use super::*;
    use crate::runtime::test::{MemorySink, MockTracer};

    fn gate() -> (TraceGate, Arc<MockTracer>) {
        let tracer = Arc::new(MockTracer::default());
        (TraceGate::new(tracer.clone()), tracer)
    }

    #[test_case(None, 10_000; "absent")]
    #[test_case(Some("5s"), 5_000; "seconds")]
    #[test_case(Some("250ms"), 250; "millis")]
    #[test_case(Some("1m30s"), 90_000; "compound")]
    #[test_case(Some("bogus"), 10_000; "garbage")]
    #[test_case(Some(""), 10_000; "empty")]
    #[test_case(Some("0s"), 10_000; "zero")]
    #[test_case(Some("-5s"), 10_000; "negative")]
    fn test_parse_trace_duration(dur: Option<&str>, millis: u64) {
        assert_eq!(parse_trace_duration(dur), Duration::from_millis(millis));
    }

    #[test_case(None, 30_000; "absent")]
    #[test_case(Some("5"), 5_000; "integer")]
    #[test_case(Some("0.5"), 500; "fraction")]
    #[test_case(Some("0"), 30_000; "zero")]
    #[test_case(Some("-1"), 30_000; "negative")]
    #[test_case(Some("NaN"), 30_000; "nan")]
    #[test_case(Some("x"), 30_000; "garbage")]
    fn test_parse_seconds(seconds: Option<&str>, millis: u64) {
        assert_eq!(
            parse_seconds(seconds, Duration::from_secs(30)),
            Duration::from_millis(millis)
        );
    }

    #[test]
    fn test_second_begin_rejected_while_held() {
        let (gate, _tracer) = gate();
        let session = gate.try_begin().unwrap();
        assert!(gate.is_held());
        assert_eq!(gate.try_begin().unwrap_err(), GateBusy);
        assert_eq!(gate.clone().try_begin().unwrap_err(), GateBusy);
        session.end().unwrap();
        assert!(!gate.is_held());
        assert!(gate.try_begin().is_ok());
    }

    #[test]
    fn test_begin_rejected_when_tracer_enabled_elsewhere() {
        let (gate, tracer) = gate();
        tracer
            .enabled_elsewhere
            .store(true, atomic::Ordering::Release);
        assert_eq!(gate.try_begin().unwrap_err(), GateBusy);
        // the rejection must not leave the slot taken
        assert!(!gate.is_held());
        tracer
            .enabled_elsewhere
            .store(false, atomic::Ordering::Release);
        assert!(gate.try_begin().is_ok());
    }

    #[test]
    fn test_failed_start_releases_slot() {
        let (gate, tracer) = gate();
        tracer.fail_start.store(true, atomic::Ordering::Release);
        let mut session = gate.try_begin().unwrap();
        let sink = MemorySink::default();
        assert!(session.start(Box::new(sink.clone())).is_err());
        assert!(!session.is_recording());
        drop(session);
        assert!(!gate.is_held());
        assert_eq!(sink.contents(), b"");
    }

    #[test]
    fn test_drop_stops_recording_tracer() {
        let (gate, tracer) = gate();
        let sink = MemorySink::default();
        let mut session = gate.try_begin().unwrap();
        session.start(Box::new(sink.clone())).unwrap();
        assert!(tracer.is_enabled());
        drop(session);
        assert!(!tracer.is_enabled());
        assert!(!gate.is_held());
        assert_eq!(sink.contents(), b"STARTSTOP");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_for_holds_gate_for_duration() {
        let (gate, tracer) = gate();
        let sink = MemorySink::default();
        let mut session = gate.try_begin().unwrap();
        session.start(Box::new(sink.clone())).unwrap();
        let task = tokio::spawn(session.run_for(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(gate.is_held());
        assert_eq!(gate.try_begin().unwrap_err(), GateBusy);
        assert_eq!(sink.contents(), b"START");

        task.await.unwrap().unwrap();
        assert!(!gate.is_held());
        assert_eq!(sink.contents(), b"STARTSTOP");
        assert_eq!(tracer.starts.load(atomic::Ordering::Relaxed), 1);

        let mut again = gate.try_begin().unwrap();
        again.start(Box::new(MemorySink::default())).unwrap();
        assert_eq!(tracer.starts.load(atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_capture_releases_slot() {
        let (gate, tracer) = gate();
        let mut session = gate.try_begin().unwrap();
        session.start(Box::new(MemorySink::default())).unwrap();
        let res = tokio::spawn(async move {
            let _session = session;
            panic!("capture blew up");
        })
        .await;
        assert!(res.unwrap_err().is_panic());
        // the tracer is stopped on a blocking thread before the slot frees
        while gate.is_held() {
            tokio::task::yield_now().await;
        }
        assert!(!tracer.is_enabled());
        assert!(gate.try_begin().is_ok());
    }

    #[test]
    fn test_gates_for_one_tracer_share_the_slot() {
        let (gate, tracer) = gate();
        let other = TraceGate::new(tracer.clone());
        let session = gate.try_begin().unwrap();
        assert!(other.is_held());
        assert_eq!(other.try_begin().unwrap_err(), GateBusy);

        // a different tracer has its own slot
        let (unrelated, _) = self::gate();
        assert!(!unrelated.is_held());
        assert!(unrelated.try_begin().is_ok());

        drop(session);
        assert!(!other.is_held());
        assert!(other.try_begin().is_ok());
    }

    #[test]
    fn test_slot_outlives_dropped_gates() {
        let (gate, tracer) = gate();
        let session = gate.try_begin().unwrap();
        drop(gate);
        // the running session keeps the slot alive for new gates
        let again = TraceGate::new(tracer.clone());
        assert_eq!(again.try_begin().unwrap_err(), GateBusy);
        drop(session);
        assert!(again.try_begin().is_ok());
    }
}
