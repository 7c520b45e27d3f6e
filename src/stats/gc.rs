// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write;

use serde::Serialize;

use super::{duration_millis, format_last_gc, format_timestamp};
use crate::runtime::GcStats;

const GC_BANNER: &str =
    "=========================== Runtime GC Statistics ===========================";

/// JSON rendering of a [`GcStats`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GcStatsJson {
    /// Number of completed collections.
    #[serde(rename = "NumGC")]
    pub num_gc: i64,
    /// Cumulative pause time in milliseconds.
    #[serde(rename = "PauseTotalMs")]
    pub pause_total_ms: f64,
    /// Timestamp of the last collection, or `Not available`.
    #[serde(rename = "LastGC")]
    pub last_gc: String,
    /// Recent pauses in milliseconds, two decimals.
    #[serde(rename = "RecentPausesMs")]
    pub recent_pauses_ms: Vec<String>,
    /// Recent pause end timestamps.
    #[serde(rename = "RecentPauseEnds")]
    pub recent_pause_ends: Vec<String>,
}

/// Human-readable report of `gs`, including the recent pause history.
pub fn gc_stats_text(gs: &GcStats) -> String {
    let mut out = String::with_capacity(512 + 48 * (gs.pause.len() + gs.pause_end.len()));
    let _ = write_gc_stats(&mut out, gs);
    out
}

fn write_gc_stats(out: &mut String, gs: &GcStats) -> std::fmt::Result {
    writeln!(out, "{GC_BANNER}")?;
    writeln!(out, "NumGC:       {} (Number of garbage collections)", gs.num_gc)?;
    writeln!(
        out,
        "PauseTotal:  {:.2} ms (Total GC pause time)",
        duration_millis(gs.pause_total)
    )?;
    match gs.last_gc {
        Some(time) => writeln!(
            out,
            "LastGC:      {} (Time of last garbage collection)",
            format_timestamp(time)
        )?,
        None => writeln!(out, "LastGC:      {}", format_last_gc(None))?,
    }

    writeln!(out, "Recent Pauses ({} recorded):", gs.pause.len())?;
    for (i, pause) in gs.pause.iter().enumerate() {
        writeln!(out, "  Pause {}:   {:.2} ms", i + 1, duration_millis(*pause))?;
    }

    writeln!(out, "Recent Pause Ends ({} recorded):", gs.pause_end.len())?;
    for (i, end) in gs.pause_end.iter().enumerate() {
        writeln!(out, "  Pause End {}: {}", i + 1, format_timestamp(*end))?;
    }

    writeln!(out, "{GC_BANNER}")
}

/// Key-value rendering of `gs`.
pub fn gc_stats_json(gs: &GcStats) -> GcStatsJson {
    GcStatsJson {
        num_gc: gs.num_gc,
        pause_total_ms: duration_millis(gs.pause_total),
        last_gc: format_last_gc(gs.last_gc),
        recent_pauses_ms: gs
            .pause
            .iter()
            .map(|p| format!("{:.2}", duration_millis(*p)))
            .collect(),
        recent_pause_ends: gs.pause_end.iter().copied().map(format_timestamp).collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn sample() -> GcStats {
        let end = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        GcStats {
            num_gc: 2,
            pause_total: Duration::from_micros(2_500),
            last_gc: Some(end),
            pause: vec![Duration::from_micros(2_000), Duration::from_micros(500)],
            pause_end: vec![end, end - Duration::from_secs(60)],
        }
    }

    #[test]
    fn test_gc_stats_text() {
        let gs = sample();
        let text = gc_stats_text(&gs);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.first(), Some(&GC_BANNER));
        assert_eq!(lines.last(), Some(&GC_BANNER));
        assert_eq!(lines[1], "NumGC:       2 (Number of garbage collections)");
        assert_eq!(lines[2], "PauseTotal:  2.50 ms (Total GC pause time)");
        assert!(lines[3].starts_with("LastGC:      "));
        assert_eq!(lines[4], "Recent Pauses (2 recorded):");
        assert_eq!(lines[5], "  Pause 1:   2.00 ms");
        assert_eq!(lines[6], "  Pause 2:   0.50 ms");
        assert_eq!(lines[7], "Recent Pause Ends (2 recorded):");
        assert_eq!(
            lines[9],
            format!("  Pause End 2: {}", format_timestamp(gs.pause_end[1]))
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_gc_stats_text_empty() {
        let text = gc_stats_text(&GcStats::default());
        assert!(text.contains("LastGC:      Not available\n"));
        assert!(text.contains("Recent Pauses (0 recorded):\nRecent Pause Ends (0 recorded):\n"));
    }

    #[test]
    fn test_gc_stats_json() {
        let gs = sample();
        let json = serde_json::to_value(gc_stats_json(&gs)).unwrap();
        assert_eq!(json["NumGC"], 2);
        assert_eq!(json["PauseTotalMs"], 2.5);
        assert_eq!(json["LastGC"], format_timestamp(gs.last_gc.unwrap()));
        assert_eq!(json["RecentPausesMs"], serde_json::json!(["2.00", "0.50"]));
        assert_eq!(json["RecentPauseEnds"].as_array().unwrap().len(), 2);

        let empty = serde_json::to_value(gc_stats_json(&GcStats::default())).unwrap();
        assert_eq!(empty["LastGC"], "Not available");
        assert_eq!(empty["RecentPausesMs"], serde_json::json!([]));
    }
}
