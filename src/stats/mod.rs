// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Text and JSON renderings of [`MemStats`] and [`GcStats`] snapshots.
//!
//! [`MemStats`]: crate::runtime::MemStats
//! [`GcStats`]: crate::runtime::GcStats

use std::time::{Duration, SystemTime};

mod gc;
mod mem;

pub use gc::{gc_stats_json, gc_stats_text, GcStatsJson};
pub use mem::{mem_stats_json, mem_stats_text, MemStatsJson};

const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Shown instead of a timestamp that was never set.
pub const NOT_AVAILABLE: &str = "Not available";

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Render `bytes` in the largest unit that keeps the value under 1024,
/// rounded to two decimals, e.g. `1.50 KB`.
pub fn convert_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", round2(value), UNITS[unit])
}

/// Milliseconds in `duration`, rounded to two decimals.
pub fn duration_millis(duration: Duration) -> f64 {
    round2(duration.as_nanos() as f64 / 1e6)
}

/// Local `YYYY-MM-DD HH:MM:SS` rendering of `time`.
pub fn format_timestamp(time: SystemTime) -> String {
    let time: chrono::DateTime<chrono::Local> = time.into();
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_last_gc(last_gc: Option<SystemTime>) -> String {
    match last_gc {
        Some(time) => format_timestamp(time),
        None => NOT_AVAILABLE.to_owned(),
    }
}

/// Whether a `json` query value asks for the JSON rendering.
///
/// `1`, `t` and `true` in any case do; anything else, including no value,
/// selects text.
pub fn wants_json(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("1" | "t" | "true")
    )
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, "0.00 B")]
    #[test_case(512, "512.00 B")]
    #[test_case(1023, "1023.00 B")]
    #[test_case(1024, "1.00 KB")]
    #[test_case(1536, "1.50 KB")]
    #[test_case(1024 * 1024 - 1, "1024.00 KB"; "rounds up without switching unit")]
    #[test_case(5 * 1024 * 1024 + 1024 * 1024 / 4, "5.25 MB")]
    #[test_case(3 * 1024 * 1024 * 1024, "3.00 GB")]
    #[test_case(4096 * 1024 * 1024 * 1024, "4096.00 GB"; "gb is the largest unit")]
    fn test_convert_bytes(bytes: u64, expected: &str) {
        assert_eq!(convert_bytes(bytes), expected);
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::ZERO), 0.0);
        assert_eq!(duration_millis(Duration::from_micros(1500)), 1.5);
        assert_eq!(duration_millis(Duration::from_nanos(1_234_567)), 1.23);
        assert_eq!(duration_millis(Duration::from_nanos(1_235_001)), 1.24);
    }

    #[test]
    fn test_format_timestamp() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let expected = chrono::DateTime::<chrono::Local>::from(time)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        assert_eq!(format_timestamp(time), expected);
        assert_eq!(format_timestamp(time).len(), "2023-11-14 22:13:20".len());
        assert_eq!(format_last_gc(None), "Not available");
    }

    #[test_case(Some("1"), true; "one")]
    #[test_case(Some("t"), true; "lower t")]
    #[test_case(Some("T"), true; "upper t")]
    #[test_case(Some("true"), true; "lower true")]
    #[test_case(Some("TrUe"), true; "mixed case true")]
    #[test_case(Some("0"), false; "zero")]
    #[test_case(Some("yes"), false; "other word")]
    #[test_case(Some(""), false; "empty")]
    #[test_case(None, false; "absent")]
    fn test_wants_json(value: Option<&str>, expected: bool) {
        assert_eq!(wants_json(value), expected);
    }
}
