// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants::{REPORT_FILENAME_PREFIX, REPORT_FILENAME_SUFFIX};
use chrono::{DateTime, Datelike, Timelike};
use std::fmt;

/// Wall-clock time of a crash, already shifted into the local timezone.
///
/// `localtime()` is not async-signal-safe (it may read the timezone database and takes a lock),
/// so the UTC offset is sampled when the handler is installed and applied here by plain
/// arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashTimestamp {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl CrashTimestamp {
    /// Reads `CLOCK_REALTIME`, which is async-signal-safe.
    pub fn now(utc_offset_secs: i32) -> Self {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid timespec. On failure it stays at the epoch.
        unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
        Self::from_unix(ts.tv_sec as i64, ts.tv_nsec as u32, utc_offset_secs)
    }

    pub fn from_unix(secs: i64, nanos: u32, utc_offset_secs: i32) -> Self {
        let local = DateTime::from_timestamp(secs.saturating_add(utc_offset_secs as i64), nanos)
            .unwrap_or_default();
        Self {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
            second: local.second(),
            // Leap seconds are reported by chrono as nanos >= 1e9
            millisecond: (local.nanosecond() / 1_000_000).min(999),
        }
    }

    /// Writes `crash_<YYYY><MM><DD>_<hh><mm><ss>_<ms3>.log`.
    pub fn write_report_filename(&self, w: &mut impl fmt::Write) -> fmt::Result {
        write!(
            w,
            "{REPORT_FILENAME_PREFIX}{:04}{:02}{:02}_{:02}{:02}{:02}_{:03}{REPORT_FILENAME_SUFFIX}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond
        )
    }
}

impl fmt::Display for CrashTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}
