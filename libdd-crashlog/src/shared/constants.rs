// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Maximum number of frames to collect in a backtrace.
///
/// This limit prevents runaway frame walking in case of stack corruption.
pub const MAX_BACKTRACE_FRAMES: usize = 128;

/// Name of the marker file which points at the most recent report.
pub const PENDING_MARKER_FILENAME: &str = "pending_crash.flag";
pub const REPORT_FILENAME_PREFIX: &str = "crash_";
pub const REPORT_FILENAME_SUFFIX: &str = ".log";

pub const DEFAULT_REPORT_TITLE: &str = "Native Crash Report";
pub const CRASH_TYPE_TAG: &str = "NATIVE";

// Every section of a report starts with a banner line, the section title and another banner
// line. Consumers split the report on these.
pub const SECTION_BANNER: &str = "========================================";
pub const SECTION_SIGNAL_INFO: &str = "Signal Information";
pub const SECTION_REGISTERS: &str = "Register State";
pub const SECTION_STACKTRACE: &str = "Stack Trace";
pub const SECTION_MEMORY_MAPS: &str = "Memory Maps";
pub const SECTION_FOOTER: &str = "End of Crash Report";

pub(crate) const UNKNOWN: &str = "<unknown>";

// The handler may run on whatever alternate stack the faulting thread has, and the ones the Rust
// runtime hands to spawned threads are only `SIGSTKSZ` bytes. Buffers stay small.

/// Size of the fixed buffers used to build paths inside the signal handler.
pub(crate) const PATH_BUFFER_LEN: usize = 512;
/// Size of the stack buffer used when copying `/proc/self/maps`.
pub(crate) const COPY_BUFFER_LEN: usize = 512;

/// Length of `crash_YYYYMMDD_hhmmss_mmm.log`, the longest file name written into the report
/// directory.
pub const REPORT_FILENAME_LEN: usize = 29;
/// Longest report directory path, in bytes, that leaves room for a file name, a separator and
/// the terminating NUL in a path buffer.
pub const MAX_REPORT_DIR_LEN: usize = PATH_BUFFER_LEN - REPORT_FILENAME_LEN - 2;

/// How long a thread faulting while another thread writes the report waits for that report
/// before taking the process down.
pub(crate) const CONCURRENT_FAULT_WAIT_MS: u64 = 5_000;
pub(crate) const CONCURRENT_FAULT_POLL_MS: u64 = 10;
