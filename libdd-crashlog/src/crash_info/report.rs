// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::{Backtrace, CrashTimestamp, FaultContext, RegisterSnapshot};

/// In-memory snapshot of a crash, built by the collector and consumed by the writer.
///
/// The register file and the backtrace are borrowed: together they are about two kilobytes, which
/// is a real share of the alternate stack a signal may be delivered on, so the collector fills
/// them in storage of its own.
///
/// The memory map is not part of the snapshot: `/proc/self/maps` can be far larger than any
/// buffer we are willing to put on a signal stack, so the writer streams it straight from the
/// kernel into the report file.
#[derive(Debug, Clone, Copy)]
pub struct CrashReport<'a> {
    pub title: &'a str,
    pub timestamp: CrashTimestamp,
    pub fault: FaultContext,
    pub pid: libc::pid_t,
    pub tid: u64,
    pub registers: Option<&'a RegisterSnapshot>,
    pub backtrace: &'a Backtrace,
}
