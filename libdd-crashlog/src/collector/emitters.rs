// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::memory_map::copy_memory_map;
use super::raw_io::{sigsafe_eprintln, PathBuffer, RawFile};
use super::unwind::resolve_frame;
use crate::crash_info::{CrashReport, RegisterSnapshot};
use crate::shared::constants::*;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("Failed to write to output: {0}")]
    WriteError(#[from] std::io::Error),
    #[error("Failed to open file: {0}")]
    FileOpenError(std::io::Error),
    #[error("Path is too long")]
    PathTooLong,
}

impl EmitterError {
    /// `Display` for an OS error allocates its message, so the signal handler reports the errno.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            EmitterError::WriteError(e) | EmitterError::FileOpenError(e) => e.raw_os_error(),
            EmitterError::PathTooLong => None,
        }
    }
}

fn emit_banner(w: &mut impl Write, title: &str) -> Result<(), EmitterError> {
    writeln!(w, "{SECTION_BANNER}")?;
    writeln!(w, "{title}")?;
    writeln!(w, "{SECTION_BANNER}")?;
    Ok(())
}

fn emit_header(w: &mut impl Write, report: &CrashReport) -> Result<(), EmitterError> {
    emit_banner(w, report.title)?;
    writeln!(w)?;
    writeln!(w, "Crash Time: {}", report.timestamp)?;
    writeln!(w, "Crash Type: {CRASH_TYPE_TAG}")?;
    writeln!(w)?;
    Ok(())
}

fn emit_siginfo(w: &mut impl Write, report: &CrashReport) -> Result<(), EmitterError> {
    let fault = &report.fault;
    emit_banner(w, SECTION_SIGNAL_INFO)?;
    writeln!(w, "Signal: {} ({})", fault.kind.signum(), fault.kind.name())?;
    writeln!(w, "Description: {}", fault.kind.description())?;
    writeln!(w, "Signal Code: {} ({})", fault.si_code, fault.code_name())?;
    writeln!(w, "Fault Address: {:#x}", fault.fault_address)?;
    writeln!(w, "Pid: {}", report.pid)?;
    writeln!(w, "Tid: {}", report.tid)?;
    writeln!(w)?;
    Ok(())
}

fn emit_registers(w: &mut impl Write, regs: &RegisterSnapshot) -> Result<(), EmitterError> {
    let width = regs.hex_width;
    emit_banner(w, SECTION_REGISTERS)?;
    for (name, value) in regs.general() {
        writeln!(w, "{name:<3}: {value:0width$x}")?;
    }
    writeln!(w, "sp:  {:0width$x}", regs.sp)?;
    if let Some(lr) = regs.lr {
        writeln!(w, "lr:  {lr:0width$x}")?;
    }
    writeln!(w, "pc:  {:0width$x}", regs.pc)?;
    writeln!(w)?;
    Ok(())
}

/// One line per frame: `#<index> pc <address>  <module> (<symbol>+<offset>)`.
/// Symbols are looked up with `dladdr` only, which sees exported symbols and never allocates.
fn emit_stacktrace(w: &mut impl Write, report: &CrashReport) -> Result<(), EmitterError> {
    emit_banner(w, SECTION_STACKTRACE)?;
    for (i, &pc) in report.backtrace.frames().iter().enumerate() {
        write!(w, "#{i:02} pc {pc:#x}  ")?;
        match resolve_frame(pc) {
            Some(frame) => {
                w.write_all(frame.module.map_or(UNKNOWN.as_bytes(), |m| m.to_bytes()))?;
                w.write_all(b" (")?;
                w.write_all(frame.symbol.map_or(UNKNOWN.as_bytes(), |s| s.to_bytes()))?;
                writeln!(w, "+{})", frame.offset)?;
            }
            None => writeln!(w, "{UNKNOWN}")?,
        }
    }
    writeln!(w)?;
    Ok(())
}

fn emit_memory_maps(w: &mut impl Write) -> Result<(), EmitterError> {
    emit_banner(w, SECTION_MEMORY_MAPS)?;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    copy_memory_map(w)?;
    writeln!(w)?;
    Ok(())
}

fn emit_footer(w: &mut impl Write) -> Result<(), EmitterError> {
    emit_banner(w, SECTION_FOOTER)
}

/// Serializes `report` section by section, in a fixed order.
///
/// A failing section does not stop the following ones: a half-written stack trace is still worth
/// a footer and a memory map. The first error encountered is returned.
pub(crate) fn emit_report(w: &mut impl Write, report: &CrashReport) -> Result<(), EmitterError> {
    let mut result = emit_header(w, report);
    let mut keep_first = |r: Result<(), EmitterError>| {
        if let Err(e) = r {
            if result.is_ok() {
                result = Err(e);
            }
        }
    };
    keep_first(emit_siginfo(w, report));
    if let Some(regs) = report.registers {
        keep_first(emit_registers(w, regs));
    }
    keep_first(emit_stacktrace(w, report));
    keep_first(emit_memory_maps(w));
    keep_first(emit_footer(w));
    result
}

fn join_path(
    path: &mut PathBuffer,
    dir: &Path,
    file_name: impl FnOnce(&mut PathBuffer) -> std::fmt::Result,
) -> Result<(), EmitterError> {
    path.clear();
    path.push_bytes(dir.as_os_str().as_bytes())
        .map_err(|_| EmitterError::PathTooLong)?;
    path.push_separator().map_err(|_| EmitterError::PathTooLong)?;
    file_name(path).map_err(|_| EmitterError::PathTooLong)
}

/// Writes `report` to `crash_<YYYYMMDD>_<hhmmss>_<ms>.log` in `dir`. The full path is left in
/// `path`.
///
/// Only an error creating the file is returned: once the file exists it is a report, even if
/// some section failed to be written, and the failure is logged instead.
///
/// SIGNAL SAFETY:
///     The path is assembled in a caller-provided buffer and the file is written with raw
///     `write` calls.
pub(crate) fn write_report(
    report: &CrashReport,
    dir: &Path,
    path: &mut PathBuffer,
) -> Result<(), EmitterError> {
    join_path(path, dir, |p| report.timestamp.write_report_filename(p))?;
    let mut file = RawFile::create(path.as_cstr()).map_err(EmitterError::FileOpenError)?;
    if let Err(e) = emit_report(&mut file, report) {
        sigsafe_eprintln!(
            "crashlog: report is incomplete, errno {}",
            e.raw_os_error().unwrap_or(0)
        );
    }
    Ok(())
}

/// Overwrites `pending_crash.flag` in `dir` with `report_file_name`, without a trailing newline.
/// `path` is scratch space for the marker path.
pub(crate) fn write_pending_marker(
    report_file_name: &[u8],
    dir: &Path,
    path: &mut PathBuffer,
) -> Result<(), EmitterError> {
    join_path(path, dir, |p| p.push_bytes(PENDING_MARKER_FILENAME.as_bytes()))?;
    let mut file = RawFile::create(path.as_cstr()).map_err(EmitterError::FileOpenError)?;
    file.write_all(report_file_name)?;
    Ok(())
}
