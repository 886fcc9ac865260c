// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::ffi::{c_char, c_int, CStr, OsStr};
use std::os::unix::ffi::OsStrExt;

#[no_mangle]
#[must_use]
/// Installs the native crash logger. Reports are written into `report_dir`, which is created if
/// it does not exist.
///
/// Returns true only if every fault kind was redirected. A null or empty `report_dir` returns
/// false without touching any signal disposition. Calling it again while installed is a no-op.
///
/// # Preconditions
///   None
/// # Safety
///   `report_dir` must be null or point to a NUL-terminated string.
/// # Atomicity
///   Registering the handlers is not atomic. A crash during this call may not be reported.
pub unsafe extern "C" fn ddog_crashlog_install(report_dir: *const c_char) -> bool {
    if report_dir.is_null() {
        return false;
    }
    let report_dir = OsStr::from_bytes(CStr::from_ptr(report_dir).to_bytes());
    libdd_crashlog::install(report_dir)
}

#[no_mangle]
/// Puts back the signal dispositions that were in place before install. Does nothing if the crash
/// logger is not installed.
///
/// # Safety
///   None
pub unsafe extern "C" fn ddog_crashlog_uninstall() {
    libdd_crashlog::uninstall()
}

#[no_mangle]
/// Deliberately crashes the process, for testing. `kind` is 0 for SIGSEGV, 1 for SIGABRT, 2 for
/// SIGFPE, 3 for SIGILL and 4 for SIGBUS. Any other value is ignored and the call returns.
///
/// # Safety
///   Terminates the process for any valid `kind`.
pub unsafe extern "C" fn ddog_crashlog_trigger(kind: c_int) {
    libdd_crashlog::trigger_by_index(kind)
}
