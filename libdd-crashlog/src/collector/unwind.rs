// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::crash_info::{Backtrace, ResolvedFrame};
use std::ffi::CStr;

/// Walks the stack of the current thread, innermost frame first, keeping at most `max_frames`
/// return addresses in `backtrace`. Whatever `backtrace` held before is discarded.
///
/// When `fault_ip` is known, every frame above it belongs to the crash logger itself (the handler,
/// the unwinder, the kernel trampoline) and is skipped. If the faulting frame is never seen, for
/// instance because the unwinder could not cross the signal frame, the walk is redone keeping
/// everything so that the report has *something*.
///
/// SIGNAL SAFETY:
///     `trace_unsynchronized` goes straight to `_Unwind_Backtrace` and does not allocate.
///     Resolving frames through `backtrace` does allocate, which is why symbols are looked up
///     separately with [`resolve_frame`].
///     A corrupted stack makes the unwinder stop early rather than fault.
pub(crate) fn capture_backtrace(
    max_frames: usize,
    fault_ip: Option<usize>,
    backtrace: &mut Backtrace,
) {
    backtrace.clear();
    let mut ip_found = fault_ip.is_none();
    loop {
        // SAFETY: nothing else unwinds concurrently on this thread, and the guard in the handler
        // ensures only one thread is capturing.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                if !ip_found && Some(ip) == fault_ip {
                    ip_found = true;
                }
                if !ip_found {
                    return true;
                }
                backtrace.push(ip) && backtrace.len() < max_frames
            })
        };
        if ip_found {
            break;
        }
        // emit anything at all, if the crashing frame is not found for some reason
        backtrace.clear();
        ip_found = true;
    }
}

/// Best-effort lookup of the module and nearest preceding exported symbol for `addr`.
///
/// `dladdr` reads the loader's own tables and does not allocate. Returns `None` when the address
/// is not inside any mapped object.
pub(crate) fn resolve_frame(addr: usize) -> Option<ResolvedFrame> {
    // SAFETY: Dl_info is plain old data, all zeroes is a valid value.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr tolerates any address and only writes into `info`.
    if unsafe { libc::dladdr(addr as *const libc::c_void, &mut info) } == 0 {
        return None;
    }

    // SAFETY: on success the loader returns NUL-terminated strings it owns, or null.
    let module = unsafe { loader_string(info.dli_fname) };
    let symbol = unsafe { loader_string(info.dli_sname) };
    let base = if symbol.is_some() && !info.dli_saddr.is_null() {
        info.dli_saddr as usize
    } else {
        info.dli_fbase as usize
    };
    Some(ResolvedFrame {
        module,
        symbol,
        offset: addr.wrapping_sub(base),
    })
}

unsafe fn loader_string(ptr: *const libc::c_char) -> Option<&'static CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr)).filter(|s| !s.is_empty())
    }
}
