// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deliberately provokes each [`FaultKind`], to validate the crash logger end to end.
//!
//! Each kind is produced the way a real bug would produce it where the hardware allows, and by
//! `raise` elsewhere. Nothing here is meant to be called outside of tests.

use crate::collector::terminate;
use crate::crash_info::FaultKind;
use std::hint::black_box;
use tracing::{error, warn};

/// Maps the numeric external interface, `0..=4`, to a fault kind.
const TRIGGER_KINDS: [FaultKind; 5] = [
    FaultKind::SEGV,
    FaultKind::ABORT,
    FaultKind::FPE,
    FaultKind::ILL,
    FaultKind::BUS,
];

/// Provokes `kind` on the calling thread. Never returns: if the fault is somehow survived, the
/// signal is raised explicitly, and if even that returns the process exits.
pub fn trigger(kind: FaultKind) -> ! {
    warn!(signal = kind.name(), "Triggering fault");
    // SAFETY: the whole point is to fault.
    unsafe {
        match kind {
            FaultKind::SEGV => store_to_null(),
            FaultKind::ABORT => libc::abort(),
            FaultKind::FPE => divide_by_zero(),
            FaultKind::ILL => illegal_instruction(),
            FaultKind::BUS => write_past_end_of_file(),
            FaultKind::TRAP => breakpoint(),
        }
        libc::raise(kind.signum());
    }
    terminate()
}

/// Triggers `TRIGGER_KINDS[index]`. An index outside `0..=4` is logged and ignored.
pub fn trigger_by_index(index: i32) {
    match usize::try_from(index).ok().and_then(|i| TRIGGER_KINDS.get(i)) {
        Some(kind) => trigger(*kind),
        None => error!(index, "Unknown fault kind, nothing triggered"),
    }
}

/// A store through a null pointer written in Rust is caught by the null check of debug builds,
/// which panics and aborts instead of faulting. The store is done in assembly instead.
#[inline(never)]
unsafe fn store_to_null() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    std::arch::asm!(
        "mov byte ptr [{addr}], 1",
        addr = in(reg) black_box(0usize),
        options(nostack),
    );
    #[cfg(target_arch = "aarch64")]
    std::arch::asm!(
        "strb wzr, [{addr}]",
        addr = in(reg) black_box(0usize),
        options(nostack),
    );
    #[cfg(target_arch = "arm")]
    std::arch::asm!(
        "strb {value}, [{addr}]",
        addr = in(reg) black_box(0usize),
        value = in(reg) 1u32,
        options(nostack),
    );
}

/// Integer division by zero only traps on x86. Rust's own `/` would panic before reaching the
/// instruction, hence the assembly.
#[inline(never)]
unsafe fn divide_by_zero() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    std::arch::asm!(
        "div ecx",
        in("ecx") black_box(0u32),
        inout("eax") 1u32 => _,
        inout("edx") 0u32 => _,
        options(nostack),
    );
}

#[inline(never)]
unsafe fn illegal_instruction() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    std::arch::asm!("ud2", options(nostack));
    #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
    std::arch::asm!("udf #0", options(nostack));
}

#[inline(never)]
unsafe fn breakpoint() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    std::arch::asm!("int3", options(nostack));
    #[cfg(target_arch = "aarch64")]
    std::arch::asm!("brk #0", options(nostack));
}

/// Unaligned stores do not fault on x86-64 or aarch64. Touching a page of a shared mapping that
/// lies past the end of its (empty) backing file does, on every architecture.
#[inline(never)]
unsafe fn write_past_end_of_file() {
    #[cfg(target_os = "linux")]
    {
        let fd = libc::memfd_create(c"crashlog-bus".as_ptr(), libc::MFD_CLOEXEC);
        if fd < 0 {
            return;
        }
        let mapping = libc::mmap(
            std::ptr::null_mut(),
            page_size::get(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if mapping == libc::MAP_FAILED {
            libc::close(fd);
            return;
        }
        std::ptr::write_volatile(black_box(mapping as *mut u64), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_kinds_order() {
        assert_eq!(
            TRIGGER_KINDS.map(FaultKind::name),
            ["SIGSEGV", "SIGABRT", "SIGFPE", "SIGILL", "SIGBUS"]
        );
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        trigger_by_index(-1);
        trigger_by_index(5);
        trigger_by_index(i32::MAX);
    }
}
