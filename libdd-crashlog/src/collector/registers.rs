// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Register capture from the machine context handed to the signal handler.
//!
//! Each supported architecture gets its own [`RegisterDump`] implementation, selected at compile
//! time through [`CurrentArch`]. Registers are always read out of a real per-register field or
//! array of the saved context; the live register file of the handler is meaningless here.

use crate::crash_info::{FaultContext, RegisterSnapshot};
use libc::ucontext_t;

/// Fills a [`RegisterSnapshot`] from a machine context.
///
/// The snapshot is written in place rather than returned: it is close to a kilobyte, and the
/// handler may be running on a small alternate stack.
pub(crate) trait RegisterDump {
    /// Returns false, leaving `out` untouched, if registers cannot be read on this platform.
    fn dump(uc: &ucontext_t, out: &mut RegisterSnapshot) -> bool;
}

/// Reads the registers of the faulting thread into `out`. Returns false if the kernel supplied
/// no machine context or the architecture is not supported.
pub(crate) fn capture_registers(fault: &FaultContext, out: &mut RegisterSnapshot) -> bool {
    fault
        .machine_context()
        .is_some_and(|uc| CurrentArch::dump(uc, out))
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
pub(crate) struct Aarch64;

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
pub(crate) type CurrentArch = Aarch64;

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"))]
impl RegisterDump for Aarch64 {
    fn dump(uc: &ucontext_t, out: &mut RegisterSnapshot) -> bool {
        const NAMES: [&str; 31] = [
            "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12",
            "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24",
            "x25", "x26", "x27", "x28", "x29", "x30",
        ];
        let mc = &uc.uc_mcontext;
        out.reset(16);
        for (name, value) in NAMES.iter().zip(mc.regs.iter()) {
            out.push(name, *value as u64);
        }
        out.sp = mc.sp as u64;
        out.pc = mc.pc as u64;
        true
    }
}

#[cfg(all(target_os = "linux", target_arch = "arm"))]
pub(crate) struct Arm;

#[cfg(all(target_os = "linux", target_arch = "arm"))]
pub(crate) type CurrentArch = Arm;

#[cfg(all(target_os = "linux", target_arch = "arm"))]
impl RegisterDump for Arm {
    fn dump(uc: &ucontext_t, out: &mut RegisterSnapshot) -> bool {
        let mc = &uc.uc_mcontext;
        // r11 and r12 are saved as fp and ip.
        let general = [
            ("r0", mc.arm_r0),
            ("r1", mc.arm_r1),
            ("r2", mc.arm_r2),
            ("r3", mc.arm_r3),
            ("r4", mc.arm_r4),
            ("r5", mc.arm_r5),
            ("r6", mc.arm_r6),
            ("r7", mc.arm_r7),
            ("r8", mc.arm_r8),
            ("r9", mc.arm_r9),
            ("r10", mc.arm_r10),
            ("r11", mc.arm_fp),
            ("r12", mc.arm_ip),
        ];
        out.reset(8);
        for (name, value) in general {
            out.push(name, value as u64);
        }
        out.sp = mc.arm_sp as u64;
        out.lr = Some(mc.arm_lr as u64);
        out.pc = mc.arm_pc as u64;
        true
    }
}

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))]
pub(crate) struct X86_64;

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))]
pub(crate) type CurrentArch = X86_64;

#[cfg(all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"))]
impl RegisterDump for X86_64 {
    fn dump(uc: &ucontext_t, out: &mut RegisterSnapshot) -> bool {
        const GENERAL: [(&str, libc::c_int); 16] = [
            ("rax", libc::REG_RAX),
            ("rbx", libc::REG_RBX),
            ("rcx", libc::REG_RCX),
            ("rdx", libc::REG_RDX),
            ("rsi", libc::REG_RSI),
            ("rdi", libc::REG_RDI),
            ("rbp", libc::REG_RBP),
            ("r8", libc::REG_R8),
            ("r9", libc::REG_R9),
            ("r10", libc::REG_R10),
            ("r11", libc::REG_R11),
            ("r12", libc::REG_R12),
            ("r13", libc::REG_R13),
            ("r14", libc::REG_R14),
            ("r15", libc::REG_R15),
            ("efl", libc::REG_EFL),
        ];
        let gregs = &uc.uc_mcontext.gregs;
        out.reset(16);
        for (name, index) in GENERAL {
            out.push(name, gregs[index as usize] as u64);
        }
        out.sp = gregs[libc::REG_RSP as usize] as u64;
        out.pc = gregs[libc::REG_RIP as usize] as u64;
        true
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86"))]
pub(crate) struct X86;

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86"))]
pub(crate) type CurrentArch = X86;

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86"))]
impl RegisterDump for X86 {
    fn dump(uc: &ucontext_t, out: &mut RegisterSnapshot) -> bool {
        const GENERAL: [(&str, libc::c_int); 8] = [
            ("eax", libc::REG_EAX),
            ("ebx", libc::REG_EBX),
            ("ecx", libc::REG_ECX),
            ("edx", libc::REG_EDX),
            ("esi", libc::REG_ESI),
            ("edi", libc::REG_EDI),
            ("ebp", libc::REG_EBP),
            ("efl", libc::REG_EFL),
        ];
        let gregs = &uc.uc_mcontext.gregs;
        out.reset(8);
        for (name, index) in GENERAL {
            out.push(name, gregs[index as usize] as u32 as u64);
        }
        out.sp = gregs[libc::REG_ESP as usize] as u32 as u64;
        out.pc = gregs[libc::REG_EIP as usize] as u32 as u64;
        true
    }
}

/// Fallback for targets without a register layout we know how to read. The report simply omits
/// its register section.
#[cfg(not(any(
    all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"),
    all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"),
    all(target_os = "linux", target_arch = "arm"),
    all(target_os = "linux", target_env = "gnu", target_arch = "x86"),
)))]
pub(crate) struct Unsupported;

#[cfg(not(any(
    all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"),
    all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"),
    all(target_os = "linux", target_arch = "arm"),
    all(target_os = "linux", target_env = "gnu", target_arch = "x86"),
)))]
pub(crate) type CurrentArch = Unsupported;

#[cfg(not(any(
    all(any(target_os = "linux", target_os = "android"), target_arch = "aarch64"),
    all(any(target_os = "linux", target_os = "android"), target_arch = "x86_64"),
    all(target_os = "linux", target_arch = "arm"),
    all(target_os = "linux", target_env = "gnu", target_arch = "x86"),
)))]
impl RegisterDump for Unsupported {
    fn dump(_uc: &ucontext_t, _out: &mut RegisterSnapshot) -> bool {
        false
    }
}
