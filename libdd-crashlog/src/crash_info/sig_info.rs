// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::FaultKind;
use libc::{c_void, siginfo_t, ucontext_t};

/// Everything the kernel handed to the signal handler for one fault.
///
/// The machine context pointer is only valid for the duration of the handler invocation that
/// built this value, so a `FaultContext` never leaves that invocation.
#[derive(Debug, Clone, Copy)]
pub struct FaultContext {
    pub kind: FaultKind,
    pub si_code: libc::c_int,
    pub fault_address: usize,
    pub(crate) sig_info: *mut siginfo_t,
    pub(crate) ucontext: *mut c_void,
}

impl FaultContext {
    /// # Safety
    /// `sig_info` and `ucontext` must either be null or point at the values the kernel passed to
    /// the currently running signal handler.
    pub(crate) unsafe fn new(
        kind: FaultKind,
        sig_info: *mut siginfo_t,
        ucontext: *mut c_void,
    ) -> Self {
        let (si_code, fault_address) = match sig_info.as_ref() {
            Some(info) => (info.si_code, fault_address(info)),
            None => (0, 0),
        };
        Self {
            kind,
            si_code,
            fault_address,
            sig_info,
            ucontext,
        }
    }

    /// Builds a context without any kernel data, used when simulating faults.
    pub fn synthetic(kind: FaultKind, si_code: libc::c_int, fault_address: usize) -> Self {
        Self {
            kind,
            si_code,
            fault_address,
            sig_info: std::ptr::null_mut(),
            ucontext: std::ptr::null_mut(),
        }
    }

    pub fn machine_context(&self) -> Option<&ucontext_t> {
        // SAFETY: the pointer is given to us by the signal handler, and is checked for null.
        unsafe { (self.ucontext as *const ucontext_t).as_ref() }
    }

    pub fn code_name(&self) -> &'static str {
        self.kind.code_name(self.si_code)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: &siginfo_t) -> usize {
    info.si_addr() as usize
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: &siginfo_t) -> usize {
    info.si_addr as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_pointers_are_tolerated() {
        let ctx = unsafe {
            FaultContext::new(FaultKind::SEGV, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(ctx.si_code, 0);
        assert_eq!(ctx.fault_address, 0);
        assert!(ctx.machine_context().is_none());
    }

    #[test]
    fn test_synthetic() {
        let ctx = FaultContext::synthetic(FaultKind::BUS, 1, 0xdead);
        assert_eq!(ctx.kind, FaultKind::BUS);
        assert_eq!(ctx.code_name(), "BUS_ADRALN");
        assert_eq!(ctx.fault_address, 0xdead);
        assert!(ctx.machine_context().is_none());
    }
}
