// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::atomguard::{FaultGuard, FaultGuardError};
use super::emitters::{write_pending_marker, write_report};
use super::raw_io::{sigsafe_eprintln, PathBuffer};
use super::registers::capture_registers;
use super::signal_handler_manager::{
    chain_signal_handler, reraise_with_default, terminate, SignalRegistry,
};
use super::unwind::capture_backtrace;
use crate::crash_info::{
    Backtrace, CrashReport, CrashTimestamp, FaultContext, FaultKind, RegisterSnapshot,
};
use crate::shared::configuration::CrashLogConfiguration;
use crate::shared::constants::{CONCURRENT_FAULT_POLL_MS, CONCURRENT_FAULT_WAIT_MS};
use libc::{c_void, siginfo_t};
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64};

// Note that this file makes use the following async-signal safe functions in a signal handler.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - clock_gettime
// - close
// - getpid
// - gettid (through syscall)
// - nanosleep
// - open
// - raise
// - read
// - sigaction
// - sigprocmask
// - write
// plus `_Unwind_Backtrace` and `dladdr`, which are not on the list but do not allocate.

/// Everything the handler needs, built at install and torn down at uninstall.
#[derive(Debug)]
pub(crate) struct InstalledState {
    pub config: CrashLogConfiguration,
    /// Sampled at install, `localtime` cannot be called from the handler.
    pub utc_offset_secs: i32,
    pub registry: SignalRegistry,
}

// Using mutexes inside a signal handler is not allowed, so use `AtomicPtr`
// instead to get atomicity.
// This should always be either: null_mut, or `Box::into_raw()`
static STATE: AtomicPtr<InstalledState> = AtomicPtr::new(ptr::null_mut());

/// Id of the thread that is handling a fault, 0 if none ever did.
static HANDLING_THREAD: AtomicU64 = AtomicU64::new(0);
static REPORT_DONE: AtomicBool = AtomicBool::new(false);

/// Storage for the bulky parts of the one report a process writes.
///
/// The handler runs on whatever alternate stack the faulting thread has. For threads spawned by
/// the Rust runtime that is a `SIGSTKSZ` stack, too small to also hold a backtrace, a register
/// file and two paths, so those live here instead.
struct ReportScratch {
    registers: UnsafeCell<RegisterSnapshot>,
    backtrace: UnsafeCell<Backtrace>,
    report_path: UnsafeCell<PathBuffer>,
    marker_path: UnsafeCell<PathBuffer>,
}

// SAFETY: only the thread holding the `HANDLING_THREAD` guard touches the scratch, and the guard
// is never released.
unsafe impl Sync for ReportScratch {}

static SCRATCH: ReportScratch = ReportScratch {
    registers: UnsafeCell::new(RegisterSnapshot::new(0)),
    backtrace: UnsafeCell::new(Backtrace::new()),
    report_path: UnsafeCell::new(PathBuffer::new()),
    marker_path: UnsafeCell::new(PathBuffer::new()),
};

/// Makes `state` visible to the signal handler.
///
/// PRECONDITIONS:
///     No state is currently published. Callers serialize through the install lock.
pub(crate) fn publish_state(state: Box<InstalledState>) {
    let old = STATE.swap(Box::into_raw(state), SeqCst);
    debug_assert!(old.is_null());
    if !old.is_null() {
        // Safety: This can only come from a box above.
        unsafe { drop_state(Box::from_raw(old)) };
    }
}

/// Withdraws the published state from the signal handler and returns ownership of it.
pub(crate) fn take_state() -> Option<Box<InstalledState>> {
    let old = STATE.swap(ptr::null_mut(), SeqCst);
    // Safety: This can only come from a box in `publish_state`.
    (!old.is_null()).then(|| unsafe { Box::from_raw(old) })
}

/// Borrows the published state.
///
/// SAFETY: the caller must hold the install lock, so that the state cannot be taken and freed
/// while the reference is alive.
pub(crate) unsafe fn peek_state<'a>() -> Option<&'a InstalledState> {
    STATE.load(SeqCst).as_ref()
}

/// Frees a state that was taken from the handler, unless a fault is being handled right now: the
/// handler may still be reading it, and the process is about to go away anyway.
pub(crate) fn drop_state(state: Box<InstalledState>) {
    if is_handling_crash() {
        std::mem::forget(state);
    } else {
        drop(state);
    }
}

pub(crate) fn is_handling_crash() -> bool {
    FaultGuard::is_held(&HANDLING_THREAD)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn current_thread_id() -> u64 {
    // SAFETY: gettid has no preconditions and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn current_thread_id() -> u64 {
    // SAFETY: No preconditions.
    unsafe { libc::pthread_self() as u64 }
}

fn sleep_ms(ms: u64) {
    let ts = libc::timespec {
        tv_sec: (ms / 1000) as libc::time_t,
        tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
    };
    // SAFETY: `ts` is a valid timespec. Being woken up early is harmless.
    unsafe { libc::nanosleep(&ts, ptr::null_mut()) };
}

/// Another thread owns the report. Give it a bounded amount of time to finish writing, then
/// take the process down with the default action.
///
/// The thread is not sent straight to the default action: a default SIGSEGV kills the whole
/// process at once, and the report being written on the other thread would be cut off at
/// whatever section it had reached. The wait ends as soon as the report is
/// complete, and never lasts longer than `CONCURRENT_FAULT_WAIT_MS` even if the reporting
/// thread is stuck.
fn wait_for_report_then_reraise(kind: FaultKind) -> ! {
    let mut waited = 0;
    while !REPORT_DONE.load(SeqCst) && waited < CONCURRENT_FAULT_WAIT_MS {
        sleep_ms(CONCURRENT_FAULT_POLL_MS);
        waited += CONCURRENT_FAULT_POLL_MS;
    }
    reraise_with_default(kind)
}

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    let Some(kind) = FaultKind::from_signum(signum) else {
        // We never register for anything else.
        sigsafe_eprintln!("crashlog: unexpected signal {signum}, aborting");
        terminate()
    };

    // One-time guard to guarantee at most one crash report per process.
    // If this code hits a stack overflow, then it will result in a segfault.  That situation is
    // caught here too, as a recursive fault.
    let tid = current_thread_id();
    match FaultGuard::acquire(&HANDLING_THREAD, tid) {
        Ok(()) => (),
        Err(FaultGuardError::Recursive) => {
            sigsafe_eprintln!("crashlog: recursive crash detected ({kind}), exiting");
            terminate()
        }
        Err(FaultGuardError::Concurrent(owner)) => {
            sigsafe_eprintln!(
                "crashlog: {kind} on thread {tid} while thread {owner} is reporting"
            );
            wait_for_report_then_reraise(kind)
        }
    }

    // The guard is taken before the state is read, which is what lets uninstall know whether it
    // is safe to free the state.
    // SAFETY: the pointer is either null or a live box, see `drop_state`.
    let Some(state) = (unsafe { STATE.load(SeqCst).as_ref() }) else {
        sigsafe_eprintln!("crashlog: {kind} received while not installed");
        reraise_with_default(kind)
    };

    // SAFETY: these are the arguments the kernel passed to this handler.
    let fault = unsafe { FaultContext::new(kind, sig_info, ucontext) };
    sigsafe_eprintln!("crashlog: native crash detected");
    sigsafe_eprintln!("crashlog: signal {signum} ({kind}), {}", kind.description());
    sigsafe_eprintln!("crashlog: fault address {:#x}", fault.fault_address);

    // SAFETY: this thread holds the guard, which is never released, so it is the only one to
    // ever reach the scratch.
    unsafe { handle_fault(state, &fault, tid, &SCRATCH) };
    REPORT_DONE.store(true, SeqCst);

    // Never returns. If the previous handler comes back, the fault is re-raised with the default
    // action.
    // SAFETY: these are the arguments the kernel passed to this handler.
    unsafe { chain_signal_handler(kind, state.registry.saved(kind), sig_info, ucontext) }
}

/// Collects the crash snapshot and persists it with the pending marker. Best-effort: every step
/// runs even if an earlier one failed.
///
/// SAFETY: the caller must have exclusive access to `scratch`.
unsafe fn handle_fault(
    state: &InstalledState,
    fault: &FaultContext,
    tid: u64,
    scratch: &ReportScratch,
) {
    let config = &state.config;
    let regs = &mut *scratch.registers.get();
    let backtrace = &mut *scratch.backtrace.get();
    let path = &mut *scratch.report_path.get();
    let marker_path = &mut *scratch.marker_path.get();

    let registers = capture_registers(fault, regs).then_some(&*regs);
    capture_backtrace(
        config.max_frames(),
        registers.map(|r| r.pc as usize),
        backtrace,
    );
    let report = CrashReport {
        title: config.report_title(),
        timestamp: CrashTimestamp::now(state.utc_offset_secs),
        fault: *fault,
        pid: libc::getpid(),
        tid,
        registers,
        backtrace,
    };

    match write_report(&report, config.report_dir(), path) {
        Ok(()) => {
            if let Err(e) =
                write_pending_marker(path.file_name(), config.report_dir(), marker_path)
            {
                sigsafe_eprintln!(
                    "crashlog: failed to write pending marker, errno {}",
                    e.raw_os_error().unwrap_or(0)
                );
            }
            sigsafe_eprintln!("crashlog: native crash log saved to: {path}");
        }
        Err(e) => {
            sigsafe_eprintln!(
                "crashlog: failed to create crash log in {}, errno {}",
                config.report_dir().display(),
                e.raw_os_error().unwrap_or(0)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::signal_handler_manager::SystemSigaction;
    use crate::shared::constants::{PENDING_MARKER_FILENAME, SECTION_FOOTER};

    #[test]
    fn test_thread_ids_differ() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, 0);
        assert_ne!(here, there);
    }

    #[test]
    fn test_publish_and_take_state() {
        assert!(take_state().is_none());
        let state = InstalledState {
            config: CrashLogConfiguration::with_defaults("/tmp/crashlog-test").unwrap(),
            utc_offset_secs: 3600,
            registry: SignalRegistry::new(SystemSigaction),
        };
        publish_state(Box::new(state));
        // SAFETY: no other test touches the published state.
        let peeked = unsafe { peek_state() }.unwrap();
        assert_eq!(peeked.utc_offset_secs, 3600);

        let taken = take_state().unwrap();
        assert_eq!(taken.config.report_dir().to_str(), Some("/tmp/crashlog-test"));
        assert!(take_state().is_none());
        assert!(!is_handling_crash());
        drop_state(taken);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_handle_fault_fits_in_a_signal_sized_stack() {
        let dir = tempfile::tempdir().unwrap();
        let state = InstalledState {
            config: CrashLogConfiguration::with_defaults(dir.path()).unwrap(),
            utc_offset_secs: 0,
            registry: SignalRegistry::new(SystemSigaction),
        };
        let scratch = ReportScratch {
            registers: UnsafeCell::new(RegisterSnapshot::new(0)),
            backtrace: UnsafeCell::new(Backtrace::new()),
            report_path: UnsafeCell::new(PathBuffer::new()),
            marker_path: UnsafeCell::new(PathBuffer::new()),
        };

        // Same order of magnitude as the alternate stack of a runtime-spawned thread. Running
        // out of it takes the whole test binary down.
        std::thread::scope(|s| {
            std::thread::Builder::new()
                .stack_size(2 * libc::SIGSTKSZ)
                .spawn_scoped(s, || {
                    let fault = FaultContext::synthetic(FaultKind::ILL, 2, 0x1000);
                    // SAFETY: the scratch is local to this test.
                    unsafe { handle_fault(&state, &fault, 4242, &scratch) };
                })
                .unwrap()
                .join()
                .unwrap();
        });

        let marker = std::fs::read_to_string(dir.path().join(PENDING_MARKER_FILENAME)).unwrap();
        let report = std::fs::read_to_string(dir.path().join(&marker)).unwrap();
        assert!(report.contains("Tid: 4242\n"), "{report}");
        assert!(report.contains(SECTION_FOOTER), "{report}");
        // SAFETY: the thread that used the scratch has been joined.
        let path = unsafe { &*scratch.report_path.get() };
        assert_eq!(path.file_name(), marker.as_bytes());
    }
}
