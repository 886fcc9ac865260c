// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use super::crash_handler::handle_posix_sigaction;
use crate::crash_info::FaultKind;
use libc::{
    c_int, c_void, mmap, sigaltstack, siginfo_t, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE,
    PROT_READ, PROT_WRITE, SIGSTKSZ, SS_DISABLE,
};
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ptr;
use tracing::{debug, warn};

/// Exits immediately, without running destructors or `atexit` hooks.
pub(crate) fn terminate() -> ! {
    // Safety: No preconditions
    unsafe { libc::_exit(libc::EXIT_FAILURE) }
}

/// The `sigaction` system call, behind a seam so that registry bookkeeping can be exercised
/// without touching the process' real dispositions.
pub trait SigactionBackend {
    /// Installs `action` for `signal` and returns the disposition it replaced.
    fn swap(&mut self, signal: Signal, action: &SigAction) -> nix::Result<SigAction>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSigaction;

impl SigactionBackend for SystemSigaction {
    fn swap(&mut self, signal: Signal, action: &SigAction) -> nix::Result<SigAction> {
        // SAFETY: every handler we install is async-signal-safe, and every handler we restore
        // was installed by someone else in the first place.
        unsafe { signal::sigaction(signal, action) }
    }
}

/// What the process would have done with a signal before we took it over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    /// A plain `sa_handler`.
    Simple(extern "C" fn(c_int)),
    /// A `SA_SIGINFO` handler, which also wants the siginfo and machine context.
    Extended(extern "C" fn(c_int, *mut siginfo_t, *mut c_void)),
}

/// The exact `sigaction` a signal had before install, kept so it can be chained to on a crash
/// and put back verbatim (flags and mask included) on uninstall.
#[derive(Debug, Clone, Copy)]
pub struct SavedDisposition(SigAction);

impl SavedDisposition {
    pub fn action(&self) -> &SigAction {
        &self.0
    }

    pub fn disposition(&self) -> Disposition {
        match self.0.handler() {
            SigHandler::SigDfl => Disposition::Default,
            SigHandler::SigIgn => Disposition::Ignore,
            SigHandler::Handler(f) => Disposition::Simple(f),
            SigHandler::SigAction(f) => Disposition::Extended(f),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum KindState {
    NotInstalled,
    Installed(SavedDisposition),
    Failed(Errno),
}

impl KindState {
    pub fn is_installed(&self) -> bool {
        matches!(self, KindState::Installed(_))
    }
}

/// Owns the per-[`FaultKind`] bookkeeping of which signals are redirected to our handler, and
/// what they were redirected from.
#[derive(Debug)]
pub struct SignalRegistry<B: SigactionBackend = SystemSigaction> {
    backend: B,
    kinds: [KindState; FaultKind::COUNT],
}

impl<B: SigactionBackend> SignalRegistry<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            kinds: [KindState::NotInstalled; FaultKind::COUNT],
        }
    }

    /// Points every kind that is not yet installed at `action`, remembering the previous
    /// disposition.
    ///
    /// Every kind is attempted even if an earlier one fails. Kinds that are already installed
    /// are left alone, so the saved disposition is never overwritten with our own handler.
    pub fn install(&mut self, action: &SigAction) -> Result<(), Vec<(FaultKind, Errno)>> {
        let mut failures = vec![];
        for kind in FaultKind::ALL {
            if self.kinds[kind.index()].is_installed() {
                continue;
            }
            self.kinds[kind.index()] = match self.backend.swap(kind.signal(), action) {
                Ok(previous) => {
                    debug!(signal = kind.name(), "Registered crash handler");
                    KindState::Installed(SavedDisposition(previous))
                }
                Err(errno) => {
                    warn!(signal = kind.name(), %errno, "Unable to register crash handler");
                    failures.push((kind, errno));
                    KindState::Failed(errno)
                }
            };
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    /// Puts back the saved disposition of every installed kind.
    ///
    /// A kind whose restore fails is still forgotten: there is nothing better to retry with.
    pub fn uninstall(&mut self) -> Result<(), Vec<(FaultKind, Errno)>> {
        let mut failures = vec![];
        for kind in FaultKind::ALL {
            if let KindState::Installed(saved) = self.kinds[kind.index()] {
                if let Err(errno) = self.backend.swap(kind.signal(), saved.action()) {
                    warn!(signal = kind.name(), %errno, "Unable to restore previous handler");
                    failures.push((kind, errno));
                }
            }
            self.kinds[kind.index()] = KindState::NotInstalled;
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures)
        }
    }

    pub fn state(&self, kind: FaultKind) -> KindState {
        self.kinds[kind.index()]
    }

    pub fn saved(&self, kind: FaultKind) -> Option<&SavedDisposition> {
        match &self.kinds[kind.index()] {
            KindState::Installed(saved) => Some(saved),
            _ => None,
        }
    }

    pub fn installed_kinds(&self) -> impl Iterator<Item = FaultKind> + '_ {
        FaultKind::ALL
            .into_iter()
            .filter(|kind| self.kinds[kind.index()].is_installed())
    }

    pub fn failed_kinds(&self) -> Vec<(FaultKind, Errno)> {
        FaultKind::ALL
            .into_iter()
            .filter_map(|kind| match self.kinds[kind.index()] {
                KindState::Failed(errno) => Some((kind, errno)),
                _ => None,
            })
            .collect()
    }
}

/// The action installed for every [`FaultKind`].
///
/// `SA_NODEFER` lets a fault inside the handler reach the handler again, where the guard turns it
/// into an immediate exit instead of a hang. `SA_SIGINFO` is implied by `SigHandler::SigAction`.
pub(crate) fn handler_sigaction(use_alt_stack: bool) -> SigAction {
    // Running on the altstack is what makes a stack overflow reportable at all. Some runtimes
    // create an altstack of their own and expect the handler to use it without replacing it,
    // which is why using and creating are configured separately.
    let extra_saflags = if use_alt_stack {
        SaFlags::SA_ONSTACK
    } else {
        SaFlags::empty()
    };
    SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        SaFlags::SA_NODEFER | extra_saflags,
        SigSet::empty(),
    )
}

/// Allocates a signal altstack for the calling thread, and puts a guard page at the end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
///
/// An altstack that is already registered and large enough is kept as is.
pub(crate) unsafe fn create_alt_stack() -> anyhow::Result<()> {
    // Ensure that the altstack size is the greater of 16 pages or SIGSTKSZ. The default SIGSTKSZ
    // is 8KB, which is not enough for a backtrace plus a formatted report.
    let page_size = page_size::get();
    let sigalstack_base_size = std::cmp::max(SIGSTKSZ, 16 * page_size);

    let mut current: libc::stack_t = std::mem::zeroed();
    if sigaltstack(ptr::null(), &mut current) == 0
        && current.ss_flags & SS_DISABLE == 0
        && current.ss_size >= sigalstack_base_size
    {
        debug!(size = current.ss_size, "Keeping existing alternative stack");
        return Ok(());
    }

    let stackp = mmap(
        ptr::null_mut(),
        sigalstack_base_size + page_size,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANON,
        -1,
        0,
    );
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternative stack"
    );
    let guard_result = libc::mprotect(stackp, page_size, PROT_NONE);
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternative stack guard page"
    );
    let stackp = stackp.add(page_size);

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: sigalstack_base_size,
    };
    let rval = sigaltstack(&stack, ptr::null_mut());
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    debug!(size = sigalstack_base_size, "Created alternative stack");
    Ok(())
}

/// Once the report is written, hand the fault to whoever had it before us.
///
/// If that was a real handler, it is called with the original arguments. It may end the process
/// itself. If it returns instead, or if there was no handler at all (default, ignore, or nothing
/// recorded), the default disposition is put back and the signal re-raised, so the process dies
/// from it, core dump included.
///
/// SAFETY: `sig_info` and `ucontext` must be the values passed to the running signal handler.
pub(crate) unsafe fn chain_signal_handler(
    kind: FaultKind,
    saved: Option<&SavedDisposition>,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) -> ! {
    // How we chain depends on what kind of handler we're chaining to.
    // https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html
    // https://man7.org/linux/man-pages/man2/sigaction.2.html
    match saved.map(SavedDisposition::disposition) {
        // Our own handler, left over from an earlier registry. Calling it would only trip the
        // guard.
        Some(Disposition::Extended(f)) if f as usize == handle_posix_sigaction as usize => {
            reraise_with_default(kind)
        }
        Some(Disposition::Extended(f)) => f(kind.signum(), sig_info, ucontext),
        Some(Disposition::Simple(f)) => f(kind.signum()),
        Some(Disposition::Default) | Some(Disposition::Ignore) | None => (),
    }
    // The faulting instruction would run again if we returned.
    reraise_with_default(kind)
}

/// Restores `SIG_DFL` for `kind` and re-delivers it to this thread.
///
/// Signals are only delivered once. In the case where we were invoked because of a crash,
/// returning would re-run the crashing instruction, but in the case where we were invoked by
/// `raise` the default handler would never receive it, so always raise.
pub(crate) fn reraise_with_default(kind: FaultKind) -> ! {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: installing the default disposition has no preconditions.
    if unsafe { signal::sigaction(kind.signal(), &default) }.is_err() {
        terminate()
    }
    // Our handler runs with SA_NODEFER, but the fault may have arrived through a chained handler
    // that masks it.
    let mut mask = SigSet::empty();
    mask.add(kind.signal());
    let _ = mask.thread_unblock();
    // SAFETY: No preconditions.
    unsafe { libc::raise(kind.signum()) };
    // Only reachable if the default action did not kill us
    terminate()
}
