// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use nix::sys::signal::Signal;

/// The fatal signals intercepted by the crash logger. No other signal is ever registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
#[repr(C)]
pub enum FaultKind {
    SEGV,
    ABORT,
    FPE,
    ILL,
    BUS,
    TRAP,
}

impl FaultKind {
    pub const COUNT: usize = 6;

    pub const ALL: [FaultKind; Self::COUNT] = [
        FaultKind::SEGV,
        FaultKind::ABORT,
        FaultKind::FPE,
        FaultKind::ILL,
        FaultKind::BUS,
        FaultKind::TRAP,
    ];

    /// Position of this kind in [`FaultKind::ALL`], used to index per-kind tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn signal(self) -> Signal {
        match self {
            FaultKind::SEGV => Signal::SIGSEGV,
            FaultKind::ABORT => Signal::SIGABRT,
            FaultKind::FPE => Signal::SIGFPE,
            FaultKind::ILL => Signal::SIGILL,
            FaultKind::BUS => Signal::SIGBUS,
            FaultKind::TRAP => Signal::SIGTRAP,
        }
    }

    pub const fn signum(self) -> libc::c_int {
        self.signal() as libc::c_int
    }

    /// Signals outside of the six intercepted ones map to `None`.
    pub fn from_signum(signum: libc::c_int) -> Option<Self> {
        match signum {
            libc::SIGSEGV => Some(FaultKind::SEGV),
            libc::SIGABRT => Some(FaultKind::ABORT),
            libc::SIGFPE => Some(FaultKind::FPE),
            libc::SIGILL => Some(FaultKind::ILL),
            libc::SIGBUS => Some(FaultKind::BUS),
            libc::SIGTRAP => Some(FaultKind::TRAP),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            FaultKind::SEGV => "SIGSEGV",
            FaultKind::ABORT => "SIGABRT",
            FaultKind::FPE => "SIGFPE",
            FaultKind::ILL => "SIGILL",
            FaultKind::BUS => "SIGBUS",
            FaultKind::TRAP => "SIGTRAP",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            FaultKind::SEGV => "Segmentation fault (invalid memory access)",
            FaultKind::ABORT => "Abort signal (abnormal termination)",
            FaultKind::FPE => "Floating point exception (division by zero, etc.)",
            FaultKind::ILL => "Illegal instruction",
            FaultKind::BUS => "Bus error (invalid memory alignment)",
            FaultKind::TRAP => "Trace/breakpoint trap",
        }
    }

    /// Symbolic name of `si_code` for this kind of fault.
    /// These are defined in siginfo.h. Only the most common, actionable values are listed.
    pub fn code_name(self, si_code: libc::c_int) -> &'static str {
        // Strip out the high byte for PTRACE_EVENT_* flags
        let code = si_code & 0x7f;

        let specific = match self {
            FaultKind::ILL => match code {
                siginfo_code::ill::ILLOPC => Some("ILL_ILLOPC"),
                siginfo_code::ill::ILLOPN => Some("ILL_ILLOPN"),
                siginfo_code::ill::ILLADR => Some("ILL_ILLADR"),
                siginfo_code::ill::ILLTRP => Some("ILL_ILLTRP"),
                siginfo_code::ill::PRVOPC => Some("ILL_PRVOPC"),
                siginfo_code::ill::PRVREG => Some("ILL_PRVREG"),
                siginfo_code::ill::COPROC => Some("ILL_COPROC"),
                siginfo_code::ill::BADSTK => Some("ILL_BADSTK"),
                _ => None,
            },
            FaultKind::SEGV => match code {
                siginfo_code::segv::MAPERR => Some("SEGV_MAPERR"),
                siginfo_code::segv::ACCERR => Some("SEGV_ACCERR"),
                _ => None,
            },
            FaultKind::BUS => match code {
                siginfo_code::bus::ADRALN => Some("BUS_ADRALN"),
                siginfo_code::bus::ADRERR => Some("BUS_ADRERR"),
                siginfo_code::bus::OBJERR => Some("BUS_OBJERR"),
                _ => None,
            },
            FaultKind::FPE => match code {
                siginfo_code::fpe::INTDIV => Some("FPE_INTDIV"),
                siginfo_code::fpe::INTOVF => Some("FPE_INTOVF"),
                siginfo_code::fpe::FLTDIV => Some("FPE_FLTDIV"),
                siginfo_code::fpe::FLTOVF => Some("FPE_FLTOVF"),
                siginfo_code::fpe::FLTUND => Some("FPE_FLTUND"),
                siginfo_code::fpe::FLTRES => Some("FPE_FLTRES"),
                siginfo_code::fpe::FLTINV => Some("FPE_FLTINV"),
                siginfo_code::fpe::FLTSUB => Some("FPE_FLTSUB"),
                _ => None,
            },
            FaultKind::TRAP => match code {
                siginfo_code::trap::BRKPT => Some("TRAP_BRKPT"),
                siginfo_code::trap::TRACE => Some("TRAP_TRACE"),
                _ => None,
            },
            FaultKind::ABORT => None,
        };

        // Codes raised from userspace (kill, tgkill, raise) are shared by every signal.
        specific.unwrap_or(match si_code {
            siginfo_code::SI_USER => "SI_USER",
            siginfo_code::SI_KERNEL => "SI_KERNEL",
            siginfo_code::SI_QUEUE => "SI_QUEUE",
            siginfo_code::SI_TIMER => "SI_TIMER",
            siginfo_code::SI_TKILL => "SI_TKILL",
            _ => "UNKNOWN",
        })
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// They are only derived here because there doesn't appear to be a crate that provides them in a
// comparable way.
mod siginfo_code {
    pub const SI_USER: i32 = 0;
    pub const SI_KERNEL: i32 = 0x80;
    pub const SI_QUEUE: i32 = -1;
    pub const SI_TIMER: i32 = -2;
    pub const SI_TKILL: i32 = -6;

    pub mod ill {
        pub const ILLOPC: i32 = 1;
        pub const ILLOPN: i32 = 2;
        pub const ILLADR: i32 = 3;
        pub const ILLTRP: i32 = 4;
        pub const PRVOPC: i32 = 5;
        pub const PRVREG: i32 = 6;
        pub const COPROC: i32 = 7;
        pub const BADSTK: i32 = 8;
    }

    pub mod fpe {
        pub const INTDIV: i32 = 1;
        pub const INTOVF: i32 = 2;
        pub const FLTDIV: i32 = 3;
        pub const FLTOVF: i32 = 4;
        pub const FLTUND: i32 = 5;
        pub const FLTRES: i32 = 6;
        pub const FLTINV: i32 = 7;
        pub const FLTSUB: i32 = 8;
    }

    pub mod segv {
        pub const MAPERR: i32 = 1;
        pub const ACCERR: i32 = 2;
    }

    pub mod bus {
        pub const ADRALN: i32 = 1;
        pub const ADRERR: i32 = 2;
        pub const OBJERR: i32 = 3;
    }

    pub mod trap {
        pub const BRKPT: i32 = 1;
        pub const TRACE: i32 = 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_all() {
        for (i, kind) in FaultKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_signum_mapping_is_total() {
        for kind in FaultKind::ALL {
            assert_eq!(FaultKind::from_signum(kind.signum()), Some(kind));
        }
        assert_eq!(FaultKind::from_signum(libc::SIGSEGV), Some(FaultKind::SEGV));
        assert_eq!(FaultKind::from_signum(libc::SIGTRAP), Some(FaultKind::TRAP));
    }

    #[test]
    fn test_other_signals_are_rejected() {
        for signum in [
            0,
            libc::SIGINT,
            libc::SIGTERM,
            libc::SIGKILL,
            libc::SIGPIPE,
            libc::SIGCHLD,
            libc::SIGSYS,
            libc::SIGUSR1,
            -1,
            1000,
        ] {
            assert_eq!(FaultKind::from_signum(signum), None, "signum {signum}");
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(FaultKind::SEGV.name(), "SIGSEGV");
        assert_eq!(FaultKind::ABORT.to_string(), "SIGABRT");
        assert_eq!(
            FaultKind::BUS.description(),
            "Bus error (invalid memory alignment)"
        );
    }

    #[test]
    fn test_code_names() {
        assert_eq!(FaultKind::SEGV.code_name(1), "SEGV_MAPERR");
        assert_eq!(FaultKind::SEGV.code_name(2), "SEGV_ACCERR");
        assert_eq!(FaultKind::FPE.code_name(1), "FPE_INTDIV");
        assert_eq!(FaultKind::ILL.code_name(2), "ILL_ILLOPN");
        assert_eq!(FaultKind::BUS.code_name(1), "BUS_ADRALN");
        assert_eq!(FaultKind::TRAP.code_name(1), "TRAP_BRKPT");
        assert_eq!(FaultKind::ABORT.code_name(-6), "SI_TKILL");
        assert_eq!(FaultKind::SEGV.code_name(0), "SI_USER");
        assert_eq!(FaultKind::SEGV.code_name(42), "UNKNOWN");
    }
}
