// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This crate implements a crash logger based on catching fatal UNIX signals
//! and writing a human-readable report to local storage.
//!
//! Architecturally, it consists of four parts:
//! 1. A signal registry, which swaps our handler in for SIGSEGV, SIGABRT, SIGFPE, SIGILL, SIGBUS
//!    and SIGTRAP, and remembers whatever disposition was in effect before, so that it can be
//!    restored on uninstall and chained to on a crash.
//! 2. A dispatcher, which is the signal handler itself. It runs under a constrained environment
//!    where many standard operations are illegal.
//!    <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
//!    In particular, memory allocation, and synchronization such as mutexes are potentially UB.
//!    A one-shot atomic guard makes sure that only one fault per process is ever reported. A
//!    fault raised while that fault is being reported terminates the process immediately.
//! 3. A collector, which gathers the register file from the machine context, a backtrace of the
//!    crashing thread (with best-effort `dladdr` symbol lookup) and `/proc/self/maps`.
//! 4. A writer, which persists all of the above with raw `open`/`write`/`close` calls into
//!    `crash_<YYYYMMDD>_<hhmmss>_<ms>.log` inside the configured directory, then overwrites
//!    `pending_crash.flag` with the name of that report so an external pipeline can pick it up.
//!
//! Once the report is on disk, the dispatcher chains to the previous handler. If there was none
//! (or it was `SIG_IGN`), or if it returns, the default disposition is restored and the signal is
//! re-raised, so the process dies the same way it would have without this crate.
#![cfg(unix)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod collector;
mod crash_info;
mod fault_trigger;
mod shared;

pub use collector::*;
pub use crash_info::*;
pub use fault_trigger::{trigger, trigger_by_index};
pub use shared::configuration::CrashLogConfiguration;
pub use shared::constants::*;
