// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

use std::collections::HashMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use bin_tests::{build_artifacts, ArtifactsBuild, BuildProfile};

const SECTION_BANNER: &str = "========================================";

#[test]
#[cfg_attr(miri, ignore)]
fn test_crash_report_segv() {
    let run = run_crashlog_bin(BuildProfile::Debug, "donothing", "SIGSEGV");
    assert_eq!(run.status.signal(), Some(libc::SIGSEGV), "{run}");
    let report = run.single_report();
    assert_report_layout(&report, "SIGSEGV");
    assert!(
        report.contains("Description: Segmentation fault (invalid memory access)\n"),
        "{report}"
    );
    // A real access fault, not a raised signal.
    assert!(report.contains("Signal Code: 1 (SEGV_MAPERR)\n"), "{report}");
    assert!(report.contains("Fault Address: 0x0\n"), "{report}");
    assert!(!run.stderr.contains("panicked"), "{run}");
    assert!(run.stderr.contains("native crash detected"), "{run}");
    assert!(run.stderr.contains("native crash log saved to: "), "{run}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_crash_report_abort() {
    let run = run_crashlog_bin(BuildProfile::Debug, "donothing", "SIGABRT");
    assert_eq!(run.status.signal(), Some(libc::SIGABRT), "{run}");
    let report = run.single_report();
    assert_report_layout(&report, "SIGABRT");
    assert!(
        report.contains("Description: Abort signal (abnormal termination)\n"),
        "{report}"
    );
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_crash_report_every_kind() {
    for (name, signum) in [
        ("SIGFPE", libc::SIGFPE),
        ("SIGILL", libc::SIGILL),
        ("SIGBUS", libc::SIGBUS),
        ("SIGTRAP", libc::SIGTRAP),
    ] {
        let run = run_crashlog_bin(BuildProfile::Debug, "donothing", name);
        assert_eq!(run.status.signal(), Some(signum), "{name}: {run}");
        assert_report_layout(&run.single_report(), name);
    }
}

#[test]
#[ignore] // This test is slow, only run it if explicitly opted in
fn test_crash_report_segv_release() {
    let run = run_crashlog_bin(BuildProfile::Release, "donothing", "SIGSEGV");
    assert_eq!(run.status.signal(), Some(libc::SIGSEGV), "{run}");
    assert_report_layout(&run.single_report(), "SIGSEGV");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_previous_handler_is_chained() {
    let run = run_crashlog_bin(BuildProfile::Debug, "chained", "SIGSEGV");
    assert_eq!(run.status.code(), Some(42), "{run}");
    assert_report_layout(&run.single_report(), "SIGSEGV");
    let marker = fs::read_to_string(run.report_dir().join("host_handler_ran"))
        .context("reading the host handler marker")
        .unwrap();
    assert_eq!(marker, "chained\n");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_returning_previous_handler_is_followed_by_default_action() {
    let run = run_crashlog_bin(BuildProfile::Debug, "simple_chained", "SIGILL");
    assert_eq!(run.status.signal(), Some(libc::SIGILL), "{run}");
    assert!(!run.stderr.contains("recursive crash detected"), "{run}");
    assert_report_layout(&run.single_report(), "SIGILL");
    let marker = fs::read_to_string(run.report_dir().join("host_handler_ran"))
        .context("reading the host handler marker")
        .unwrap();
    assert_eq!(marker, "chained\n");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_crash_on_spawned_thread() {
    // Spawned threads run the handler on the small alternate stack the runtime gave them.
    for (name, signum) in [("SIGILL", libc::SIGILL), ("SIGSEGV", libc::SIGSEGV)] {
        let run = run_crashlog_bin(BuildProfile::Debug, "thread", name);
        assert_eq!(run.status.signal(), Some(signum), "{name}: {run}");
        assert!(!run.stderr.contains("recursive crash detected"), "{run}");
        let report = run.single_report();
        assert_report_layout(&report, name);
        assert_ne!(field(&report, "Pid"), field(&report, "Tid"), "{report}");
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_crashes_write_one_report() {
    let run = run_crashlog_bin(BuildProfile::Debug, "concurrent", "SIGSEGV");
    assert_eq!(run.status.signal(), Some(libc::SIGSEGV), "{run}");
    assert!(!run.stderr.contains("recursive crash detected"), "{run}");
    // Exactly one report, and it is complete.
    assert_report_layout(&run.single_report(), "SIGSEGV");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_stack_overflow_is_reported() {
    let run = run_crashlog_bin(BuildProfile::Debug, "stack_overflow", "SIGSEGV");
    assert_eq!(run.status.signal(), Some(libc::SIGSEGV), "{run}");
    let report = run.single_report();
    assert_report_layout(&report, "SIGSEGV");
    let frames = report.lines().filter(|l| l.starts_with('#')).count();
    assert!(frames > 0, "{report}");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_recursive_crash_exits() {
    let run = run_crashlog_bin(BuildProfile::Debug, "recursive", "SIGABRT");
    assert_eq!(run.status.code(), Some(1), "{run}");
    assert!(run.stderr.contains("recursive crash detected"), "{run}");
    // The first fault was still reported, the second one was not.
    assert_report_layout(&run.single_report(), "SIGABRT");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_deep_stack_is_truncated() {
    let run = run_crashlog_bin(BuildProfile::Debug, "deep", "SIGSEGV");
    assert_eq!(run.status.signal(), Some(libc::SIGSEGV), "{run}");
    let report = run.single_report();
    assert_report_layout(&report, "SIGSEGV");
    let frames = report.lines().filter(|l| l.starts_with('#')).count();
    assert!(frames > 0, "{report}");
    assert!(frames <= 128, "{frames} frames");
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_uninstalled_writes_nothing() {
    let run = run_crashlog_bin(BuildProfile::Debug, "uninstalled", "SIGABRT");
    assert_eq!(run.status.signal(), Some(libc::SIGABRT), "{run}");
    assert!(run.reports().is_empty(), "{run}");
    assert!(!run.report_dir().join("pending_crash.flag").exists());
}

struct CrashRun {
    status: process::ExitStatus,
    stderr: String,
    tmpdir: tempfile::TempDir,
}

impl std::fmt::Display for CrashRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "status: {}\nstderr:\n{}", self.status, self.stderr)
    }
}

impl CrashRun {
    fn report_dir(&self) -> &Path {
        self.tmpdir.path()
    }

    fn reports(&self) -> Vec<PathBuf> {
        let mut reports: Vec<PathBuf> = fs::read_dir(self.report_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_report_file_name)
            })
            .collect();
        reports.sort();
        reports
    }

    /// Returns the content of the only report, after checking that the pending marker names it.
    fn single_report(&self) -> String {
        let reports = self.reports();
        assert_eq!(reports.len(), 1, "{reports:?}\n{self}");
        let report_name = reports[0].file_name().unwrap().to_str().unwrap();

        let marker = fs::read_to_string(self.report_dir().join("pending_crash.flag"))
            .context("reading the pending crash marker")
            .unwrap();
        assert_eq!(marker, report_name);

        fs::read_to_string(&reports[0])
            .context("reading the crash report")
            .unwrap()
    }
}

/// Value of a `Name: value` line of the signal information section.
fn field<'a>(report: &'a str, name: &str) -> &'a str {
    report
        .lines()
        .find_map(|l| l.strip_prefix(name)?.strip_prefix(": "))
        .unwrap_or_else(|| panic!("missing {name}: {report}"))
}

/// `crash_YYYYMMDD_hhmmss_mmm.log`
fn is_report_file_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix("crash_")
        .and_then(|n| n.strip_suffix(".log"))
    else {
        return false;
    };
    let parts: Vec<&str> = stamp.split('_').collect();
    parts.iter().map(|p| p.len()).eq([8, 6, 3])
        && parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit()))
}

fn assert_report_layout(report: &str, signal_name: &str) {
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(
        &lines[..3],
        [SECTION_BANNER, "Native Crash Report", SECTION_BANNER],
        "{report}"
    );
    assert!(report.contains("Crash Type: NATIVE\n"), "{report}");
    assert!(
        report.contains(&format!(" ({signal_name})\n")),
        "missing {signal_name}: {report}"
    );

    let mut last = 0;
    for section in [
        "Signal Information",
        "Stack Trace",
        "Memory Maps",
        "End of Crash Report",
    ] {
        let pos = report
            .find(&format!("{SECTION_BANNER}\n{section}\n{SECTION_BANNER}\n"))
            .unwrap_or_else(|| panic!("missing section {section}: {report}"));
        assert!(pos > last, "{section} is out of order");
        last = pos;
    }
    if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
        assert!(report.contains("Register State"), "{report}");
        assert!(report.contains("\npc:  "), "{report}");
    }
    // The memory map is a verbatim copy, so at least the binary itself shows up.
    assert!(report.contains("crashlog_bin_test"), "{report}");
}

fn run_crashlog_bin(profile: BuildProfile, mode: &str, kind: &str) -> CrashRun {
    let crashlog_bin = ArtifactsBuild::crashlog_bin_test(profile);
    let artifacts: HashMap<_, _> = build_artifacts(&[&crashlog_bin]).unwrap();
    let tmpdir = tempfile::TempDir::new().unwrap();

    let output = bin_tests::timeit!("exit after signal", {
        process::Command::new(&artifacts[&crashlog_bin])
            .arg(tmpdir.path())
            .arg(mode)
            .arg(kind)
            .stdin(process::Stdio::null())
            .output()
            .context("running crashlog_bin_test")
            .unwrap()
    });
    assert!(!output.status.success());

    CrashRun {
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        tmpdir,
    }
}

#[test]
fn test_report_file_name_pattern() {
    assert!(is_report_file_name("crash_20240102_030405_006.log"));
    assert!(!is_report_file_name("crash_20240102_030405.log"));
    assert!(!is_report_file_name("crash_2024010a_030405_006.log"));
    assert!(!is_report_file_name("pending_crash.flag"));
}
