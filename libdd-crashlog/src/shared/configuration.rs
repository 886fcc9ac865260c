// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::shared::constants::{DEFAULT_REPORT_TITLE, MAX_BACKTRACE_FRAMES, MAX_REPORT_DIR_LEN};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashLogConfiguration {
    report_dir: PathBuf,
    create_alt_stack: bool,
    use_alt_stack: bool,
    max_frames: usize,
    report_title: String,
}

impl CrashLogConfiguration {
    pub fn new(
        report_dir: impl Into<PathBuf>,
        create_alt_stack: bool,
        use_alt_stack: bool,
        max_frames: Option<usize>,
        report_title: Option<String>,
    ) -> anyhow::Result<Self> {
        let report_dir = report_dir.into();
        let dir_bytes = report_dir.as_os_str().as_bytes();
        anyhow::ensure!(!dir_bytes.is_empty(), "Report directory must not be empty");
        anyhow::ensure!(
            !dir_bytes.contains(&0),
            "Report directory must not contain a NUL byte: {report_dir:?}"
        );
        // Paths are built in fixed-size buffers inside the signal handler.
        anyhow::ensure!(
            dir_bytes.len() <= MAX_REPORT_DIR_LEN,
            "Report directory is longer than {MAX_REPORT_DIR_LEN} bytes: {report_dir:?}"
        );
        // Requesting to create, but not use, the altstack is considered paradoxical.
        anyhow::ensure!(
            !create_alt_stack || use_alt_stack,
            "Cannot create an altstack without using it"
        );
        let max_frames = max_frames.unwrap_or(MAX_BACKTRACE_FRAMES);
        anyhow::ensure!(
            (1..=MAX_BACKTRACE_FRAMES).contains(&max_frames),
            "max_frames must be between 1 and {MAX_BACKTRACE_FRAMES}, got {max_frames}"
        );
        let report_title = report_title.unwrap_or_else(|| DEFAULT_REPORT_TITLE.to_string());
        anyhow::ensure!(
            !report_title.contains('\n'),
            "Report title must be a single line"
        );

        Ok(Self {
            report_dir,
            create_alt_stack,
            use_alt_stack,
            max_frames,
            report_title,
        })
    }

    /// The configuration used by the plain `install(dir)` entry point.
    pub fn with_defaults(report_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::new(report_dir, true, true, None, None)
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn report_title(&self) -> &str {
        &self.report_title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let config = CrashLogConfiguration::with_defaults("/var/crashlogs")?;
        assert_eq!(config.report_dir(), Path::new("/var/crashlogs"));
        assert!(config.create_alt_stack());
        assert!(config.use_alt_stack());
        assert_eq!(config.max_frames(), MAX_BACKTRACE_FRAMES);
        assert_eq!(config.report_title(), DEFAULT_REPORT_TITLE);
        Ok(())
    }

    #[test]
    fn test_rejects_empty_dir() {
        CrashLogConfiguration::with_defaults("").unwrap_err();
        CrashLogConfiguration::with_defaults(PathBuf::new()).unwrap_err();
    }

    #[test]
    fn test_rejects_nul_in_dir() {
        CrashLogConfiguration::with_defaults("/tmp/a\0b").unwrap_err();
    }

    #[test]
    fn test_dir_length_bound() {
        let longest = format!("/{}", "d".repeat(MAX_REPORT_DIR_LEN - 1));
        assert!(CrashLogConfiguration::with_defaults(&longest).is_ok());
        CrashLogConfiguration::with_defaults(format!("{longest}d")).unwrap_err();
    }

    #[test]
    fn test_altstack_combinations() {
        CrashLogConfiguration::new("/tmp", true, false, None, None).unwrap_err();
        assert!(CrashLogConfiguration::new("/tmp", false, true, None, None).is_ok());
        assert!(CrashLogConfiguration::new("/tmp", false, false, None, None).is_ok());
    }

    #[test]
    fn test_max_frames_bounds() {
        CrashLogConfiguration::new("/tmp", true, true, Some(0), None).unwrap_err();
        CrashLogConfiguration::new("/tmp", true, true, Some(MAX_BACKTRACE_FRAMES + 1), None)
            .unwrap_err();
        let config = CrashLogConfiguration::new("/tmp", true, true, Some(16), None).unwrap();
        assert_eq!(config.max_frames(), 16);
    }

    #[test]
    fn test_report_title() {
        let title = Some("MyApp Native Crash Report".to_string());
        let config = CrashLogConfiguration::new("/tmp", true, true, None, title).unwrap();
        assert_eq!(config.report_title(), "MyApp Native Crash Report");
        CrashLogConfiguration::new("/tmp", true, true, None, Some("a\nb".to_string()))
            .unwrap_err();
    }
}
