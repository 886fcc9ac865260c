// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
#![deny(missing_docs)]

use super::crash_handler::{drop_state, peek_state, publish_state, take_state, InstalledState};
use super::signal_handler_manager::{
    create_alt_stack, handler_sigaction, SignalRegistry, SystemSigaction,
};
use crate::crash_info::FaultKind;
use crate::shared::configuration::CrashLogConfiguration;
use nix::errno::Errno;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Serializes install and uninstall. Never taken from the signal handler.
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    // The lock protects no data of its own, so a poisoned lock is as good as any.
    INSTALL_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Ways in which installing the crash logger can fail.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The configuration was rejected before anything was touched.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(anyhow::Error),
    /// The report directory does not exist and could not be created.
    #[error("Failed to create report directory {path:?}: {source}")]
    CreateReportDir {
        /// The directory from the configuration.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// Some fault kinds could not be redirected. The others are installed and stay so until
    /// [`uninstall`].
    #[error("Failed to register crash handlers for {0:?}")]
    PartialInstallation(Vec<(FaultKind, Errno)>),
}

/// Installs the crash logger with `config`, redirecting every [`FaultKind`] to it.
///
/// Calling it again while installed does nothing (the new configuration is ignored) and reports
/// the outcome of the original installation.
///
/// PRECONDITIONS:
///     None
/// ATOMICITY:
///     Setting the crash handler itself is not an atomic operation. If a fault occurs between
///     the registration of the handlers and the publication of the installed state, the fault
///     takes the default disposition without a report.
pub fn init(config: CrashLogConfiguration) -> Result<(), InstallError> {
    let _guard = lock();

    // SAFETY: we hold the install lock.
    if let Some(state) = unsafe { peek_state() } {
        debug!(report_dir = ?state.config.report_dir(), "Crash logger already installed");
        let failures = state.registry.failed_kinds();
        return if failures.is_empty() {
            Ok(())
        } else {
            Err(InstallError::PartialInstallation(failures))
        };
    }

    std::fs::create_dir_all(config.report_dir()).map_err(|source| {
        InstallError::CreateReportDir {
            path: config.report_dir().to_path_buf(),
            source,
        }
    })?;

    if config.create_alt_stack() {
        // Safety: This function has no documented preconditions.
        if let Err(e) = unsafe { create_alt_stack() } {
            warn!(error = %e, "Crash handler will run on the regular stack");
        }
    }

    let utc_offset_secs = chrono::Local::now().offset().local_minus_utc();
    let mut registry = SignalRegistry::new(SystemSigaction);
    let result = registry.install(&handler_sigaction(config.use_alt_stack()));

    if registry.installed_kinds().next().is_none() {
        error!("No crash handler could be registered");
    } else {
        info!(
            report_dir = ?config.report_dir(),
            installed = ?registry.installed_kinds().collect::<Vec<_>>(),
            "Crash logger installed"
        );
        publish_state(Box::new(InstalledState {
            config,
            utc_offset_secs,
            registry,
        }));
    }

    result.map_err(InstallError::PartialInstallation)
}

/// Installs the crash logger, writing reports into `report_dir` (created if missing).
///
/// Returns true only if every [`FaultKind`] is redirected. An empty path is rejected without
/// touching any signal disposition.
pub fn install(report_dir: impl AsRef<Path>) -> bool {
    let result = CrashLogConfiguration::with_defaults(report_dir.as_ref())
        .map_err(InstallError::InvalidConfiguration)
        .and_then(init);
    match result {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Failed to install crash logger");
            false
        }
    }
}

/// Restores the disposition each [`FaultKind`] had before install. Does nothing when not
/// installed.
pub fn uninstall() {
    let _guard = lock();
    let Some(mut state) = take_state() else {
        debug!("Crash logger not installed, nothing to uninstall");
        return;
    };
    if let Err(failures) = state.registry.uninstall() {
        warn!(?failures, "Some signal dispositions could not be restored");
    }
    drop_state(state);
    info!("Crash logger uninstalled");
}

/// Whether the crash logger is installed, even partially.
pub fn is_installed() -> bool {
    let _guard = lock();
    // SAFETY: we hold the install lock.
    unsafe { peek_state() }.is_some()
}

/// The fault kinds currently redirected to the crash logger.
pub fn installed_kinds() -> Vec<FaultKind> {
    let _guard = lock();
    // SAFETY: we hold the install lock.
    unsafe { peek_state() }
        .map(|state| state.registry.installed_kinds().collect())
        .unwrap_or_default()
}
