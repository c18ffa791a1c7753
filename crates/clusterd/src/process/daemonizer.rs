//! Moves the cluster supervisor into the background.
//!
//! The detached child keeps the installation directory as its working
//! directory so the relative paths handed to the auxiliary daemons resolve
//! exactly as they do in the foreground.

use std::ffi::OsStr;
use std::path::PathBuf;

use clusterd_config::RuntimePaths;
use daemonize_me::{Daemon, DaemonError};
use thiserror::Error;
use tracing::debug;

use super::{CLUSTERD_NAME, PROCESS_TARGET};

/// Detaches the supervisor from its controlling terminal.
pub trait Daemonizer: Send + Sync {
    /// Forks into the background and returns in the detached child.
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError>;
}

/// Errors raised while detaching the supervisor.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// The installation directory cannot become the working directory.
    #[error("installation directory '{path}' does not exist")]
    MissingInstallDir {
        /// Installation directory.
        path: PathBuf,
    },
    /// Forking or leaving the session failed.
    #[error("failed to detach {name}: {source}")]
    Detach {
        /// Process name given to the detached child.
        name: &'static str,
        /// Underlying backend error.
        #[source]
        source: DaemonError,
    },
}

/// Daemoniser backed by `daemonize-me`, naming the child after the
/// supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SystemDaemonizer {
    name: &'static str,
}

impl Default for SystemDaemonizer {
    fn default() -> Self {
        Self {
            name: CLUSTERD_NAME,
        }
    }
}

impl SystemDaemonizer {
    /// Builds a daemoniser for the cluster supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self, paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        let work_dir = paths.install_dir();
        if !work_dir.is_dir() {
            return Err(DaemonizeError::MissingInstallDir {
                path: work_dir.to_path_buf(),
            });
        }
        debug!(
            target: PROCESS_TARGET,
            name = self.name,
            work_dir = %work_dir.display(),
            "detaching supervisor"
        );
        Daemon::new()
            .work_dir(work_dir)
            .name(OsStr::new(self.name))
            .start()
            .map_err(|source| DaemonizeError::Detach {
                name: self.name,
                source,
            })?;
        debug!(target: PROCESS_TARGET, pid = std::process::id(), "supervisor detached");
        Ok(())
    }
}
