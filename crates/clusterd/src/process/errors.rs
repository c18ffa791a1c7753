//! Defines the unified error surface for supervisor startup and supervision.

use std::io;
use std::path::PathBuf;

use clusterd_config::RuntimePathsError;
use thiserror::Error;

use crate::keys::KeyPairError;
use crate::node::NodeError;

use super::daemonizer::DaemonizeError;
use super::pid_registry::PidRegistryError;
use super::privileges::PrivilegeError;
use super::signals::ShutdownError;

/// Errors surfaced while starting or supervising the cluster node.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The runtime directory could not be created.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing PID records failed.
    #[error("pid registry failure: {source}")]
    PidRegistry {
        /// Underlying registry error.
        #[source]
        source: PidRegistryError,
    },
    /// Removing previous run state failed.
    #[error("failed to clear previous run state in '{path}': {source}")]
    Cleanup {
        /// Directory being cleared.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching to the service account failed.
    #[error("failed to drop privileges: {source}")]
    Privilege {
        /// Underlying privilege error.
        #[source]
        source: PrivilegeError,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Generating the authentication key pair failed.
    #[error("failed to generate key pair: {source}")]
    KeyPair {
        /// Underlying generator error.
        #[source]
        source: KeyPairError,
    },
    /// The async runtime could not be built.
    #[error("failed to build async runtime: {source}")]
    Runtime {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Installing the signal listener failed.
    #[error("failed to install signal listener: {source}")]
    Shutdown {
        /// Underlying listener error.
        #[source]
        source: ShutdownError,
    },
    /// The cluster node failed.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// A named startup step failed before the node could run.
    #[error("{step} failed: {source}")]
    Startup {
        /// Step that failed.
        step: &'static str,
        /// What went wrong.
        #[source]
        source: Box<Self>,
    },
}

impl From<RuntimePathsError> for SupervisorError {
    fn from(source: RuntimePathsError) -> Self {
        match source {
            RuntimePathsError::RuntimeDirectory { path, source } => {
                Self::RuntimeDirectory { path, source }
            }
        }
    }
}

impl From<PidRegistryError> for SupervisorError {
    fn from(source: PidRegistryError) -> Self {
        Self::PidRegistry { source }
    }
}

impl From<PrivilegeError> for SupervisorError {
    fn from(source: PrivilegeError) -> Self {
        Self::Privilege { source }
    }
}

impl From<DaemonizeError> for SupervisorError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<KeyPairError> for SupervisorError {
    fn from(source: KeyPairError) -> Self {
        Self::KeyPair { source }
    }
}

impl From<ShutdownError> for SupervisorError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
