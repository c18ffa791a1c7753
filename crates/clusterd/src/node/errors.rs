use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

/// Errors raised while building the task pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The shared-memory directory is missing or not accessible.
    #[error("shared memory directory '{path}' is not usable: {source}")]
    SharedMemory {
        /// Shared-memory directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The pool was asked for zero workers.
    #[error("task pool needs at least one worker")]
    NoWorkers,
    /// Probing the shared-memory directory failed for another reason.
    #[error("failed to prepare task pool in '{path}': {source}")]
    Io {
        /// Shared-memory directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Errors raised by cluster node components.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The connection to the peer was lost. Recoverable on workers.
    #[error("connection with {peer} lost: {reason}")]
    Disconnected {
        /// Peer address.
        peer: String,
        /// What ended the connection.
        reason: String,
    },
    /// The temporary working directory is not usable.
    #[error("temporary directory '{path}' is not usable: {source}")]
    TempDirectory {
        /// Temporary directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Building the task pool failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A worker has no master address configured.
    #[error("no master node configured")]
    MissingMaster,
    /// Binding a listener failed.
    #[error("failed to listen on {address}: {source}")]
    Listen {
        /// Listener address.
        address: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another process already serves the local socket.
    #[error("local socket '{path}' is already in use")]
    SocketInUse {
        /// Socket path.
        path: PathBuf,
    },
    /// The local socket path is occupied by something other than a socket.
    #[error("'{path}' exists and is not a socket")]
    NotASocket {
        /// Offending path.
        path: PathBuf,
    },
    /// Preparing or binding the local socket failed.
    #[error("failed to bind local socket '{path}': {source}")]
    LocalSocket {
        /// Socket path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A component failed while serving.
    #[error("{component} failed: {source}")]
    Io {
        /// Failing component.
        component: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A hidden test option asks for a payload larger than one frame.
    #[error("--{option} {size} exceeds the {limit}-byte payload limit")]
    HarnessPayload {
        /// Offending option.
        option: &'static str,
        /// Requested size.
        size: i64,
        /// Largest accepted size.
        limit: i64,
    },
    /// A component task panicked or was aborted.
    #[error("component task failed: {0}")]
    Task(#[from] JoinError),
}

impl NodeError {
    /// Whether the error means the worker should reconnect.
    #[must_use]
    pub fn is_disconnection(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
