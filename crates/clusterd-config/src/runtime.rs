//! Derives runtime artefact paths shared by the supervisor and its tests.
//!
//! Every file the supervisor touches lives under the installation root: PID
//! records, the cluster log, the previous run's cluster state, the local
//! control-plane socket, and the authentication key pair. The auxiliary
//! daemon commands default to their packaged locations under the same root.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Config;
use crate::defaults::{
    DEFAULT_GROUP, DEFAULT_USER, default_install_dir, default_log_filter, default_log_format,
    default_shm_dir, default_tmp_dir,
};
use crate::logging::LogFormat;

/// Installation layout, ownership, and logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeSettings {
    /// Installation root.
    pub install_dir: PathBuf,
    /// Account the supervisor switches to when not run as root.
    pub user: String,
    /// Group the supervisor switches to when not run as root.
    pub group: String,
    /// `tracing` filter expression.
    pub log_filter: String,
    /// Log line format.
    pub log_format: LogFormat,
    /// Temporary working directory.
    pub tmp_dir: PathBuf,
    /// Shared-memory directory backing the task pool.
    pub shm_dir: PathBuf,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            user: DEFAULT_USER.to_owned(),
            group: DEFAULT_GROUP.to_owned(),
            log_filter: default_log_filter(),
            log_format: default_log_format(),
            tmp_dir: default_tmp_dir(),
            shm_dir: default_shm_dir(),
        }
    }
}

/// Optional overrides for the auxiliary daemon commands.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonCommands {
    /// Engine binary.
    pub engine_binary: Option<PathBuf>,
    /// Interpreter running the API scripts.
    pub interpreter: Option<PathBuf>,
    /// Management API entry script.
    pub management_api_script: Option<PathBuf>,
    /// Communications API entry script.
    pub comms_api_script: Option<PathBuf>,
}

/// Canonical paths for runtime artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    install_dir: PathBuf,
    run_dir: PathBuf,
    log_path: PathBuf,
    cluster_state_dir: PathBuf,
    local_socket: PathBuf,
    private_key: PathBuf,
    public_key: PathBuf,
    tmp_dir: PathBuf,
    shm_dir: PathBuf,
    engine_binary: PathBuf,
    interpreter: PathBuf,
    management_api_script: PathBuf,
    comms_api_script: PathBuf,
}

impl RuntimePaths {
    /// Derives runtime paths from the configuration without touching disk.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let root = config.runtime.install_dir.clone();
        let commands = &config.daemons;
        let cluster_state_dir = root.join("queue").join("cluster");
        Self {
            run_dir: root.join("var").join("run"),
            log_path: root.join("logs").join("cluster.log"),
            local_socket: cluster_state_dir.join("c-internal.sock"),
            private_key: root.join("etc").join("private_key.pem"),
            public_key: root.join("etc").join("public_key.pem"),
            tmp_dir: config.runtime.tmp_dir.clone(),
            shm_dir: config.runtime.shm_dir.clone(),
            engine_binary: commands
                .engine_binary
                .clone()
                .unwrap_or_else(|| root.join("bin").join("wazuh-engine")),
            interpreter: commands
                .interpreter
                .clone()
                .unwrap_or_else(|| root.join("framework").join("python").join("bin").join("python3")),
            management_api_script: commands
                .management_api_script
                .clone()
                .unwrap_or_else(|| root.join("api").join("scripts").join("wazuh_apid.py")),
            comms_api_script: commands
                .comms_api_script
                .clone()
                .unwrap_or_else(|| root.join("apis").join("scripts").join("wazuh_comms_apid.py")),
            cluster_state_dir,
            install_dir: root,
        }
    }

    /// Creates the PID record directory when missing.
    pub fn ensure_run_dir(&self) -> Result<(), RuntimePathsError> {
        fs::create_dir_all(&self.run_dir).map_err(|source| RuntimePathsError::RuntimeDirectory {
            path: self.run_dir.clone(),
            source,
        })
    }

    /// Installation root.
    #[must_use]
    pub fn install_dir(&self) -> &Path {
        self.install_dir.as_path()
    }

    /// Directory holding PID records.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        self.run_dir.as_path()
    }

    /// Cluster log file.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        self.log_path.as_path()
    }

    /// Directory holding state left by the previous cluster run.
    #[must_use]
    pub fn cluster_state_dir(&self) -> &Path {
        self.cluster_state_dir.as_path()
    }

    /// Unix socket of the local control-plane server.
    #[must_use]
    pub fn local_socket(&self) -> &Path {
        self.local_socket.as_path()
    }

    /// Private half of the authentication key pair.
    #[must_use]
    pub fn private_key(&self) -> &Path {
        self.private_key.as_path()
    }

    /// Public half of the authentication key pair.
    #[must_use]
    pub fn public_key(&self) -> &Path {
        self.public_key.as_path()
    }

    /// Temporary working directory.
    #[must_use]
    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.as_path()
    }

    /// Shared-memory directory backing the task pool.
    #[must_use]
    pub fn shm_dir(&self) -> &Path {
        self.shm_dir.as_path()
    }

    /// Engine binary.
    #[must_use]
    pub fn engine_binary(&self) -> &Path {
        self.engine_binary.as_path()
    }

    /// Interpreter running the API scripts.
    #[must_use]
    pub fn interpreter(&self) -> &Path {
        self.interpreter.as_path()
    }

    /// Management API entry script.
    #[must_use]
    pub fn management_api_script(&self) -> &Path {
        self.management_api_script.as_path()
    }

    /// Communications API entry script.
    #[must_use]
    pub fn comms_api_script(&self) -> &Path {
        self.comms_api_script.as_path()
    }
}

/// Errors raised while preparing runtime directories.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating the runtime directory failed.
    #[error("failed to prepare runtime directory '{path}': {source}")]
    RuntimeDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
