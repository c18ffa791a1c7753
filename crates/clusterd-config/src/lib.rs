//! Shared configuration for the cluster supervisor.
//!
//! The supervisor reads a single TOML file describing the cluster node, the
//! tunable intervals used by the control loops, the installation layout, and
//! the commands used to launch the auxiliary daemons. Every table is optional;
//! missing values fall back to the defaults in [`defaults`].
//!
//! Loading only checks that the document is well formed. The structural
//! rules a cluster node must satisfy live in [`check_cluster_config`] so the
//! supervisor can run them both at startup and in configuration-test mode.

mod cluster;
pub mod defaults;
mod error;
mod items;
mod logging;
mod runtime;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use cluster::{
    ClusterConfig, ClusterMode, HelperConfig, RESERVED_NODE_VALUES, ValidationWarning,
    check_cluster_config,
};
pub use error::{ConfigError, ValidationError};
pub use items::{ClusterItems, Intervals, MasterIntervals, WorkerIntervals};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{DaemonCommands, RuntimePaths, RuntimePathsError, RuntimeSettings};

/// Fully resolved supervisor configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cluster node description.
    pub cluster: ClusterConfig,
    /// Tunables consumed by the control loops.
    pub items: ClusterItems,
    /// Installation layout, ownership, and logging.
    pub runtime: RuntimeSettings,
    /// Overrides for the auxiliary daemon commands.
    pub daemons: DaemonCommands,
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Parses configuration text, attributing errors to `origin`.
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Role of this node.
    #[must_use]
    pub fn mode(&self) -> ClusterMode {
        self.cluster.node_type
    }

    /// Derives the runtime artefact layout for this configuration.
    #[must_use]
    pub fn runtime_paths(&self) -> RuntimePaths {
        RuntimePaths::from_config(self)
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from(defaults::DEFAULT_INSTALL_DIR).join(defaults::DEFAULT_CONFIG_FILE)
    }
}
