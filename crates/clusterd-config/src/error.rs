use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or parsing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Read {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file is not a valid configuration document.
    #[error("failed to parse configuration '{path}': {source}")]
    Parse {
        /// Configuration file path.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// Structural problems detected in a cluster configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// No cluster key was configured.
    #[error("Unspecified key")]
    UnspecifiedKey,
    /// The cluster key has the wrong length or alphabet.
    #[error("Key must be 32 characters long and only have alphanumeric characters")]
    InvalidKey,
    /// The port lies outside the permitted range.
    #[error("Port must be higher than 1024 and lower than 65535 (got {port})")]
    InvalidPort {
        /// Configured port.
        port: u16,
    },
    /// Node addresses contain reserved placeholders.
    #[error("Invalid elements in node fields: {}", values.join(", "))]
    ReservedNodes {
        /// Offending values, sorted.
        values: Vec<String>,
    },
    /// No node address was configured.
    #[error("No master node configured")]
    MissingNodes,
}
