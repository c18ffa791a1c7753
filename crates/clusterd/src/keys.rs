//! Authentication key pair used to sign API tokens.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use clusterd_config::RuntimePaths;
use thiserror::Error;

use crate::health::HealthReporter;

const CURVE: &str = "secp521r1";
const PRIVATE_KEY_MODE: u32 = 0o600;

/// Errors raised while generating the key pair.
#[derive(Debug, Error)]
pub enum KeyPairError {
    /// The generator could not be executed.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Generator program.
        program: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The generator exited unsuccessfully.
    #[error("'{program}' failed while writing '{path}' (status {status})")]
    Generator {
        /// Generator program.
        program: PathBuf,
        /// Key file being written.
        path: PathBuf,
        /// Exit status description.
        status: String,
    },
    /// The directory holding the pair could not be created.
    #[error("failed to create key directory '{path}': {source}")]
    Directory {
        /// Key directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The private key could not be restricted to its owner.
    #[error("failed to restrict permissions on '{path}': {source}")]
    Permissions {
        /// Private key file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Creates and inspects the key pair.
pub trait KeyStore: Send + Sync {
    /// Whether both halves of the pair exist.
    fn exists(&self, paths: &RuntimePaths) -> bool;

    /// Writes a fresh pair.
    fn generate(&self, paths: &RuntimePaths) -> Result<(), KeyPairError>;
}

/// Key store that shells out to the `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpensslKeyStore {
    program: PathBuf,
}

impl Default for OpensslKeyStore {
    fn default() -> Self {
        Self {
            program: PathBuf::from("openssl"),
        }
    }
}

impl OpensslKeyStore {
    /// Uses `program` in place of `openssl` on `PATH`.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run<I, S>(&self, args: I, path: &Path) -> Result<(), KeyPairError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let status = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|source| KeyPairError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(KeyPairError::Generator {
                program: self.program.clone(),
                path: path.to_path_buf(),
                status: status.to_string(),
            })
        }
    }
}

impl KeyStore for OpensslKeyStore {
    fn exists(&self, paths: &RuntimePaths) -> bool {
        paths.private_key().is_file() && paths.public_key().is_file()
    }

    fn generate(&self, paths: &RuntimePaths) -> Result<(), KeyPairError> {
        let private_key = paths.private_key();
        let public_key = paths.public_key();
        for dir in [private_key.parent(), public_key.parent()].into_iter().flatten() {
            fs::create_dir_all(dir).map_err(|source| KeyPairError::Directory {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        self.run(
            [
                OsStr::new("ecparam"),
                OsStr::new("-name"),
                OsStr::new(CURVE),
                OsStr::new("-genkey"),
                OsStr::new("-noout"),
                OsStr::new("-out"),
                private_key.as_os_str(),
            ],
            private_key,
        )?;
        fs::set_permissions(private_key, fs::Permissions::from_mode(PRIVATE_KEY_MODE)).map_err(
            |source| KeyPairError::Permissions {
                path: private_key.to_path_buf(),
                source,
            },
        )?;
        self.run(
            [
                OsStr::new("ec"),
                OsStr::new("-in"),
                private_key.as_os_str(),
                OsStr::new("-pubout"),
                OsStr::new("-out"),
                public_key.as_os_str(),
            ],
            public_key,
        )
    }
}

/// Generates the key pair when it is missing. Returns whether a pair was
/// generated.
pub fn ensure_key_pair(
    store: &dyn KeyStore,
    paths: &RuntimePaths,
    reporter: &dyn HealthReporter,
) -> Result<bool, KeyPairError> {
    if store.exists(paths) {
        return Ok(false);
    }
    reporter.key_pair_generating();
    store.generate(paths)?;
    Ok(true)
}
