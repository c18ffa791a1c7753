//! Switches the supervisor to the unprivileged service account.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{PermissionsExt, chown};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User, setgid, setuid};
use thiserror::Error;
use tracing::debug;

use super::PROCESS_TARGET;

const LOG_FILE_MODE: u32 = 0o660;

/// Numeric identity of the service account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

/// Errors raised while resolving or assuming the service identity.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The named user does not exist.
    #[error("user '{name}' does not exist")]
    UnknownUser {
        /// Configured user name.
        name: String,
    },
    /// The named group does not exist.
    #[error("group '{name}' does not exist")]
    UnknownGroup {
        /// Configured group name.
        name: String,
    },
    /// Looking up the account database failed.
    #[error("failed to look up '{name}': {source}")]
    Lookup {
        /// Name being resolved.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Adjusting log file ownership or mode failed.
    #[error("failed to prepare log file '{path}': {source}")]
    LogFile {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Handing the PID record directory to the service account failed.
    #[error("failed to hand over run directory '{path}': {source}")]
    RunDirectory {
        /// Run directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the group id failed.
    #[error("failed to switch to group id {gid}: {source}")]
    SetGroup {
        /// Target group id.
        gid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Switching the user id failed.
    #[error("failed to switch to user id {uid}: {source}")]
    SetUser {
        /// Target user id.
        uid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Resolves and assumes the service identity.
pub trait PrivilegeDropper: Send + Sync {
    /// Looks up the numeric ids of `user` and `group`.
    fn resolve(&self, user: &str, group: &str) -> Result<Identity, PrivilegeError>;

    /// Hands the log file to `identity` with mode `0o660` when it exists.
    fn prepare_log_file(&self, path: &Path, identity: Identity) -> Result<(), PrivilegeError>;

    /// Hands the PID record directory to `identity` so records can still be
    /// written once privileges are gone.
    fn prepare_run_dir(&self, path: &Path, identity: Identity) -> Result<(), PrivilegeError>;

    /// Switches group then user id.
    fn drop_to(&self, identity: Identity) -> Result<(), PrivilegeError>;
}

/// Privilege dropper backed by the host account database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPrivileges;

impl PrivilegeDropper for SystemPrivileges {
    fn resolve(&self, user: &str, group: &str) -> Result<Identity, PrivilegeError> {
        let uid = User::from_name(user)
            .map_err(|source| PrivilegeError::Lookup {
                name: user.to_owned(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownUser {
                name: user.to_owned(),
            })?
            .uid;
        let gid = Group::from_name(group)
            .map_err(|source| PrivilegeError::Lookup {
                name: group.to_owned(),
                source,
            })?
            .ok_or_else(|| PrivilegeError::UnknownGroup {
                name: group.to_owned(),
            })?
            .gid;
        Ok(Identity {
            uid: uid.as_raw(),
            gid: gid.as_raw(),
        })
    }

    fn prepare_log_file(&self, path: &Path, identity: Identity) -> Result<(), PrivilegeError> {
        if !path.exists() {
            return Ok(());
        }
        let wrap = |source| PrivilegeError::LogFile {
            path: path.to_path_buf(),
            source,
        };
        chown(path, Some(identity.uid), Some(identity.gid)).map_err(wrap)?;
        fs::set_permissions(path, Permissions::from_mode(LOG_FILE_MODE)).map_err(wrap)?;
        Ok(())
    }

    fn prepare_run_dir(&self, path: &Path, identity: Identity) -> Result<(), PrivilegeError> {
        chown(path, Some(identity.uid), Some(identity.gid)).map_err(|source| {
            PrivilegeError::RunDirectory {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    fn drop_to(&self, identity: Identity) -> Result<(), PrivilegeError> {
        setgid(Gid::from_raw(identity.gid)).map_err(|source| PrivilegeError::SetGroup {
            gid: identity.gid,
            source,
        })?;
        setuid(Uid::from_raw(identity.uid)).map_err(|source| PrivilegeError::SetUser {
            uid: identity.uid,
            source,
        })?;
        debug!(
            target: PROCESS_TARGET,
            uid = identity.uid,
            gid = identity.gid,
            "switched to service identity"
        );
        Ok(())
    }
}
