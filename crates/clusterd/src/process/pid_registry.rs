//! Per-daemon PID records kept in the runtime directory.
//!
//! Each record is a file named `<daemon>-<pid>.pid` holding the PID followed
//! by a newline. A daemon name owns at most one record at a time; creating a
//! new one replaces any earlier record for that name. Operations on absent
//! records are no-ops.
//!
//! Should several records for one name exist anyway, for instance after a
//! crash between writing a new record and removing the old one, the oldest
//! record by modification time is treated as the parent. Ties fall back to
//! the lowest PID.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

use super::PROCESS_TARGET;
use super::files::{atomic_write, remove_if_present};
use crate::health::HealthReporter;

const RECORD_SUFFIX: &str = ".pid";

/// Errors raised while manipulating PID records.
#[derive(Debug, Error)]
pub enum PidRegistryError {
    /// Listing the record directory failed.
    #[error("failed to list pid records in '{path}': {source}")]
    List {
        /// Record directory.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing a record failed.
    #[error("failed to write pid record '{path}': {source}")]
    Write {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a record failed.
    #[error("failed to remove pid record '{path}': {source}")]
    Remove {
        /// Record path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Swappable access to the PID records of the supervised daemons.
pub trait PidRegistry: Send + Sync {
    /// Records `pid` for `name`, replacing any earlier record for the name.
    fn create(&self, name: &str, pid: u32) -> Result<(), PidRegistryError>;

    /// Removes the record of `pid` for `name` when present.
    fn delete(&self, name: &str, pid: u32) -> Result<(), PidRegistryError>;

    /// PID recorded for `name`, if any. With several records the oldest one
    /// wins.
    fn parent_pid(&self, name: &str) -> Result<Option<u32>, PidRegistryError>;

    /// Removes every record for `name` whose PID differs from `own_pid`.
    fn delete_child_pids(
        &self,
        name: &str,
        own_pid: u32,
        reporter: &dyn HealthReporter,
    ) -> Result<(), PidRegistryError>;

    /// Removes the records for `name` whose process no longer exists.
    fn clean_stale(&self, name: &str) -> Result<usize, PidRegistryError>;
}

/// PID registry backed by files in a single directory.
#[derive(Debug)]
pub struct FilePidRegistry {
    directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    alive: fn(u32) -> bool,
}

impl FilePidRegistry {
    /// Builds a registry over `directory`, checking liveness with `kill(pid, 0)`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_liveness(directory, process_exists)
    }

    /// Builds a registry using a custom liveness check.
    #[must_use]
    pub fn with_liveness(directory: impl Into<PathBuf>, alive: fn(u32) -> bool) -> Self {
        Self {
            directory: directory.into(),
            locks: Mutex::new(HashMap::new()),
            alive,
        }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, name: &str, pid: u32) -> PathBuf {
        self.directory.join(format!("{name}-{pid}{RECORD_SUFFIX}"))
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_owned()).or_default())
    }

    /// Records for `name`, oldest first.
    fn records(&self, name: &str) -> Result<Vec<(u32, PathBuf)>, PidRegistryError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PidRegistryError::List {
                    path: self.directory.clone(),
                    source,
                });
            }
        };
        let prefix = format!("{name}-");
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| PidRegistryError::List {
                path: self.directory.clone(),
                source,
            })?;
            let file_name = entry.file_name();
            let Some(pid) = file_name
                .to_str()
                .and_then(|file| file.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(RECORD_SUFFIX))
                .and_then(|pid| pid.parse::<u32>().ok())
            else {
                continue;
            };
            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(PidRegistryError::List {
                        path: self.directory.clone(),
                        source,
                    });
                }
            };
            records.push((modified, pid, entry.path()));
        }
        records.sort_unstable_by_key(|&(modified, pid, _)| (modified, pid));
        Ok(records
            .into_iter()
            .map(|(_, pid, path)| (pid, path))
            .collect())
    }

    fn remove(path: &Path) -> Result<bool, PidRegistryError> {
        remove_if_present(path).map_err(|source| PidRegistryError::Remove {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl PidRegistry for FilePidRegistry {
    fn create(&self, name: &str, pid: u32) -> Result<(), PidRegistryError> {
        let lock = self.lock_for(name);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        for (existing, path) in self.records(name)? {
            if existing != pid {
                Self::remove(&path)?;
            }
        }
        let path = self.record_path(name, pid);
        atomic_write(&path, format!("{pid}\n").as_bytes())
            .map_err(|source| PidRegistryError::Write { path, source })?;
        debug!(target: PROCESS_TARGET, daemon = name, pid, "pid record written");
        Ok(())
    }

    fn delete(&self, name: &str, pid: u32) -> Result<(), PidRegistryError> {
        let lock = self.lock_for(name);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if Self::remove(&self.record_path(name, pid))? {
            debug!(target: PROCESS_TARGET, daemon = name, pid, "pid record removed");
        }
        Ok(())
    }

    fn parent_pid(&self, name: &str) -> Result<Option<u32>, PidRegistryError> {
        let lock = self.lock_for(name);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.records(name)?.first().map(|(pid, _)| *pid))
    }

    fn delete_child_pids(
        &self,
        name: &str,
        own_pid: u32,
        reporter: &dyn HealthReporter,
    ) -> Result<(), PidRegistryError> {
        let lock = self.lock_for(name);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        for (pid, path) in self.records(name)? {
            if pid != own_pid && Self::remove(&path)? {
                reporter.stale_record_removed(name, pid);
            }
        }
        Ok(())
    }

    fn clean_stale(&self, name: &str) -> Result<usize, PidRegistryError> {
        let lock = self.lock_for(name);
        let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for (pid, path) in self.records(name)? {
            if !(self.alive)(pid) && Self::remove(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reports whether a process with `pid` exists.
pub(crate) fn process_exists(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}
