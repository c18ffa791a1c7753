//! Entry point of the cluster role and the checks that precede it.

use std::io;
use std::path::Path;

use clusterd_config::ClusterMode;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::errors::{NodeError, PoolError};
use super::{ControlLoop, NODE_TARGET, NodeFactory};
use crate::context::SupervisorContext;
use crate::process::files::check_writable;

/// Checks that the current user can create files in a directory.
pub type DirectoryCheck = fn(&Path) -> io::Result<()>;

/// Runs the components of the configured cluster role.
pub struct ModeController<'a> {
    pub(super) factory: &'a dyn NodeFactory,
    pub(super) context: &'a SupervisorContext,
    pub(super) shutdown: CancellationToken,
    dir_check: DirectoryCheck,
}

impl<'a> ModeController<'a> {
    /// Builds a controller that stops when `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        factory: &'a dyn NodeFactory,
        context: &'a SupervisorContext,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            factory,
            context,
            shutdown,
            dir_check: check_writable,
        }
    }

    /// Replaces the temporary directory check.
    #[must_use]
    pub fn with_dir_check(mut self, dir_check: DirectoryCheck) -> Self {
        self.dir_check = dir_check;
        self
    }

    /// Checks the temporary directory, then runs the master or worker role.
    pub async fn run(&self) -> Result<(), NodeError> {
        self.check_tmp_dir()?;
        let mode = self.context.mode();
        info!(
            target: NODE_TARGET,
            mode = %mode,
            node = %self.context.cluster().node_name,
            "starting cluster node"
        );
        match mode {
            ClusterMode::Master => self.master_main().await,
            ClusterMode::Worker => self.worker_main().await,
        }
    }

    fn check_tmp_dir(&self) -> Result<(), NodeError> {
        let path = self.context.paths().tmp_dir();
        (self.dir_check)(path).map_err(|source| {
            if source.kind() == io::ErrorKind::PermissionDenied {
                NodeError::TempDirectory {
                    path: path.to_path_buf(),
                    source,
                }
            } else {
                NodeError::Io {
                    component: "temporary directory",
                    source,
                }
            }
        })
    }
}

/// Starts every worker of the loop's pool, if it has one.
pub(super) fn warm_pool(control: &dyn ControlLoop) -> Result<(), PoolError> {
    if let Some(pool) = control.task_pool() {
        pool.warm(pool.max_workers())?;
    }
    Ok(())
}
