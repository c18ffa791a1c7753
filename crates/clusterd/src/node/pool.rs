//! Bounded pool for blocking work offloaded by the control loops.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};
use tokio::sync::Semaphore;
use tracing::debug;

use super::NODE_TARGET;
use super::errors::PoolError;

/// Duration of each warm-up job.
pub const WARM_UP_SLEEP: Duration = Duration::from_millis(100);

/// Pool of workers owned by a control loop.
pub trait TaskPool: Send + Sync + fmt::Debug {
    /// Configured worker count.
    fn max_workers(&self) -> usize;

    /// Submits `jobs` no-op sleep jobs so every worker is started.
    ///
    /// Returns once the jobs are queued. Must be called from within a Tokio
    /// runtime.
    fn warm(&self, jobs: usize) -> Result<(), PoolError>;
}

/// Task pool running jobs on Tokio's blocking threads, bounded by a
/// semaphore and anchored by a segment in the shared-memory directory.
#[derive(Debug)]
pub struct BlockingTaskPool {
    max_workers: usize,
    permits: Arc<Semaphore>,
    _segment: NamedTempFile,
}

impl BlockingTaskPool {
    /// Builds a pool with `max_workers` workers backed by `shm_dir`.
    pub fn new(max_workers: usize, shm_dir: &Path) -> Result<Self, PoolError> {
        if max_workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        let segment = Builder::new()
            .prefix("clusterd-pool-")
            .tempfile_in(shm_dir)
            .map_err(|source| classify(shm_dir, source))?;
        debug!(
            target: NODE_TARGET,
            max_workers,
            segment = %segment.path().display(),
            "task pool ready"
        );
        Ok(Self {
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
            _segment: segment,
        })
    }
}

async fn run_on_worker<F, T>(permits: Arc<Semaphore>, job: F) -> Result<T, super::NodeError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let permit = permits.acquire_owned().await;
    let output = tokio::task::spawn_blocking(job).await?;
    drop(permit);
    Ok(output)
}

impl TaskPool for BlockingTaskPool {
    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn warm(&self, jobs: usize) -> Result<(), PoolError> {
        for _ in 0..jobs {
            let permits = Arc::clone(&self.permits);
            tokio::spawn(async move {
                if let Err(error) =
                    run_on_worker(permits, || std::thread::sleep(WARM_UP_SLEEP)).await
                {
                    debug!(target: NODE_TARGET, %error, "warm-up job failed");
                }
            });
        }
        Ok(())
    }
}

fn classify(shm_dir: &Path, source: io::Error) -> PoolError {
    match source.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => PoolError::SharedMemory {
            path: shm_dir.to_path_buf(),
            source,
        },
        _ => PoolError::Io {
            path: shm_dir.to_path_buf(),
            source,
        },
    }
}
