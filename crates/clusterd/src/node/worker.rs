//! Worker role: keeps reconnecting to the master until shut down.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::controller::{ModeController, warm_pool};
use super::errors::{NodeError, PoolError};
use super::joint::{JointOutcome, joint_wait};
use super::{NODE_TARGET, Service, TaskPool};

/// Reconnect parameters fixed when the worker starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    /// Seconds to wait after losing the master.
    pub retry_interval_seconds: u64,
    /// Whether a task pool could be built.
    pub task_pool_available: bool,
}

impl ModeController<'_> {
    /// Runs the worker control loop and the local server, rebuilding both
    /// whenever the session ends for any reason other than shutdown.
    ///
    /// The task pool is built once and shared by every attempt.
    pub async fn worker_main(&self) -> Result<(), NodeError> {
        let pool = self.worker_pool()?;
        let state = ReconnectState {
            retry_interval_seconds: self.context.items().intervals.worker.connection_retry,
            task_pool_available: pool.is_some(),
        };
        debug!(target: NODE_TARGET, ?state, "worker starting");
        loop {
            let control = self.factory.worker(self.context, pool.clone())?;
            let services: Vec<Arc<dyn Service>> = vec![
                Arc::clone(&control) as Arc<dyn Service>,
                self.factory.local_server(self.context)?,
            ];
            warm_pool(control.as_ref())?;
            match joint_wait(&services, &self.shutdown).await {
                JointOutcome::Cancelled => return Ok(()),
                JointOutcome::Fatal(error) => return Err(error),
                JointOutcome::Completed => {
                    debug!(target: NODE_TARGET, "worker session ended");
                }
                JointOutcome::Disconnected(error) => {
                    debug!(target: NODE_TARGET, %error, "lost master");
                }
            }
            self.context
                .reporter()
                .connection_lost(state.retry_interval_seconds);
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(Duration::from_secs(state.retry_interval_seconds)) => {}
            }
        }
    }

    fn worker_pool(&self) -> Result<Option<Arc<dyn TaskPool>>, NodeError> {
        match self.factory.worker_pool(self.context) {
            Ok(pool) => Ok(Some(pool)),
            Err(PoolError::SharedMemory { .. }) => {
                self.context.reporter().pool_unavailable(
                    self.context.paths().shm_dir(),
                    &self.context.config().runtime.user,
                );
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clusterd_config::{ClusterMode, Config};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::context::SupervisorContext;
    use crate::health::{POOL_DEGRADED, pool_remediation};
    use crate::tests::support::{PoolScript, RecordingReporter, ScriptedFactory, ServiceScript};

    fn context(retry: u64, reporter: Arc<RecordingReporter>) -> SupervisorContext {
        let mut config = Config::default();
        config.cluster.node_type = ClusterMode::Worker;
        config.items.intervals.worker.connection_retry = retry;
        config.runtime.shm_dir = PathBuf::from("/dev/shm");
        SupervisorContext::new(config, reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_configured_interval_then_rebuilds() {
        let shutdown = CancellationToken::new();
        let factory = ScriptedFactory::new(ServiceScript::RunUntilCancelled).with_worker_scripts(
            vec![
                ServiceScript::Disconnect,
                ServiceScript::Disconnect,
                ServiceScript::CancelShutdown(shutdown.clone()),
            ],
        );
        let reporter = Arc::new(RecordingReporter::default());
        let context = context(34, Arc::clone(&reporter));

        let began = Instant::now();
        ModeController::new(&factory, &context, shutdown)
            .worker_main()
            .await
            .expect("cancellation returns normally");

        assert_eq!(began.elapsed(), Duration::from_secs(68));
        assert_eq!(
            reporter.lines(),
            vec![
                "Connection with server has been lost. Reconnecting in 34 seconds.".to_owned(),
                "Connection with server has been lost. Reconnecting in 34 seconds.".to_owned(),
            ]
        );
        assert_eq!(factory.count("worker"), 3);
        assert_eq!(factory.count("local_server"), 3);
        assert_eq!(factory.count("worker_pool"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_normally() {
        let shutdown = CancellationToken::new();
        let factory = ScriptedFactory::new(ServiceScript::RunUntilCancelled)
            .with_worker_scripts(vec![ServiceScript::Disconnect]);
        let context = context(34, Arc::new(RecordingReporter::default()));
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            canceller.cancel();
        });

        let began = Instant::now();
        ModeController::new(&factory, &context, shutdown)
            .worker_main()
            .await
            .expect("cancellation returns normally");

        assert_eq!(began.elapsed(), Duration::from_secs(10));
        assert_eq!(factory.count("worker"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_is_rebuilt_after_backoff() {
        let shutdown = CancellationToken::new();
        let factory = ScriptedFactory::new(ServiceScript::Finish).with_worker_scripts(vec![
            ServiceScript::Finish,
            ServiceScript::CancelShutdown(shutdown.clone()),
        ]);
        let reporter = Arc::new(RecordingReporter::default());
        let context = context(34, Arc::clone(&reporter));

        let began = Instant::now();
        ModeController::new(&factory, &context, shutdown)
            .worker_main()
            .await
            .expect("cancellation returns normally");

        assert_eq!(began.elapsed(), Duration::from_secs(34));
        assert_eq!(
            reporter.lines(),
            vec!["Connection with server has been lost. Reconnecting in 34 seconds.".to_owned()]
        );
        assert_eq!(factory.count("worker"), 2);
    }

    #[tokio::test]
    async fn fatal_failure_ends_the_worker() {
        let factory = ScriptedFactory::new(ServiceScript::RunUntilCancelled)
            .with_worker_scripts(vec![ServiceScript::Fail]);
        let context = context(34, Arc::new(RecordingReporter::default()));

        let error = ModeController::new(&factory, &context, CancellationToken::new())
            .worker_main()
            .await
            .expect_err("fatal errors are not retried");

        assert!(matches!(error, NodeError::MissingMaster));
        assert_eq!(factory.count("worker"), 1);
    }

    #[tokio::test]
    async fn unusable_shared_memory_degrades_to_no_pool() {
        let shutdown = CancellationToken::new();
        let factory = ScriptedFactory::new(ServiceScript::RunUntilCancelled)
            .with_worker_scripts(vec![ServiceScript::CancelShutdown(shutdown.clone())])
            .with_pool(PoolScript::SharedMemoryDenied);
        let reporter = Arc::new(RecordingReporter::default());
        let context = context(10, Arc::clone(&reporter));

        ModeController::new(&factory, &context, shutdown)
            .worker_main()
            .await
            .expect("worker runs without a pool");

        assert_eq!(
            reporter.lines(),
            vec![
                pool_remediation(std::path::Path::new("/dev/shm"), "wazuh"),
                POOL_DEGRADED.to_owned(),
            ]
        );
        assert_eq!(factory.worker_pools_seen(), vec![false]);
        assert_eq!(factory.count("warm:4"), 0);
    }

    #[tokio::test]
    async fn available_pool_is_warmed_and_shared() {
        let shutdown = CancellationToken::new();
        let factory = ScriptedFactory::new(ServiceScript::RunUntilCancelled)
            .with_worker_scripts(vec![ServiceScript::CancelShutdown(shutdown.clone())]);
        let context = context(10, Arc::new(RecordingReporter::default()));

        ModeController::new(&factory, &context, shutdown)
            .worker_main()
            .await
            .expect("worker completes");

        assert_eq!(factory.worker_pools_seen(), vec![true]);
        assert_eq!(factory.count("warm:4"), 1);
    }
}
