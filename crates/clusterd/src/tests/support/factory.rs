//! Scripted node components for mode controller tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::SupervisorContext;
use crate::node::{ControlLoop, NodeError, NodeFactory, PoolError, Service, TaskPool};
use crate::process::signals::{ShutdownReason, ShutdownTrigger};

/// Behaviour of one scripted service.
#[derive(Debug, Clone)]
pub enum ServiceScript {
    /// Returns successfully at once.
    Finish,
    /// Fails with a fatal error.
    Fail,
    /// Reports a lost master connection.
    Disconnect,
    /// Runs until its group is stopped.
    RunUntilCancelled,
    /// Cancels the given token, then waits to be stopped.
    CancelShutdown(CancellationToken),
    /// Fires the trigger as a signal listener would, then waits to be stopped.
    Fire(ShutdownTrigger, ShutdownReason),
}

/// Outcome of asking for a worker task pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolScript {
    /// A four-worker pool is built.
    Available,
    /// The shared-memory directory is not accessible.
    SharedMemoryDenied,
}

#[derive(Debug, Default)]
struct Journal {
    events: Mutex<Vec<String>>,
    started: Mutex<Vec<String>>,
    worker_pools: Mutex<Vec<bool>>,
}

impl Journal {
    fn event(&self, event: impl Into<String>) {
        self.events
            .lock()
            .expect("journal mutex poisoned")
            .push(event.into());
    }
}

/// Factory handing out scripted components and recording every call.
#[derive(Debug)]
pub struct ScriptedFactory {
    default: ServiceScript,
    worker_scripts: Mutex<VecDeque<ServiceScript>>,
    pool: PoolScript,
    journal: Arc<Journal>,
}

impl ScriptedFactory {
    /// Every component follows `default` unless told otherwise.
    pub fn new(default: ServiceScript) -> Self {
        Self {
            default,
            worker_scripts: Mutex::new(VecDeque::new()),
            pool: PoolScript::Available,
            journal: Arc::new(Journal::default()),
        }
    }

    /// Scripts for successive worker control loops.
    #[must_use]
    pub fn with_worker_scripts(self, scripts: Vec<ServiceScript>) -> Self {
        *self
            .worker_scripts
            .lock()
            .expect("script mutex poisoned") = scripts.into();
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: PoolScript) -> Self {
        self.pool = pool;
        self
    }

    /// Construction calls and pool warm-ups, in order.
    pub fn events(&self) -> Vec<String> {
        self.journal
            .events
            .lock()
            .expect("journal mutex poisoned")
            .clone()
    }

    /// Names of the services that were started, sorted.
    pub fn started(&self) -> Vec<String> {
        let mut started = self
            .journal
            .started
            .lock()
            .expect("journal mutex poisoned")
            .clone();
        started.sort();
        started
    }

    /// How often `event` was recorded.
    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|seen| *seen == event).count()
    }

    /// Whether each worker control loop received a pool.
    pub fn worker_pools_seen(&self) -> Vec<bool> {
        self.journal
            .worker_pools
            .lock()
            .expect("journal mutex poisoned")
            .clone()
    }

    fn service(
        &self,
        name: &'static str,
        script: ServiceScript,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Arc<ScriptedService> {
        self.journal.event(name);
        Arc::new(ScriptedService {
            name,
            script,
            pool,
            journal: Arc::clone(&self.journal),
        })
    }

    fn recording_pool(&self) -> Arc<dyn TaskPool> {
        Arc::new(RecordingPool {
            journal: Arc::clone(&self.journal),
        })
    }
}

impl NodeFactory for ScriptedFactory {
    fn master(&self, _context: &SupervisorContext) -> Result<Arc<dyn ControlLoop>, NodeError> {
        let pool = (self.pool == PoolScript::Available).then(|| self.recording_pool());
        Ok(self.service("master", self.default.clone(), pool))
    }

    fn worker(
        &self,
        _context: &SupervisorContext,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Result<Arc<dyn ControlLoop>, NodeError> {
        let script = self
            .worker_scripts
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        self.journal
            .worker_pools
            .lock()
            .expect("journal mutex poisoned")
            .push(pool.is_some());
        Ok(self.service("worker", script, pool))
    }

    fn local_server(&self, _context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError> {
        Ok(self.service("local_server", self.default.clone(), None))
    }

    fn helper(&self, _context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError> {
        Ok(self.service("helper", self.default.clone(), None))
    }

    fn worker_pool(&self, context: &SupervisorContext) -> Result<Arc<dyn TaskPool>, PoolError> {
        self.journal.event("worker_pool");
        match self.pool {
            PoolScript::Available => Ok(self.recording_pool()),
            PoolScript::SharedMemoryDenied => Err(PoolError::SharedMemory {
                path: context.paths().shm_dir().to_path_buf(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            }),
        }
    }
}

#[derive(Debug)]
struct ScriptedService {
    name: &'static str,
    script: ServiceScript,
    pool: Option<Arc<dyn TaskPool>>,
    journal: Arc<Journal>,
}

#[async_trait]
impl Service for ScriptedService {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError> {
        self.journal
            .started
            .lock()
            .expect("journal mutex poisoned")
            .push(self.name.to_owned());
        match &self.script {
            ServiceScript::Finish => Ok(()),
            ServiceScript::Fail => Err(NodeError::MissingMaster),
            ServiceScript::Disconnect => Err(NodeError::Disconnected {
                peer: "master".to_owned(),
                reason: "scripted disconnection".to_owned(),
            }),
            ServiceScript::RunUntilCancelled => {
                shutdown.cancelled().await;
                Ok(())
            }
            ServiceScript::CancelShutdown(token) => {
                token.cancel();
                shutdown.cancelled().await;
                Ok(())
            }
            ServiceScript::Fire(trigger, reason) => {
                trigger.fire(*reason);
                shutdown.cancelled().await;
                Ok(())
            }
        }
    }
}

impl ControlLoop for ScriptedService {
    fn task_pool(&self) -> Option<Arc<dyn TaskPool>> {
        self.pool.clone()
    }
}

#[derive(Debug)]
struct RecordingPool {
    journal: Arc<Journal>,
}

impl TaskPool for RecordingPool {
    fn max_workers(&self) -> usize {
        4
    }

    fn warm(&self, jobs: usize) -> Result<(), PoolError> {
        self.journal.event(format!("warm:{jobs}"));
        Ok(())
    }
}
