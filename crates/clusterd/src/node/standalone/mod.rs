//! Production implementations of the node components.
//!
//! Master and worker speak a small line-delimited JSON protocol over TCP:
//! a worker introduces itself with the cluster name and key, then sends
//! keep-alives. The master drops workers that stay silent for longer than
//! `max_allowed_time_without_keepalive`. Both roles expose their view of the
//! cluster through the local Unix-socket server.

mod helper;
mod local_server;
mod master_loop;
mod protocol;
mod worker_loop;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::SupervisorContext;

use super::errors::{NodeError, PoolError};
use super::pool::BlockingTaskPool;
use super::{ControlLoop, NodeFactory, Service, TaskPool};

pub use helper::LoadBalancerHelper;
pub use local_server::LocalServer;
pub use master_loop::MasterLoop;
pub use worker_loop::WorkerLoop;

/// Cluster view shared by the components of one node.
#[derive(Debug, Default)]
pub struct NodeState {
    workers: Mutex<BTreeMap<String, String>>,
    master_connected: AtomicBool,
}

impl NodeState {
    /// Records a worker connected from `peer`.
    pub fn worker_joined(&self, node: &str, peer: &str) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.to_owned(), peer.to_owned());
    }

    /// Forgets a worker.
    pub fn worker_left(&self, node: &str) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
    }

    /// Connected workers and their peer addresses, sorted by name.
    #[must_use]
    pub fn workers(&self) -> Vec<(String, String)> {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(node, peer)| (node.clone(), peer.clone()))
            .collect()
    }

    /// Records whether this worker is connected to its master.
    pub fn set_master_connected(&self, connected: bool) {
        self.master_connected.store(connected, Ordering::SeqCst);
    }

    /// Whether this worker is connected to its master.
    #[must_use]
    pub fn master_connected(&self) -> bool {
        self.master_connected.load(Ordering::SeqCst)
    }
}

/// Factory for the production node components.
#[derive(Debug, Default)]
pub struct StandaloneFactory {
    state: Arc<NodeState>,
}

impl StandaloneFactory {
    /// Builds a factory with a fresh cluster view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn build_pool(context: &SupervisorContext) -> Result<Arc<dyn TaskPool>, PoolError> {
    let pool = BlockingTaskPool::new(available_cores(), context.paths().shm_dir())?;
    Ok(Arc::new(pool))
}

impl NodeFactory for StandaloneFactory {
    fn master(&self, context: &SupervisorContext) -> Result<Arc<dyn ControlLoop>, NodeError> {
        let pool = match build_pool(context) {
            Ok(pool) => Some(pool),
            Err(PoolError::SharedMemory { .. }) => {
                context.reporter().pool_unavailable(
                    context.paths().shm_dir(),
                    &context.config().runtime.user,
                );
                None
            }
            Err(other) => return Err(other.into()),
        };
        Ok(Arc::new(MasterLoop::new(
            context,
            Arc::clone(&self.state),
            pool,
        )))
    }

    fn worker(
        &self,
        context: &SupervisorContext,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Result<Arc<dyn ControlLoop>, NodeError> {
        let Some(master) = context.cluster().master_address() else {
            return Err(NodeError::MissingMaster);
        };
        Ok(Arc::new(WorkerLoop::new(
            context,
            master,
            Arc::clone(&self.state),
            pool,
        )))
    }

    fn local_server(&self, context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError> {
        Ok(Arc::new(LocalServer::new(context, Arc::clone(&self.state))))
    }

    fn helper(&self, context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError> {
        Ok(Arc::new(LoadBalancerHelper::new(
            context,
            Arc::clone(&self.state),
        )))
    }

    fn worker_pool(&self, context: &SupervisorContext) -> Result<Arc<dyn TaskPool>, PoolError> {
        build_pool(context)
    }
}
