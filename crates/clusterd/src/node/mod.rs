//! Role-specific supervision of the cluster control loop.
//!
//! The [`ModeController`] asks a [`NodeFactory`] for the components of the
//! configured role, starts them together, and waits for the group as a unit.
//! Components are trait objects so the control loops themselves stay outside
//! this crate's concern; [`standalone`] provides the production set.

mod controller;
mod errors;
mod joint;
mod master;
mod pool;
pub mod standalone;
mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::SupervisorContext;

pub use controller::{DirectoryCheck, ModeController};
pub use errors::{NodeError, PoolError};
pub use joint::{JointOutcome, joint_wait};
pub use pool::{BlockingTaskPool, TaskPool, WARM_UP_SLEEP};

pub(crate) const NODE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::node");

/// Largest payload the hidden test options may request. An echo frame wraps
/// the payload in a short JSON envelope and must stay within the one-MiB
/// frame limit.
pub const MAX_HARNESS_PAYLOAD_BYTES: i64 = 1024 * 1024 - 64;

/// Harness parameters forwarded to the control loop and local server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArgs {
    /// Payload size for the performance test.
    pub performance_test: Option<i64>,
    /// Request count for the concurrency test.
    pub concurrency_test: Option<i64>,
    /// Size of the string sent to the master.
    pub send_string: Option<i64>,
    /// File sent to the master.
    pub send_file: Option<String>,
}

impl NodeArgs {
    /// Rejects payload sizes that cannot be sent in a single frame.
    pub fn validate(&self) -> Result<(), NodeError> {
        for (option, requested) in [
            ("performance_test", self.performance_test),
            ("string", self.send_string),
        ] {
            if let Some(size) = requested
                && size > MAX_HARNESS_PAYLOAD_BYTES
            {
                return Err(NodeError::HarnessPayload {
                    option,
                    size,
                    limit: MAX_HARNESS_PAYLOAD_BYTES,
                });
            }
        }
        Ok(())
    }
}

/// A long-running piece of a cluster node.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs until `shutdown` is cancelled or the service fails.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), NodeError>;
}

/// The master or worker control loop.
pub trait ControlLoop: Service {
    /// Pool owned by this loop, if it has one.
    fn task_pool(&self) -> Option<Arc<dyn TaskPool>>;
}

/// Builds the components of a cluster node.
pub trait NodeFactory: Send + Sync {
    /// Master control loop, owning its own task pool.
    fn master(&self, context: &SupervisorContext) -> Result<Arc<dyn ControlLoop>, NodeError>;

    /// Worker control loop using `pool` when one is available.
    fn worker(
        &self,
        context: &SupervisorContext,
        pool: Option<Arc<dyn TaskPool>>,
    ) -> Result<Arc<dyn ControlLoop>, NodeError>;

    /// Local control-plane server.
    fn local_server(&self, context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError>;

    /// Load-balancer helper.
    fn helper(&self, context: &SupervisorContext) -> Result<Arc<dyn Service>, NodeError>;

    /// Task pool for a worker, created once per supervisor run.
    fn worker_pool(&self, context: &SupervisorContext) -> Result<Arc<dyn TaskPool>, PoolError>;
}
