//! Node-local supervisor for a cluster manager node.
//!
//! The supervisor loads and checks the cluster configuration, prepares the
//! runtime layout left behind by a previous run, optionally daemonises and
//! drops to the service account, and then starts the auxiliary daemons: the
//! engine, the management API, and the communications API. It records a PID
//! file for itself and for every daemon it starts.
//!
//! Once the daemons are running the supervisor hands over to the
//! [`ModeController`], which runs the master or worker role until a
//! termination signal arrives. Workers survive a lost master connection by
//! rebuilding their components after the configured retry interval.
//!
//! Shutdown is symmetric with startup. The daemons are stopped through their
//! PID records, every record this process wrote is released, and a
//! termination signal is finally passed on to the disposition that was in
//! place before the supervisor took over.

mod cli;
mod context;
mod health;
mod keys;
pub mod node;
mod process;
mod telemetry;

use std::io::Write;
use std::process::ExitCode;

pub use cli::{Cli, version_banner};
pub use context::{PreviousHandler, SupervisorContext, TrackedChild};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use keys::{KeyPairError, KeyStore, OpensslKeyStore, ensure_key_pair};
pub use node::{DirectoryCheck, ModeController, NodeArgs, NodeError, NodeFactory};
pub use process::{
    CLUSTERD_NAME, COMMS_API_DAEMON_NAME, ConfigLoader, DaemonSpec, DaemonizeError, Daemonizer,
    ENGINE_DAEMON_NAME, Identity, LaunchPlan, MANAGEMENT_API_DAEMON_NAME, NixSignalControl,
    PrivilegeDropper, PrivilegeError, ProcessControl, ProcessSpawner, ServiceDeps,
    ShutdownError, ShutdownReason, ShutdownSignal, ShutdownTrigger, SignalControl, SignalError,
    SpawnedProcess, StaticConfigLoader, SupervisorError, SystemConfigLoader, SystemDaemonizer,
    SystemPrivileges, SystemShutdownSignal, TokioSpawner, run_supervisor, run_supervisor_with,
};
pub use telemetry::{LogSink, TelemetryError, TelemetryHandle};

/// Runs the supervisor with the process arguments and production
/// collaborators, writing interactive output to `stdout`.
#[must_use]
pub fn run(stdout: &mut dyn Write) -> ExitCode {
    run_supervisor(stdout)
}

#[cfg(test)]
mod tests;
