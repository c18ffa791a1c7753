//! Supervisor process lifecycle: startup sequencing, auxiliary daemons, PID
//! records, privilege handling, and shutdown.

pub(crate) mod daemonizer;
mod errors;
pub(crate) mod files;
pub(crate) mod launch;
pub(crate) mod launcher;
pub(crate) mod pid_registry;
pub(crate) mod privileges;
pub(crate) mod shutdown;
pub(crate) mod signals;

pub use daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::SupervisorError;
pub use launch::{
    ConfigLoader, LaunchPlan, ProcessControl, ServiceDeps, StaticConfigLoader,
    SystemConfigLoader, run_supervisor, run_supervisor_with,
};
pub use launcher::{DaemonSpec, ProcessSpawner, SpawnedProcess, TokioSpawner};
pub use privileges::{Identity, PrivilegeDropper, PrivilegeError, SystemPrivileges};
pub use signals::{
    NixSignalControl, ShutdownError, ShutdownReason, ShutdownSignal, ShutdownTrigger,
    SignalControl, SignalError, SystemShutdownSignal,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Name under which the supervisor records its own PID.
pub const CLUSTERD_NAME: &str = "wazuh-clusterd";
/// Engine daemon.
pub const ENGINE_DAEMON_NAME: &str = "wazuh-engined";
/// Management API daemon.
pub const MANAGEMENT_API_DAEMON_NAME: &str = "wazuh-apid";
/// Communications API daemon.
pub const COMMS_API_DAEMON_NAME: &str = "wazuh-comms-apid";
