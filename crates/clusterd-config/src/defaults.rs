//! Built-in defaults applied when the configuration file omits a value.

use std::env;
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Installation root used when `runtime.install_dir` is not set.
pub const DEFAULT_INSTALL_DIR: &str = "/var/ossec";

/// Configuration file name relative to the installation root.
pub const DEFAULT_CONFIG_FILE: &str = "etc/cluster.toml";

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "wazuh";

/// Default node name.
pub const DEFAULT_NODE_NAME: &str = "node01";

/// Default TCP port of the master control loop.
pub const DEFAULT_CLUSTER_PORT: u16 = 1516;

/// Default bind address of the master control loop.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Placeholder node address shipped in fresh installations.
pub const DEFAULT_NODE_ADDRESS: &str = "NODE_IP";

/// Seconds a worker waits before reconnecting to its master.
pub const DEFAULT_CONNECTION_RETRY: u64 = 10;

/// Seconds between worker keep-alive messages.
pub const DEFAULT_WORKER_KEEP_ALIVE: u64 = 60;

/// Seconds between master sweeps for silent workers.
pub const DEFAULT_CHECK_WORKER_LASTKEEPALIVE: u64 = 60;

/// Seconds a worker may stay silent before the master drops it.
pub const DEFAULT_MAX_ALLOWED_TIME_WITHOUT_KEEPALIVE: u64 = 120;

/// Seconds between load-balancer helper synchronisation rounds.
pub const DEFAULT_HELPER_FREQUENCY: u64 = 60;

/// Unprivileged account the supervisor switches to.
pub const DEFAULT_USER: &str = "wazuh";

/// Unprivileged group the supervisor switches to.
pub const DEFAULT_GROUP: &str = "wazuh";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Shared-memory directory backing the task pool.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Default installation root.
#[must_use]
pub fn default_install_dir() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_DIR)
}

/// Temporary working directory the supervisor requires access to.
#[must_use]
pub fn default_tmp_dir() -> PathBuf {
    env::temp_dir()
}

/// Shared-memory directory used by the task pool.
#[must_use]
pub fn default_shm_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SHM_DIR)
}
