//! Structured reporting for supervisor lifecycle events.
//!
//! Every operator-facing line the supervisor writes goes through
//! [`HealthReporter`], so tests can record the exact sequence of events while
//! production forwards them to `tracing`.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clusterd_config::{ConfigError, ValidationError, ValidationWarning};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// The configuration file could not be loaded.
    fn config_failed(&self, error: &ConfigError);

    /// The cluster configuration failed its structural check.
    fn config_invalid(&self, error: &ValidationError);

    /// The structural check produced a non-fatal finding.
    fn config_warning(&self, warning: &ValidationWarning);

    /// Configuration-test mode finished successfully.
    fn config_valid(&self);

    /// The cluster is administratively disabled.
    fn cluster_disabled(&self);

    /// A key pair is about to be generated.
    fn key_pair_generating(&self);

    /// An auxiliary daemon was started.
    fn daemon_started(&self, name: &str, pid: u32);

    /// An auxiliary daemon exited immediately.
    fn daemon_failed(&self, name: &str, code: i32);

    /// An auxiliary daemon is being asked to stop.
    fn daemon_stopping(&self, name: &str, pid: u32);

    /// A leftover PID record from a previous run was removed.
    fn stale_record_removed(&self, name: &str, pid: u32);

    /// A termination signal is being handled.
    fn signal_received(&self, signal: i32);

    /// An interactive interrupt was received.
    fn interrupted(&self);

    /// The worker lost its master and will retry.
    fn connection_lost(&self, retry_seconds: u64);

    /// The task pool could not be built because shared memory is unusable.
    fn pool_unavailable(&self, shm_dir: &Path, user: &str);

    /// The temporary working directory lacks permissions.
    fn temp_dir_denied(&self, path: &Path, user: &str);

    /// A fatal error ended the supervisor.
    fn unhandled(&self, error: &dyn Error);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn config_failed(&self, error: &ConfigError) {
        (**self).config_failed(error);
    }

    fn config_invalid(&self, error: &ValidationError) {
        (**self).config_invalid(error);
    }

    fn config_warning(&self, warning: &ValidationWarning) {
        (**self).config_warning(warning);
    }

    fn config_valid(&self) {
        (**self).config_valid();
    }

    fn cluster_disabled(&self) {
        (**self).cluster_disabled();
    }

    fn key_pair_generating(&self) {
        (**self).key_pair_generating();
    }

    fn daemon_started(&self, name: &str, pid: u32) {
        (**self).daemon_started(name, pid);
    }

    fn daemon_failed(&self, name: &str, code: i32) {
        (**self).daemon_failed(name, code);
    }

    fn daemon_stopping(&self, name: &str, pid: u32) {
        (**self).daemon_stopping(name, pid);
    }

    fn stale_record_removed(&self, name: &str, pid: u32) {
        (**self).stale_record_removed(name, pid);
    }

    fn signal_received(&self, signal: i32) {
        (**self).signal_received(signal);
    }

    fn interrupted(&self) {
        (**self).interrupted();
    }

    fn connection_lost(&self, retry_seconds: u64) {
        (**self).connection_lost(retry_seconds);
    }

    fn pool_unavailable(&self, shm_dir: &Path, user: &str) {
        (**self).pool_unavailable(shm_dir, user);
    }

    fn temp_dir_denied(&self, path: &Path, user: &str) {
        (**self).temp_dir_denied(path, user);
    }

    fn unhandled(&self, error: &dyn Error) {
        (**self).unhandled(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn config_failed(&self, error: &ConfigError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "config_failed",
            "{error}"
        );
    }

    fn config_invalid(&self, error: &ValidationError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "config_invalid",
            "{error}"
        );
    }

    fn config_warning(&self, warning: &ValidationWarning) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "config_warning",
            "{warning}"
        );
    }

    fn config_valid(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "config_valid",
            "Configuration is valid"
        );
    }

    fn cluster_disabled(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "cluster_disabled",
            "Cluster disabled"
        );
    }

    fn key_pair_generating(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "key_pair_generating",
            "Generating JWT signing key pair"
        );
    }

    fn daemon_started(&self, name: &str, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "daemon_started",
            daemon = name,
            pid,
            "Started {name} (pid: {pid})"
        );
    }

    fn daemon_failed(&self, name: &str, code: i32) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "daemon_failed",
            daemon = name,
            code,
            "Error starting {name}: return code {code}"
        );
    }

    fn daemon_stopping(&self, name: &str, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "daemon_stopping",
            daemon = name,
            pid,
            "Shutting down {name} (pid: {pid})"
        );
    }

    fn stale_record_removed(&self, name: &str, pid: u32) {
        tracing::debug!(
            target: HEALTH_TARGET,
            event = "stale_record_removed",
            daemon = name,
            pid,
            "removed leftover pid record"
        );
    }

    fn signal_received(&self, signal: i32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "signal_received",
            signal,
            "SIGNAL [({signal})-({signal})] received. Shutting down..."
        );
    }

    fn interrupted(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "interrupted",
            "SIGINT received. Shutting down..."
        );
    }

    fn connection_lost(&self, retry_seconds: u64) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_lost",
            retry_seconds,
            "Connection with server has been lost. Reconnecting in {retry_seconds} seconds."
        );
    }

    fn pool_unavailable(&self, shm_dir: &Path, user: &str) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "pool_unavailable",
            "{}",
            pool_remediation(shm_dir, user)
        );
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "pool_unavailable",
            "{POOL_DEGRADED}"
        );
    }

    fn temp_dir_denied(&self, path: &Path, user: &str) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "temp_dir_denied",
            "{}",
            temp_dir_remediation(path, user)
        );
    }

    fn unhandled(&self, error: &dyn Error) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "unhandled",
            "Unhandled exception: {error}"
        );
    }
}

/// Second warning emitted when the task pool is unavailable.
pub const POOL_DEGRADED: &str =
    "The Wazuh cluster will be run without the improvements added in Wazuh 4.3.0 and higher \
     versions.";

/// First warning emitted when the task pool is unavailable.
#[must_use]
pub fn pool_remediation(shm_dir: &Path, user: &str) -> String {
    format!(
        "In order to take advantage of Wazuh 4.3.0 cluster improvements, the directory '{}' must \
         be accessible by the '{user}' user. Check that this file has permissions to be accessed \
         by all users. Changing the file permissions to 777 will solve this issue.",
        shm_dir.display()
    )
}

/// Error emitted when the temporary working directory is not usable.
#[must_use]
pub fn temp_dir_remediation(path: &Path, user: &str) -> String {
    format!(
        "Directory '{}' needs read, write & execution permission for '{user}' user",
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_texts_match_operator_documentation() {
        assert_eq!(
            pool_remediation(Path::new("/dev/shm"), "wazuh"),
            "In order to take advantage of Wazuh 4.3.0 cluster improvements, the directory \
             '/dev/shm' must be accessible by the 'wazuh' user. Check that this file has \
             permissions to be accessed by all users. Changing the file permissions to 777 will \
             solve this issue."
        );
        assert_eq!(
            POOL_DEGRADED,
            "The Wazuh cluster will be run without the improvements added in Wazuh 4.3.0 and \
             higher versions."
        );
        assert_eq!(
            temp_dir_remediation(Path::new("/tmp"), "wazuh"),
            "Directory '/tmp' needs read, write & execution permission for 'wazuh' user"
        );
    }
}
