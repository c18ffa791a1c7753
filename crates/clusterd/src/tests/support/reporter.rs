//! Test double for [`HealthReporter`] that records rendered lines.

use std::error::Error;
use std::path::Path;
use std::sync::Mutex;

use clusterd_config::{ConfigError, ValidationError, ValidationWarning};

use crate::health::{HealthReporter, POOL_DEGRADED, pool_remediation, temp_dir_remediation};

/// Records every lifecycle message exactly as operators would read it.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<String>>,
}

impl RecordingReporter {
    /// Captures a copy of the recorded lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("reporter mutex poisoned")
            .clone()
    }

    /// Whether any recorded line contains `fragment`.
    #[must_use]
    pub fn contains(&self, fragment: &str) -> bool {
        self.lines().iter().any(|line| line.contains(fragment))
    }

    fn record(&self, line: impl Into<String>) {
        self.lines
            .lock()
            .expect("reporter mutex poisoned")
            .push(line.into());
    }
}

impl HealthReporter for RecordingReporter {
    fn config_failed(&self, error: &ConfigError) {
        self.record(error.to_string());
    }

    fn config_invalid(&self, error: &ValidationError) {
        self.record(error.to_string());
    }

    fn config_warning(&self, warning: &ValidationWarning) {
        self.record(warning.to_string());
    }

    fn config_valid(&self) {
        self.record("Configuration is valid");
    }

    fn cluster_disabled(&self) {
        self.record("Cluster disabled");
    }

    fn key_pair_generating(&self) {
        self.record("Generating JWT signing key pair");
    }

    fn daemon_started(&self, name: &str, pid: u32) {
        self.record(format!("Started {name} (pid: {pid})"));
    }

    fn daemon_failed(&self, name: &str, code: i32) {
        self.record(format!("Error starting {name}: return code {code}"));
    }

    fn daemon_stopping(&self, name: &str, pid: u32) {
        self.record(format!("Shutting down {name} (pid: {pid})"));
    }

    fn stale_record_removed(&self, name: &str, pid: u32) {
        self.record(format!("removed leftover pid record {name}-{pid}"));
    }

    fn signal_received(&self, signal: i32) {
        self.record(format!(
            "SIGNAL [({signal})-({signal})] received. Shutting down..."
        ));
    }

    fn interrupted(&self) {
        self.record("SIGINT received. Shutting down...");
    }

    fn connection_lost(&self, retry_seconds: u64) {
        self.record(format!(
            "Connection with server has been lost. Reconnecting in {retry_seconds} seconds."
        ));
    }

    fn pool_unavailable(&self, shm_dir: &Path, user: &str) {
        self.record(pool_remediation(shm_dir, user));
        self.record(POOL_DEGRADED);
    }

    fn temp_dir_denied(&self, path: &Path, user: &str) {
        self.record(temp_dir_remediation(path, user));
    }

    fn unhandled(&self, error: &dyn Error) {
        self.record(format!("Unhandled exception: {error}"));
    }
}
