//! Tunable intervals consumed by the cluster control loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_CHECK_WORKER_LASTKEEPALIVE, DEFAULT_CONNECTION_RETRY,
    DEFAULT_MAX_ALLOWED_TIME_WITHOUT_KEEPALIVE, DEFAULT_WORKER_KEEP_ALIVE,
};

/// Cluster item definitions.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterItems {
    /// Interval tunables grouped by role.
    pub intervals: Intervals,
}

/// Interval tunables grouped by role.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Intervals {
    /// Worker-side intervals.
    pub worker: WorkerIntervals,
    /// Master-side intervals.
    pub master: MasterIntervals,
}

/// Worker-side intervals, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerIntervals {
    /// Delay before reconnecting after the master connection is lost.
    pub connection_retry: u64,
    /// Delay between keep-alive messages.
    pub keep_alive: u64,
}

impl Default for WorkerIntervals {
    fn default() -> Self {
        Self {
            connection_retry: DEFAULT_CONNECTION_RETRY,
            keep_alive: DEFAULT_WORKER_KEEP_ALIVE,
        }
    }
}

impl WorkerIntervals {
    /// Reconnection backoff as a [`Duration`].
    #[must_use]
    pub const fn connection_retry(&self) -> Duration {
        Duration::from_secs(self.connection_retry)
    }
}

/// Master-side intervals, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MasterIntervals {
    /// Delay between sweeps for silent workers.
    pub check_worker_lastkeepalive: u64,
    /// Silence after which a worker is dropped.
    pub max_allowed_time_without_keepalive: u64,
}

impl Default for MasterIntervals {
    fn default() -> Self {
        Self {
            check_worker_lastkeepalive: DEFAULT_CHECK_WORKER_LASTKEEPALIVE,
            max_allowed_time_without_keepalive: DEFAULT_MAX_ALLOWED_TIME_WITHOUT_KEEPALIVE,
        }
    }
}
