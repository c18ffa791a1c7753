//! Cluster node description and its structural checks.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::{
    DEFAULT_BIND_ADDR, DEFAULT_CLUSTER_NAME, DEFAULT_CLUSTER_PORT, DEFAULT_HELPER_FREQUENCY,
    DEFAULT_NODE_ADDRESS, DEFAULT_NODE_NAME,
};
use crate::error::ValidationError;

/// Node values that can never identify a reachable master.
pub const RESERVED_NODE_VALUES: [&str; 4] = ["localhost", "NODE_IP", "0.0.0.0", "127.0.1.1"];

const KEY_LENGTH: usize = 32;

/// Role of a node inside the cluster.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClusterMode {
    /// Accepts worker connections and runs the optional load-balancer helper.
    #[default]
    Master,
    /// Connects to the master and reconnects after losing it.
    Worker,
}

/// Settings for the master-only load-balancer helper.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HelperConfig {
    /// Administratively disables the helper.
    pub haproxy_disabled: bool,
    /// Seconds between synchronisation rounds.
    pub frequency: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            haproxy_disabled: true,
            frequency: DEFAULT_HELPER_FREQUENCY,
        }
    }
}

/// Cluster node description.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Cluster name shared by every node.
    pub name: String,
    /// Name of this node.
    pub node_name: String,
    /// Role of this node.
    pub node_type: ClusterMode,
    /// Shared secret; exactly 32 alphanumeric characters.
    pub key: String,
    /// TCP port used by the master control loop.
    pub port: u16,
    /// Address the master control loop binds to.
    pub bind_addr: String,
    /// Master addresses; only the first entry is used.
    pub nodes: Vec<String>,
    /// Hides this node from cluster listings.
    pub hidden: bool,
    /// Disables the cluster entirely.
    pub disabled: bool,
    /// Load-balancer helper settings.
    pub haproxy_helper: HelperConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CLUSTER_NAME.to_owned(),
            node_name: DEFAULT_NODE_NAME.to_owned(),
            node_type: ClusterMode::Master,
            key: String::new(),
            port: DEFAULT_CLUSTER_PORT,
            bind_addr: DEFAULT_BIND_ADDR.to_owned(),
            nodes: vec![DEFAULT_NODE_ADDRESS.to_owned()],
            hidden: false,
            disabled: true,
            haproxy_helper: HelperConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Address of the master as seen from a worker.
    #[must_use]
    pub fn master_address(&self) -> Option<&str> {
        self.nodes.first().map(String::as_str)
    }

    /// Returns true when the load-balancer helper should run.
    #[must_use]
    pub fn helper_enabled(&self) -> bool {
        self.node_type == ClusterMode::Master && !self.haproxy_helper.haproxy_disabled
    }
}

/// Non-fatal findings reported by [`check_cluster_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// More than one node address was configured.
    MultipleNodes {
        /// The address that will be used.
        master: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultipleNodes { master } => write!(
                formatter,
                "Found more than one node in configuration. Only master node should be \
                 specified. Using {master} as master."
            ),
        }
    }
}

/// Checks the structural rules every cluster node must satisfy.
pub fn check_cluster_config(
    config: &ClusterConfig,
) -> Result<Vec<ValidationWarning>, ValidationError> {
    if config.key.is_empty() {
        return Err(ValidationError::UnspecifiedKey);
    }
    if config.key.len() != KEY_LENGTH || !config.key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidKey);
    }
    if !(config.port > 1024 && config.port < u16::MAX) {
        return Err(ValidationError::InvalidPort { port: config.port });
    }

    let mut warnings = Vec::new();
    if config.nodes.len() > 1
        && let Some(master) = config.master_address()
    {
        warnings.push(ValidationWarning::MultipleNodes {
            master: master.to_owned(),
        });
    }

    let mut reserved: Vec<String> = RESERVED_NODE_VALUES
        .iter()
        .filter(|value| config.nodes.iter().any(|node| node == *value))
        .map(|value| (*value).to_owned())
        .collect();
    if !reserved.is_empty() {
        reserved.sort();
        return Err(ValidationError::ReservedNodes { values: reserved });
    }
    if config.nodes.is_empty() {
        return Err(ValidationError::MissingNodes);
    }
    Ok(warnings)
}
