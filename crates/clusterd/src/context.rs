//! State shared by the supervisor's lifecycle phases.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use clusterd_config::{ClusterConfig, ClusterItems, ClusterMode, Config, RuntimePaths};
use nix::sys::signal::SigAction;

use crate::health::HealthReporter;
use crate::node::NodeArgs;

/// Termination disposition in place before the supervisor took over.
#[derive(Clone, Default)]
pub enum PreviousHandler {
    /// Nothing recorded yet. A supervisor run replaces this with the
    /// disposition it inherited.
    #[default]
    None,
    /// The platform default disposition.
    Default,
    /// A disposition inherited from the parent process, such as an ignored
    /// signal or a foreign handler, reinstalled as captured.
    Inherited(SigAction),
    /// A callable to chain to after cleanup.
    Custom(Arc<dyn Fn(i32) + Send + Sync>),
}

impl fmt::Debug for PreviousHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Default => formatter.write_str("Default"),
            Self::Inherited(action) => write!(formatter, "Inherited({:?})", action.handler()),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

/// Auxiliary daemon started by this supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedChild {
    /// Daemon name.
    pub name: String,
    /// Reported PID.
    pub pid: u32,
}

/// Everything the supervisor threads through startup, supervision, and
/// shutdown.
pub struct SupervisorContext {
    reporter: Arc<dyn HealthReporter>,
    config: Config,
    paths: RuntimePaths,
    args: NodeArgs,
    own_pid: u32,
    foreground: bool,
    root: bool,
    previous_handler: PreviousHandler,
    children: Mutex<Vec<TrackedChild>>,
}

impl fmt::Debug for SupervisorContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SupervisorContext")
            .field("mode", &self.mode())
            .field("own_pid", &self.own_pid)
            .field("foreground", &self.foreground)
            .field("root", &self.root)
            .field("previous_handler", &self.previous_handler)
            .finish_non_exhaustive()
    }
}

impl SupervisorContext {
    /// Builds a context for the current process.
    #[must_use]
    pub fn new(config: Config, reporter: Arc<dyn HealthReporter>) -> Self {
        let paths = config.runtime_paths();
        Self {
            reporter,
            config,
            paths,
            args: NodeArgs::default(),
            own_pid: std::process::id(),
            foreground: false,
            root: false,
            previous_handler: PreviousHandler::None,
            children: Mutex::new(Vec::new()),
        }
    }

    /// Sets the test-mode arguments forwarded to the control loops.
    #[must_use]
    pub fn with_args(mut self, args: NodeArgs) -> Self {
        self.args = args;
        self
    }

    /// Records the foreground and keep-root flags.
    #[must_use]
    pub fn with_flags(mut self, foreground: bool, root: bool) -> Self {
        self.foreground = foreground;
        self.root = root;
        self
    }

    /// Overrides the PID used for this supervisor's own records.
    #[must_use]
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = pid;
        self
    }

    /// Sets the disposition to chain to after termination cleanup.
    #[must_use]
    pub fn with_previous_handler(mut self, handler: PreviousHandler) -> Self {
        self.previous_handler = handler;
        self
    }

    /// Lifecycle reporter.
    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn HealthReporter> {
        &self.reporter
    }

    /// Full configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cluster node description.
    #[must_use]
    pub fn cluster(&self) -> &ClusterConfig {
        &self.config.cluster
    }

    /// Control-loop tunables.
    #[must_use]
    pub fn items(&self) -> &ClusterItems {
        &self.config.items
    }

    /// Effective node role.
    #[must_use]
    pub fn mode(&self) -> ClusterMode {
        self.config.mode()
    }

    /// Runtime artefact layout.
    #[must_use]
    pub fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Test-mode arguments.
    #[must_use]
    pub fn args(&self) -> &NodeArgs {
        &self.args
    }

    /// PID of this supervisor.
    #[must_use]
    pub fn own_pid(&self) -> u32 {
        self.own_pid
    }

    /// Whether the supervisor runs attached to its terminal.
    #[must_use]
    pub fn foreground(&self) -> bool {
        self.foreground
    }

    /// Whether the supervisor keeps root privileges.
    #[must_use]
    pub fn root(&self) -> bool {
        self.root
    }

    /// Disposition to chain to after termination cleanup.
    #[must_use]
    pub fn previous_handler(&self) -> &PreviousHandler {
        &self.previous_handler
    }

    /// Adds a started daemon to the tracked set.
    pub fn track_child(&self, name: &str, pid: u32) {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|child| child.name != name);
        children.push(TrackedChild {
            name: name.to_owned(),
            pid,
        });
    }

    /// Removes and returns every tracked daemon.
    #[must_use]
    pub fn take_children(&self) -> Vec<TrackedChild> {
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *children)
    }

    /// Snapshot of the tracked daemons.
    #[must_use]
    pub fn children(&self) -> Vec<TrackedChild> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
