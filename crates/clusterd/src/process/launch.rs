//! Supervises startup sequencing and runtime orchestration.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clusterd_config::{Config, ConfigError, RuntimePaths, RuntimeSettings, check_cluster_config};
use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::cli::{Cli, version_banner};
use crate::context::{PreviousHandler, SupervisorContext};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::keys::{KeyStore, OpensslKeyStore, ensure_key_pair};
use crate::node::standalone::StandaloneFactory;
use crate::node::{DirectoryCheck, ModeController, NodeError, NodeFactory};
use crate::telemetry::{self, LogSink};

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::SupervisorError;
use super::files::{clear_directory, check_writable};
use super::launcher::{ProcessLauncher, ProcessSpawner, TokioSpawner};
use super::pid_registry::{FilePidRegistry, PidRegistry};
use super::privileges::{PrivilegeDropper, SystemPrivileges};
use super::shutdown::ShutdownCoordinator;
use super::signals::{
    NixSignalControl, ShutdownReason, ShutdownSignal, ShutdownTrigger, SignalControl,
    SystemShutdownSignal,
};
use super::{
    CLUSTERD_NAME, COMMS_API_DAEMON_NAME, ENGINE_DAEMON_NAME, MANAGEMENT_API_DAEMON_NAME,
    PROCESS_TARGET,
};

/// Signal whose inherited disposition is restored after shutdown.
const TERMINATION_SIGNAL: i32 = Signal::SIGTERM as i32;

/// Loads the supervisor configuration.
pub trait ConfigLoader: Send + Sync {
    /// Loads the configuration stored at `path`.
    fn load(&self, path: &Path) -> Result<Config, ConfigError>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self, path: &Path) -> Result<Config, ConfigError> {
        Config::load(path)
    }
}

/// Loader returning a configuration that is already in memory.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _path: &Path) -> Result<Config, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Process-level collaborators needed to control the supervisor lifecycle.
pub struct ProcessControl {
    /// Forks into the background.
    pub daemonizer: Box<dyn Daemonizer>,
    /// Switches to the service account.
    pub privileges: Box<dyn PrivilegeDropper>,
    /// Listens for termination and interrupt signals.
    pub shutdown_signal: Box<dyn ShutdownSignal>,
    /// Sends signals to other processes.
    pub signals: Box<dyn SignalControl>,
    /// Spawns the auxiliary daemons.
    pub spawner: Box<dyn ProcessSpawner>,
    /// Shared shutdown handle handed to the signal listener.
    pub trigger: ShutdownTrigger,
}

/// Service dependencies required to run the cluster node.
pub struct ServiceDeps {
    /// Configuration source.
    pub loader: Box<dyn ConfigLoader>,
    /// Lifecycle event sink.
    pub reporter: Arc<dyn HealthReporter>,
    /// Authentication key pair store.
    pub key_store: Box<dyn KeyStore>,
    /// Builds the node components.
    pub factory: Box<dyn NodeFactory>,
    /// Termination disposition to chain to after cleanup.
    /// [`PreviousHandler::None`] captures the inherited one at start-up.
    pub previous_handler: PreviousHandler,
    /// Checks the temporary working directory before the node starts.
    pub tmp_dir_check: DirectoryCheck,
}

/// Collaborators required to launch the supervisor.
pub struct LaunchPlan {
    /// Process-level collaborators.
    pub process: ProcessControl,
    /// Service-level collaborators.
    pub services: ServiceDeps,
}

impl LaunchPlan {
    /// Production collaborators.
    #[must_use]
    pub fn system() -> Self {
        Self {
            process: ProcessControl {
                daemonizer: Box::new(SystemDaemonizer::new()),
                privileges: Box::new(SystemPrivileges),
                shutdown_signal: Box::new(SystemShutdownSignal),
                signals: Box::new(NixSignalControl),
                spawner: Box::new(TokioSpawner),
                trigger: ShutdownTrigger::new(),
            },
            services: ServiceDeps {
                loader: Box::new(SystemConfigLoader),
                reporter: Arc::new(StructuredHealthReporter::new()),
                key_store: Box::new(OpensslKeyStore::default()),
                factory: Box::new(StandaloneFactory::new()),
                previous_handler: PreviousHandler::None,
                tmp_dir_check: check_writable,
            },
        }
    }
}

/// Parses the command line and runs the supervisor with the production
/// collaborators.
#[must_use]
pub fn run_supervisor(stdout: &mut dyn Write) -> ExitCode {
    let cli = Cli::parse();
    run_supervisor_with(&cli, LaunchPlan::system(), stdout)
}

/// Runs the supervisor with injected collaborators.
///
/// Returns 0 for a normal exit, a printed version, a passing configuration
/// test, or a disabled cluster. Returns 1 for configuration problems and
/// fatal runtime errors.
#[must_use]
pub fn run_supervisor_with(cli: &Cli, plan: LaunchPlan, stdout: &mut dyn Write) -> ExitCode {
    if cli.version {
        return match writeln!(stdout, "{}", version_banner()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        };
    }
    let LaunchPlan { process, services } = plan;
    let reporter = Arc::clone(&services.reporter);

    let config = match services.loader.load(&cli.config_path()) {
        Ok(config) => config,
        Err(error) => {
            start_telemetry(&RuntimeSettings::default(), &LogSink::Stderr, cli.debug_level);
            reporter.config_failed(&error);
            return ExitCode::FAILURE;
        }
    };
    let paths = config.runtime_paths();
    let sink = if cli.foreground || cli.test_config {
        LogSink::Stderr
    } else {
        LogSink::File(paths.log_path().to_path_buf())
    };
    start_telemetry(&config.runtime, &sink, cli.debug_level);

    if config.cluster.disabled {
        reporter.cluster_disabled();
        return ExitCode::SUCCESS;
    }
    match check_cluster_config(&config.cluster) {
        Ok(warnings) => {
            for warning in &warnings {
                reporter.config_warning(warning);
            }
        }
        Err(error) => {
            reporter.config_invalid(&error);
            return ExitCode::FAILURE;
        }
    }
    if cli.test_config {
        reporter.config_valid();
        return ExitCode::SUCCESS;
    }

    let supervisor = Supervisor {
        cli,
        process: &process,
        services: &services,
        registry: FilePidRegistry::new(paths.run_dir()),
        paths,
    };
    supervisor.run(config, stdout)
}

fn start_telemetry(settings: &RuntimeSettings, sink: &LogSink, debug_level: u8) {
    if let Err(error) = telemetry::initialise(settings, sink, debug_level) {
        let fallback = telemetry::initialise(settings, &LogSink::Stderr, debug_level);
        if fallback.is_ok() {
            warn!(target: PROCESS_TARGET, %error, "logging to stderr instead");
        }
    }
}

/// Tags a failed startup step with its name.
fn during<T, E>(step: &'static str, result: Result<T, E>) -> Result<T, SupervisorError>
where
    E: Into<SupervisorError>,
{
    result.map_err(|error| SupervisorError::Startup {
        step,
        source: Box::new(error.into()),
    })
}

/// One supervisor run after the configuration has been accepted.
struct Supervisor<'a> {
    cli: &'a Cli,
    process: &'a ProcessControl,
    services: &'a ServiceDeps,
    registry: FilePidRegistry,
    paths: RuntimePaths,
}

impl Supervisor<'_> {
    fn run(&self, config: Config, stdout: &mut dyn Write) -> ExitCode {
        let reporter = &self.services.reporter;
        let context = match self.prepare(config, stdout) {
            Ok(context) => context,
            Err(error) => {
                reporter.unhandled(&error);
                return ExitCode::FAILURE;
            }
        };
        let outcome = self.serve(&context);
        self.finish(&context, outcome)
    }

    /// Everything that must happen before the async runtime exists:
    /// clean-up of the previous run, daemonisation, and privilege dropping.
    ///
    /// Directories the service account writes to later are handed over
    /// before privileges are dropped.
    fn prepare(
        &self,
        config: Config,
        stdout: &mut dyn Write,
    ) -> Result<SupervisorContext, SupervisorError> {
        let args = during("argument check", self.cli.node_args())?;
        during("run directory setup", self.paths.ensure_run_dir())?;
        let removed = during(
            "stale record cleanup",
            self.registry.clean_stale(CLUSTERD_NAME),
        )?;
        let state_dir = self.paths.cluster_state_dir();
        let cleared = during(
            "cluster state cleanup",
            clear_directory(state_dir).map_err(|source| SupervisorError::Cleanup {
                path: state_dir.to_path_buf(),
                source,
            }),
        )?;
        info!(
            target: PROCESS_TARGET,
            stale_records = removed,
            state_entries = cleared,
            "previous run state cleared"
        );

        let privileges = self.process.privileges.as_ref();
        let service_account = if self.cli.root {
            None
        } else {
            let runtime = &config.runtime;
            Some(during(
                "account lookup",
                privileges.resolve(&runtime.user, &runtime.group),
            )?)
        };
        if !self.cli.foreground {
            during("daemonisation", self.process.daemonizer.daemonize(&self.paths))?;
        }
        if let Some(identity) = service_account {
            during(
                "log file handover",
                privileges.prepare_log_file(self.paths.log_path(), identity),
            )?;
            during(
                "run directory handover",
                privileges.prepare_run_dir(self.paths.run_dir(), identity),
            )?;
            during("privilege drop", privileges.drop_to(identity))?;
        }

        let context = SupervisorContext::new(config, Arc::clone(&self.services.reporter))
            .with_args(args)
            .with_flags(self.cli.foreground, self.cli.root)
            .with_previous_handler(self.previous_handler());
        if self.cli.foreground
            && let Err(error) = writeln!(
                stdout,
                "Starting cluster in foreground (pid: {})",
                context.own_pid()
            )
        {
            warn!(target: PROCESS_TARGET, %error, "failed to announce foreground start");
        }
        during(
            "key pair generation",
            ensure_key_pair(
                self.services.key_store.as_ref(),
                &self.paths,
                self.services.reporter.as_ref(),
            ),
        )?;
        during(
            "pid record creation",
            self.registry.create(CLUSTERD_NAME, context.own_pid()),
        )?;
        Ok(context)
    }

    /// Disposition to chain to once a termination signal has been handled.
    ///
    /// Read before the signal listener replaces it.
    fn previous_handler(&self) -> PreviousHandler {
        if !matches!(self.services.previous_handler, PreviousHandler::None) {
            return self.services.previous_handler.clone();
        }
        self.process
            .signals
            .capture(TERMINATION_SIGNAL)
            .unwrap_or_else(|error| {
                warn!(target: PROCESS_TARGET, %error, "inherited handler unreadable; using default");
                PreviousHandler::Default
            })
    }

    fn serve(&self, context: &SupervisorContext) -> Result<(), SupervisorError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| SupervisorError::Runtime { source })?;
        let trigger = &self.process.trigger;
        runtime.block_on(async {
            self.process.shutdown_signal.install(trigger.clone())?;
            ProcessLauncher::new(context, &self.registry, self.process.spawner.as_ref())
                .start_all();
            let controller = ModeController::new(
                self.services.factory.as_ref(),
                context,
                trigger.token().clone(),
            )
            .with_dir_check(self.services.tmp_dir_check);
            controller.run().await?;
            Ok(())
        })
    }

    /// Reports the outcome, then stops the auxiliary daemons and releases
    /// every PID record regardless of how the run ended.
    fn finish(
        &self,
        context: &SupervisorContext,
        outcome: Result<(), SupervisorError>,
    ) -> ExitCode {
        let reporter = context.reporter();
        let reason = self.process.trigger.reason();
        let code = match &outcome {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                if let SupervisorError::Node(NodeError::TempDirectory { path, .. }) = error {
                    reporter.temp_dir_denied(path, &context.config().runtime.user);
                }
                reporter.unhandled(error);
                ExitCode::FAILURE
            }
        };
        if reason == Some(ShutdownReason::Interrupted) {
            reporter.interrupted();
        }

        let coordinator =
            ShutdownCoordinator::new(context, &self.registry, self.process.signals.as_ref());
        for name in [
            ENGINE_DAEMON_NAME,
            MANAGEMENT_API_DAEMON_NAME,
            COMMS_API_DAEMON_NAME,
        ] {
            coordinator.shutdown_daemon(name);
        }
        match reason {
            Some(ShutdownReason::Terminated(signal)) => coordinator.exit_handler(signal),
            Some(ShutdownReason::Interrupted) | None => coordinator.release_records(),
        }
        info!(target: PROCESS_TARGET, "shutdown sequence completed");
        code
    }
}
