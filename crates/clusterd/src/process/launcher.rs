//! Starts the auxiliary daemons that run alongside the cluster supervisor.

use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tracing::{debug, warn};

use super::pid_registry::PidRegistry;
use super::{
    COMMS_API_DAEMON_NAME, ENGINE_DAEMON_NAME, MANAGEMENT_API_DAEMON_NAME, PROCESS_TARGET,
};
use crate::context::SupervisorContext;

/// Exit code reported when a daemon could not be executed at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Command line and PID reporting policy of one auxiliary daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    /// Daemon name used for logging and PID records.
    pub name: &'static str,
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether the reported PID is always the spawned process.
    pub reports_spawned_pid: bool,
}

/// Result of starting one daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The daemon is running with the reported PID.
    Started(u32),
    /// The daemon exited immediately with the given code.
    Failed(i32),
}

/// Handle over a spawned process.
pub trait SpawnedProcess: Send {
    /// OS PID of the process, if it is still known.
    fn id(&self) -> Option<u32>;

    /// Exit code if the process has already exited.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;
}

/// Spawns daemon processes.
pub trait ProcessSpawner: Send + Sync {
    /// Starts `spec` without waiting for it.
    fn spawn(&self, spec: &DaemonSpec) -> io::Result<Box<dyn SpawnedProcess>>;
}

/// Spawner backed by `tokio::process`, which reaps children in the
/// background once their handles are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl ProcessSpawner for TokioSpawner {
    fn spawn(&self, spec: &DaemonSpec) -> io::Result<Box<dyn SpawnedProcess>> {
        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;
        Ok(Box::new(TokioChild(child)))
    }
}

struct TokioChild(tokio::process::Child);

impl SpawnedProcess for TokioChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(exit_code))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Builds the engine daemon command.
#[must_use]
pub fn engine_spec(context: &SupervisorContext) -> DaemonSpec {
    DaemonSpec {
        name: ENGINE_DAEMON_NAME,
        program: context.paths().engine_binary().to_path_buf(),
        args: vec![OsString::from("server"), OsString::from("start")],
        reports_spawned_pid: true,
    }
}

/// Builds the command of an interpreter-hosted API daemon.
#[must_use]
pub fn api_spec(context: &SupervisorContext, name: &'static str) -> DaemonSpec {
    let paths = context.paths();
    let script = if name == COMMS_API_DAEMON_NAME {
        paths.comms_api_script()
    } else {
        paths.management_api_script()
    };
    let mut args = vec![script.as_os_str().to_owned()];
    if context.root() {
        args.push(OsString::from("-r"));
    }
    if context.foreground() {
        args.push(OsString::from("-f"));
    }
    DaemonSpec {
        name,
        program: paths.interpreter().to_path_buf(),
        args,
        reports_spawned_pid: context.foreground(),
    }
}

/// Starts auxiliary daemons and records them.
pub struct ProcessLauncher<'a> {
    context: &'a SupervisorContext,
    registry: &'a dyn PidRegistry,
    spawner: &'a dyn ProcessSpawner,
}

impl<'a> ProcessLauncher<'a> {
    /// Builds a launcher over the given collaborators.
    pub fn new(
        context: &'a SupervisorContext,
        registry: &'a dyn PidRegistry,
        spawner: &'a dyn ProcessSpawner,
    ) -> Self {
        Self {
            context,
            registry,
            spawner,
        }
    }

    /// Starts the engine, the management API, and the communications API,
    /// in that order.
    pub fn start_all(&self) -> Vec<(&'static str, StartupOutcome)> {
        [
            engine_spec(self.context),
            api_spec(self.context, MANAGEMENT_API_DAEMON_NAME),
            api_spec(self.context, COMMS_API_DAEMON_NAME),
        ]
        .iter()
        .map(|spec| (spec.name, self.start(spec)))
        .collect()
    }

    /// Spawns `spec`, polls it once, and reports the outcome.
    ///
    /// Exactly one log line is produced per call.
    pub fn start(&self, spec: &DaemonSpec) -> StartupOutcome {
        let reporter = self.context.reporter();
        debug!(
            target: PROCESS_TARGET,
            daemon = spec.name,
            program = %spec.program.display(),
            "spawning daemon"
        );
        let mut process = match self.spawner.spawn(spec) {
            Ok(process) => process,
            Err(error) => {
                debug!(target: PROCESS_TARGET, daemon = spec.name, %error, "spawn failed");
                reporter.daemon_failed(spec.name, SPAWN_FAILURE_CODE);
                return StartupOutcome::Failed(SPAWN_FAILURE_CODE);
            }
        };
        let spawned = process.id().unwrap_or_default();
        match process.try_exit_code() {
            Ok(Some(code)) if code != 0 => {
                reporter.daemon_failed(spec.name, code);
                return StartupOutcome::Failed(code);
            }
            Ok(_) => {}
            Err(error) => {
                warn!(target: PROCESS_TARGET, daemon = spec.name, %error, "status poll failed");
            }
        }
        let pid = self.reported_pid(spec, spawned);
        reporter.daemon_started(spec.name, pid);
        // A daemon that detaches writes its own record; this rewrites it with
        // the same PID and drops any leftovers under the name.
        if let Err(error) = self.registry.create(spec.name, pid) {
            warn!(target: PROCESS_TARGET, daemon = spec.name, pid, %error, "pid record not written");
        }
        self.context.track_child(spec.name, pid);
        StartupOutcome::Started(pid)
    }

    fn reported_pid(&self, spec: &DaemonSpec, spawned: u32) -> u32 {
        if spec.reports_spawned_pid {
            return spawned;
        }
        match self.registry.parent_pid(spec.name) {
            Ok(Some(pid)) => pid,
            Ok(None) => spawned,
            Err(error) => {
                warn!(target: PROCESS_TARGET, daemon = spec.name, %error, "pid lookup failed");
                spawned
            }
        }
    }
}
