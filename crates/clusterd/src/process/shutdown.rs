//! Tears down auxiliary daemons and the supervisor's own records.
//!
//! Every step is best effort: a failure is logged and the remaining steps
//! still run, so a partially started supervisor leaves as little behind as
//! possible.

use tracing::{debug, warn};

use super::CLUSTERD_NAME;
use super::PROCESS_TARGET;
use super::pid_registry::PidRegistry;
use super::signals::SignalControl;
use crate::context::{PreviousHandler, SupervisorContext};

/// Number of termination signals sent to the reference process.
const TERMINATION_ATTEMPTS: usize = 2;

/// Coordinates the shutdown of the supervisor and the daemons it started.
pub struct ShutdownCoordinator<'a> {
    context: &'a SupervisorContext,
    registry: &'a dyn PidRegistry,
    signals: &'a dyn SignalControl,
}

impl<'a> ShutdownCoordinator<'a> {
    /// Builds a coordinator over the given collaborators.
    pub fn new(
        context: &'a SupervisorContext,
        registry: &'a dyn PidRegistry,
        signals: &'a dyn SignalControl,
    ) -> Self {
        Self {
            context,
            registry,
            signals,
        }
    }

    /// Stops the daemon recorded under `name`, if any.
    pub fn shutdown_daemon(&self, name: &str) {
        let pid = match self.registry.parent_pid(name) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!(target: PROCESS_TARGET, daemon = name, "no pid record; nothing to stop");
                return;
            }
            Err(error) => {
                warn!(target: PROCESS_TARGET, daemon = name, %error, "pid lookup failed");
                return;
            }
        };
        self.context.reporter().daemon_stopping(name, pid);
        if let Err(error) = self.signals.terminate(pid) {
            warn!(target: PROCESS_TARGET, daemon = name, pid, %error, "termination failed");
        }
        self.delete_record(name, pid);
    }

    /// Removes the supervisor's own records and those of tracked daemons.
    pub fn release_records(&self) {
        let own_pid = self.context.own_pid();
        if let Err(error) =
            self.registry
                .delete_child_pids(CLUSTERD_NAME, own_pid, self.context.reporter().as_ref())
        {
            warn!(target: PROCESS_TARGET, %error, "failed to remove child pid records");
        }
        self.delete_record(CLUSTERD_NAME, own_pid);
        for child in self.context.take_children() {
            self.delete_record(&child.name, child.pid);
        }
    }

    /// Handles a termination signal after the main loop has unwound.
    ///
    /// Signals the reference process twice, releases every record, then
    /// chains to the previous disposition: a custom handler is called, an
    /// inherited one is reinstalled, and anything else falls back to the
    /// default.
    pub fn exit_handler(&self, signal: i32) {
        self.context.reporter().signal_received(signal);
        let reference = self.reference_pid();
        for _ in 0..TERMINATION_ATTEMPTS {
            if let Err(error) = self.signals.terminate(reference) {
                warn!(target: PROCESS_TARGET, pid = reference, %error, "termination failed");
            }
        }
        self.release_records();
        let restored = match self.context.previous_handler() {
            PreviousHandler::Custom(handler) => {
                handler(signal);
                return;
            }
            PreviousHandler::Inherited(action) => self.signals.reinstate(signal, action),
            PreviousHandler::None | PreviousHandler::Default => {
                self.signals.restore_default(signal)
            }
        };
        if let Err(error) = restored {
            warn!(target: PROCESS_TARGET, signal, %error, "failed to restore handler");
        }
    }

    /// Supervisor PID as recorded in the registry, or our own PID.
    fn reference_pid(&self) -> u32 {
        match self.registry.parent_pid(CLUSTERD_NAME) {
            Ok(Some(pid)) => pid,
            Ok(None) => self.context.own_pid(),
            Err(error) => {
                warn!(target: PROCESS_TARGET, %error, "pid lookup failed");
                self.context.own_pid()
            }
        }
    }

    fn delete_record(&self, name: &str, pid: u32) {
        if let Err(error) = self.registry.delete(name, pid) {
            warn!(target: PROCESS_TARGET, daemon = name, pid, %error, "failed to remove pid record");
        }
    }
}
