//! Signal delivery in both directions.
//!
//! [`ShutdownSignal`] listens for the termination and interrupt signals sent
//! to the supervisor and records the first one in a [`ShutdownTrigger`].
//! [`SignalControl`] sends signals to other processes and restores default
//! dispositions once the supervisor has finished its own cleanup.

use std::io;
use std::sync::{Arc, OnceLock};

use nix::errno::Errno;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction, signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal as listen};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::PROCESS_TARGET;
use crate::context::PreviousHandler;

/// Why the supervisor began shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal with the given number arrived.
    Terminated(i32),
    /// An interactive interrupt arrived.
    Interrupted,
}

/// Shared cancellation handle that remembers the first shutdown reason.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownTrigger {
    /// Builds an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once shutdown begins.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records `reason` unless another reason was recorded first, then
    /// cancels the token.
    pub fn fire(&self, reason: ShutdownReason) {
        let _first = self.reason.get_or_init(|| reason);
        self.token.cancel();
    }

    /// First recorded reason, if shutdown has begun.
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }
}

/// Errors reported by signal listeners and senders.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Arranges for `trigger` to fire on the first shutdown signal.
    ///
    /// Must be called from within a Tokio runtime.
    fn install(&self, trigger: ShutdownTrigger) -> Result<(), ShutdownError>;
}

/// Listener for `SIGTERM` and `SIGINT`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&self, trigger: ShutdownTrigger) -> Result<(), ShutdownError> {
        let mut sigterm = listen(SignalKind::terminate())
            .map_err(|source| ShutdownError::Install { source })?;
        let mut sigint = listen(SignalKind::interrupt())
            .map_err(|source| ShutdownError::Install { source })?;
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = sigterm.recv() => ShutdownReason::Terminated(Signal::SIGTERM as i32),
                _ = sigint.recv() => ShutdownReason::Interrupted,
                () = trigger.token().cancelled() => return,
            };
            debug!(target: PROCESS_TARGET, ?reason, "shutdown signal received");
            trigger.fire(reason);
        });
        Ok(())
    }
}

/// Errors raised while sending signals or restoring dispositions.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The PID does not fit the platform's PID type.
    #[error("pid {pid} is out of range")]
    InvalidPid {
        /// Offending PID.
        pid: u32,
    },
    /// The signal number is unknown on this platform.
    #[error("unknown signal number {signal}")]
    UnknownSignal {
        /// Offending signal number.
        signal: i32,
    },
    /// Delivering a signal failed.
    #[error("failed to signal pid {pid}: {source}")]
    Deliver {
        /// Target PID.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Reading the installed disposition failed.
    #[error("failed to inspect handler for signal {signal}: {source}")]
    Inspect {
        /// Signal number.
        signal: i32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Installing a disposition failed.
    #[error("failed to restore handler for signal {signal}: {source}")]
    Restore {
        /// Signal number.
        signal: i32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

/// Sends signals to processes and manages dispositions.
pub trait SignalControl: Send + Sync {
    /// Sends `SIGTERM` to `pid`. A process that no longer exists is not an
    /// error.
    fn terminate(&self, pid: u32) -> Result<(), SignalError>;

    /// Reads the disposition currently installed for `signal`.
    fn capture(&self, signal: i32) -> Result<PreviousHandler, SignalError>;

    /// Reinstalls a disposition returned by [`SignalControl::capture`].
    fn reinstate(&self, signal: i32, action: &SigAction) -> Result<(), SignalError>;

    /// Restores the default disposition of `signal`.
    fn restore_default(&self, signal: i32) -> Result<(), SignalError>;
}

/// Signal control backed by `kill(2)` and `signal(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NixSignalControl;

impl SignalControl for NixSignalControl {
    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        let raw = i32::try_from(pid).map_err(|_| SignalError::InvalidPid { pid })?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(SignalError::Deliver { pid, source }),
        }
    }

    fn capture(&self, number: i32) -> Result<PreviousHandler, SignalError> {
        let parsed = parse_signal(number)?;
        let default_action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: SIG_DFL runs no Rust code, and the returned action goes
        // straight back in.
        let previous = unsafe { sigaction(parsed, &default_action) }.map_err(|source| {
            SignalError::Inspect {
                signal: number,
                source,
            }
        })?;
        self.reinstate(number, &previous)?;
        Ok(match previous.handler() {
            SigHandler::SigDfl => PreviousHandler::Default,
            _ => PreviousHandler::Inherited(previous),
        })
    }

    fn reinstate(&self, number: i32, action: &SigAction) -> Result<(), SignalError> {
        let parsed = parse_signal(number)?;
        // SAFETY: `action` was read from this process by `capture`.
        unsafe { sigaction(parsed, action) }
            .map(|_| ())
            .map_err(|source| SignalError::Restore {
                signal: number,
                source,
            })
    }

    fn restore_default(&self, number: i32) -> Result<(), SignalError> {
        let parsed = parse_signal(number)?;
        // SAFETY: installing SIG_DFL does not run any Rust code in signal context.
        unsafe { signal(parsed, SigHandler::SigDfl) }
            .map(|_| ())
            .map_err(|source| SignalError::Restore {
                signal: number,
                source,
            })
    }
}

fn parse_signal(number: i32) -> Result<Signal, SignalError> {
    Signal::try_from(number).map_err(|_| SignalError::UnknownSignal { signal: number })
}
