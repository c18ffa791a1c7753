//! Process-level doubles for driving a whole supervisor run in-process.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use clusterd_config::RuntimePaths;
use nix::sys::signal::SigAction;

use crate::context::PreviousHandler;
use crate::keys::{KeyPairError, KeyStore};
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::privileges::{Identity, PrivilegeDropper, PrivilegeError};
use crate::process::signals::{
    ShutdownError, ShutdownSignal, ShutdownTrigger, SignalControl, SignalError,
};

/// Counts daemonisation requests without forking.
#[derive(Debug, Clone, Default)]
pub struct CountingDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl CountingDaemonizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for CountingDaemonizer {
    fn daemonize(&self, _paths: &RuntimePaths) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolves every account to the current identity and never switches.
///
/// Every trait call is journaled by method name so tests can check the order
/// in which the supervisor prepares files and drops privileges.
#[derive(Debug, Clone, Default)]
pub struct InertPrivileges {
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl InertPrivileges {
    /// Method names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("privileges mutex poisoned").clone()
    }

    /// How often privileges were dropped.
    pub fn drops(&self) -> usize {
        self.calls()
            .into_iter()
            .filter(|call| *call == "drop_to")
            .count()
    }

    fn record(&self, call: &'static str) {
        self.calls
            .lock()
            .expect("privileges mutex poisoned")
            .push(call);
    }
}

impl PrivilegeDropper for InertPrivileges {
    fn resolve(&self, _user: &str, _group: &str) -> Result<Identity, PrivilegeError> {
        self.record("resolve");
        Ok(Identity {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        })
    }

    fn prepare_log_file(&self, _path: &Path, _identity: Identity) -> Result<(), PrivilegeError> {
        self.record("prepare_log_file");
        Ok(())
    }

    fn prepare_run_dir(&self, path: &Path, _identity: Identity) -> Result<(), PrivilegeError> {
        assert!(path.is_dir(), "run directory must exist before it is handed over");
        self.record("prepare_run_dir");
        Ok(())
    }

    fn drop_to(&self, _identity: Identity) -> Result<(), PrivilegeError> {
        self.record("drop_to");
        Ok(())
    }
}

/// Signal listener that never fires on its own; scenarios fire the shared
/// trigger directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietShutdownSignal;

impl ShutdownSignal for QuietShutdownSignal {
    fn install(&self, _trigger: ShutdownTrigger) -> Result<(), ShutdownError> {
        Ok(())
    }
}

/// Signal sender that records instead of delivering.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignals {
    terminated: Arc<Mutex<Vec<u32>>>,
    restored: Arc<Mutex<Vec<i32>>>,
    reinstated: Arc<Mutex<Vec<i32>>>,
    inherited: Arc<Mutex<Option<SigAction>>>,
}

impl RecordingSignals {
    /// Makes every capture report `action` as the inherited disposition.
    pub fn inherit(&self, action: SigAction) {
        *self.inherited.lock().expect("signals mutex poisoned") = Some(action);
    }

    /// Signals whose inherited disposition was reinstalled.
    pub fn reinstated(&self) -> Vec<i32> {
        self.reinstated
            .lock()
            .expect("signals mutex poisoned")
            .clone()
    }

    /// PIDs sent a termination signal, in order.
    pub fn terminated(&self) -> Vec<u32> {
        self.terminated
            .lock()
            .expect("signals mutex poisoned")
            .clone()
    }

    /// Signals whose default disposition was restored.
    pub fn restored(&self) -> Vec<i32> {
        self.restored
            .lock()
            .expect("signals mutex poisoned")
            .clone()
    }
}

impl SignalControl for RecordingSignals {
    fn terminate(&self, pid: u32) -> Result<(), SignalError> {
        self.terminated
            .lock()
            .expect("signals mutex poisoned")
            .push(pid);
        Ok(())
    }

    fn capture(&self, _signal: i32) -> Result<PreviousHandler, SignalError> {
        let inherited = *self.inherited.lock().expect("signals mutex poisoned");
        Ok(inherited.map_or(PreviousHandler::Default, PreviousHandler::Inherited))
    }

    fn reinstate(&self, signal: i32, _action: &SigAction) -> Result<(), SignalError> {
        self.reinstated
            .lock()
            .expect("signals mutex poisoned")
            .push(signal);
        Ok(())
    }

    fn restore_default(&self, signal: i32) -> Result<(), SignalError> {
        self.restored
            .lock()
            .expect("signals mutex poisoned")
            .push(signal);
        Ok(())
    }
}

/// Key store reporting a fixed presence and counting generations.
#[derive(Debug, Clone, Default)]
pub struct StubKeyStore {
    present: bool,
    broken: bool,
    generated: Arc<AtomicUsize>,
}

impl StubKeyStore {
    pub fn present() -> Self {
        Self {
            present: true,
            ..Self::default()
        }
    }

    /// Absent pair whose generator cannot be run.
    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }
}

impl KeyStore for StubKeyStore {
    fn exists(&self, _paths: &RuntimePaths) -> bool {
        self.present
    }

    fn generate(&self, _paths: &RuntimePaths) -> Result<(), KeyPairError> {
        if self.broken {
            return Err(KeyPairError::Spawn {
                program: PathBuf::from("openssl"),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
