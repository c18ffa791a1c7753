//! Test harness utilities shared by unit and behavioural suites.

mod doubles;
mod factory;
mod reporter;
mod spawner;

pub use doubles::{
    CountingDaemonizer, InertPrivileges, QuietShutdownSignal, RecordingSignals, StubKeyStore,
};
pub use factory::{PoolScript, ScriptedFactory, ServiceScript};
pub use reporter::RecordingReporter;
pub use spawner::{FakeSpawner, SpawnBehaviour};
