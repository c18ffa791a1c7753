//! Scripted process spawner for launcher tests.

use std::collections::HashMap;
use std::io;

use crate::process::launcher::{DaemonSpec, ProcessSpawner, SpawnedProcess};

/// What happens when a daemon is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnBehaviour {
    /// The daemon keeps running with the given PID.
    Running(u32),
    /// The daemon exits straight away with the given code.
    Exited(i32),
    /// The program cannot be executed.
    Unspawnable,
}

/// Spawner answering from a fixed table keyed by daemon name.
///
/// Unknown names behave as [`SpawnBehaviour::Unspawnable`].
#[derive(Debug, Default)]
pub struct FakeSpawner {
    behaviours: HashMap<&'static str, SpawnBehaviour>,
}

impl FakeSpawner {
    pub fn new(behaviours: HashMap<&'static str, SpawnBehaviour>) -> Self {
        Self { behaviours }
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, spec: &DaemonSpec) -> io::Result<Box<dyn SpawnedProcess>> {
        match self
            .behaviours
            .get(spec.name)
            .copied()
            .unwrap_or(SpawnBehaviour::Unspawnable)
        {
            SpawnBehaviour::Running(pid) => Ok(Box::new(FakeProcess {
                pid,
                exit_code: None,
            })),
            SpawnBehaviour::Exited(code) => Ok(Box::new(FakeProcess {
                pid: 0,
                exit_code: Some(code),
            })),
            SpawnBehaviour::Unspawnable => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", spec.program.display()),
            )),
        }
    }
}

struct FakeProcess {
    pid: u32,
    exit_code: Option<i32>,
}

impl SpawnedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        self.exit_code.is_none().then_some(self.pid)
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.exit_code)
    }
}
