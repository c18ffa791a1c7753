//! Binary entry point for the cluster supervisor.
//!
//! Locks standard output once and hands it to [`clusterd::run`], which
//! prints the version banner and the foreground start notice through it.

use std::io::{self, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    clusterd::run(&mut stdout)
}
