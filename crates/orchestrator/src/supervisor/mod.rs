#![deny(unsafe_code)]

//! Process launch, tracer attachment and lifecycle control.

mod process;
mod shim;
mod spawn;
mod tracer;

pub use process::Supervisor;
pub use shim::{ShimConfig, ShimSession};
pub use spawn::compose_pid_path;

use crate::error::Error;
use std::path::Path;

/// Per-process bookkeeping kept by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredProcess {
    pub pid: u32,
    pub parent: Option<u32>,
    pub suspended: bool,
    pub tracing_active: bool,
}

impl MonitoredProcess {
    pub fn new(pid: u32, suspended: bool) -> Self {
        Self {
            pid,
            parent: None,
            suspended,
            tracing_active: false,
        }
    }
}

/// Coarse scheduling state as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
    /// Zombie, dead or no longer in the process table.
    Gone,
}

/// Queries and signals processes under observation. Shared with the event
/// channel readers, so every method takes `&self`.
pub trait ProcessControl: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;

    /// Signal the process until it is gone. Returns true if it ended.
    fn terminate(&self, pid: u32) -> bool;

    /// Continue a process that was launched or announced suspended.
    fn resume(&self, pid: u32) -> bool;

    fn process_name(&self, pid: u32) -> Option<String>;

    /// Write the shim configuration, attach the tracers and resume.
    fn start_trace(&self, pid: u32) -> Result<(), Error>;

    /// Release tracer subprocesses and other per-run resources.
    fn shutdown(&self) {}
}

/// Starts processes on behalf of launch strategies.
pub trait Launcher: Send + Sync {
    /// Fork and exec `path` with `args` as its full argv (falls back to
    /// `[path]` when empty) under library injection, then attach tracers.
    fn execute(&self, path: &Path, args: &[String], suspended: bool) -> Result<u32, Error>;

    /// Run an untraced helper to completion and return its exit code.
    fn run_helper(&self, program: &str, args: &[String]) -> Result<i32, Error>;

    fn is_running(&self, pid: u32) -> bool;

    /// Start the system-wide process creation tracer writing to `log`.
    fn start_process_tracer(&self, log: &Path) -> Result<(), Error>;
}
