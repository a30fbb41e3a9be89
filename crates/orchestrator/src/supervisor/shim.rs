use crate::layout::RunLayout;
use rand::Rng;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// 20 minutes, in milliseconds.
const STARTUP_STEP_MS: u64 = 20 * 60 * 1000;

/// Run-wide state shared by every shim configuration of one analysis.
///
/// The first process of a run picks a fake uptime offset (1 to 30 steps of
/// twenty minutes); later processes reuse it.
#[derive(Debug, Default)]
pub struct ShimSession {
    first_taken: AtomicBool,
    startup_offset: OnceLock<u64>,
}

impl ShimSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether this is the first process and the startup offset.
    pub fn next(&self) -> (bool, u64) {
        let first = !self.first_taken.swap(true, Ordering::AcqRel);
        let offset = *self
            .startup_offset
            .get_or_init(|| rand::rng().random_range(1..=30u64) * STARTUP_STEP_MS);
        (first, offset)
    }
}

/// Key/value file read by the injected library at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    pub host_ip: String,
    pub host_port: u16,
    pub pipe: PathBuf,
    pub results: PathBuf,
    pub analyzer: PathBuf,
    pub first_process: bool,
    pub startup_time: u64,
    pub shutdown_mutex: String,
}

impl ShimConfig {
    pub fn for_run(
        controller: &config::Controller,
        layout: &RunLayout,
        session: &ShimSession,
    ) -> Self {
        let (first_process, startup_time) = session.next();
        Self {
            host_ip: controller.host_ip.clone(),
            host_port: controller.host_port,
            pipe: layout.pipe.clone(),
            results: layout.drop.clone(),
            analyzer: layout.analyzer_dir.clone(),
            first_process,
            startup_time,
            shutdown_mutex: layout.shutdown_token.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "host-ip={}", self.host_ip);
        let _ = writeln!(out, "host-port={}", self.host_port);
        let _ = writeln!(out, "pipe={}", self.pipe.display());
        // The shim concatenates file names onto this value.
        let _ = writeln!(out, "results={}/", self.results.display());
        let _ = writeln!(out, "analyzer={}", self.analyzer.display());
        let _ = writeln!(out, "first-process={}", u8::from(self.first_process));
        let _ = writeln!(out, "startup-time={}", self.startup_time);
        let _ = writeln!(out, "shutdown-mutex={}", self.shutdown_mutex);
        out
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}
