#![forbid(unsafe_code)]

use config::Paths;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Random lowercase alphanumeric name with a length in `min..=max`.
pub fn random_name(min: usize, max: usize) -> String {
    let mut rng = rand::rng();
    let len = rng.random_range(min..=max);
    (&mut rng)
        .sample_iter(Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Per-process log files written by the tracers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLog {
    SystemCalls,
    ApiCalls,
}

impl ProcessLog {
    fn prefix(self) -> &'static str {
        match self {
            Self::SystemCalls => "system_calls",
            Self::ApiCalls => "api_calls",
        }
    }
}

/// Concrete locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub logs: PathBuf,
    pub files: PathBuf,
    pub shots: PathBuf,
    pub memory: PathBuf,
    pub drop: PathBuf,
    pub pipe: PathBuf,
    pub shim_config_dir: PathBuf,
    pub capture_dir: PathBuf,
    pub sample_dir: PathBuf,
    pub analyzer_dir: PathBuf,
    pub shim_library: PathBuf,
    /// Name of the shutdown rendezvous handed to the shim.
    pub shutdown_token: String,
}

impl RunLayout {
    /// Fill every unset location. Unset results root and channel path get
    /// random names so the sample cannot predict them.
    pub fn resolve(paths: &Paths) -> Self {
        let temp = std::env::temp_dir();
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| temp.clone());
        let root = paths
            .results_root
            .clone()
            .unwrap_or_else(|| home.join(random_name(6, 10)));
        let pipe = paths
            .pipe
            .clone()
            .unwrap_or_else(|| temp.join(random_name(6, 10)));
        let shim_config_dir = paths.shim_config_dir.clone().unwrap_or_else(|| temp.clone());
        let capture_dir = paths
            .capture_dir
            .clone()
            .unwrap_or_else(|| home.join("tmp"));
        let analyzer_dir = paths
            .analyzer_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let shim_library = analyzer_dir.join(&paths.shim_library);

        Self::with_root(
            root,
            pipe,
            shim_config_dir,
            capture_dir,
            paths.sample_dir.clone(),
            analyzer_dir,
            shim_library,
        )
    }

    fn with_root(
        root: PathBuf,
        pipe: PathBuf,
        shim_config_dir: PathBuf,
        capture_dir: PathBuf,
        sample_dir: PathBuf,
        analyzer_dir: PathBuf,
        shim_library: PathBuf,
    ) -> Self {
        Self {
            logs: root.join("logs"),
            files: root.join("files"),
            shots: root.join("shots"),
            memory: root.join("memory"),
            drop: root.join("drop"),
            root,
            pipe,
            shim_config_dir,
            capture_dir,
            sample_dir,
            analyzer_dir,
            shim_library,
            shutdown_token: format!("Global/{}", random_name(6, 10)),
        }
    }

    /// Layout with everything below one directory. Used by tests and
    /// offline runs.
    pub fn under(base: &Path) -> Self {
        Self::with_root(
            base.join("results"),
            base.join("channel"),
            base.join("shim"),
            base.join("capture"),
            base.join("samples"),
            base.to_owned(),
            base.join("hooks.dylib"),
        )
    }

    pub fn folders(&self) -> [&Path; 6] {
        [
            &self.root,
            &self.logs,
            &self.files,
            &self.shots,
            &self.memory,
            &self.drop,
        ]
    }

    /// Creation failures are logged and skipped.
    pub fn create_folders(&self) {
        for folder in self.folders() {
            match std::fs::create_dir_all(folder) {
                Ok(()) => debug!(folder = %folder.display(), "results folder ready"),
                Err(err) => warn!(folder = %folder.display(), %err, "unable to create results folder"),
            }
        }
    }

    pub fn process_log(&self, kind: ProcessLog, pid: u32) -> PathBuf {
        self.logs.join(format!("{}_{pid}.log", kind.prefix()))
    }

    /// [`Self::process_log`] up to, not including, the pid.
    pub fn process_log_prefix(&self, kind: ProcessLog) -> PathBuf {
        self.logs.join(format!("{}_", kind.prefix()))
    }

    pub fn shim_config(&self, pid: u32) -> PathBuf {
        self.shim_config_dir.join(format!("{pid}.conf"))
    }
}
