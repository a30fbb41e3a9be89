use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations. Entries left unset are derived at startup, most of
/// them randomized so a sample cannot guess them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Paths {
    /// Results root. Defaults to a random directory under the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_root: Option<PathBuf>,

    /// Location of the event channel. Defaults to a random name under the
    /// system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipe: Option<PathBuf>,

    /// Directory holding the per-process `<pid>.conf` files read by the
    /// shim. Defaults to `$TMPDIR`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shim_config_dir: Option<PathBuf>,

    /// Directory the shim copies captured files into. Defaults to
    /// `$HOME/tmp`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_dir: Option<PathBuf>,

    /// Directory the sample is dropped into by the host.
    pub sample_dir: PathBuf,

    /// Interposition library injected into launched processes. Relative
    /// paths are resolved against `analyzer_dir`.
    pub shim_library: PathBuf,

    /// Analyzer installation directory. Defaults to the working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer_dir: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            results_root: None,
            pipe: None,
            shim_config_dir: None,
            capture_dir: None,
            sample_dir: PathBuf::from("/tmp"),
            shim_library: PathBuf::from("shim/hooks.dylib"),
            analyzer_dir: None,
        }
    }
}
