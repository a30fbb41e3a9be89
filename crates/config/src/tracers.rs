use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::time::Duration;

/// External tracers and the injection environment.
///
/// Command lines are argv templates. `{pid}` is replaced by the target
/// process id, `{apis}` by `api_libraries` joined with commas and `{shim}`
/// by the path of the randomized shim copy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tracers {
    /// System-call tracer attached to every monitored process.
    pub syscall: Vec<String>,

    /// API-call tracer attached to every monitored process.
    pub api: Vec<String>,

    /// System-wide process-creation tracer started once per run.
    pub process: Vec<String>,

    /// Libraries whose exported calls the API tracer records.
    pub api_libraries: Vec<String>,

    /// Process names that are never traced even when announced.
    pub protected_processes: Vec<String>,

    /// How long to wait for a tracer log to become non-empty before giving
    /// up on it. **Measured in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub attach_timeout: Duration,

    /// Interval between attach checks. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub attach_poll: Duration,

    /// Extra environment handed to launched processes so the shim gets
    /// loaded.
    pub preload_env: BTreeMap<String, String>,
}

impl Default for Tracers {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            syscall: argv(&["dtruss", "-l", "-p", "{pid}"]),
            api: argv(&["apitrace", "-u", "{apis}", "-p", "{pid}"]),
            process: argv(&["execsnoop", "-a", "-e"]),
            api_libraries: argv(&[
                "libSystem*",
                "CoreFoundation",
                "Foundation",
                "CoreServices",
                "libgcc*",
            ]),
            protected_processes: argv(&["sleep", "kernel_task"]),
            attach_timeout: Duration::from_secs(60),
            attach_poll: Duration::from_millis(500),
            preload_env: BTreeMap::from([
                ("DYLD_FORCE_FLAT_NAMESPACE".to_owned(), "1".to_owned()),
                ("DYLD_INSERT_LIBRARIES".to_owned(), "{shim}".to_owned()),
            ]),
        }
    }
}
