use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to launch {path}: {reason}")]
    Launch { path: PathBuf, reason: String },

    #[error("Failed to create event channel at {path}: {source}")]
    ChannelCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No analysis package available for this target")]
    NoPackage,

    #[error("Unknown analysis package: {0}")]
    UnknownPackage(String),

    #[error("No analysis target configured")]
    MissingTarget,

    #[error("Package {package} failed: {reason}")]
    Strategy { package: String, reason: String },

    #[error("Auxiliary module {module} failed: {reason}")]
    Auxiliary { module: String, reason: String },

    #[error("Tracer {tracer} for pid {pid} failed: {source}")]
    Trace {
        tracer: &'static str,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload {path}: {reason}")]
    Upload { path: PathBuf, reason: String },

    #[error("Controller request failed: {0}")]
    Controller(String),

    #[error("Container inspection failed: {0}")]
    Container(#[from] container::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),

    #[error("System call failed: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn strategy(package: impl Into<String>, reason: impl ToString) -> Self {
        Self::Strategy {
            package: package.into(),
            reason: reason.to_string(),
        }
    }
}
