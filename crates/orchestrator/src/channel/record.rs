/// Category logs that file records are appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Activity,
    Create,
    Delete,
    Write,
}

impl FileCategory {
    pub fn log_name(self) -> &'static str {
        match self {
            Self::Activity => "file_activity.log",
            Self::Create => "file_creation.log",
            Self::Delete => "file_deletion.log",
            Self::Write => "file_writes.log",
        }
    }
}

const FILE_PREFIXES: [(&str, FileCategory); 4] = [
    ("FILE_ACTIVITY:", FileCategory::Activity),
    ("FILE_CREATE:", FileCategory::Create),
    ("FILE_DELETE:", FileCategory::Delete),
    ("FILE_WRITE:", FileCategory::Write),
];
const PROCESS_PREFIX: &str = "PROCESS:";
const EXEC_PREFIX: &str = "EXEC:";

/// Prefixes of records whose channel writes are visible in a process's own
/// system call trace.
pub const TRACED_PREFIXES: [&str; 5] = [
    "FILE_ACTIVITY:",
    "FILE_CREATE:",
    "FILE_DELETE:",
    "FILE_WRITE:",
    PROCESS_PREFIX,
];

/// One complete line received from the shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    /// Payload is kept verbatim, including its line terminator.
    File {
        category: FileCategory,
        payload: String,
    },
    /// A process announced itself.
    Process(u32),
    /// A process replaced its image.
    Exec(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("invalid pipe command: {0:?}")]
    UnknownPrefix(String),

    #[error("invalid process id in announcement: {0:?}")]
    InvalidPid(String),
}

impl EventRecord {
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        for (prefix, category) in FILE_PREFIXES {
            if let Some(payload) = line.strip_prefix(prefix) {
                return Ok(Self::File {
                    category,
                    payload: payload.to_owned(),
                });
            }
        }
        if let Some(payload) = line.strip_prefix(PROCESS_PREFIX) {
            let trimmed = payload.trim();
            return trimmed
                .parse()
                .map(Self::Process)
                .map_err(|_| RecordError::InvalidPid(trimmed.to_owned()));
        }
        if let Some(payload) = line.strip_prefix(EXEC_PREFIX) {
            return Ok(Self::Exec(payload.trim_end().to_owned()));
        }
        Err(RecordError::UnknownPrefix(line.trim_end().to_owned()))
    }
}
