use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}: unrecognized container magic {magic:#010x}")]
    MalformedContainer { path: PathBuf, magic: u32 },

    /// A known magic followed by too few bytes. A kind of malformed
    /// container, see [`Error::is_malformed`].
    #[error("{path}: container too short to hold a header")]
    Truncated { path: PathBuf },

    #[error("{path}: no application bundle found in archive")]
    NoBundle { path: PathBuf },

    #[error("Failed to read archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to read property list: {0}")]
    Plist(#[from] plist::Error),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The input is not a decodable container, as opposed to an I/O or
    /// archive failure.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedContainer { .. } | Self::Truncated { .. })
    }
}

/// Failure while decoding one sub-structure. These never abort a parse,
/// they are rendered into the result in place of the data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("read of {len} bytes at offset {offset} runs past end of data")]
    OutOfBounds { offset: usize, len: usize },

    #[error("string at offset {0} is not NUL-terminated")]
    Unterminated(usize),

    #[error("load command size {0} is smaller than its header")]
    CommandTooSmall(u32),
}
