use std::path::PathBuf;

/// A file that has been handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub path: PathBuf,
    /// Hex SHA-256 of the content at upload time.
    pub digest: String,
    /// Destination relative to the controller's result store.
    pub upload_path: String,
}
