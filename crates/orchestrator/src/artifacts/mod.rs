#![forbid(unsafe_code)]

//! Transfer of result files to the controller and the final completion
//! report.

mod directory;
mod netlog;

pub use directory::DirectoryController;
pub use netlog::NetlogController;

use crate::domain::ArtifactRecord;
use crate::error::Error;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use walkdir::WalkDir;

const HASH_BUFSIZE: usize = 1024 * 1024;

/// Outcome of a run as handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    pub success: bool,
    pub error: Option<String>,
    pub root: PathBuf,
}

impl CompletionReport {
    /// Report for a run that ended with `error` before producing results.
    pub fn failed(error: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            root: root.into(),
        }
    }
}

/// Log the outcome and hand `report` to the controller. A controller
/// failure is logged, never returned.
pub async fn report_completion(controller: &dyn Controller, report: &CompletionReport) {
    if report.success {
        info!(success = true, root = %report.root.display(), "reporting completion");
    } else {
        error!(
            success = false,
            error = report.error.as_deref().unwrap_or_default(),
            root = %report.root.display(),
            "reporting completion"
        );
    }
    if let Err(err) = controller.complete(report).await {
        error!(%err, "unable to report completion");
    }
}

/// Receiver of artifacts and of the completion report.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn upload(&self, source: &Path, upload_path: &str) -> Result<(), Error>;

    async fn complete(&self, report: &CompletionReport) -> Result<(), Error>;
}

/// Per-run totals of [`ArtifactQueue::upload_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub duplicates: usize,
    pub missing: usize,
    pub failed: usize,
}

pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFSIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Files waiting to be handed to the controller.
///
/// Paths are queued at most once. Content already uploaded under another
/// path is uploaded again and reported as a duplicate.
#[derive(Debug)]
pub struct ArtifactQueue {
    logs: PathBuf,
    drop: PathBuf,
    pending: Vec<PathBuf>,
    uploaded: Vec<ArtifactRecord>,
}

impl ArtifactQueue {
    pub fn new(logs: impl Into<PathBuf>, drop: impl Into<PathBuf>) -> Self {
        Self {
            logs: logs.into(),
            drop: drop.into(),
            pending: Vec::new(),
            uploaded: Vec::new(),
        }
    }

    /// Returns false if the path was already queued.
    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.pending.contains(&path) {
            return false;
        }
        info!(path = %path.display(), "queued file for upload");
        self.pending.push(path);
        true
    }

    /// Queue every regular file below `root`.
    pub fn add_tree(&mut self, root: &Path) -> usize {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(%err, "unable to walk results folder");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.add_file(entry.path()))
            .count()
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    pub fn uploaded(&self) -> &[ArtifactRecord] {
        &self.uploaded
    }

    /// Destination of `path` on the controller side.
    pub fn upload_path(&self, path: &Path) -> String {
        let base = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.starts_with(&self.logs) {
            format!("logs/{base}")
        } else if path.starts_with(&self.drop) {
            format!("files/{base}")
        } else {
            let bucket: u64 = rand::rng().random_range(100_000_000..=9_999_999_999);
            format!("files/{bucket}/{base}")
        }
    }

    /// Upload and drain every queued file. One failure never stops the
    /// remaining uploads.
    pub async fn upload_all(&mut self, controller: &dyn Controller) -> UploadSummary {
        let mut summary = UploadSummary::default();
        for path in std::mem::take(&mut self.pending) {
            let digest = match sha256_file(&path).await {
                Ok(digest) => digest,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "file does not exist, skip");
                    summary.missing += 1;
                    continue;
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "unable to access file");
                    summary.failed += 1;
                    continue;
                }
            };
            if self.uploaded.iter().any(|record| record.digest == digest) {
                warn!(path = %path.display(), %digest, "file content duplicates an uploaded file");
                summary.duplicates += 1;
            }

            let upload_path = self.upload_path(&path);
            info!(path = %path.display(), %upload_path, "uploading file");
            match controller.upload(&path, &upload_path).await {
                Ok(()) => {
                    summary.uploaded += 1;
                    self.uploaded.push(ArtifactRecord {
                        path,
                        digest,
                        upload_path,
                    });
                }
                Err(err) => {
                    error!(path = %path.display(), %err, "unable to upload file");
                    summary.failed += 1;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Controller that remembers every call.
    #[derive(Debug, Default)]
    pub(crate) struct SpyController {
        pub(crate) uploads: Mutex<Vec<(PathBuf, String)>>,
        pub(crate) reports: Mutex<Vec<CompletionReport>>,
        pub(crate) refuse: Option<String>,
    }

    #[async_trait]
    impl Controller for SpyController {
        async fn upload(&self, source: &Path, upload_path: &str) -> Result<(), Error> {
            if self
                .refuse
                .as_deref()
                .is_some_and(|name| source.ends_with(name))
            {
                return Err(Error::Upload {
                    path: source.to_owned(),
                    reason: "refused".into(),
                });
            }
            self.uploads
                .lock()
                .unwrap()
                .push((source.to_owned(), upload_path.to_owned()));
            Ok(())
        }

        async fn complete(&self, report: &CompletionReport) -> Result<(), Error> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }
}
