use super::{CompletionReport, Controller};
use crate::error::Error;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Offline controller: artifacts are copied below a local directory and
/// the completion report is written next to them as `completion.json`.
#[derive(Debug, Clone)]
pub struct DirectoryController {
    root: PathBuf,
}

impl DirectoryController {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Controller for DirectoryController {
    async fn upload(&self, source: &Path, upload_path: &str) -> Result<(), Error> {
        let failed = |err: std::io::Error| Error::Upload {
            path: source.to_owned(),
            reason: err.to_string(),
        };
        let destination = self.root.join(upload_path);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(failed)?;
        }
        tokio::fs::copy(source, &destination).await.map_err(failed)?;
        Ok(())
    }

    async fn complete(&self, report: &CompletionReport) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(report)
            .map_err(|err| Error::Controller(err.to_string()))?;
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join("completion.json");
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), "completion report written");
        Ok(())
    }
}
