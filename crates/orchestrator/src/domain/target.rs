use crate::error::Error;
use config::{Analysis, Category};
use std::fmt;
use std::path::{Path, PathBuf};

/// What the strategy is asked to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceTarget {
    File(PathBuf),
    Url(String),
}

impl TraceTarget {
    /// File targets are the explicit `target` path when one is given,
    /// otherwise `file_name` inside `sample_dir`.
    pub fn from_analysis(analysis: &Analysis, sample_dir: &Path) -> Result<Self, Error> {
        match analysis.category {
            Category::File => analysis
                .target
                .as_deref()
                .filter(|path| !path.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    analysis
                        .file_name
                        .as_deref()
                        .filter(|name| !name.is_empty())
                        .map(|name| sample_dir.join(name))
                })
                .map(Self::File)
                .ok_or(Error::MissingTarget),
            Category::Url => analysis
                .target
                .clone()
                .filter(|url| !url.is_empty())
                .map(Self::Url)
                .ok_or(Error::MissingTarget),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Url(_) => None,
        }
    }

    /// Path for files, the URL verbatim otherwise.
    pub fn as_argument(&self) -> String {
        match self {
            Self::File(path) => path.to_string_lossy().into_owned(),
            Self::Url(url) => url.clone(),
        }
    }
}

impl fmt::Display for TraceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}
