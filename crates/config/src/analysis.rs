use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// What kind of target the run is pointed at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A sample file dropped next to the analyzer.
    #[default]
    File,
    /// A URL handed to a browser strategy.
    Url,
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "url" => Ok(Self::Url),
            other => Err(Error::InvalidCategory(other.to_owned())),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Analysis {
    /// Whether the target is a file or a URL.
    pub category: Category,

    /// For URL runs, the URL itself. For file runs, an explicit sample path
    /// that takes precedence over `file_name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Name of the sample, resolved against `paths.sample_dir`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Content-type description of the sample as reported by the host,
    /// e.g. `Mach-O 64-bit executable x86_64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    /// Explicit strategy name. When absent the strategy is picked from
    /// `file_type` and `file_name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Raw strategy options in `key=value,key2=value2` form.
    pub options: String,

    /// Number of monitoring ticks before the run is ended.
    pub timeout: u64,

    /// Length of one monitoring tick. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub tick: Duration,

    /// Whether the run keeps going until the timeout even after every
    /// monitored process has exited.
    pub enforce_timeout: bool,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            category: Category::File,
            target: None,
            file_name: None,
            file_type: None,
            package: None,
            options: String::new(),
            timeout: 120,
            tick: Duration::from_secs(1),
            enforce_timeout: false,
        }
    }
}

impl Analysis {
    pub fn parsed_options(&self) -> Options {
        Options::parse(&self.options)
    }
}

/// Strategy options parsed out of the comma separated `key=value` string.
///
/// Fields that are not of the `key=value` shape are kept in `rejected`
/// so the caller can report them, the rest of the string is still used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub values: BTreeMap<String, String>,
    pub rejected: Vec<String>,
}

impl Options {
    pub fn parse(raw: &str) -> Self {
        let mut options = Self::default();
        for field in raw.split(',') {
            if field.trim().is_empty() {
                continue;
            }
            match field.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    options
                        .values
                        .insert(key.trim().to_owned(), value.trim().to_owned());
                }
                _ => options.rejected.push(field.to_owned()),
            }
        }
        options
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}
