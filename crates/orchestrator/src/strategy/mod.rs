#![forbid(unsafe_code)]

//! Launch strategies, one per kind of target, looked up by name.

mod archive;
mod bundle;
mod packages;

pub use archive::Zip;
pub use packages::{AppDocument, Generic, Html, Jar, MachO, Python};

use crate::domain::TraceTarget;
use crate::error::Error;
use crate::supervisor::Launcher;
use config::Options;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Launch logic for one kind of target.
///
/// `start` is the only required hook. The monitoring loop calls `set_pids`
/// and `check` once per tick, and `finish` once before shutdown.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Open the target and return the pids to monitor. An empty list means
    /// the run lasts until the timeout.
    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error>;

    /// Returning false asks for the run to end.
    fn check(&mut self) -> Result<bool, Error> {
        Ok(true)
    }

    fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn set_pids(&mut self, _pids: &[u32]) {}
}

/// Everything a strategy receives at construction.
#[derive(Clone)]
pub struct StrategyContext {
    pub launcher: Arc<dyn Launcher>,
    pub options: Options,
    /// Where archives are unpacked.
    pub scratch_dir: PathBuf,
    /// Where application bundles are looked up.
    pub applications_dir: PathBuf,
    /// How long a viewer gets to come up before it is handed the document.
    pub app_ready_timeout: Duration,
}

impl StrategyContext {
    pub fn new(launcher: Arc<dyn Launcher>, options: Options) -> Self {
        Self {
            launcher,
            options,
            scratch_dir: std::env::temp_dir(),
            applications_dir: PathBuf::from("/Applications"),
            app_ready_timeout: Duration::from_secs(10),
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).filter(|value| !value.is_empty())
    }
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("options", &self.options)
            .field("scratch_dir", &self.scratch_dir)
            .field("applications_dir", &self.applications_dir)
            .finish_non_exhaustive()
    }
}

pub type StrategyFactory = Box<dyn Fn(StrategyContext) -> Box<dyn Strategy> + Send + Sync>;

/// Name to constructor table, filled at startup.
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(StrategyContext) -> Box<dyn Strategy> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, context: StrategyContext) -> Result<Box<dyn Strategy>, Error> {
        self.factories
            .get(name)
            .map(|factory| factory(context))
            .ok_or_else(|| Error::UnknownPackage(name.to_owned()))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("macho", |ctx| Box::new(MachO::new(ctx)));
        registry.register("generic", |ctx| Box::new(Generic::new(ctx)));
        registry.register("python", |ctx| Box::new(Python::new(ctx)));
        registry.register("jar", |ctx| Box::new(Jar::new(ctx)));
        registry.register("zip", |ctx| Box::new(Zip::new(ctx)));
        registry.register("html", |ctx| Box::new(Html::new(ctx)));
        registry.register("pdf", |ctx| Box::new(AppDocument::pdf(ctx)));
        registry.register("rtf", |ctx| Box::new(AppDocument::rtf(ctx)));
        registry.register("doc", |ctx| Box::new(AppDocument::doc(ctx)));
        registry.register("safari", |ctx| Box::new(AppDocument::safari(ctx)));
        registry
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Strategy name for a target from its content description and file name.
///
/// Returns `None` when there is no description and the extension is not
/// recognized either.
pub fn resolve_package(file_type: Option<&str>, file_name: &str) -> Option<&'static str> {
    let kind = file_type.unwrap_or("");
    let name = file_name.to_lowercase();
    let is = |needle: &str| kind.contains(needle);
    let ends = |suffix: &str| name.ends_with(suffix);

    if is("Mach-O") {
        Some("macho")
    } else if is("PDF") || ends(".pdf") {
        Some("pdf")
    } else if is("Microsoft Word") || is("Microsoft Office Word") || ends(".docx") || ends(".doc")
    {
        Some("doc")
    } else if is("Rich Text Format") || ends(".rtf") || is("property list") || ends(".plist") {
        Some("rtf")
    } else if is("HTML") || ends(".htm") || ends(".html") {
        Some("html")
    } else if ends(".jar") {
        Some("jar")
    } else if is("Zip") || ends(".zip") {
        Some("zip")
    } else if ends(".py") || is("Python script") {
        Some("python")
    } else if file_type.is_some_and(|kind| !kind.is_empty()) {
        Some("generic")
    } else {
        None
    }
}

/// Browser strategy used for URL targets.
pub const URL_PACKAGE: &str = "safari";
