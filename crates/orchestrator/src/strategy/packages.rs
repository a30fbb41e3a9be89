use super::bundle::{OPEN, app_executable, find_dir};
use super::{Strategy, StrategyContext};
use crate::domain::TraceTarget;
use crate::error::Error;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const READY_POLL: Duration = Duration::from_millis(200);

pub(super) fn file_target<'a>(package: &str, target: &'a TraceTarget) -> Result<&'a Path, Error> {
    target
        .path()
        .ok_or_else(|| Error::strategy(package, format!("expects a file target, got {target}")))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Runs the sample itself.
#[derive(Debug)]
pub struct MachO {
    ctx: StrategyContext,
}

impl MachO {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }
}

impl Strategy for MachO {
    fn name(&self) -> &str {
        "macho"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let path = file_target(self.name(), target)?;
        let mut argv = vec![path_arg(path)];
        if let Some(arguments) = self.ctx.option("arguments") {
            argv.extend(arguments.split_whitespace().map(str::to_owned));
        }
        Ok(vec![self.ctx.launcher.execute(path, &argv, true)?])
    }
}

/// Hands the target to the system opener.
#[derive(Debug)]
pub struct Generic {
    ctx: StrategyContext,
}

impl Generic {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }
}

impl Strategy for Generic {
    fn name(&self) -> &str {
        "generic"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let argv = vec![OPEN.to_owned(), target.as_argument()];
        Ok(vec![self.ctx.launcher.execute(Path::new(OPEN), &argv, true)?])
    }
}

/// Runs a script with the system interpreter.
#[derive(Debug)]
pub struct Python {
    ctx: StrategyContext,
    interpreter: PathBuf,
}

impl Python {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            interpreter: PathBuf::from("/usr/bin/python"),
        }
    }
}

impl Strategy for Python {
    fn name(&self) -> &str {
        "python"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let path = file_target(self.name(), target)?;
        if !self.interpreter.is_file() {
            error!(interpreter = %self.interpreter.display(), "python interpreter not found");
            return Ok(Vec::new());
        }
        let mut argv = vec![path_arg(&self.interpreter), path_arg(path)];
        if let Some(arguments) = self.ctx.option("arguments") {
            argv.push(arguments.to_owned());
        }
        Ok(vec![self.ctx.launcher.execute(&self.interpreter, &argv, true)?])
    }
}

/// Runs a Java archive, optionally with an explicit main class.
#[derive(Debug)]
pub struct Jar {
    ctx: StrategyContext,
    java: PathBuf,
}

impl Jar {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            java: PathBuf::from("/usr/bin/java"),
        }
    }
}

impl Strategy for Jar {
    fn name(&self) -> &str {
        "jar"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let path = file_target(self.name(), target)?;
        if !self.java.is_file() {
            error!(java = %self.java.display(), "no Java runtime installed");
            return Ok(Vec::new());
        }
        let java = path_arg(&self.java);
        let argv = match self.ctx.option("class") {
            Some(class) => vec![java, "-cp".into(), path_arg(path), class.to_owned()],
            None => vec![java, "-jar".into(), path_arg(path)],
        };
        Ok(vec![self.ctx.launcher.execute(&self.java, &argv, true)?])
    }
}

/// Opens a page in the browser, fixing up a missing extension first.
#[derive(Debug)]
pub struct Html {
    ctx: StrategyContext,
}

impl Html {
    pub fn new(ctx: StrategyContext) -> Self {
        Self { ctx }
    }
}

impl Strategy for Html {
    fn name(&self) -> &str {
        "html"
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let mut path = file_target(self.name(), target)?.to_path_buf();
        let lower = path.to_string_lossy().to_lowercase();
        if !(lower.ends_with(".htm") || lower.ends_with(".html")) {
            let mut renamed = path.clone().into_os_string();
            renamed.push(".html");
            let renamed = PathBuf::from(renamed);
            std::fs::copy(&path, &renamed).map_err(|err| Error::strategy(self.name(), err))?;
            info!(path = %renamed.display(), "added missing .html extension");
            path = renamed;
        }

        let bundle = self.ctx.applications_dir.join("Safari.app");
        let browser = app_executable(&bundle).unwrap_or_else(|| PathBuf::from(OPEN));
        let argv = vec![path_arg(&browser), path_arg(&path)];
        Ok(vec![self.ctx.launcher.execute(&browser, &argv, true)?])
    }
}

type ViewerList = fn(&Path) -> Vec<(PathBuf, &'static str)>;

/// Starts a viewer application, then hands it the document through the
/// system opener once it is up.
#[derive(Debug)]
pub struct AppDocument {
    ctx: StrategyContext,
    package: &'static str,
    viewers: ViewerList,
    clear_quarantine: bool,
}

impl AppDocument {
    pub fn pdf(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            package: "pdf",
            viewers: |apps| vec![(apps.join("Preview.app"), "Preview")],
            clear_quarantine: true,
        }
    }

    pub fn rtf(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            package: "rtf",
            viewers: |apps| vec![(apps.join("TextEdit.app"), "TextEdit")],
            clear_quarantine: false,
        }
    }

    /// Word if installed, then Pages, then TextEdit.
    pub fn doc(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            package: "doc",
            viewers: |apps| {
                let mut viewers = Vec::new();
                if let Some(office) = find_dir(apps, "Microsoft Office") {
                    viewers.push((office.join("Microsoft Word.app"), "Microsoft Word"));
                }
                if let Some(pages) = find_dir(apps, "Pages") {
                    viewers.push((pages, "Pages"));
                }
                viewers.push((apps.join("TextEdit.app"), "TextEdit"));
                viewers
            },
            clear_quarantine: false,
        }
    }

    pub fn safari(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            package: "safari",
            viewers: |apps| vec![(apps.join("Safari.app"), "Safari")],
            clear_quarantine: false,
        }
    }

    fn viewer(&self) -> Option<(PathBuf, &'static str)> {
        let viewers = (self.viewers)(&self.ctx.applications_dir);
        let fallback = viewers.last().cloned();
        viewers
            .into_iter()
            .find(|(bundle, _)| bundle.is_dir())
            .or(fallback)
    }

    /// Downloaded documents carry a quarantine attribute that makes the
    /// viewer refuse to open them.
    fn release_quarantine(&self, path: &Path) {
        if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)) {
            warn!(path = %path.display(), %err, "unable to relax document permissions");
        }
        match self
            .ctx
            .launcher
            .run_helper("xattr", &["-c".to_owned(), path_arg(path)])
        {
            Ok(0) => {}
            Ok(code) => warn!(path = %path.display(), code, "xattr exited with failure"),
            Err(err) => warn!(path = %path.display(), %err, "unable to clear extended attributes"),
        }
    }

    fn wait_ready(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.ctx.app_ready_timeout;
        loop {
            if self.ctx.launcher.is_running(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(READY_POLL);
        }
    }
}

impl Strategy for AppDocument {
    fn name(&self) -> &str {
        self.package
    }

    fn start(&mut self, target: &TraceTarget) -> Result<Vec<u32>, Error> {
        let document = target.as_argument();
        let (bundle, app) = self
            .viewer()
            .ok_or_else(|| Error::strategy(self.package, "no viewer application configured"))?;

        if self.clear_quarantine {
            if let Some(path) = target.path() {
                self.release_quarantine(path);
            }
        }

        let open_args = vec!["-a".to_owned(), app.to_owned(), document];
        let Some(executable) = app_executable(&bundle) else {
            warn!(bundle = %bundle.display(), app, "viewer bundle unusable, using the system opener");
            let mut argv = vec![OPEN.to_owned()];
            argv.extend(open_args);
            return Ok(vec![self.ctx.launcher.execute(Path::new(OPEN), &argv, true)?]);
        };

        let pid = self
            .ctx
            .launcher
            .execute(&executable, &[path_arg(&executable)], true)?;
        if !self.wait_ready(pid) {
            warn!(pid, app, "viewer did not come up before handing it the document");
        }
        match self.ctx.launcher.run_helper(OPEN, &open_args) {
            Ok(0) => info!(pid, app, "document handed to viewer"),
            Ok(code) => warn!(pid, app, code, "opener exited with failure"),
            Err(err) => return Err(Error::strategy(self.package, err)),
        }
        Ok(vec![pid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::bundle::fixtures::app_bundle;
    use crate::strategy::testing::{RecordingLauncher, argv};
    use config::Options;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn context(launcher: &Arc<RecordingLauncher>, apps: &Path, options: &str) -> StrategyContext {
        StrategyContext {
            applications_dir: apps.to_owned(),
            app_ready_timeout: Duration::from_millis(50),
            ..StrategyContext::new(launcher.clone(), Options::parse(options))
        }
    }

    #[test]
    fn macho_runs_sample_with_arguments() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = MachO::new(context(&launcher, Path::new("/nowhere"), "arguments=-v --fast"));
        let pids = strategy
            .start(&TraceTarget::File("/tmp/sample".into()))
            .unwrap();
        assert_eq!(pids, [1000]);
        assert_eq!(
            launcher.executed(),
            [(PathBuf::from("/tmp/sample"), argv(&["/tmp/sample", "-v", "--fast"]))]
        );
    }

    #[test]
    fn macho_rejects_url_targets() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = MachO::new(context(&launcher, Path::new("/nowhere"), ""));
        let err = strategy
            .start(&TraceTarget::Url("http://example.test".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Strategy { .. }));
    }

    #[test]
    fn generic_uses_system_opener() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = Generic::new(context(&launcher, Path::new("/nowhere"), ""));
        strategy.start(&TraceTarget::File("/tmp/a.txt".into())).unwrap();
        assert_eq!(
            launcher.executed(),
            [(PathBuf::from(OPEN), argv(&[OPEN, "/tmp/a.txt"]))]
        );
    }

    #[test]
    fn missing_interpreter_yields_no_pids() {
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = Jar::new(context(&launcher, Path::new("/nowhere"), ""));
        strategy.java = PathBuf::from("/nonexistent/java");
        assert!(strategy.start(&TraceTarget::File("/tmp/a.jar".into())).unwrap().is_empty());
        assert!(launcher.executed().is_empty());
    }

    #[test]
    fn jar_with_class_uses_classpath() {
        let dir = tempdir().unwrap();
        let java = dir.path().join("java");
        std::fs::write(&java, b"").unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = Jar::new(context(&launcher, dir.path(), "class=com.example.Main"));
        strategy.java = java.clone();
        strategy.start(&TraceTarget::File("/tmp/a.jar".into())).unwrap();
        let (_, argv) = &launcher.executed()[0];
        assert_eq!(argv[1..], ["-cp", "/tmp/a.jar", "com.example.Main"]);
    }

    #[test]
    fn html_without_extension_is_copied() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("d41d8cd9");
        std::fs::write(&page, b"<html></html>").unwrap();
        let apps = dir.path().join("Applications");
        let bundle = app_bundle(&apps, "Safari", "Safari");

        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = Html::new(context(&launcher, &apps, ""));
        strategy.start(&TraceTarget::File(page.clone())).unwrap();

        let renamed = dir.path().join("d41d8cd9.html");
        assert!(renamed.is_file());
        let executable = bundle.join("Contents/MacOS/Safari");
        assert_eq!(
            launcher.executed(),
            [(executable.clone(), vec![path_arg(&executable), path_arg(&renamed)])]
        );
    }

    #[test]
    fn pdf_starts_viewer_then_opens_document() {
        let dir = tempdir().unwrap();
        let apps = dir.path().join("Applications");
        let bundle = app_bundle(&apps, "Preview", "Preview");
        let document = dir.path().join("invoice.pdf");
        std::fs::write(&document, b"%PDF-1.4").unwrap();

        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = AppDocument::pdf(context(&launcher, &apps, ""));
        let pids = strategy.start(&TraceTarget::File(document.clone())).unwrap();

        assert_eq!(pids, [1000]);
        assert_eq!(launcher.executed()[0].0, bundle.join("Contents/MacOS/Preview"));
        let helpers = launcher.helpers();
        let document = path_arg(&document);
        assert_eq!(helpers[0], ("xattr".to_owned(), argv(&["-c", &document])));
        assert_eq!(helpers[1], (OPEN.to_owned(), argv(&["-a", "Preview", &document])));
    }

    #[test]
    fn doc_falls_back_to_textedit() {
        let dir = tempdir().unwrap();
        let apps = dir.path().join("Applications");
        app_bundle(&apps, "TextEdit", "TextEdit");
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = AppDocument::doc(context(&launcher, &apps, ""));
        strategy.start(&TraceTarget::File("/tmp/letter.doc".into())).unwrap();
        assert_eq!(
            launcher.helpers(),
            [(OPEN.to_owned(), argv(&["-a", "TextEdit", "/tmp/letter.doc"]))]
        );
    }

    #[test]
    fn safari_opens_url_through_opener_without_bundle() {
        let dir = tempdir().unwrap();
        let launcher = Arc::new(RecordingLauncher::default());
        let mut strategy = AppDocument::safari(context(&launcher, dir.path(), ""));
        strategy
            .start(&TraceTarget::Url("http://example.test/".into()))
            .unwrap();
        assert_eq!(
            launcher.executed(),
            [(
                PathBuf::from(OPEN),
                argv(&[OPEN, "-a", "Safari", "http://example.test/"])
            )]
        );
    }
}
