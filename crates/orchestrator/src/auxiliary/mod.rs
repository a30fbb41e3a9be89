#![forbid(unsafe_code)]

//! Best-effort background helpers that run for the whole monitoring phase.

mod bitmap;
mod human;
mod screenshots;

pub use bitmap::{Bitmap, rms_difference};
pub use human::Human;
pub use screenshots::Screenshots;

use crate::error::Error;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

pub trait Auxiliary: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<(), Error>;

    fn stop(&mut self);
}

/// Build the auxiliaries enabled in `settings`.
pub fn from_config(settings: &config::Auxiliary, shots_dir: &std::path::Path) -> Vec<Box<dyn Auxiliary>> {
    let mut modules: Vec<Box<dyn Auxiliary>> = Vec::new();
    if settings.screenshots {
        modules.push(Box::new(Screenshots::new(settings.clone(), shots_dir.to_owned())));
    }
    if settings.human {
        modules.push(Box::new(Human::new(settings.clone())));
    }
    modules
}

/// Start every module, keeping only the ones that came up.
pub fn start_all(modules: Vec<Box<dyn Auxiliary>>) -> Vec<Box<dyn Auxiliary>> {
    let mut started = Vec::with_capacity(modules.len());
    for mut module in modules {
        match module.start() {
            Ok(()) => {
                debug!(module = module.name(), "auxiliary module started");
                started.push(module);
            }
            Err(err) => warn!(module = module.name(), %err, "unable to start auxiliary module"),
        }
    }
    started
}

/// Periodic worker thread stopped through a shared flag.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(
        name: &str,
        interval: Duration,
        mut step: impl FnMut() + Send + 'static,
    ) -> Result<Self, Error> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name(format!("aux-{name}"))
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    step();
                    sleep_unless_stopped(&flag, interval);
                }
            })
            .map_err(|err| Error::Auxiliary {
                module: name.to_owned(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("auxiliary worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

/// Sleep in short slices so a stop request is honoured quickly.
fn sleep_unless_stopped(flag: &AtomicBool, total: Duration) {
    const SLICE: Duration = Duration::from_millis(50);
    let mut left = total;
    while !left.is_zero() && !flag.load(Ordering::Relaxed) {
        let step = left.min(SLICE);
        thread::sleep(step);
        left -= step;
    }
}

/// Run an external helper to completion with its output discarded.
pub(crate) fn run_tool(argv: &[String]) -> std::io::Result<bool> {
    let Some((program, args)) = argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

/// Replace `{key}` placeholders in every argument.
pub(crate) fn render(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Failing;

    impl Auxiliary for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn start(&mut self) -> Result<(), Error> {
            Err(Error::Auxiliary {
                module: "failing".into(),
                reason: "no display".into(),
            })
        }

        fn stop(&mut self) {}
    }

    struct Quiet;

    impl Auxiliary for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn start(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn failed_modules_are_left_out() {
        let started = start_all(vec![Box::new(Failing), Box::new(Quiet)]);
        let names: Vec<_> = started.iter().map(|m| m.name().to_owned()).collect();
        assert_eq!(names, ["quiet"]);
    }

    #[test]
    fn worker_runs_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut worker = Worker::spawn("count", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(60));
        worker.stop();
        let after_stop = count.load(Ordering::Relaxed);
        assert!(after_stop >= 1);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
    }

    #[test]
    fn placeholders_are_rendered() {
        let template = vec!["cliclick".to_owned(), "{action}:{x},{y}".to_owned()];
        assert_eq!(
            render(&template, &[("action", "c"), ("x", "640"), ("y", "250")]),
            ["cliclick", "c:640,250"]
        );
    }

    #[test]
    fn config_toggles_select_modules() {
        let settings = config::Auxiliary {
            screenshots: false,
            ..Default::default()
        };
        let modules = from_config(&settings, std::path::Path::new("/tmp"));
        let names: Vec<_> = modules.iter().map(|m| m.name().to_owned()).collect();
        assert_eq!(names, ["human"]);
    }
}
