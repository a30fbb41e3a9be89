use super::{Auxiliary, Bitmap, Worker, render, rms_difference, run_tool};
use crate::error::Error;
use crate::layout::random_name;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Captures the screen periodically, keeping only frames that changed.
#[derive(Debug)]
pub struct Screenshots {
    settings: config::Auxiliary,
    shots_dir: PathBuf,
    worker: Option<Worker>,
}

impl Screenshots {
    pub fn new(settings: config::Auxiliary, shots_dir: PathBuf) -> Self {
        Self {
            settings,
            shots_dir,
            worker: None,
        }
    }
}

/// State carried from one capture to the next.
pub(crate) struct Recorder {
    settings: config::Auxiliary,
    shots_dir: PathBuf,
    last: Option<Bitmap>,
    kept: u32,
}

impl Recorder {
    pub(crate) fn new(settings: config::Auxiliary, shots_dir: PathBuf) -> Self {
        Self {
            settings,
            shots_dir,
            last: None,
            kept: 0,
        }
    }

    fn capture(&self) -> std::io::Result<Vec<u8>> {
        let scratch = std::env::temp_dir().join(format!("{}.bmp", random_name(6, 10)));
        let path = scratch.to_string_lossy().into_owned();
        let argv = render(&self.settings.capture_command, &[("path", path.as_str())]);
        let captured = run_tool(&argv);
        let data = std::fs::read(&scratch);
        let _ = std::fs::remove_file(&scratch);
        match captured? {
            true => data,
            false => Err(std::io::Error::other("capture command failed")),
        }
    }

    /// Store `data` if it differs enough from the last kept frame. Returns
    /// the stored path.
    pub(crate) fn offer(&mut self, data: &[u8]) -> std::io::Result<Option<PathBuf>> {
        let current = Bitmap::decode(data)?;
        if let Some(last) = &self.last {
            let distance = rms_difference(last, &current);
            if distance < self.settings.screenshot_threshold {
                debug!(distance, "screen unchanged, dropping capture");
                return Ok(None);
            }
        }

        self.kept += 1;
        let path = self.shots_dir.join(format!("{:04}.bmp", self.kept));
        std::fs::write(&path, data)?;
        self.last = Some(current);
        Ok(Some(path))
    }

    fn press_return(&self) {
        if self.settings.keystroke_command.is_empty() {
            return;
        }
        match run_tool(&self.settings.keystroke_command) {
            Ok(true) => {}
            Ok(false) => debug!("keystroke command reported failure"),
            Err(err) => debug!(%err, "unable to send keystroke"),
        }
    }

    fn step(&mut self) {
        let data = match self.capture() {
            Ok(data) => data,
            Err(err) => {
                error!(%err, "cannot take screenshot");
                return;
            }
        };
        match self.offer(&data) {
            Ok(Some(path)) => {
                debug!(path = %path.display(), "screenshot stored");
                // Installers often wait on a default button.
                self.press_return();
            }
            Ok(None) => {}
            Err(err) => warn!(%err, "unable to store screenshot"),
        }
    }
}

fn tool_available(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| {
        let program = Path::new(program);
        program.is_absolute() && program.exists()
            || std::env::var_os("PATH").is_some_and(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
            })
    })
}

impl Auxiliary for Screenshots {
    fn name(&self) -> &str {
        "screenshots"
    }

    fn start(&mut self) -> Result<(), Error> {
        let unavailable = |reason: &str| Error::Auxiliary {
            module: "screenshots".into(),
            reason: reason.to_owned(),
        };
        if !tool_available(&self.settings.capture_command) {
            return Err(unavailable("capture tool not found, screenshots are disabled"));
        }
        if !self.shots_dir.is_dir() {
            return Err(unavailable("screenshot folder does not exist"));
        }
        let mut recorder = Recorder::new(self.settings.clone(), self.shots_dir.clone());
        self.worker = Some(Worker::spawn(
            "screenshots",
            self.settings.screenshot_interval,
            move || recorder.step(),
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
