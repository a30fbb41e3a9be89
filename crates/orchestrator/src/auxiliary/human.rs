use super::{Auxiliary, Worker, render, run_tool};
use crate::error::Error;
use rand::Rng;
use tracing::debug;

/// Pointer action sent to the input tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gesture {
    Move { x: u32, y: u32 },
    Click { x: u32, y: u32 },
}

impl Gesture {
    pub(crate) fn argv(self, template: &[String]) -> Vec<String> {
        let (action, x, y) = match self {
            Self::Move { x, y } => ("m", x, y),
            Self::Click { x, y } => ("c", x, y),
        };
        let (x, y) = (x.to_string(), y.to_string());
        render(template, &[("action", action), ("x", x.as_str()), ("y", y.as_str())])
    }
}

/// One round of simulated activity: wander somewhere, then click near the
/// top middle where dialogs usually put their buttons.
pub(crate) fn gestures(width: u32, height: u32, rng: &mut impl Rng) -> [Gesture; 2] {
    [
        Gesture::Move {
            x: rng.random_range(0..=width),
            y: rng.random_range(0..=height),
        },
        Gesture::Click {
            x: width / 2,
            y: 250.min(height),
        },
    ]
}

/// Moves and clicks the pointer so the session does not look idle.
#[derive(Debug)]
pub struct Human {
    settings: config::Auxiliary,
    worker: Option<Worker>,
}

impl Human {
    pub fn new(settings: config::Auxiliary) -> Self {
        Self {
            settings,
            worker: None,
        }
    }
}

impl Auxiliary for Human {
    fn name(&self) -> &str {
        "human"
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.settings.pointer_command.is_empty() {
            return Err(Error::Auxiliary {
                module: "human".into(),
                reason: "no pointer command configured".into(),
            });
        }
        let template = self.settings.pointer_command.clone();
        let (width, height) = (self.settings.screen_width, self.settings.screen_height);
        self.worker = Some(Worker::spawn(
            "human",
            self.settings.human_interval,
            move || {
                for gesture in gestures(width, height, &mut rand::rng()) {
                    if let Err(err) = run_tool(&gesture.argv(&template)) {
                        debug!(?gesture, %err, "pointer command failed");
                    }
                }
            },
        )?);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }
}
