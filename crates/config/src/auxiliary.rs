use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

/// Background helpers that run next to the strategy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Auxiliary {
    /// Periodically capture the screen.
    pub screenshots: bool,

    /// Simulate a user moving the mouse and clicking.
    pub human: bool,

    /// Delay between two captures. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub screenshot_interval: Duration,

    /// Root-mean-square pixel difference below which two captures are
    /// considered identical and the newer one is dropped.
    pub screenshot_threshold: f64,

    /// Delay between two simulated interactions. **Measured in
    /// milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub human_interval: Duration,

    /// Screen geometry used for pointer coordinates.
    pub screen_width: u32,
    pub screen_height: u32,

    /// Capture command. `{path}` is replaced by the output file, which must
    /// be written as an uncompressed BMP.
    pub capture_command: Vec<String>,

    /// Command that presses Return to dismiss dialogs before a capture.
    pub keystroke_command: Vec<String>,

    /// Pointer command. `{action}` is `m` (move) or `c` (click), `{x}` and
    /// `{y}` are the coordinates.
    pub pointer_command: Vec<String>,
}

impl Default for Auxiliary {
    fn default() -> Self {
        let argv = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            screenshots: true,
            human: true,
            screenshot_interval: Duration::from_secs(1),
            screenshot_threshold: 50.0,
            human_interval: Duration::from_secs(1),
            screen_width: 1280,
            screen_height: 800,
            capture_command: argv(&["screencapture", "-x", "-t", "bmp", "{path}"]),
            keystroke_command: argv(&[
                "osascript",
                "-e",
                "tell application \"System Events\" to key code 36",
            ]),
            pointer_command: argv(&["cliclick", "{action}:{x},{y}"]),
        }
    }
}
