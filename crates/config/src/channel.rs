use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Channel {
    /// Upper bound on concurrently running reader threads.
    pub max_readers: usize,

    /// How long buffered bytes keep being drained on shutdown. **Measured
    /// in seconds**.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub drain_deadline: Duration,

    /// Poll interval of the listener when the channel is idle. **Measured
    /// in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub idle_sleep: Duration,

    /// Poll interval while draining. **Measured in milliseconds**.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub drain_poll: Duration,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            max_readers: 20,
            drain_deadline: Duration::from_secs(30),
            idle_sleep: Duration::from_millis(50),
            drain_poll: Duration::from_millis(500),
        }
    }
}
