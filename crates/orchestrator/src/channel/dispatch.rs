use crate::channel::record::{EventRecord, FileCategory};
use crate::domain::{SharedProcessSet, lock_set};
use crate::supervisor::ProcessControl;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes complete records to category logs and process discovery.
pub struct Dispatcher {
    logs: PathBuf,
    processes: SharedProcessSet,
    control: Arc<dyn ProcessControl>,
    protected: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        logs: impl Into<PathBuf>,
        processes: SharedProcessSet,
        control: Arc<dyn ProcessControl>,
        protected: Vec<String>,
    ) -> Self {
        Self {
            logs: logs.into(),
            processes,
            control,
            protected,
        }
    }

    pub fn logs(&self) -> &Path {
        &self.logs
    }

    pub fn dispatch(&self, line: &str) {
        match EventRecord::parse(line) {
            Ok(EventRecord::File { category, payload }) => self.append(category, &payload),
            Ok(EventRecord::Process(pid)) => self.announce(pid),
            Ok(EventRecord::Exec(image)) => info!(%image, "process replaced its image"),
            Err(err) => error!(%err, "dropping channel record"),
        }
    }

    fn append(&self, category: FileCategory, payload: &str) {
        let path = self.logs.join(category.log_name());
        let mut line = payload.to_owned();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        // Single write per record, readers append to these files concurrently.
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "unable to append channel record");
        }
    }

    fn announce(&self, pid: u32) {
        {
            let mut set = lock_set(&self.processes);
            if set.contains(pid) {
                return;
            }
            if !self.control.is_alive(pid) {
                debug!(pid, "announced process is already gone");
                return;
            }
            set.insert(pid);
        }

        let name = self.control.process_name(pid).unwrap_or_default();
        info!(pid, %name, "new process announced");
        if self.protected.iter().any(|protected| *protected == name) {
            info!(pid, %name, "not tracing protected process");
            return;
        }
        if let Err(err) = self.control.start_trace(pid) {
            warn!(pid, %err, "unable to trace announced process");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("logs", &self.logs)
            .field("protected", &self.protected)
            .finish_non_exhaustive()
    }
}
