use super::shim::{ShimConfig, ShimSession};
use super::spawn::{ExecPlan, fork_exec};
use super::tracer::{expand, spawn_logged, wait_nonempty};
use super::{Launcher, MonitoredProcess, ProcessControl, ProcessState};
use crate::error::Error;
use crate::layout::{ProcessLog, RunLayout, random_name};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{AccessFlags, Pid, access};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

const SIGNAL_ATTEMPTS: usize = 5;
const SIGNAL_SETTLE: Duration = Duration::from_millis(100);
const PERMISSION_ATTEMPTS: usize = 2;
const SHIM_PLACEHOLDER: &str = "{shim}";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn classify(status: Option<ProcessStatus>) -> ProcessState {
    match status {
        None | Some(ProcessStatus::Zombie) | Some(ProcessStatus::Dead) => ProcessState::Gone,
        Some(ProcessStatus::Stop) | Some(ProcessStatus::Tracing) => ProcessState::Stopped,
        Some(_) => ProcessState::Running,
    }
}

/// Launches targets under library injection and controls every process of
/// the run.
pub struct Supervisor {
    layout: RunLayout,
    controller: config::Controller,
    tracers: config::Tracers,
    session: ShimSession,
    system: Mutex<System>,
    tracked: Mutex<BTreeMap<u32, MonitoredProcess>>,
    tracer_children: Mutex<Vec<(String, Child)>>,
}

impl Supervisor {
    pub fn new(config: &config::Config, layout: RunLayout) -> Self {
        Self {
            layout,
            controller: config.controller.clone(),
            tracers: config.tracers.clone(),
            session: ShimSession::new(),
            system: Mutex::new(System::new()),
            tracked: Mutex::new(BTreeMap::new()),
            tracer_children: Mutex::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn tracked(&self, pid: u32) -> Option<MonitoredProcess> {
        lock(&self.tracked).get(&pid).copied()
    }

    pub fn state(&self, pid: u32) -> ProcessState {
        let sys_pid = sysinfo::Pid::from_u32(pid);
        let mut system = lock(&self.system);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        classify(system.process(sys_pid).map(|process| process.status()))
    }

    fn signal(pid: u32, signal: Signal) {
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(raw), signal) {
            debug!(pid, ?signal, %err, "signal delivery failed");
        }
    }

    /// Collect our own exited children so they do not linger as zombies.
    fn reap(pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        matches!(
            waitpid(Pid::from_raw(raw), Some(WaitPidFlag::WNOHANG)),
            Ok(status) if status.pid().is_some()
        )
    }

    fn make_executable(path: &Path) -> bool {
        for _ in 0..PERMISSION_ATTEMPTS {
            if access(path, AccessFlags::X_OK).is_ok() {
                return true;
            }
            if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            {
                warn!(path = %path.display(), %err, "unable to make target executable");
            }
        }
        access(path, AccessFlags::X_OK).is_ok()
    }

    /// Copy the shim under a random name so its file name cannot be matched
    /// statically. Falls back to the configured library.
    fn randomized_shim(&self) -> PathBuf {
        let original = &self.layout.shim_library;
        let dir = original
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.analyzer_dir.clone());
        let copy = dir.join(format!("{}.dylib", random_name(6, 6)));
        match std::fs::copy(original, &copy) {
            Ok(_) => copy,
            Err(err) => {
                debug!(shim = %original.display(), %err, "using shim under its original name");
                original.clone()
            }
        }
    }

    fn injection_env(&self) -> BTreeMap<String, String> {
        let needs_shim = self
            .tracers
            .preload_env
            .values()
            .any(|value| value.contains(SHIM_PLACEHOLDER));
        let shim = if needs_shim {
            self.randomized_shim().display().to_string()
        } else {
            String::new()
        };
        self.tracers
            .preload_env
            .iter()
            .map(|(key, value)| (key.clone(), value.replace(SHIM_PLACEHOLDER, &shim)))
            .collect()
    }

    /// Start one per-process tracer and wait for its first output.
    fn attach(&self, tracer: &'static str, template: &[String], kind: ProcessLog, pid: u32) -> bool {
        let pid_text = pid.to_string();
        let apis = self.tracers.api_libraries.join(",");
        let argv = expand(template, &[("pid", &pid_text), ("apis", &apis)]);
        let log = self.layout.process_log(kind, pid);

        match spawn_logged(&argv, &log) {
            Ok(child) => {
                info!(pid, tracer, log = %log.display(), "tracer started");
                lock(&self.tracer_children).push((format!("{tracer}:{pid}"), child));
            }
            Err(source) => {
                let err = Error::Trace { tracer, pid, source };
                warn!(%err, "tracer did not start");
                return false;
            }
        }

        if wait_nonempty(&log, self.tracers.attach_timeout, self.tracers.attach_poll) {
            true
        } else {
            warn!(
                pid,
                tracer,
                timeout = ?self.tracers.attach_timeout,
                "tracer produced no output before the attach timeout"
            );
            false
        }
    }
}

impl ProcessControl for Supervisor {
    fn is_alive(&self, pid: u32) -> bool {
        if self.state(pid) != ProcessState::Gone {
            return true;
        }
        let own = std::process::id();
        let mut tracked = lock(&self.tracked);
        if tracked.get(&pid).is_some_and(|p| p.parent == Some(own)) {
            tracked.remove(&pid);
            if Self::reap(pid) {
                debug!(pid, "reaped exited target");
            }
        }
        false
    }

    fn terminate(&self, pid: u32) -> bool {
        for attempt in 1..=SIGNAL_ATTEMPTS {
            let state = self.state(pid);
            if state == ProcessState::Gone {
                break;
            }
            let signal = if attempt == SIGNAL_ATTEMPTS {
                Signal::SIGKILL
            } else {
                Signal::SIGTERM
            };
            debug!(pid, attempt, ?signal, "terminating process");
            Self::signal(pid, signal);
            if state == ProcessState::Stopped {
                Self::signal(pid, Signal::SIGCONT);
            }
            std::thread::sleep(SIGNAL_SETTLE);
            Self::reap(pid);
        }

        if self.state(pid) == ProcessState::Gone {
            lock(&self.tracked).remove(&pid);
            info!(pid, "process terminated");
            true
        } else {
            error!(pid, "failed to terminate process");
            false
        }
    }

    fn resume(&self, pid: u32) -> bool {
        let suspended = lock(&self.tracked).get(&pid).is_some_and(|p| p.suspended);
        if !suspended {
            warn!(pid, "process was not suspended, not resuming");
            return false;
        }

        for attempt in 1..=SIGNAL_ATTEMPTS {
            if self.state(pid) != ProcessState::Stopped {
                break;
            }
            debug!(pid, attempt, "resuming process");
            Self::signal(pid, Signal::SIGCONT);
            std::thread::sleep(SIGNAL_SETTLE);
        }

        if self.state(pid) == ProcessState::Running {
            if let Some(process) = lock(&self.tracked).get_mut(&pid) {
                process.suspended = false;
            }
            info!(pid, "process resumed");
            true
        } else {
            error!(pid, "failed to resume process");
            false
        }
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let sys_pid = sysinfo::Pid::from_u32(pid);
        let mut system = lock(&self.system);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        system
            .process(sys_pid)
            .map(|process| process.name().to_string_lossy().into_owned())
    }

    fn start_trace(&self, pid: u32) -> Result<(), Error> {
        lock(&self.tracked)
            .entry(pid)
            .or_insert_with(|| MonitoredProcess::new(pid, true));

        let shim_path = self.layout.shim_config(pid);
        info!(pid, path = %shim_path.display(), "writing shim configuration");
        ShimConfig::for_run(&self.controller, &self.layout, &self.session).write(&shim_path)?;

        let syscalls = self.attach("syscall", &self.tracers.syscall, ProcessLog::SystemCalls, pid);
        let apis = self.attach("api", &self.tracers.api, ProcessLog::ApiCalls, pid);

        if let Some(process) = lock(&self.tracked).get_mut(&pid) {
            process.tracing_active = syscalls && apis;
        }
        self.resume(pid);
        Ok(())
    }

    fn shutdown(&self) {
        let mut children = lock(&self.tracer_children);
        for (name, mut child) in children.drain(..) {
            if let Err(err) = child.kill() {
                debug!(tracer = %name, %err, "tracer already exited");
            }
            let _ = child.wait();
        }
    }
}

impl Launcher for Supervisor {
    fn execute(&self, path: &Path, args: &[String], suspended: bool) -> Result<u32, Error> {
        let launch_error = |reason: &str| Error::Launch {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        if access(path, AccessFlags::R_OK).is_err() {
            return Err(launch_error("target is not readable"));
        }
        if !Self::make_executable(path) {
            return Err(launch_error("no permission to execute target"));
        }

        let plan = ExecPlan::new(
            path,
            args,
            &self.injection_env(),
            &self.layout.process_log_prefix(ProcessLog::ApiCalls),
        )?;
        let pid = fork_exec(&plan)?;
        lock(&self.tracked).insert(
            pid,
            MonitoredProcess {
                parent: Some(std::process::id()),
                ..MonitoredProcess::new(pid, suspended)
            },
        );
        info!(pid, path = %path.display(), ?args, "launched target");

        self.start_trace(pid)?;
        Ok(pid)
    }

    fn run_helper(&self, program: &str, args: &[String]) -> Result<i32, Error> {
        debug!(program, ?args, "running helper");
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|err| Error::Launch {
                path: PathBuf::from(program),
                reason: err.to_string(),
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    fn is_running(&self, pid: u32) -> bool {
        ProcessControl::is_alive(self, pid)
    }

    fn start_process_tracer(&self, log: &Path) -> Result<(), Error> {
        let child = spawn_logged(&self.tracers.process, log).map_err(|source| Error::Trace {
            tracer: "process",
            pid: std::process::id(),
            source,
        })?;
        info!(log = %log.display(), "process creation tracer started");
        lock(&self.tracer_children).push(("process".to_owned(), child));
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        ProcessControl::shutdown(self);
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("root", &self.layout.root)
            .field("tracked", &lock(&self.tracked).len())
            .finish_non_exhaustive()
    }
}
