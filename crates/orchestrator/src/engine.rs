#![forbid(unsafe_code)]

use crate::artifacts::{
    ArtifactQueue, CompletionReport, Controller, UploadSummary, report_completion,
};
use crate::auxiliary::{self, Auxiliary};
use crate::channel::{Dispatcher, EventChannel, LineSource};
use crate::clock::Clock;
use crate::collect::collect_captures;
use crate::domain::{MonitoredProcessSet, SharedProcessSet, TraceTarget, lock_set};
use crate::error::Error;
use crate::layout::RunLayout;
use crate::strategy::{
    Strategy, StrategyContext, StrategyRegistry, URL_PACKAGE, resolve_package,
};
use crate::supervisor::{Launcher, ProcessControl};
use config::{Category, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Collaborators of one run. Tests replace any of them with stubs.
pub struct Services {
    pub processes: Arc<dyn ProcessControl>,
    pub launcher: Arc<dyn Launcher>,
    pub controller: Box<dyn Controller>,
    pub clock: Box<dyn Clock>,
    pub strategies: StrategyRegistry,
    pub auxiliaries: Vec<Box<dyn Auxiliary>>,
    /// Replaces the named pipe at `layout.pipe` when set.
    pub channel_source: Option<Box<dyn LineSource>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparing,
    Launching,
    Monitoring,
    Finishing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Timeout,
    ProcessesExited,
    StrategyRequested,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub ticks: u64,
    pub reason: StopReason,
}

/// Drives one analysis from environment set-up to the completion report.
pub struct AnalysisEngine {
    config: Config,
    layout: RunLayout,
    services: Services,
    processes: SharedProcessSet,
    channel: EventChannel,
    phase: Phase,
    package: Option<String>,
    strategy: Option<Box<dyn Strategy>>,
    auxiliaries: Vec<Box<dyn Auxiliary>>,
    pid_check: bool,
}

impl AnalysisEngine {
    pub fn new(config: Config, layout: RunLayout, services: Services) -> Self {
        let channel = EventChannel::new(config.channel.clone());
        Self {
            config,
            layout,
            services,
            processes: MonitoredProcessSet::shared(),
            channel,
            phase: Phase::Preparing,
            package: None,
            strategy: None,
            auxiliaries: Vec::new(),
            pid_check: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn processes(&self) -> SharedProcessSet {
        self.processes.clone()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Results folders, event channel and process creation tracer.
    pub fn prepare(&mut self) -> Result<(), Error> {
        self.phase = Phase::Preparing;
        self.layout.create_folders();

        let dispatcher = Dispatcher::new(
            &self.layout.logs,
            self.processes.clone(),
            self.services.processes.clone(),
            self.config.tracers.protected_processes.clone(),
        );
        match self.services.channel_source.take() {
            Some(source) => self.channel.start_with(source, dispatcher)?,
            None => self.channel.start(&self.layout.pipe, dispatcher)?,
        }

        let process_log = self.layout.logs.join("processes.log");
        if let Err(err) = self.services.launcher.start_process_tracer(&process_log) {
            warn!(%err, "process creation tracer unavailable");
        }
        info!(root = %self.layout.root.display(), "storing results");
        Ok(())
    }

    /// Strategy name for `target`, explicit or detected.
    pub fn select_package(&self, target: &TraceTarget) -> Result<String, Error> {
        let analysis = &self.config.analysis;
        if let Some(package) = analysis.package.as_deref().filter(|p| !p.is_empty()) {
            return Ok(package.to_owned());
        }
        info!("no analysis package specified, trying to detect it");

        let package = match (analysis.category, target) {
            (Category::Url, _) | (_, TraceTarget::Url(_)) => Some(URL_PACKAGE),
            (Category::File, TraceTarget::File(path)) => {
                let file_type = analysis
                    .file_type
                    .clone()
                    .filter(|kind| !kind.is_empty())
                    .or_else(|| container::describe_file(path).map(str::to_owned));
                let file_name = analysis
                    .file_name
                    .clone()
                    .filter(|name| !name.is_empty())
                    .or_else(|| {
                        path.file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                    })
                    .unwrap_or_default();
                resolve_package(file_type.as_deref(), &file_name)
            }
        };
        let package = package.ok_or(Error::NoPackage)?;
        info!(package, "automatically selected analysis package");
        Ok(package.to_owned())
    }

    /// Pick and start the strategy and the auxiliaries. Starting a target
    /// waits on tracers and readiness polls, so it runs on the blocking pool.
    pub async fn launch(&mut self) -> Result<(), Error> {
        self.phase = Phase::Launching;
        let target = TraceTarget::from_analysis(&self.config.analysis, &self.layout.sample_dir)?;
        info!(%target, "target resolved");
        let package = self.select_package(&target)?;

        let options = self.config.analysis.parsed_options();
        for field in &options.rejected {
            warn!(field, "ignoring malformed option");
        }
        let context = StrategyContext::new(self.services.launcher.clone(), options);
        let mut strategy = self.services.strategies.create(&package, context)?;
        self.package = Some(package);

        let modules = std::mem::take(&mut self.services.auxiliaries);
        self.auxiliaries = auxiliary::start_all(modules);

        let (strategy, pids) = tokio::task::spawn_blocking(move || {
            let pids = strategy.start(&target);
            (strategy, pids)
        })
        .await?;
        // Kept even when start failed so finish() still reaches it.
        self.strategy = Some(strategy);
        let pids = pids?;

        if pids.is_empty() {
            info!("no process ids returned by the package, running for the full timeout");
            self.pid_check = false;
        } else {
            lock_set(&self.processes).extend(pids.iter().copied());
            info!(?pids, "monitoring processes");
            self.pid_check = !self.config.analysis.enforce_timeout;
        }
        Ok(())
    }

    /// Tick until the timeout, until every monitored process is gone, or
    /// until the strategy asks to stop.
    pub async fn monitor(&mut self, cancel: &CancellationToken) -> MonitorOutcome {
        self.phase = Phase::Monitoring;
        let timeout = self.config.analysis.timeout;
        let tick = self.config.analysis.tick;
        let mut ticks = 0;

        let reason = loop {
            ticks += 1;
            if ticks >= timeout {
                info!(ticks, "analysis timeout hit, terminating analysis");
                break StopReason::Timeout;
            }

            if self.pid_check {
                let (dead, remaining) = {
                    let mut set = lock_set(&self.processes);
                    let control = &self.services.processes;
                    let dead = set.retain_alive(|pid| control.is_alive(pid));
                    (dead, set.pids().to_vec())
                };
                for pid in dead {
                    info!(pid, "process has terminated");
                }
                if remaining.is_empty() {
                    info!(ticks, "process list is empty, terminating analysis");
                    break StopReason::ProcessesExited;
                }
                if let Some(strategy) = self.strategy.as_mut() {
                    strategy.set_pids(&remaining);
                }
            }

            if let Some(strategy) = self.strategy.as_mut() {
                match strategy.check() {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("the analysis package requested the termination of the analysis");
                        break StopReason::StrategyRequested;
                    }
                    Err(err) => warn!(package = strategy.name(), %err, "package check failed"),
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(ticks, "analysis cancelled");
                    break StopReason::Cancelled;
                }
                _ = self.services.clock.sleep(tick) => {}
            }
        };
        MonitorOutcome { ticks, reason }
    }

    /// Wind everything down and hand the results to the controller. Every
    /// step runs even if an earlier one failed.
    pub async fn finish(&mut self) -> UploadSummary {
        self.phase = Phase::Finishing;
        info!("analysis completed");

        if let Some(strategy) = self.strategy.as_mut() {
            if let Err(err) = strategy.finish() {
                warn!(package = strategy.name(), %err, "package finish failed");
            }
        }

        info!("terminating remaining processes before shutdown");
        let remaining = lock_set(&self.processes).pids().to_vec();
        let control = self.services.processes.clone();
        let survivors = tokio::task::spawn_blocking(move || {
            remaining
                .into_iter()
                .filter(|&pid| control.is_alive(pid) && !control.terminate(pid))
                .collect::<Vec<_>>()
        })
        .await;
        match survivors {
            Ok(survivors) => {
                for pid in survivors {
                    warn!(pid, "process survived termination");
                }
            }
            Err(err) => error!(%err, "process termination task failed"),
        }

        for module in &mut self.auxiliaries {
            debug!(module = module.name(), "stopping auxiliary module");
            module.stop();
        }
        if let Some(strategy) = self.strategy.as_mut() {
            strategy.stop();
        }
        self.channel.stop();
        self.services.processes.shutdown();

        let collected = collect_captures(&self.layout);
        debug!(
            logs = collected.logs.len(),
            files = collected.files.len(),
            "capture folder collected"
        );

        let mut queue = ArtifactQueue::new(&self.layout.logs, &self.layout.drop);
        queue.add_tree(&self.layout.root);
        let summary = queue.upload_all(self.services.controller.as_ref()).await;
        info!(
            uploaded = summary.uploaded,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "results dumped"
        );
        summary
    }

    /// Full run. The completion report is always sent, whatever happened.
    pub async fn run(mut self, cancel: CancellationToken) -> CompletionReport {
        let started = match self.prepare() {
            Ok(()) => self.launch().await,
            Err(err) => Err(err),
        };
        let outcome = match started {
            Ok(()) => {
                let monitored = self.monitor(&cancel).await;
                debug!(ticks = monitored.ticks, reason = ?monitored.reason, "monitoring ended");
                match monitored.reason {
                    StopReason::Cancelled => Err("Keyboard Interrupt".to_owned()),
                    _ => Ok(()),
                }
            }
            Err(err) => {
                error!(%err, "analysis aborted");
                Err(err.to_string())
            }
        };

        self.finish().await;
        self.phase = Phase::Complete;

        let report = CompletionReport {
            success: outcome.is_ok(),
            error: outcome.err(),
            root: self.layout.root.clone(),
        };
        report_completion(self.services.controller.as_ref(), &report).await;
        report
    }
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine")
            .field("phase", &self.phase)
            .field("package", &self.package)
            .field("root", &self.layout.root)
            .field("pid_check", &self.pid_check)
            .finish_non_exhaustive()
    }
}
