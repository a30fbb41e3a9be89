#![forbid(unsafe_code)]

use async_trait::async_trait;
use config::{Category, Config};
use orchestrator::artifacts::{CompletionReport, Controller};
use orchestrator::auxiliary::Auxiliary;
use orchestrator::channel::MemorySource;
use orchestrator::clock::Clock;
use orchestrator::domain::{TraceTarget, lock_set};
use orchestrator::error::Error;
use orchestrator::strategy::{Strategy, StrategyRegistry};
use orchestrator::supervisor::{Launcher, ProcessControl};
use orchestrator::{AnalysisEngine, Phase, RunLayout, Services, StopReason};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};
use tokio_util::sync::CancellationToken;

/// Liveness stub: a pid dies on its n-th liveness check.
#[derive(Debug, Default)]
struct ScheduledProcesses {
    dies_at: BTreeMap<u32, u32>,
    checks: Mutex<BTreeMap<u32, u32>>,
    terminated: Mutex<Vec<u32>>,
}

impl ScheduledProcesses {
    fn dying(schedule: &[(u32, u32)]) -> Self {
        Self {
            dies_at: schedule.iter().copied().collect(),
            ..Default::default()
        }
    }
}

impl ProcessControl for ScheduledProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        if self.terminated.lock().unwrap().contains(&pid) {
            return false;
        }
        let mut checks = self.checks.lock().unwrap();
        let seen = checks.entry(pid).or_default();
        *seen += 1;
        self.dies_at.get(&pid).is_none_or(|dies_at| *seen < *dies_at)
    }

    fn terminate(&self, pid: u32) -> bool {
        self.terminated.lock().unwrap().push(pid);
        true
    }

    fn resume(&self, _pid: u32) -> bool {
        true
    }

    fn process_name(&self, _pid: u32) -> Option<String> {
        None
    }

    fn start_trace(&self, _pid: u32) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NullLauncher;

impl Launcher for NullLauncher {
    fn execute(&self, _path: &Path, _args: &[String], _suspended: bool) -> Result<u32, Error> {
        Ok(1)
    }

    fn run_helper(&self, _program: &str, _args: &[String]) -> Result<i32, Error> {
        Ok(0)
    }

    fn is_running(&self, _pid: u32) -> bool {
        true
    }

    fn start_process_tracer(&self, _log: &Path) -> Result<(), Error> {
        Err(Error::Launch {
            path: PathBuf::from("process tracer"),
            reason: "not available in tests".into(),
        })
    }
}

/// Sleeping only moves the reported time forward.
#[derive(Debug)]
struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

/// Clones share the recorded calls.
#[derive(Debug, Clone, Default)]
struct SpyController {
    uploads: Arc<Mutex<Vec<String>>>,
    reports: Arc<Mutex<Vec<CompletionReport>>>,
}

#[async_trait]
impl Controller for SpyController {
    async fn upload(&self, _source: &Path, upload_path: &str) -> Result<(), Error> {
        self.uploads.lock().unwrap().push(upload_path.to_owned());
        Ok(())
    }

    async fn complete(&self, report: &CompletionReport) -> Result<(), Error> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// How the test strategy behaves.
#[derive(Debug, Clone, Default)]
struct Script {
    pids: Vec<u32>,
    stop_after_checks: Option<u32>,
    failing_check: bool,
    drop_file: Option<PathBuf>,
    start_delay: Option<Duration>,
}

struct Scripted {
    script: Script,
    checks: u32,
    finished: Arc<AtomicU32>,
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn start(&mut self, _target: &TraceTarget) -> Result<Vec<u32>, Error> {
        if let Some(delay) = self.script.start_delay {
            std::thread::sleep(delay);
        }
        if let Some(path) = &self.script.drop_file {
            std::fs::write(path, b"dropped")?;
        }
        Ok(self.script.pids.clone())
    }

    fn check(&mut self) -> Result<bool, Error> {
        self.checks += 1;
        if self.script.failing_check {
            return Err(Error::Strategy {
                package: "scripted".into(),
                reason: "window not found".into(),
            });
        }
        Ok(self.script.stop_after_checks != Some(self.checks))
    }

    fn finish(&mut self) -> Result<(), Error> {
        self.finished.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    layout: RunLayout,
    config: Config,
    processes: Arc<ScheduledProcesses>,
    controller: SpyController,
    finished: Arc<AtomicU32>,
}

impl Fixture {
    fn new(timeout: u64, processes: ScheduledProcesses) -> Self {
        let dir = tempdir().unwrap();
        let layout = RunLayout::under(dir.path());
        std::fs::create_dir_all(&layout.sample_dir).unwrap();
        std::fs::write(layout.sample_dir.join("sample.bin"), b"\x00\x01").unwrap();

        let mut config = Config::default();
        config.analysis.file_name = Some("sample.bin".into());
        config.analysis.package = Some("scripted".into());
        config.analysis.timeout = timeout;
        config.analysis.tick = Duration::from_millis(1);
        config.channel.drain_deadline = Duration::from_millis(100);
        Self {
            _dir: dir,
            layout,
            config,
            processes: Arc::new(processes),
            controller: SpyController::default(),
            finished: Arc::default(),
        }
    }

    fn engine(&self, script: Script) -> AnalysisEngine {
        let mut strategies = StrategyRegistry::default();
        let finished = self.finished.clone();
        strategies.register("scripted", move |_ctx| {
            Box::new(Scripted {
                script: script.clone(),
                checks: 0,
                finished: finished.clone(),
            })
        });
        let (source, _feed) = MemorySource::pair();
        let services = Services {
            processes: self.processes.clone(),
            launcher: Arc::new(NullLauncher),
            controller: Box::new(self.controller.clone()),
            clock: Box::new(ManualClock::default()),
            strategies,
            auxiliaries: Vec::<Box<dyn Auxiliary>>::new(),
            channel_source: Some(Box::new(source)),
        };
        AnalysisEngine::new(self.config.clone(), self.layout.clone(), services)
    }
}

#[tokio::test]
async fn loop_ends_when_last_process_exits() {
    let fixture = Fixture::new(50, ScheduledProcesses::dying(&[(100, 3), (101, 5)]));
    let mut engine = fixture.engine(Script {
        pids: vec![100, 101],
        ..Default::default()
    });
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.ticks, 5);
    assert_eq!(outcome.reason, StopReason::ProcessesExited);
    assert!(lock_set(&engine.processes()).is_empty());
}

#[tokio::test]
async fn timeout_dominates_live_processes() {
    let fixture = Fixture::new(3, ScheduledProcesses::default());
    let mut engine = fixture.engine(Script {
        pids: vec![100],
        ..Default::default()
    });
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.ticks, 3);
    assert_eq!(outcome.reason, StopReason::Timeout);

    engine.finish().await;
    assert_eq!(*fixture.processes.terminated.lock().unwrap(), vec![100]);
    assert_eq!(fixture.finished.load(Ordering::Relaxed), 1);
    assert_eq!(engine.phase(), Phase::Finishing);
}

#[tokio::test]
async fn strategy_can_end_the_run() {
    let fixture = Fixture::new(50, ScheduledProcesses::default());
    let mut engine = fixture.engine(Script {
        pids: vec![100],
        stop_after_checks: Some(2),
        ..Default::default()
    });
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.ticks, 2);
    assert_eq!(outcome.reason, StopReason::StrategyRequested);
}

#[tokio::test]
async fn failing_check_does_not_end_the_run() {
    let fixture = Fixture::new(4, ScheduledProcesses::default());
    let mut engine = fixture.engine(Script {
        pids: vec![100],
        failing_check: true,
        ..Default::default()
    });
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.reason, StopReason::Timeout);
    assert_eq!(outcome.ticks, 4);
}

#[tokio::test]
async fn no_pids_means_timeout_only() {
    let fixture = Fixture::new(6, ScheduledProcesses::dying(&[(100, 1)]));
    let mut engine = fixture.engine(Script::default());
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.reason, StopReason::Timeout);
    assert_eq!(outcome.ticks, 6);
}

#[tokio::test]
async fn enforced_timeout_ignores_exits() {
    let mut fixture = Fixture::new(5, ScheduledProcesses::dying(&[(100, 1)]));
    fixture.config.analysis.enforce_timeout = true;
    let mut engine = fixture.engine(Script {
        pids: vec![100],
        ..Default::default()
    });
    engine.prepare().unwrap();
    engine.launch().await.unwrap();

    let outcome = engine.monitor(&CancellationToken::new()).await;
    assert_eq!(outcome.reason, StopReason::Timeout);
}

#[tokio::test]
async fn successful_run_uploads_results_and_reports() {
    let fixture = Fixture::new(50, ScheduledProcesses::dying(&[(100, 2)]));
    let engine = fixture.engine(Script {
        pids: vec![100],
        drop_file: Some(fixture.layout.drop.join("payload.txt")),
        ..Default::default()
    });

    let report = engine.run(CancellationToken::new()).await;
    assert!(report.success, "{report:?}");
    assert_eq!(report.root, fixture.layout.root);

    let uploads = fixture.controller.uploads.lock().unwrap();
    assert!(uploads.contains(&"files/payload.txt".to_owned()), "{uploads:?}");
    assert_eq!(*fixture.controller.reports.lock().unwrap(), vec![report]);
}

#[tokio::test]
async fn unresolvable_package_is_reported() {
    let mut fixture = Fixture::new(50, ScheduledProcesses::default());
    fixture.config.analysis.package = None;
    fixture.config.analysis.file_name = Some("mystery".into());
    std::fs::write(fixture.layout.sample_dir.join("mystery"), b"plain").unwrap();
    let engine = fixture.engine(Script::default());

    let report = engine.run(CancellationToken::new()).await;
    assert!(!report.success);
    assert!(
        report
            .error
            .as_deref()
            .is_some_and(|error| error.contains("No analysis package")),
        "{report:?}"
    );
    assert_eq!(fixture.controller.reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_still_reports() {
    let fixture = Fixture::new(50, ScheduledProcesses::default());
    let engine = fixture.engine(Script {
        pids: vec![100],
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.run(cancel).await;
    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("Keyboard Interrupt"));
    assert_eq!(*fixture.processes.terminated.lock().unwrap(), vec![100]);
    assert_eq!(fixture.controller.reports.lock().unwrap().len(), 1);
}

#[test]
fn packages_are_detected_from_type_and_name() {
    let mut fixture = Fixture::new(50, ScheduledProcesses::default());
    fixture.config.analysis.package = None;

    fixture.config.analysis.file_type = Some("Mach-O 64-bit executable x86_64".into());
    let engine = fixture.engine(Script::default());
    let target = TraceTarget::File(fixture.layout.sample_dir.join("sample.bin"));
    assert_eq!(engine.select_package(&target).unwrap(), "macho");

    fixture.config.analysis.file_type = None;
    fixture.config.analysis.file_name = Some("invoice.pdf".into());
    let engine = fixture.engine(Script::default());
    let target = TraceTarget::File(fixture.layout.sample_dir.join("invoice.pdf"));
    assert_eq!(engine.select_package(&target).unwrap(), "pdf");

    fixture.config.analysis.category = Category::Url;
    let engine = fixture.engine(Script::default());
    let target = TraceTarget::Url("http://example.test/".into());
    assert_eq!(engine.select_package(&target).unwrap(), "safari");
}

#[test]
fn sniffed_container_selects_macho() {
    let mut fixture = Fixture::new(50, ScheduledProcesses::default());
    fixture.config.analysis.package = None;
    fixture.config.analysis.file_name = Some("dropper".into());
    let path = fixture.layout.sample_dir.join("dropper");
    std::fs::write(&path, [0xcf, 0xfa, 0xed, 0xfe, 7, 0, 0, 1]).unwrap();

    let engine = fixture.engine(Script::default());
    assert_eq!(engine.select_package(&TraceTarget::File(path)).unwrap(), "macho");
}

#[tokio::test]
async fn explicit_file_target_is_launched() {
    let mut fixture = Fixture::new(50, ScheduledProcesses::dying(&[(100, 2)]));
    let path = fixture.layout.analyzer_dir.join("elsewhere.bin");
    std::fs::write(&path, b"\x00").unwrap();
    fixture.config.analysis.file_name = None;
    fixture.config.analysis.target = Some(path.to_string_lossy().into_owned());
    let engine = fixture.engine(Script {
        pids: vec![100],
        ..Default::default()
    });

    let report = engine.run(CancellationToken::new()).await;
    assert!(report.success, "{report:?}");
}

#[test]
fn package_is_detected_from_explicit_target_name() {
    let mut fixture = Fixture::new(50, ScheduledProcesses::default());
    fixture.config.analysis.package = None;
    fixture.config.analysis.file_name = None;
    let path = fixture.layout.analyzer_dir.join("statement.pdf");
    std::fs::write(&path, b"%PDF-1.7").unwrap();
    fixture.config.analysis.target = Some(path.to_string_lossy().into_owned());

    let engine = fixture.engine(Script::default());
    assert_eq!(engine.select_package(&TraceTarget::File(path)).unwrap(), "pdf");
}

#[tokio::test]
async fn slow_start_leaves_the_runtime_responsive() {
    let fixture = Fixture::new(50, ScheduledProcesses::default());
    let mut engine = fixture.engine(Script {
        pids: vec![100],
        start_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    engine.prepare().unwrap();

    let beats = Arc::new(AtomicU32::new(0));
    let heartbeat = tokio::spawn({
        let beats = beats.clone();
        async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                beats.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    engine.launch().await.unwrap();
    heartbeat.abort();

    assert!(beats.load(Ordering::Relaxed) > 0);
    assert_eq!(lock_set(&engine.processes()).pids(), [100]);
}

#[tokio::test]
async fn cancellation_during_a_slow_start_still_reports() {
    let fixture = Fixture::new(50, ScheduledProcesses::default());
    let engine = fixture.engine(Script {
        pids: vec![100],
        start_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        }
    });

    let report = engine.run(cancel).await;
    assert_eq!(report.error.as_deref(), Some("Keyboard Interrupt"));
    assert_eq!(*fixture.processes.terminated.lock().unwrap(), vec![100]);
    assert_eq!(fixture.controller.reports.lock().unwrap().len(), 1);
}
