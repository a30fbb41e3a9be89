mod cli;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use cli::{Cli, Command};
use config::Config;
use orchestrator::{
    AnalysisEngine, CompletionReport, Controller, DirectoryController, NetlogController,
    RunLayout, Services, StrategyRegistry, Supervisor, SystemClock, auxiliary, postprocess,
    report_completion,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, export } => {
            let loaded = load_config(config);
            let config = loaded.as_ref().cloned().unwrap_or_default();
            let layout = RunLayout::resolve(&config.paths);
            layout.create_folders();
            let logging = init_logging(&cli.verbosity, Some(&layout.logs.join("analyzer.log")));

            // Set-up failures are reported like any other failed run.
            let setup = loaded.and_then(|config| logging.map(|()| config));
            match setup {
                Ok(config) => {
                    debug!(?config, ?layout);
                    run(config, layout, export).await
                }
                Err(err) => {
                    let controller = controller(&config, export);
                    let report = CompletionReport::failed(format!("{err:#}"), &layout.root);
                    report_completion(controller.as_ref(), &report).await;
                    Err(err)
                }
            }
        }
        Command::Inspect { file, pretty } => {
            init_logging(&cli.verbosity, None)?;
            inspect(&file, pretty)
        }
        Command::Summarize { results, pretty } => {
            init_logging(&cli.verbosity, None)?;
            summarize(&results, pretty)
        }
    }
}

fn init_logging(verbosity: &Verbosity<InfoLevel>, log_file: Option<&Path>) -> anyhow::Result<()> {
    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `ANALYZER_LOG` can only tune the level per crate, e.g.
    // `ANALYZER_LOG=container=warn analyzer-rs -vv run` logs at the trace level
    // for all crates except `container`.
    let env_filter = EnvFilter::builder()
        .with_env_var("ANALYZER_LOG")
        .from_env()?
        .add_directive(verbosity.log_level_filter().as_str().parse()?);

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    let mut open_err = None;
    let file = log_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_level(true)
                .with_target(true),
        ),
        Err(err) => {
            open_err = Some((path.to_owned(), err));
            None
        }
    });

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .with(env_filter)
        .init();

    if let Some((path, err)) = open_err {
        warn!(path = %path.display(), %err, "unable to open the analyzer log");
    }
    Ok(())
}

fn load_config(explicit: Vec<PathBuf>) -> anyhow::Result<Config> {
    let candidates = if explicit.is_empty() {
        let mut candidates = glob::glob("/etc/analyzer-rs/config.d/*.toml")?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        candidates.insert(0, "/etc/analyzer-rs/config.toml".into());
        candidates.push("analysis.toml".into());
        candidates
    } else {
        explicit
    };
    trace!(?candidates, "config file candidates");
    Ok(Config::load_multiple(candidates)?)
}

fn controller(config: &Config, export: Option<PathBuf>) -> Box<dyn Controller> {
    match export.or_else(|| config.controller.export_dir.clone()) {
        Some(dir) => {
            info!(dir = %dir.display(), "exporting results to a local directory");
            Box::new(DirectoryController::new(dir))
        }
        None => Box::new(NetlogController::new(&config.controller)),
    }
}

async fn run(config: Config, layout: RunLayout, export: Option<PathBuf>) -> anyhow::Result<()> {
    let supervisor = Arc::new(Supervisor::new(&config, layout.clone()));
    let controller = controller(&config, export);
    let services = Services {
        processes: supervisor.clone(),
        launcher: supervisor,
        controller,
        clock: Box::new(SystemClock),
        strategies: StrategyRegistry::default(),
        auxiliaries: auxiliary::from_config(&config.auxiliary, &layout.shots),
        channel_source: None,
    };

    let cancel = CancellationToken::new();
    let engine = AnalysisEngine::new(config, layout, services);
    let analysis = engine.run(cancel.clone());
    tokio::pin!(analysis);

    let report = tokio::select! {
        report = &mut analysis => report,
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                warn!(%err, "unable to listen for interrupts");
            }
            cancel.cancel();
            analysis.await
        }
    };
    debug!(success = report.success, root = %report.root.display(), "analysis finished");
    Ok(())
}

fn inspect(file: &Path, pretty: bool) -> anyhow::Result<()> {
    let value = match container::describe_file(file) {
        Some(kind) => {
            debug!(path = %file.display(), kind, "inspecting");
            let image = container::inspect(&container::Parser::default(), file)?;
            serde_json::to_value(image)?
        }
        None => {
            info!(path = %file.display(), "neither a container nor an archive, nothing to inspect");
            serde_json::json!({})
        }
    };
    write_json(&value, pretty)
}

fn summarize(results: &Path, pretty: bool) -> anyhow::Result<()> {
    let logs = results.join("logs");
    let filtered = postprocess::filter_syscall_logs(&logs);
    debug!(filtered = filtered.len(), "system call logs filtered");
    let summary = postprocess::BehaviorSummary::collect(&logs)?;
    write_json(&serde_json::to_value(summary)?, pretty)
}

fn write_json(value: &serde_json::Value, pretty: bool) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut stdout, value)?;
    } else {
        serde_json::to_writer(&mut stdout, value)?;
    }
    stdout.write_all(b"\n")?;
    Ok(())
}
