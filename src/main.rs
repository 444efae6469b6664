//! CLI entry point for the blupen collector.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use blupen_core::{
    CollectJob, CollectRequest, Credentials, RunError, Runner, RunnerSettings, Window, run_request,
};
use clap::Parser;
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::LoadedConfig;
use cli::{Cli, CollectArgs, Command, RequestArgs, SourceArgs};
use progress::Spinner;

/// Exit code for failures an external scheduler should retry later.
const EXIT_RETRY_LATER: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let loaded = match app_config::load_config(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&cli, loaded.config.log_level.as_deref());
    debug!(
        ?cli,
        config_path = ?loaded.path,
        loaded_from_file = loaded.loaded_from_file,
        "CLI arguments parsed"
    );

    match run(cli, loaded).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "blupen failed");
            eprintln!("Error: {err:#}");
            exit_code_for(&err)
        }
    }
}

// Priority: RUST_LOG env var > quiet flag > verbose flag > config log_level > info
fn init_tracing(cli: &Cli, config_level: Option<&str>) {
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config_level.unwrap_or("info"),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<RunError>() {
        Some(run_error) if run_error.is_retry_later() => ExitCode::from(EXIT_RETRY_LATER),
        _ => ExitCode::FAILURE,
    }
}

async fn run(cli: Cli, loaded: LoadedConfig) -> Result<ExitCode> {
    let credentials = loaded.config.credentials();
    let settings = loaded.config.runner_settings();
    let show_spinner = !cli.quiet && io::stderr().is_terminal();

    match cli.command {
        Command::Collect(args) => collect(args, settings, credentials, show_spinner).await,
        Command::Request(args) => request(args, settings, credentials).await,
        Command::Purge(args) => purge(args, settings, credentials).await,
    }
}

fn job_for(source: &SourceArgs) -> CollectJob {
    let job = CollectJob::new(source.platform, source.query.clone());
    match &source.group_id {
        Some(group_id) => job.group_id(group_id.clone()),
        None => job,
    }
}

fn apply_collect_overrides(args: &CollectArgs, settings: &mut RunnerSettings) -> Result<()> {
    if let Some(dir) = &args.source.content_dir {
        settings.content_dir.clone_from(dir);
    }
    if args.no_media {
        settings.download_media = false;
    }
    if let Some(max_length) = args.max_length {
        settings.max_length =
            Some(usize::try_from(max_length).context("--max-length is too large")?);
    }
    let window = Window::new(
        args.start_date.or(settings.window.start),
        args.stop_date.or(settings.window.stop),
    );
    if let (Some(start), Some(stop)) = (window.start, window.stop)
        && start > stop
    {
        bail!("start date {start} is after stop date {stop}");
    }
    settings.window = window;
    Ok(())
}

async fn collect(
    args: CollectArgs,
    mut settings: RunnerSettings,
    credentials: Credentials,
    show_spinner: bool,
) -> Result<ExitCode> {
    apply_collect_overrides(&args, &mut settings)?;
    let job = job_for(&args.source);
    info!(
        platform = %job.platform,
        query = %job.query,
        content_dir = %settings.content_dir.display(),
        "collecting"
    );

    let runner = Runner::new(settings, credentials);
    let spinner = Spinner::start(show_spinner, format!("Collecting {} {}", job.platform, job.query));
    let result = runner.collect(&job, args.purge).await;
    spinner.finish();

    let report = result?;
    println!(
        "{} {}: {} items ({}), media {} downloaded, {} failed, snapshot {}",
        report.platform,
        report.source,
        report.items,
        if report.complete { "complete" } else { "incomplete" },
        report.media_downloaded,
        report.media_failed,
        report.snapshot.display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn request(
    args: RequestArgs,
    mut settings: RunnerSettings,
    credentials: Credentials,
) -> Result<ExitCode> {
    if let Some(dir) = &args.content_dir {
        settings.content_dir.clone_from(dir);
    }
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read request file '{}'", args.file.display()))?;
    let document = CollectRequest::from_json(&raw)
        .with_context(|| format!("Failed to parse request file '{}'", args.file.display()))?;

    let runner = Runner::new(settings, credentials);
    let outcome = run_request(&document, &runner, args.purge).await;

    let outgoing = serde_json::to_string_pretty(&outcome.outgoing)
        .context("Failed to serialize outgoing request")?;
    match &args.output {
        Some(path) => tokio::fs::write(path, outgoing + "\n")
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))?,
        None => println!("{outgoing}"),
    }

    for failure in &outcome.failures {
        warn!(error = %failure.error, job = ?failure.job, "request entry failed");
    }
    info!(
        collected = outcome.reports.len(),
        failed = outcome.failures.len(),
        "request complete"
    );

    Ok(if outcome.has_retry_later() {
        ExitCode::from(EXIT_RETRY_LATER)
    } else if outcome.failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn purge(
    args: SourceArgs,
    mut settings: RunnerSettings,
    credentials: Credentials,
) -> Result<ExitCode> {
    if let Some(dir) = &args.content_dir {
        settings.content_dir.clone_from(dir);
    }
    let job = job_for(&args);
    let runner = Runner::new(settings, credentials);
    if runner.purge(&job).await? {
        println!("removed snapshot for {} {}", job.platform, job.query);
    } else {
        println!("no snapshot for {} {}", job.platform, job.query);
    }
    Ok(ExitCode::SUCCESS)
}
