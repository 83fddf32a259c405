mod config;
mod downloader;
mod input;
mod progress;
mod util;

use std::sync::Arc;

use bytesize::ByteSize;
use color_eyre::eyre::{Result, bail};
use indicatif::MultiProgress;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Config;
use downloader::{Job, RunSummary, WorkerPool};
use progress::{BarReporter, LogWriter, ProgressReporter, QuietReporter};

/// Positional URLs first, then the contents of every input file, in order.
fn collect_jobs(config: &Config) -> Vec<Job> {
    let mut jobs: Vec<Job> = config
        .urls
        .iter()
        .map(|url| Job::from_url(url.as_str(), &config.destination))
        .collect();

    let format = config.input_format();
    for path in &config.input {
        let lines = input::read_lines(path);
        let parsed = format.parse(&lines, &config.destination);
        tracing::debug!(path = ?path, jobs = parsed.len(), "Parsed input file");
        jobs.extend(parsed);
    }

    jobs
}

/// Logs go to stderr, around the bars when they are drawn. Keep logging to
/// warnings unless the bars are off or `RUST_LOG` says otherwise.
fn init_tracing(bars: Option<MultiProgress>) {
    let default_filter = if bars.is_some() { "warn" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(LogWriter::new(bars))
        .init();
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping downloads");
            cancel.cancel();
        }
    });
}

fn print_summary(summary: &RunSummary) {
    for (job, e) in &summary.failed {
        eprintln!("failed: {job}: {e}");
    }
    for job in &summary.skipped {
        eprintln!("skipped: {job}");
    }
    println!(
        "{} downloaded, {} failed, {} skipped ({})",
        summary.succeeded.len(),
        summary.failed.len(),
        summary.skipped.len(),
        ByteSize::b(summary.total_bytes())
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let config = config::config();
    let bars = (!config.quiet).then(MultiProgress::new);
    init_tracing(bars.clone());

    let jobs = collect_jobs(&config);
    if jobs.is_empty() {
        tracing::warn!("Nothing to download");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let pool = WorkerPool::new(config.downloader()?, config.workers())
        .with_failure_policy(config.failure_policy())
        .with_cancellation(cancel);
    tracing::info!(
        workers = pool.workers(),
        jobs = jobs.len(),
        destination = ?config.destination,
        "Starting"
    );

    let reporter: Arc<dyn ProgressReporter> = match bars {
        Some(multi) => Arc::new(BarReporter::new(multi, pool.workers(), jobs.len() as u64)),
        None => Arc::new(QuietReporter),
    };

    let summary = pool.run(jobs, reporter).await?;
    if pool.cancellation_token().is_cancelled() {
        tracing::warn!("Run was cancelled before every job finished");
    }
    print_summary(&summary);

    if !summary.is_success() {
        bail!(
            "{} of {} downloads did not complete",
            summary.failed.len() + summary.skipped.len(),
            summary.len()
        );
    }

    Ok(())
}
