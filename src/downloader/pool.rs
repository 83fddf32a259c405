//! Worker pool and dispatcher
//!
//! Starts a fixed number of workers on an empty queue, feeds every job into it
//! in submission order, closes it and waits for the workers to drain it.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    DownloadError,
    http::Downloader,
    models::{Job, RunSummary},
    queue::JobQueue,
    worker::Worker,
};
use crate::progress::ProgressReporter;

/// What a worker does when one of its jobs fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and move on to the next job
    #[default]
    Skip,
    /// Cancel the run: no new jobs are started and in-flight transfers stop
    Abort,
}

pub struct WorkerPool {
    downloader: Arc<Downloader>,
    workers: usize,
    policy: FailurePolicy,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// A pool of `workers` workers (at least one) sharing `downloader`.
    pub fn new(downloader: Downloader, workers: usize) -> Self {
        Self {
            downloader: Arc::new(downloader),
            workers: workers.max(1),
            policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use an externally owned token, e.g. one cancelled on Ctrl-C
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every job to completion (or failure) exactly once.
    ///
    /// Completion order is whatever the workers manage; only submission order
    /// is fixed. The reporter is finished after all workers have stopped.
    pub async fn run(
        &self,
        jobs: Vec<Job>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<RunSummary, DownloadError> {
        warn_on_duplicate_paths(&jobs);

        let job_count = jobs.len();
        let mut queue = JobQueue::with_capacity(job_count);

        // Workers first, so they are already waiting when jobs arrive
        let handles: Vec<_> = (0..self.workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    Arc::clone(&self.downloader),
                    queue.receiver(),
                    Arc::clone(&reporter),
                    self.cancel.clone(),
                    self.policy,
                );
                trace!(worker = worker.id(), "Spawning worker");
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = self.workers,
            jobs = job_count,
            capacity = queue.capacity(),
            buffer_size = self.downloader.buffer_size(),
            redirect_policy = ?self.downloader.redirect_policy(),
            "Dispatching jobs"
        );

        // The queue keeps its own receiver, so this only fails once closed
        if let Err(e) = queue.enqueue(jobs).await {
            error!(error = %e, "Failed to enqueue jobs");
        }
        queue.close();

        let mut summary = RunSummary::default();
        let mut failure = None;

        for result in join_all(handles).await {
            match result {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        trace!(
                            worker = outcome.worker,
                            elapsed = ?outcome.elapsed,
                            success = outcome.is_success(),
                            "Job finished"
                        );
                        summary.record(outcome);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    failure.get_or_insert(e);
                }
            }
        }

        summary.skipped = queue.receiver().drain().await;
        if !summary.skipped.is_empty() {
            warn!(count = summary.skipped.len(), "Jobs were never started");
        }

        reporter.finish();

        if summary.is_empty() {
            debug!("Nothing was dispatched");
        }

        debug!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "All workers finished"
        );

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(summary),
        }
    }
}

/// Two jobs writing the same path race on one file; that is allowed but worth
/// a warning.
fn warn_on_duplicate_paths(jobs: &[Job]) -> usize {
    let mut seen: HashMap<PathBuf, usize> = HashMap::new();
    for job in jobs {
        *seen.entry(job.filepath()).or_default() += 1;
    }

    let mut duplicates = 0;
    for (path, count) in seen.iter().filter(|(_, count)| **count > 1) {
        warn!(path = ?path, count = *count, "Several jobs write to the same file");
        duplicates += 1;
    }
    duplicates
}
