//! A single download worker
//!
//! Pulls jobs from the shared queue until it is closed and drained, running one
//! create-file / request / stream-to-disk cycle per job.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytesize::ByteSize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use super::{
    DownloadError,
    http::Downloader,
    models::{Job, JobOutcome, ProgressEvent},
    pool::FailurePolicy,
    queue::JobReceiver,
};
use crate::progress::ProgressReporter;

pub struct Worker {
    id: usize,
    downloader: Arc<Downloader>,
    receiver: JobReceiver,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    policy: FailurePolicy,
}

impl Worker {
    pub fn new(
        id: usize,
        downloader: Arc<Downloader>,
        receiver: JobReceiver,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            id,
            downloader,
            receiver,
            reporter,
            cancel,
            policy,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs until the queue is exhausted or the run is cancelled, returning
    /// the outcome of every job this worker picked up.
    pub async fn run(self) -> Vec<JobOutcome> {
        let span = info_span!("worker", worker = self.id);
        async move {
            let mut outcomes = Vec::new();

            loop {
                let job = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!("Run cancelled, worker stopping");
                        break;
                    }
                    job = self.receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                let outcome = self.run_job(job).await;
                if let Err(e) = &outcome.result {
                    let cancelled = matches!(e, DownloadError::Cancelled);
                    if self.policy == FailurePolicy::Abort && !cancelled {
                        info!("Aborting remaining jobs after failure");
                        self.cancel.cancel();
                    }
                }
                outcomes.push(outcome);
            }

            debug!(jobs = outcomes.len(), "Worker finished");
            outcomes
        }
        .instrument(span)
        .await
    }

    async fn run_job(&self, job: Job) -> JobOutcome {
        self.reporter.on_event(ProgressEvent::started(self.id));
        debug!(url = %job.primary_url(), path = ?job.filepath(), "Starting job");

        let (elapsed, result) = match self.downloader.create_output(&job).await {
            Ok(file) => {
                let start = Instant::now();
                let result = self.downloader.transfer(&job, file, &self.cancel).await;
                (start.elapsed(), result)
            }
            Err(e) => (Duration::ZERO, Err(e)),
        };

        match &result {
            Ok(bytes) => info!(
                url = %job.primary_url(),
                path = ?job.filepath(),
                size = %ByteSize::b(*bytes),
                elapsed = ?elapsed,
                "Download completed"
            ),
            Err(e) => error!(
                url = %job.primary_url(),
                path = ?job.filepath(),
                network = e.is_network(),
                error = %e,
                "Download failed"
            ),
        }

        self.reporter.on_event(ProgressEvent::completed(self.id, elapsed));

        JobOutcome {
            job,
            worker: self.id,
            elapsed,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::{ProgressKind, queue::JobQueue};
    use crate::progress::RecordingReporter;
    use tempfile::tempdir;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    #[tokio::test]
    async fn test_worker_drains_queue_and_reports_each_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abc"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let jobs: Vec<Job> = (0..3)
            .map(|i| {
                Job::from_url(format!("{}/f.bin", server.uri()), dir.path())
                    .with_filename(format!("f{i}.bin"))
            })
            .collect();

        let mut queue = JobQueue::with_capacity(jobs.len());
        queue.enqueue(jobs).await.unwrap();
        queue.close();

        let reporter = Arc::new(RecordingReporter::default());
        let worker = Worker::new(
            7,
            Arc::new(Downloader::builder().build().unwrap()),
            queue.receiver(),
            reporter.clone(),
            CancellationToken::new(),
            FailurePolicy::Skip,
        );
        assert_eq!(worker.id(), 7);

        let outcomes = worker.run().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_success() && o.worker == 7));

        let kinds: Vec<ProgressKind> = reporter.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressKind::Started,
                ProgressKind::Completed,
                ProgressKind::Started,
                ProgressKind::Completed,
                ProgressKind::Started,
                ProgressKind::Completed,
            ]
        );
        assert!(reporter.events().iter().all(|e| e.worker == 7));
    }

    #[tokio::test]
    async fn test_worker_continues_after_failure() {
        let dir = tempdir().unwrap();
        let mut queue = JobQueue::with_capacity(2);
        queue
            .enqueue(vec![
                Job::from_url("http://127.0.0.1:9/a.bin", dir.path().join("missing")),
                Job::from_url("http://127.0.0.1:9/b.bin", dir.path().join("missing")),
            ])
            .await
            .unwrap();
        queue.close();

        let reporter = Arc::new(RecordingReporter::default());
        let outcomes = Worker::new(
            0,
            Arc::new(Downloader::builder().build().unwrap()),
            queue.receiver(),
            reporter.clone(),
            CancellationToken::new(),
            FailurePolicy::Skip,
        )
        .run()
        .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(
            o.result,
            Err(DownloadError::CreateFile { .. })
        )));
        assert_eq!(reporter.completed_count(), 2);
    }
}
