//! Data structures for the download system
//!
//! This file contains the core data types used throughout the download system:
//! the job description, the progress events emitted by workers, and the
//! per-job outcomes collected by the pool.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use super::DownloadError;
use crate::util::url_basename;

/// One file to retrieve.
///
/// A job is built once by the input parser and never mutated afterwards;
/// exactly one worker consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Candidate source URLs. The first one is the primary source, the rest are
    /// mirrors carried over from aria2-style input and are not used for failover.
    sources: Vec<String>,
    /// Directory the file is written into
    destination: PathBuf,
    /// Output file name inside `destination`
    filename: String,
}

impl Job {
    /// Creates a job whose filename is the basename of the first URL.
    ///
    /// Returns `None` when `sources` is empty.
    pub fn new<P: AsRef<Path>>(sources: Vec<String>, destination: P) -> Option<Self> {
        let filename = url_basename(sources.first()?);
        Some(Self {
            sources,
            destination: destination.as_ref().to_path_buf(),
            filename,
        })
    }

    /// Convenience constructor for a single-URL job.
    pub fn from_url<P: AsRef<Path>>(url: impl Into<String>, destination: P) -> Self {
        let url = url.into();
        Self {
            filename: url_basename(&url),
            sources: vec![url],
            destination: destination.as_ref().to_path_buf(),
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_destination<P: AsRef<Path>>(mut self, destination: P) -> Self {
        self.destination = destination.as_ref().to_path_buf();
        self
    }

    /// The URL that is actually fetched
    pub fn primary_url(&self) -> &str {
        &self.sources[0]
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `destination` joined with `filename`
    pub fn filepath(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.primary_url(), self.filepath().display())
    }
}

/// What happened to a worker's current job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    /// The worker picked up a job
    Started,
    /// The worker finished a job, successfully or not
    Completed,
}

/// Event sent from a worker to the progress reporter.
///
/// Carries no job payload: the reporter keeps its own per-slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Ordinal of the worker, `0..workers`, which is also its display slot
    pub worker: usize,
    pub kind: ProgressKind,
    /// Wall-clock time spent on the request and transfer. Zero for `Started`.
    pub elapsed: Duration,
}

impl ProgressEvent {
    pub fn started(worker: usize) -> Self {
        Self {
            worker,
            kind: ProgressKind::Started,
            elapsed: Duration::ZERO,
        }
    }

    pub fn completed(worker: usize, elapsed: Duration) -> Self {
        Self {
            worker,
            kind: ProgressKind::Completed,
            elapsed,
        }
    }
}

/// Result of running a single job
#[derive(Debug)]
pub struct JobOutcome {
    pub job: Job,
    pub worker: usize,
    pub elapsed: Duration,
    /// Bytes written to disk on success
    pub result: Result<u64, DownloadError>,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything the dispatcher learned from one run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Jobs that finished, with the number of bytes written
    pub succeeded: Vec<(Job, u64)>,
    /// Jobs that were attempted and failed
    pub failed: Vec<(Job, DownloadError)>,
    /// Jobs that were never started because the run was cancelled
    pub skipped: Vec<Job>,
}

impl RunSummary {
    pub(crate) fn record(&mut self, outcome: JobOutcome) {
        match outcome.result {
            Ok(bytes) => self.succeeded.push((outcome.job, bytes)),
            Err(e) => self.failed.push((outcome.job, e)),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.succeeded.iter().map(|(_, bytes)| bytes).sum()
    }

    /// True when every submitted job succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults_to_url_basename() {
        let job = Job::from_url("http://x/dir/a.bin", "/tmp/out");
        assert_eq!(job.filename(), "a.bin");
        assert_eq!(job.filepath(), PathBuf::from("/tmp/out/a.bin"));
        assert_eq!(job.primary_url(), "http://x/dir/a.bin");
    }

    #[test]
    fn test_job_keeps_mirrors_but_uses_first() {
        let job = Job::new(
            vec!["http://a/f.iso".to_string(), "http://b/g.iso".to_string()],
            "out",
        )
        .unwrap();
        assert_eq!(job.sources().len(), 2);
        assert_eq!(job.primary_url(), "http://a/f.iso");
        assert_eq!(job.filename(), "f.iso");
    }

    #[test]
    fn test_job_requires_a_source() {
        assert!(Job::new(Vec::new(), "out").is_none());
    }

    #[test]
    fn test_empty_destination_is_relative() {
        let job = Job::from_url("http://x/a.bin", "");
        assert_eq!(job.filepath(), PathBuf::from("a.bin"));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(JobOutcome {
            job: Job::from_url("http://x/a", "."),
            worker: 0,
            elapsed: Duration::ZERO,
            result: Ok(10),
        });
        summary.record(JobOutcome {
            job: Job::from_url("http://x/b", "."),
            worker: 1,
            elapsed: Duration::ZERO,
            result: Err(DownloadError::Cancelled),
        });
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.total_bytes(), 10);
        assert!(!summary.is_success());
    }
}
