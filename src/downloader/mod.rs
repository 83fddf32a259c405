//! Module for downloading batches of files over HTTP
//!
//! Jobs are pushed into a pre-sized queue, a fixed pool of workers drains it,
//! and every worker streams one response body to disk per job while reporting
//! progress events to a [`ProgressReporter`](crate::progress::ProgressReporter).

mod http;
mod models;
mod pool;
mod queue;
mod worker;

use std::path::PathBuf;

use thiserror::Error;

// Re-export the public API
pub use http::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_REDIRECTS, Downloader, RedirectPolicy};
pub use models::{Job, ProgressEvent, ProgressKind, RunSummary};
pub use pool::{FailurePolicy, WorkerPool};

/// Why a single job failed
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Failed to create {}: {source}", path.display())]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Redirect error for {url}: {reason}")]
    Redirect { url: String, reason: String },

    #[error("Error reading response body from {url}: {source}")]
    Body {
        url: String,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}

impl DownloadError {
    /// Whether the failure came from the network side rather than the local filesystem
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Request(_)
                | Self::Status { .. }
                | Self::Redirect { .. }
                | Self::Body { .. }
        )
    }
}
