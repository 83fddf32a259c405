//! HTTP download implementation
//!
//! This module owns the HTTP client, resolves redirects according to the
//! configured [`RedirectPolicy`], and streams response bodies to disk through a
//! fixed-size copy buffer.

use futures_util::StreamExt;
use reqwest::{
    Client, Response, Url,
    header::{self, HeaderMap, HeaderValue},
    redirect::Policy,
};
use std::{io, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tokio_util::{io::StreamReader, sync::CancellationToken};
use tracing::{debug, info, instrument, trace, warn};

use super::{DownloadError, models::Job};

/// Default size of the copy buffer used while streaming a body to disk
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;
/// Default number of redirect hops followed before giving up
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// How redirects are handled.
///
/// `Literal` and `Standard` both resolve `Location` with `Url::join`, so they
/// request the same URL. They differ in who runs the hop loop: `Literal` runs
/// it here and reports a broken chain as [`DownloadError::Redirect`], while
/// `Standard` leaves it to reqwest and surfaces it as [`DownloadError::Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum RedirectPolicy {
    /// Follow redirects manually, sending the `Location` path exactly as the
    /// server wrote it. Percent-escapes such as `%2F` are never decoded or
    /// re-encoded along the way.
    #[default]
    Literal,
    /// Let the HTTP client follow redirects with its own URL handling
    Standard,
    /// Do not follow redirects; a 3xx response fails the job
    None,
}

/// Builder for [`Downloader`]
#[derive(Debug, Clone)]
pub struct DownloaderBuilder {
    redirect_policy: RedirectPolicy,
    max_redirects: usize,
    buffer_size: usize,
    timeout: Option<Duration>,
    create_dirs: bool,
}

impl Default for DownloaderBuilder {
    fn default() -> Self {
        Self {
            redirect_policy: RedirectPolicy::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: None,
            create_dirs: false,
        }
    }
}

impl DownloaderBuilder {
    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Copy buffer size in bytes; clamped to at least one byte
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create missing parent directories of each output file
    pub fn create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    pub fn build(self) -> Result<Downloader, DownloadError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        let redirect = match self.redirect_policy {
            // Literal redirects are resolved by `Downloader::get_with_redirects`
            RedirectPolicy::Literal | RedirectPolicy::None => Policy::none(),
            RedirectPolicy::Standard => Policy::limited(self.max_redirects),
        };

        let mut builder = Client::builder()
            .redirect(redirect)
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Downloader {
            client: builder.build()?,
            redirect_policy: self.redirect_policy,
            max_redirects: self.max_redirects,
            buffer_size: self.buffer_size,
            create_dirs: self.create_dirs,
        })
    }
}

/// Shared by every worker; the underlying client pools connections internally.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    redirect_policy: RedirectPolicy,
    max_redirects: usize,
    buffer_size: usize,
    create_dirs: bool,
}

impl Downloader {
    pub fn builder() -> DownloaderBuilder {
        DownloaderBuilder::default()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        self.redirect_policy
    }

    /// Issues a GET for `url`, following redirects per the configured policy.
    pub async fn get(&self, url: &str) -> Result<Response, DownloadError> {
        match self.redirect_policy {
            RedirectPolicy::Literal => self.get_with_redirects(url).await,
            RedirectPolicy::Standard | RedirectPolicy::None => {
                Ok(self.client.get(url).send().await?)
            }
        }
    }

    async fn get_with_redirects(&self, url: &str) -> Result<Response, DownloadError> {
        let mut current_url = Url::parse(url).map_err(|e| DownloadError::Redirect {
            url: url.to_string(),
            reason: format!("invalid URL: {e}"),
        })?;
        let mut redirect_count = 0;

        loop {
            let response = self.client.get(current_url.clone()).send().await?;

            if !response.status().is_redirection() {
                return Ok(response);
            }

            if redirect_count >= self.max_redirects {
                return Err(DownloadError::Redirect {
                    url: url.to_string(),
                    reason: format!("more than {} redirects", self.max_redirects),
                });
            }

            let location = response
                .headers()
                .get(header::LOCATION)
                .ok_or_else(|| DownloadError::Redirect {
                    url: current_url.to_string(),
                    reason: "redirect without Location header".to_string(),
                })?
                .to_str()
                .map_err(|e| DownloadError::Redirect {
                    url: current_url.to_string(),
                    reason: e.to_string(),
                })?;

            // `join` keeps escapes verbatim
            let next = current_url
                .join(location)
                .map_err(|e| DownloadError::Redirect {
                    url: current_url.to_string(),
                    reason: format!("bad Location {location:?}: {e}"),
                })?;

            trace!(from = %current_url, to = %next, "Following redirect");
            current_url = next;
            redirect_count += 1;
        }
    }

    /// Creates (or truncates) the output file of `job`.
    pub async fn create_output(&self, job: &Job) -> Result<File, DownloadError> {
        let path = job.filepath();

        if self.create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| DownloadError::CreateFile {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        File::create(&path)
            .await
            .map_err(|source| DownloadError::CreateFile { path, source })
    }

    /// Fetches the primary URL of `job` and streams the body into `file`.
    ///
    /// Returns the number of bytes written. Mirrors are never consulted.
    #[instrument(
        name = "download_file",
        level = "debug",
        skip_all,
        fields(url = %job.primary_url(), file = job.filename())
    )]
    pub async fn transfer(
        &self,
        job: &Job,
        mut file: File,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let url = job.primary_url();
        let path = job.filepath();
        if job.sources().len() > 1 {
            debug!(mirrors = job.sources().len() - 1, "Only the primary URL is fetched");
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = self.get(url) => response?,
        };

        trace!(status = %response.status(), "Got response");

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let total_size = response.content_length();
        if let Some(size) = total_size {
            debug!(bytes = size, path = ?path, "Starting download");
        } else {
            debug!(path = ?path, "Starting download of unknown size");
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let reader = StreamReader::new(stream);
        tokio::pin!(reader);

        let mut buffer = vec![0u8; self.buffer_size];
        let mut written: u64 = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(bytes = written, "Download cancelled during transfer");
                    return Err(DownloadError::Cancelled);
                }
                read = reader.read(&mut buffer) => read.map_err(|source| DownloadError::Body {
                    url: url.to_string(),
                    source,
                })?,
            };
            if read == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(bytes = written, "Download cancelled during transfer");
                    return Err(DownloadError::Cancelled);
                }
                result = file.write_all(&buffer[..read]) => {
                    result.map_err(|source| DownloadError::Write {
                        path: path.clone(),
                        source,
                    })?
                }
            }
            written += read as u64;
        }

        file.flush()
            .await
            .map_err(|source| DownloadError::Write {
                path: path.clone(),
                source,
            })?;

        if let Some(size) = total_size {
            if size != written {
                warn!(expected = size, bytes = written, "Body length differs from Content-Length");
            }
        }

        Ok(written)
    }
}
