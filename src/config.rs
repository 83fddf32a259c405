//! Config module for parget
//!
//! Every option can be given on the command line or through a `PARGET_*`
//! environment variable (a `.env` file is loaded first).

use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::downloader::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_REDIRECTS, DownloadError, Downloader, FailurePolicy,
    RedirectPolicy,
};
use crate::input::InputFormat;
use crate::util::effective_worker_count;

#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Config {
    /// Number of concurrent downloads; 0 or less uses every available core
    #[clap(
        short = 't',
        long,
        env = "PARGET_THREADS",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    pub threads: i64,

    /// Don't draw progress bars
    #[clap(short, long, env = "PARGET_QUIET", default_value = "false")]
    pub quiet: bool,

    /// Directory files are written into
    #[clap(short, long, env = "PARGET_DESTINATION", default_value = ".")]
    pub destination: PathBuf,

    /// Treat input files as aria2 input files (`out=` / `dir=` options)
    #[clap(short, long, env = "PARGET_ARIA2", default_value = "false")]
    pub aria2: bool,

    /// Copy buffer size in bytes
    #[clap(
        short,
        long,
        env = "PARGET_BUFFER_SIZE",
        default_value_t = DEFAULT_BUFFER_SIZE,
        value_parser = parse_buffer_size
    )]
    pub buffer_size: usize,

    /// Input file with URLs, `-` for stdin; repeat for several files
    #[clap(short, long, env = "PARGET_INPUT")]
    pub input: Vec<PathBuf>,

    /// How to follow HTTP redirects
    #[clap(long, env = "PARGET_REDIRECT_POLICY", value_enum, default_value = "literal")]
    pub redirect_policy: RedirectPolicy,

    /// Maximum number of redirects per request
    #[clap(long, env = "PARGET_MAX_REDIRECTS", default_value_t = DEFAULT_MAX_REDIRECTS)]
    pub max_redirects: usize,

    /// Per-request timeout in seconds, unlimited if unset
    #[clap(long, env = "PARGET_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Stop starting new downloads after the first failure
    #[clap(long, env = "PARGET_FAIL_FAST", default_value = "false")]
    pub fail_fast: bool,

    /// Create missing destination directories
    #[clap(long, env = "PARGET_CREATE_DIRS", default_value = "false")]
    pub create_dirs: bool,

    /// URLs to download directly
    pub urls: Vec<String>,
}

impl Config {
    pub fn workers(&self) -> usize {
        effective_worker_count(self.threads)
    }

    pub fn input_format(&self) -> InputFormat {
        InputFormat::from_aria2_flag(self.aria2)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        if self.fail_fast {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Skip
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Downloader configured from these options
    pub fn downloader(&self) -> Result<Downloader, DownloadError> {
        Downloader::builder()
            .redirect_policy(self.redirect_policy)
            .max_redirects(self.max_redirects)
            .buffer_size(self.buffer_size)
            .timeout(self.timeout())
            .create_dirs(self.create_dirs)
            .build()
    }
}

fn parse_buffer_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("buffer size must be at least 1 byte".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(e.to_string()),
    }
}

pub fn config() -> Config {
    Config::parse()
}
