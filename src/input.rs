//! Input parsing
//!
//! Turns raw input lines into [`Job`]s. Two formats are understood:
//!
//! - a plain list, one URL per line
//! - aria2 input files, where a URL line (optionally several tab-separated
//!   mirrors) may be followed by indented `key=value` option lines
//!
//! Unreadable inputs are logged and skipped; whatever could be parsed is kept.

use std::{
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use regex::Regex;
use tracing::{debug, error, trace};

use crate::downloader::Job;

/// `out=NAME` option of the most recent aria2 entry
static OUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+out=(?P<out>.*)$").expect("static regex"));
/// `dir=PATH` option of the most recent aria2 entry
static DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+dir=(?P<dir>.*)$").expect("static regex"));

/// How an input file is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    #[default]
    Plain,
    Aria2,
}

impl InputFormat {
    pub fn from_aria2_flag(aria2: bool) -> Self {
        if aria2 { Self::Aria2 } else { Self::Plain }
    }

    pub fn parse<S: AsRef<str>>(self, lines: &[S], destination: &Path) -> Vec<Job> {
        match self {
            Self::Plain => parse_plain(lines, destination),
            Self::Aria2 => parse_aria2(lines, destination),
        }
    }
}

fn is_url_line(line: &str) -> bool {
    line.starts_with("http")
}

/// Where input lines come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// `-` is standard input, anything else a file path
    pub fn from_path(path: &Path) -> Self {
        if path == Path::new("-") {
            Self::Stdin
        } else {
            Self::File(path.to_path_buf())
        }
    }

    fn open(&self) -> io::Result<Box<dyn Read>> {
        Ok(match self {
            Self::Stdin => Box::new(io::stdin()),
            Self::File(path) => Box::new(std::fs::File::open(path)?),
        })
    }
}

/// Reads every line of `path`; `-` means standard input.
///
/// Errors are logged and end the read early, keeping the lines read so far.
pub fn read_lines(path: &Path) -> Vec<String> {
    let source = InputSource::from_path(path);
    trace!(source = ?source, "Opening input");
    match source.open() {
        Ok(reader) => read_lines_from(reader, path),
        Err(e) => {
            error!(path = ?path, error = %e, "Failed to open input file");
            Vec::new()
        }
    }
}

fn read_lines_from(reader: impl Read, path: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for line in BufReader::new(reader).lines() {
        match line {
            Ok(line) => lines.push(line),
            Err(e) => {
                error!(path = ?path, error = %e, "Failed to read input file");
                break;
            }
        }
    }
    debug!(path = ?path, lines = lines.len(), "Read input file");
    lines
}

/// One job per line that starts with `http`. Blank lines, `#` comments and
/// anything else are ignored.
pub fn parse_plain<S: AsRef<str>>(lines: &[S], destination: &Path) -> Vec<Job> {
    lines
        .iter()
        .map(|line| line.as_ref().trim_end())
        .filter(|line| is_url_line(line))
        .map(|url| Job::from_url(url, destination))
        .collect()
}

/// aria2 input: a line starting with `http` opens an entry (tab-separated
/// mirrors allowed). Indented `out=` and `dir=` lines set the filename and
/// directory of the most recent entry; option lines before the first entry and
/// unknown options are ignored.
pub fn parse_aria2<S: AsRef<str>>(lines: &[S], destination: &Path) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::new();

    for line in lines.iter().map(|line| line.as_ref().trim_end()) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if is_url_line(line) {
            let sources: Vec<String> = line
                .split('\t')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if let Some(job) = Job::new(sources, destination) {
                jobs.push(job);
            }
            continue;
        }

        let Some(current) = jobs.pop() else {
            trace!(line, "Option line before any entry");
            continue;
        };

        let current = if let Some(caps) = OUT_RE.captures(line) {
            current.with_filename(&caps["out"])
        } else if let Some(caps) = DIR_RE.captures(line) {
            current.with_destination(PathBuf::from(&caps["dir"]))
        } else {
            trace!(line, "Ignoring unsupported aria2 line");
            current
        };
        jobs.push(current);
    }

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest() -> PathBuf {
        PathBuf::from("/tmp/out")
    }

    #[test]
    fn test_plain_list() {
        let lines = [
            "http://x/a.bin",
            "",
            "# http://x/commented.bin",
            "ftp://x/ignored.bin",
            "https://x/dir/b.tar.gz\r",
            "  http://x/indented.bin",
        ];
        let jobs = parse_plain(&lines, &dest());

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].primary_url(), "http://x/a.bin");
        assert_eq!(jobs[0].filename(), "a.bin");
        assert_eq!(jobs[1].primary_url(), "https://x/dir/b.tar.gz");
        assert_eq!(jobs[1].filepath(), PathBuf::from("/tmp/out/b.tar.gz"));
    }

    #[test]
    fn test_aria2_out_overrides_filename() {
        let text = "http://x/a.bin\n  out=renamed.bin\n";
        let lines: Vec<&str> = text.lines().collect();
        let jobs = parse_aria2(&lines, &dest());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].filename(), "renamed.bin");
        assert_eq!(jobs[0].primary_url(), "http://x/a.bin");
    }

    #[test]
    fn test_aria2_without_out_uses_basename() {
        let lines = ["http://x/a.bin", "http://x/b.bin", "\tout=b2.bin"];
        let jobs = parse_aria2(&lines, &dest());

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].filename(), "a.bin");
        assert_eq!(jobs[1].filename(), "b2.bin");
    }

    #[test]
    fn test_aria2_mirrors_are_kept() {
        let lines = ["http://a/f.iso\thttp://b/f.iso\t", "  out=f.iso"];
        let jobs = parse_aria2(&lines, &dest());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].sources(), ["http://a/f.iso", "http://b/f.iso"]);
        assert_eq!(jobs[0].primary_url(), "http://a/f.iso");
    }

    #[test]
    fn test_aria2_option_before_entry_is_ignored() {
        let lines = ["  out=orphan.bin", "# comment", "http://x/a.bin"];
        let jobs = parse_aria2(&lines, &dest());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].filename(), "a.bin");
    }

    #[test]
    fn test_aria2_dir_and_unknown_options() {
        let lines = [
            "http://x/a.bin",
            "  dir=/srv/files",
            "  split=5",
            "out=not-indented.bin",
        ];
        let jobs = parse_aria2(&lines, &dest());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].filepath(), PathBuf::from("/srv/files/a.bin"));
    }

    #[test]
    fn test_format_dispatch() {
        let lines = ["http://x/a.bin", "  out=b.bin"];
        assert_eq!(InputFormat::from_aria2_flag(false), InputFormat::Plain);
        assert_eq!(
            InputFormat::Plain.parse(&lines, &dest())[0].filename(),
            "a.bin"
        );
        assert_eq!(
            InputFormat::from_aria2_flag(true).parse(&lines, &dest())[0].filename(),
            "b.bin"
        );
    }

    #[test]
    fn test_read_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "http://x/a.bin\n\nhttp://x/b.bin\n").unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines, vec!["http://x/a.bin", "", "http://x/b.bin"]);
    }

    #[test]
    fn test_dash_means_stdin() {
        assert_eq!(InputSource::from_path(Path::new("-")), InputSource::Stdin);
        assert_eq!(
            InputSource::from_path(Path::new("./-")),
            InputSource::File(PathBuf::from("./-"))
        );
        assert_eq!(
            InputSource::from_path(Path::new("list.txt")),
            InputSource::File(PathBuf::from("list.txt"))
        );
    }

    #[test]
    fn test_piped_lines_feed_the_parsers() {
        let piped = io::Cursor::new("http://x/a.bin\r\n  out=b.bin\r\n");
        let lines = read_lines_from(piped, Path::new("-"));
        let jobs = InputFormat::Aria2.parse(&lines, &dest());

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].filename(), "b.bin");
    }

    struct FailsAfter(&'static [u8]);

    impl Read for FailsAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(io::Error::other("pipe closed"));
            }
            let n = self.0.len().min(buf.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_error_keeps_earlier_lines() {
        let lines = read_lines_from(FailsAfter(b"http://x/a.bin\n"), Path::new("-"));
        assert_eq!(lines, vec!["http://x/a.bin"]);
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_lines(&dir.path().join("nope.txt")).is_empty());
    }
}
