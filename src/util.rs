use std::{num::NonZeroUsize, thread};

use url::Url;

/// Name used when a URL has neither a path segment nor a host
const FALLBACK_FILENAME: &str = "index.html";

/// Resolves the configured thread count into a worker count.
///
/// Anything `<= 0` means "use the host's available parallelism", which is
/// always at least 1.
pub fn effective_worker_count(threads: i64) -> usize {
    if threads > 0 {
        return usize::try_from(threads).unwrap_or(usize::MAX);
    }
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Last non-empty path segment of a URL, exactly as written in the input.
///
/// Nothing is decoded or normalised: `a%2Fb.bin` stays `a%2Fb.bin` and
/// `ä.bin` stays `ä.bin`. Query and fragment are dropped. A URL without a path
/// segment is named after its host.
pub fn url_basename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |slash| &rest[slash..]),
        None => without_query,
    };

    if let Some(segment) = path.rsplit('/').find(|s| !s.is_empty()) {
        return segment.to_string();
    }

    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}
