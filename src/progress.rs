//! Progress reporting
//!
//! Workers emit [`ProgressEvent`]s; a reporter turns them into something a
//! human can look at. Each worker owns one display slot for its whole life, so
//! a bar follows a worker, not a job.

use std::{
    io::{self, Write},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;

use crate::downloader::{ProgressEvent, ProgressKind};

/// Sink for worker progress events. Must tolerate concurrent calls from every
/// worker.
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: ProgressEvent);

    /// Called once after every worker has stopped
    fn finish(&self) {}
}

/// Draws nothing, only logs events at debug level
#[derive(Debug, Default)]
pub struct QuietReporter;

impl ProgressReporter for QuietReporter {
    fn on_event(&self, event: ProgressEvent) {
        debug!(
            worker = event.worker,
            kind = ?event.kind,
            elapsed = ?event.elapsed,
            "Progress event"
        );
    }
}

/// Per-worker display state
struct Slot {
    bar: ProgressBar,
    completed: AtomicU64,
    busy_millis: AtomicU64,
}

impl Slot {
    /// Mean time per completed job on this slot
    fn average(&self) -> Duration {
        let completed = self.completed.load(Ordering::Relaxed);
        if completed == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.busy_millis.load(Ordering::Relaxed) / completed)
    }
}

/// Multi-line terminal display: one spinner per worker slot plus an overall
/// bar counting finished jobs.
pub struct BarReporter {
    multi: MultiProgress,
    slots: Vec<Slot>,
    total: ProgressBar,
}

impl BarReporter {
    /// Adds the worker lines and the total bar to `multi`, which may be shared
    /// with a [`LogWriter`].
    pub fn new(multi: MultiProgress, workers: usize, total_jobs: u64) -> Self {
        let slot_style = ProgressStyle::with_template("{prefix:>10} {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let total_style = ProgressStyle::with_template(
            "{prefix:>10} [{bar:40.green/white}] {pos}/{len} ({elapsed})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");

        let slots = (0..workers)
            .map(|worker| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(slot_style.clone());
                bar.set_prefix(format!("worker #{worker}"));
                bar.set_message("waiting");
                Slot {
                    bar,
                    completed: AtomicU64::new(0),
                    busy_millis: AtomicU64::new(0),
                }
            })
            .collect();

        let total = multi.add(ProgressBar::new(total_jobs));
        total.set_style(total_style);
        total.set_prefix("total");

        Self {
            multi,
            slots,
            total,
        }
    }

    /// Jobs completed so far by `worker`
    pub fn completed(&self, worker: usize) -> u64 {
        self.slots
            .get(worker)
            .map(|slot| slot.completed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Jobs completed across every slot
    pub fn total_completed(&self) -> u64 {
        self.total.position()
    }
}

impl ProgressReporter for BarReporter {
    fn on_event(&self, event: ProgressEvent) {
        let Some(slot) = self.slots.get(event.worker) else {
            debug!(worker = event.worker, "Progress event for unknown slot");
            return;
        };

        match event.kind {
            ProgressKind::Started => {
                slot.bar.set_message("downloading");
                slot.bar.enable_steady_tick(Duration::from_millis(120));
            }
            ProgressKind::Completed => {
                let millis = u64::try_from(event.elapsed.as_millis()).unwrap_or(u64::MAX);
                slot.busy_millis.fetch_add(millis, Ordering::Relaxed);
                let done = slot.completed.fetch_add(1, Ordering::Relaxed) + 1;

                slot.bar.disable_steady_tick();
                slot.bar.set_message(format!(
                    "{done} done, last {:.1?}, avg {:.1?}",
                    event.elapsed,
                    slot.average()
                ));
                self.total.inc(1);
            }
        }
    }

    fn finish(&self) {
        for (worker, slot) in self.slots.iter().enumerate() {
            let done = self.completed(worker);
            slot.bar.finish_with_message(format!("{done} done"));
        }
        self.total.finish();
        debug!(completed = self.total_completed(), "Progress display finished");
        if let Err(e) = self.multi.clear() {
            debug!(error = %e, "Failed to clear progress display");
        }
    }
}

/// `tracing` writer for stderr that hides the bars while a line is written,
/// so log output never tears the display.
#[derive(Clone, Default)]
pub struct LogWriter {
    multi: Option<MultiProgress>,
}

impl LogWriter {
    pub fn new(multi: Option<MultiProgress>) -> Self {
        Self { multi }
    }

    fn with_stderr<T>(&self, f: impl FnOnce(&mut io::Stderr) -> T) -> T {
        let mut stderr = io::stderr();
        match &self.multi {
            Some(multi) => multi.suspend(|| f(&mut stderr)),
            None => f(&mut stderr),
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_stderr(|stderr| stderr.write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.with_stderr(|stderr| stderr.write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_stderr(|stderr| stderr.flush())
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Keeps every event in memory, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
    finished: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind == ProgressKind::Completed)
            .count()
    }

    pub(crate) fn started_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind == ProgressKind::Started)
            .count()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
impl ProgressReporter for RecordingReporter {
    fn on_event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}
