//! Job queue
//!
//! A bounded channel sized to the whole batch, so the producer never waits on
//! a worker. Workers share one receiving end and race for jobs; a receive on a
//! closed, empty queue yields `None`.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use super::models::Job;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Job queue is closed")]
pub struct QueueClosed;

#[derive(Debug)]
pub struct JobQueue {
    sender: Option<mpsc::Sender<Job>>,
    receiver: JobReceiver,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue that can hold `capacity` jobs without blocking the producer.
    pub fn with_capacity(capacity: usize) -> Self {
        // tokio refuses zero-capacity channels
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender: Some(sender),
            receiver: JobReceiver(Arc::new(Mutex::new(receiver))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A receiving handle for a worker
    pub fn receiver(&self) -> JobReceiver {
        self.receiver.clone()
    }

    /// Sends every job, in iteration order. Returns how many were sent.
    pub async fn enqueue<I>(&self, jobs: I) -> Result<usize, QueueClosed>
    where
        I: IntoIterator<Item = Job>,
    {
        let sender = self.sender.as_ref().ok_or(QueueClosed)?;
        let mut sent = 0;
        for job in jobs {
            trace!(url = %job.primary_url(), "Enqueueing job");
            // Every receiver is gone only if all workers died
            sender.send(job).await.map_err(|_| QueueClosed)?;
            sent += 1;
        }
        debug!(count = sent, "Jobs enqueued");
        Ok(sent)
    }

    /// Signals that no more jobs will be sent.
    pub fn close(&mut self) {
        if self.is_closed() {
            warn!("Job queue closed twice");
            return;
        }
        self.sender = None;
        debug!("Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }
}

/// Shared receiving end of a [`JobQueue`]
#[derive(Debug, Clone)]
pub struct JobReceiver(Arc<Mutex<mpsc::Receiver<Job>>>);

impl JobReceiver {
    /// Next job, or `None` once the queue is closed and empty
    pub async fn recv(&self) -> Option<Job> {
        self.0.lock().await.recv().await
    }

    /// Takes every job still sitting in the queue without waiting.
    pub async fn drain(&self) -> Vec<Job> {
        let mut receiver = self.0.lock().await;
        let mut jobs = Vec::new();
        while let Ok(job) = receiver.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| Job::from_url(format!("http://x/{i}.bin"), "out"))
            .collect()
    }

    #[tokio::test]
    async fn test_submission_order_is_preserved() {
        let mut queue = JobQueue::with_capacity(5);
        let sent = queue.enqueue(jobs(5)).await.unwrap();
        queue.close();
        assert_eq!(sent, 5);

        let receiver = queue.receiver();
        let mut names = Vec::new();
        while let Some(job) = receiver.recv().await {
            names.push(job.filename().to_string());
        }
        assert_eq!(names, vec!["0.bin", "1.bin", "2.bin", "3.bin", "4.bin"]);
    }

    #[tokio::test]
    async fn test_closed_empty_queue_yields_none() {
        let mut queue = JobQueue::with_capacity(0);
        assert_eq!(queue.capacity(), 1);
        queue.close();
        assert!(queue.is_closed());
        assert!(queue.receiver().recv().await.is_none());
        // and keeps doing so
        assert!(queue.receiver().recv().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let mut queue = JobQueue::with_capacity(1);
        queue.close();
        assert_eq!(queue.enqueue(jobs(1)).await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_each_job_received_once() {
        let mut queue = JobQueue::with_capacity(20);
        queue.enqueue(jobs(20)).await.unwrap();
        queue.close();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let receiver = queue.receiver();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(job) = receiver.recv().await {
                    got.push(job.filename().to_string());
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        let mut expected: Vec<String> = (0..20).map(|i| format!("{i}.bin")).collect();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn test_drain_takes_leftovers() {
        let mut queue = JobQueue::with_capacity(3);
        queue.enqueue(jobs(3)).await.unwrap();
        queue.close();
        let receiver = queue.receiver();
        assert!(receiver.recv().await.is_some());
        assert_eq!(receiver.drain().await.len(), 2);
        assert!(receiver.recv().await.is_none());
    }
}
