// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Async ingest worker pool. A bounded FIFO of jobs, `N` workers,
//! drop-on-full admission, and a drain-then-deadline shutdown. No retry
//! and no persistence of the queue: an in-memory loss on crash is an
//! accepted trade-off, not a bug to paper over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::processor::EventProcessor;

/// One unit of queued work: a project's batch of raw events.
#[derive(Debug, Clone)]
pub struct Job {
    pub project_id: String,
    pub events: Vec<traceforge_core::IngestEvent>,
}

/// Counters an operator watches to size the pool and catch silent data
/// loss from drop-on-full admission.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
}

impl PoolStats {
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Handle used by the ingest service to submit jobs; cheap to clone, one
/// per worker pool.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    sender: mpsc::Sender<Job>,
    stats: Arc<PoolStats>,
}

impl WorkerPoolHandle {
    /// Non-blocking. Returns `false` (and logs at warn level) when the
    /// queue is full — the caller still reports `processed = len(events)`
    /// to stay best-effort rather than rejecting the batch.
    pub fn enqueue(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("queue full, dropping job");
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }

    #[cfg(test)]
    pub fn for_test(sender: mpsc::Sender<Job>, stats: Arc<PoolStats>) -> Self {
        Self { sender, stats }
    }
}

/// Owns the receiving end and the worker tasks; dropping it (or calling
/// [`WorkerPool::stop`]) closes the queue.
pub struct WorkerPool {
    handle: WorkerPoolHandle,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `worker_count` long-running workers sharing one bounded
    /// queue of capacity `buffer_size` and one [`EventProcessor`].
    pub fn start(
        buffer_size: usize,
        worker_count: usize,
        job_timeout: Duration,
        processor: Arc<EventProcessor>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let stats = Arc::new(PoolStats::default());

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let processor = processor.clone();
            let stats = stats.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(id, receiver, processor, stats, job_timeout).await;
            }));
        }

        info!(worker_count, buffer_size, "ingest worker pool started");

        Self {
            handle: WorkerPoolHandle { sender, stats },
            workers,
        }
    }

    pub fn handle(&self) -> WorkerPoolHandle {
        self.handle.clone()
    }

    /// Dropping the sender closes the queue, so each
    /// worker's `recv` drains whatever is already buffered and then
    /// returns `None` on its own. Waits up to `timeout` for that to
    /// finish; exceeding it logs and returns regardless, leaving any
    /// still-running job to finish or hit its own per-job timeout.
    pub async fn stop(self, timeout: Duration) {
        drop(self.handle);

        let drain = futures::future::join_all(self.workers);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("worker pool did not drain within shutdown timeout");
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    processor: Arc<EventProcessor>,
    stats: Arc<PoolStats>,
    job_timeout: Duration,
) {
    loop {
        let job = receiver.lock().await.recv().await;

        let Some(job) = job else {
            info!(worker = id, "worker shutting down, queue drained");
            break;
        };

        process_job(&processor, job, job_timeout, &stats).await;
    }
}

/// Bounds the event processor's run with a per-job deadline. Per-group
/// failures are already logged inside [`EventProcessor::process_events`];
/// this only tracks counters, since async mode has no caller left to
/// report errors to.
async fn process_job(processor: &EventProcessor, job: Job, timeout: Duration, stats: &PoolStats) {
    let project_id = job.project_id.clone();
    let result = tokio::time::timeout(timeout, processor.process_events(&job.project_id, &job.events)).await;

    match result {
        Ok(failures) if failures.is_empty() => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(_failures) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            stats.timed_out.fetch_add(1, Ordering::Relaxed);
            error!(project_id, "ingest job exceeded timeout, abandoning");
        }
    }
}

/// Convenience used by the ingest service's sync mode, where there is no
/// queue and per-event failures must surface to the caller (indexed by
/// original batch position) rather than only a log line.
pub async fn run_inline(
    processor: &EventProcessor,
    project_id: &str,
    events: &[traceforge_core::IngestEvent],
) -> Vec<(usize, String)> {
    processor.process_events(project_id, events).await
}
