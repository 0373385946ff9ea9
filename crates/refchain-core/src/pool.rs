//! Shared worker pool for parallel batch resolution.
//!
//! A fixed set of worker tasks pulls citations off a single mpmc queue.
//! Dropping a job's result receiver or cancelling the pool's token stops the
//! work early. A panicking job comes back FAILED from
//! [`Orchestrator::resolve`] and never takes its worker down.

use std::sync::Arc;

use log::debug;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::resolver::Orchestrator;
use crate::{Citation, ResolutionResult};

/// A citation submitted to the pool.
pub struct ResolveJob {
    pub citation: Citation,
    pub result_tx: oneshot::Sender<ResolutionResult>,
}

/// A pool of worker tasks resolving citations against one orchestrator.
///
/// Submit jobs via [`submit()`](ResolutionPool::submit); each job's result
/// arrives on its own oneshot receiver.
pub struct ResolutionPool {
    job_tx: async_channel::Sender<ResolveJob>,
    workers_handle: JoinHandle<()>,
}

impl ResolutionPool {
    /// Create a pool with `num_workers` concurrent workers.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        cancel: CancellationToken,
        num_workers: usize,
    ) -> Self {
        let (job_tx, job_rx) = async_channel::unbounded::<ResolveJob>();

        let workers_handle = tokio::spawn(async move {
            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers.max(1) {
                let rx = job_rx.clone();
                let orchestrator = orchestrator.clone();
                let cancel = cancel.clone();
                handles.push(tokio::spawn(worker_loop(rx, orchestrator, cancel)));
            }
            // Workers exit once the sender closes and the queue drains.
            drop(job_rx);
            for h in handles {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            workers_handle,
        }
    }

    /// Submit a job. Dropped silently if the pool is already shut down; the
    /// job's receiver then reports a closed channel.
    pub async fn submit(&self, job: ResolveJob) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait for all workers to finish.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.workers_handle.await;
    }
}

async fn worker_loop(
    job_rx: async_channel::Receiver<ResolveJob>,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
) {
    while let Ok(job) = job_rx.recv().await {
        let ResolveJob {
            citation,
            mut result_tx,
        } = job;

        if cancel.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = result_tx.closed() => continue,
            _ = cancel.cancelled() => break,
            result = orchestrator.resolve(&citation) => result,
        };

        let _ = result_tx.send(result);
    }

    // Pending jobs are dropped, so their receivers see the pool go away.
    if cancel.is_cancelled() {
        job_rx.close();
        let mut dropped = 0usize;
        while job_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("resolution pool cancelled, {} queued job(s) dropped", dropped);
        }
    }
}
