//! Sharded reconciliation workers

use crate::filter::EventFilter;
use crate::models::{PodEvent, PodRef};
use crate::observability::{AuxMetrics, StructuredLogger};
use crate::reconciler::Reconciler;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of worker tasks (default: 4)
    pub workers: usize,
    /// Channel capacity per worker (default: 256)
    pub queue_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Routes admitted events to a fixed set of workers
///
/// A pod always lands on the same worker, so it is never reconciled by two
/// workers at once, while different pods proceed concurrently.
pub struct WorkerPool {
    filter: EventFilter,
    senders: Vec<mpsc::Sender<PodRef>>,
    handles: Vec<JoinHandle<()>>,
    metrics: AuxMetrics,
}

impl WorkerPool {
    pub fn start(
        config: WorkerConfig,
        filter: EventFilter,
        reconciler: Reconciler,
        logger: StructuredLogger,
        metrics: AuxMetrics,
    ) -> Self {
        let workers = config.workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                id,
                rx,
                reconciler.clone(),
                logger.child(&format!("worker-{}", id)),
                metrics.clone(),
            )));
        }

        Self {
            filter,
            senders,
            handles,
            metrics,
        }
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Queue the event's pod for reconciliation if the filter admits it
    ///
    /// Waits while the target worker's queue is full. Returns whether the
    /// event was queued.
    pub async fn dispatch(&self, event: PodEvent) -> bool {
        let admitted = self.filter.admit(&event);
        self.metrics.inc_event(admitted);
        if !admitted {
            debug!(pod = %event.pod, kind = ?event.kind, "event filtered out");
            return false;
        }

        let shard = shard_for(&event.pod, self.senders.len());
        match self.senders[shard].send(event.pod).await {
            Ok(()) => true,
            Err(err) => {
                warn!(pod = %err.0, worker = shard, "worker stopped, dropping event");
                false
            }
        }
    }

    /// Close the queues and wait for in-flight reconciliations
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
    }
}

/// Stable worker index for a pod
pub fn shard_for(pod: &PodRef, workers: usize) -> usize {
    if workers <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    pod.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<PodRef>,
    reconciler: Reconciler,
    logger: StructuredLogger,
    metrics: AuxMetrics,
) {
    debug!(worker = id, "reconciliation worker started");

    while let Some(pod) = rx.recv().await {
        match reconciler.reconcile(&pod).await {
            Ok(outcome) => {
                debug!(worker = id, pod = %pod, outcome = outcome.label(), "reconciled");
                metrics.inc_reconciliation(outcome.label());
            }
            Err(err) => {
                metrics.inc_reconciliation("error");
                logger.log_reconcile_error(&pod, &err);
            }
        }
    }

    debug!(worker = id, "reconciliation worker stopped");
}
