//! Background task that drains the outbox on an interval.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::OutboxService;
use crate::publisher::EventPublisher;
use crate::store::OutboxStore;

/// Totals accumulated by an [`OutboxWorker`] over its lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    pub messages_processed: usize,
    pub messages_failed: usize,
    /// Drains that failed outright, e.g. because the store was unreachable.
    pub errors: usize,
}

/// A tokio task that repeatedly calls
/// [`OutboxService::process_outbox_messages`].
///
/// Each drain works through every claimable row, so the task always sleeps
/// for the configured poll interval before the next one. Rows that failed are
/// retried on a later poll, never back to back. Stopping cancels the in-flight
/// drain, which hands its unstarted claims back to the store.
///
/// ```ignore
/// let service = Arc::new(OutboxService::new(store, publisher));
/// let worker = OutboxWorker::spawn(service.clone());
///
/// // ... stage and commit events ...
///
/// let stats = worker.stop().await;
/// println!("processed {} messages", stats.messages_processed);
/// ```
pub struct OutboxWorker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl OutboxWorker {
    pub fn spawn<S, P>(service: Arc<OutboxService<S, P>>) -> Self
    where
        S: OutboxStore + 'static,
        P: EventPublisher + 'static,
    {
        Self::spawn_with_token(service, CancellationToken::new())
    }

    /// Spawn a worker that also stops when `cancel` (or a parent of it) is cancelled.
    pub fn spawn_with_token<S, P>(service: Arc<OutboxService<S, P>>, cancel: CancellationToken) -> Self
    where
        S: OutboxStore + 'static,
        P: EventPublisher + 'static,
    {
        let token = cancel.clone();
        let handle = tokio::spawn(async move { run(service, token).await });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Ask the worker to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for it to finish.
    pub async fn stop(mut self) -> WorkerStats {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_else(|err| {
                warn!(error = %err, "outbox worker task ended abnormally");
                WorkerStats::default()
            }),
            None => WorkerStats::default(),
        }
    }
}

impl Drop for OutboxWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S, P>(service: Arc<OutboxService<S, P>>, cancel: CancellationToken) -> WorkerStats
where
    S: OutboxStore,
    P: EventPublisher,
{
    let mut stats = WorkerStats::default();
    let poll_interval = service.config().poll_interval;
    info!(worker_id = %service.config().worker_id, "outbox worker started");

    while !cancel.is_cancelled() {
        stats.polls += 1;

        match service.process_outbox_messages(&cancel).await {
            Ok(result) => {
                stats.messages_processed += result.processed;
                stats.messages_failed += result.failed;
                if result.claimed > 0 {
                    debug!(batches = result.batches, claimed = result.claimed, "outbox poll drained");
                }
            }
            Err(err) => {
                stats.errors += 1;
                warn!(error = %err, "outbox drain failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }

    info!(
        polls = stats.polls,
        processed = stats.messages_processed,
        failed = stats.messages_failed,
        "outbox worker stopped"
    );
    stats
}
