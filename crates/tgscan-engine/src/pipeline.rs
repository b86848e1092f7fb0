//! Live ingestion: subscription -> bounded queue -> worker pool -> sink.
//!
//! ```text
//!  Subscription ──► dispatcher ──(send_timeout)──► mpsc queue ──► worker 1..N ──► MatchSink
//!                       │                                          │
//!                       └─ full for > push_timeout: drop newest    └─ evaluate(criteria.current())
//! ```
//!
//! The dispatcher never waits longer than `push_timeout` for queue space, so
//! a slow sink cannot stall delivery of further notifications. A notification
//! that does not fit in time is dropped and counted.
//!
//! Stopping cancels the subscription; the dispatcher then drops the queue's
//! sender, workers drain what is left, and [`PipelineHandle::stop`] returns
//! once all of them have exited.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tgscan_core::{Message, ScannerConfig};

use crate::error::ScanError;
use crate::filter::{evaluate, CriteriaHandle};
use crate::remote::{RemoteClient, Subscription};
use crate::sink::MatchSink;

const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Longest the dispatcher waits for queue space before dropping.
    pub push_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 1000,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

impl From<&ScannerConfig> for PipelineConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            workers: config.worker_count.max(1),
            queue_capacity: config.queue_capacity.max(1),
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

/// Counters shared by the dispatcher and workers. Survive pipeline restarts
/// when the same `Arc` is handed to the next [`IngestionPipeline::start`].
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    processed: AtomicU64,
    relevant: AtomicU64,
    dropped: AtomicU64,
    sink_errors: AtomicU64,
    panics: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineCounters {
    pub received: u64,
    pub processed: u64,
    pub relevant: u64,
    pub dropped: u64,
    pub sink_errors: u64,
    pub panics: u64,
}

impl PipelineStats {
    #[must_use]
    pub fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            relevant: self.relevant.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }

    /// Counts a relevant match produced outside the live pipeline.
    pub fn record_relevant(&self, n: u64) {
        self.relevant.fetch_add(n, Ordering::Relaxed);
    }

    /// Counts messages evaluated outside the live pipeline.
    pub fn record_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }
}

pub struct IngestionPipeline;

impl IngestionPipeline {
    /// Subscribes to `group_ids` and spawns the dispatcher and workers.
    ///
    /// # Errors
    ///
    /// Returns the converted remote error if the subscription is refused.
    pub async fn start(
        client: &dyn RemoteClient,
        group_ids: HashSet<i64>,
        criteria: CriteriaHandle,
        sink: Arc<dyn MatchSink>,
        config: PipelineConfig,
        stats: Arc<PipelineStats>,
    ) -> Result<PipelineHandle, ScanError> {
        let subscription = client.subscribe(&group_ids).await?;
        let cancel = subscription.cancel_token();
        let (tx, rx) = mpsc::channel::<Message>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (1..=config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&rx),
                    criteria.clone(),
                    Arc::clone(&sink),
                    Arc::clone(&stats),
                ))
            })
            .collect();
        let dispatcher = tokio::spawn(dispatch(
            subscription,
            tx,
            config.push_timeout,
            Arc::clone(&stats),
        ));

        tracing::info!(
            groups = group_ids.len(),
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "ingestion pipeline started"
        );

        Ok(PipelineHandle {
            cancel,
            dispatcher,
            workers,
            group_ids,
        })
    }
}

/// Running pipeline. Dropping it without [`stop`](Self::stop) leaves the
/// tasks running until the remote feed ends.
#[derive(Debug)]
pub struct PipelineHandle {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    group_ids: HashSet<i64>,
}

impl PipelineHandle {
    #[must_use]
    pub fn group_ids(&self) -> &HashSet<i64> {
        &self.group_ids
    }

    /// `false` once the dispatcher has exited (stopped or feed ended).
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.dispatcher.is_finished()
    }

    /// Unsubscribes, lets workers drain the queue, and waits for all tasks.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::warn!(error = %e, "pipeline dispatcher ended abnormally");
        }
        for (idx, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                tracing::warn!(worker = idx + 1, error = %e, "pipeline worker ended abnormally");
            }
        }
        tracing::info!("ingestion pipeline stopped");
    }
}

async fn dispatch(
    mut subscription: Subscription,
    tx: mpsc::Sender<Message>,
    push_timeout: Duration,
    stats: Arc<PipelineStats>,
) {
    while let Some(message) = subscription.next().await {
        stats.received.fetch_add(1, Ordering::Relaxed);
        match tx.send_timeout(message, push_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(dropped)) => {
                stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    group_id = dropped.group_id,
                    message_id = dropped.id,
                    "pipeline queue full; dropping notification"
                );
            }
            Err(SendTimeoutError::Closed(_)) => break,
        }
    }
    tracing::debug!("pipeline dispatcher exited");
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    criteria: CriteriaHandle,
    sink: Arc<dyn MatchSink>,
    stats: Arc<PipelineStats>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(message) = next else {
            break;
        };
        let (group_id, message_id) = (message.group_id, message.id);

        let outcome = AssertUnwindSafe(process(message, &criteria, sink.as_ref(), &stats))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            stats.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                worker,
                group_id,
                message_id,
                panic = panic_message(panic.as_ref()),
                "worker panicked while processing message; continuing"
            );
        }
    }
    tracing::debug!(worker, "pipeline worker exited");
}

async fn process(
    message: Message,
    criteria: &CriteriaHandle,
    sink: &dyn MatchSink,
    stats: &PipelineStats,
) {
    let criteria = criteria.current();
    let result = evaluate(message, &criteria);
    stats.processed.fetch_add(1, Ordering::Relaxed);
    if !result.is_relevant {
        return;
    }

    stats.relevant.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        group_id = result.message.group_id,
        message_id = result.message.id,
        score = result.score,
        "relevant live message"
    );
    let (group_id, message_id) = (result.message.group_id, result.message.id);
    if let Err(e) = sink.accept(result).await {
        stats.sink_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(group_id, message_id, error = %e, "sink rejected live match");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
