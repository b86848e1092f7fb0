//! Outbound match delivery.
//!
//! Backfill and the live pipeline hand every relevant [`MatchResult`] to a
//! [`MatchSink`]. Storage is the sink's business; the engine only logs
//! sink failures and moves on.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use tgscan_core::MatchResult;

use crate::error::SinkError;

#[async_trait]
pub trait MatchSink: Send + Sync {
    /// Accepts one relevant result.
    async fn accept(&self, result: MatchResult) -> Result<(), SinkError>;
}

/// Forwards results into a bounded mpsc channel, waiting for room.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MatchResult>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<MatchResult>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with the receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<MatchResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MatchSink for ChannelSink {
    async fn accept(&self, result: MatchResult) -> Result<(), SinkError> {
        self.tx.send(result).await.map_err(|_| SinkError::Closed)
    }
}

/// Drops results whose `(group_id, message_id, text)` was already forwarded.
///
/// Backfill and the live feed can both see a message posted during
/// start-up; this keeps the downstream store from receiving it twice. The
/// remembered set is bounded and forgets oldest entries first.
pub struct DedupSink<S> {
    inner: S,
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Default)]
struct Seen {
    set: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

impl<S: MatchSink> DedupSink<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::with_capacity(inner, DEFAULT_DEDUP_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Records `key`; returns `false` if it was already present.
    fn remember(&self, key: [u8; 32]) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !seen.set.insert(key) {
            return false;
        }
        seen.order.push_back(key);
        while seen.order.len() > self.capacity {
            if let Some(old) = seen.order.pop_front() {
                seen.set.remove(&old);
            }
        }
        true
    }

    fn forget(&self, key: &[u8; 32]) {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if seen.set.remove(key) {
            seen.order.retain(|k| k != key);
        }
    }
}

fn content_hash(result: &MatchResult) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(result.message.group_id.to_le_bytes());
    hasher.update(result.message.id.to_le_bytes());
    hasher.update(result.message.text.as_bytes());
    hasher.finalize().into()
}

#[async_trait]
impl<S: MatchSink> MatchSink for DedupSink<S> {
    async fn accept(&self, result: MatchResult) -> Result<(), SinkError> {
        let key = content_hash(&result);
        if !self.remember(key) {
            tracing::debug!(
                group_id = result.message.group_id,
                message_id = result.message.id,
                "duplicate match suppressed"
            );
            return Ok(());
        }
        let outcome = self.inner.accept(result).await;
        if outcome.is_err() {
            // Not delivered; allow a later attempt through.
            self.forget(&key);
        }
        outcome
    }
}
