//! Walks the account's dialog list and collects scannable groups.
//!
//! Progress is kept in a lock-protected set owned by the engine, so a
//! status query can read it while the walk runs and a timeout or
//! cancellation still leaves every group found so far in the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tgscan_core::{Group, ScannerConfig};

use crate::error::ScanError;
use crate::rate_limit::RateLimiter;
use crate::remote::{DialogCursor, RemoteClient};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Dialogs processed between limiter grants.
const PACE_EVERY: u64 = 10;
/// Dialogs processed between progress log lines.
const LOG_EVERY: u64 = 50;
/// Upper bound on dialog pages per run; guards against a cycling cursor.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub timeout: Duration,
    pub page_size: usize,
}

impl From<&ScannerConfig> for DiscoveryConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.discovery_timeout_secs),
            page_size: config.history_page_size.max(1),
        }
    }
}

/// Outcome of one discovery run. Always carries the groups found so far.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub groups: Vec<Group>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Dialogs examined, including skipped user dialogs.
    pub processed: u64,
    /// Non-fatal error that ended the walk early, if any.
    pub interrupted_by: Option<String>,
}

impl DiscoveryResult {
    /// `true` if the dialog list was walked to its end or every selector
    /// was located.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.timed_out && !self.cancelled && self.interrupted_by.is_none()
    }
}

enum WalkEnd {
    Exhausted,
    AllSelectorsFound,
    Cancelled,
}

pub struct DiscoveryEngine {
    client: Arc<dyn RemoteClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    config: DiscoveryConfig,
    found: Mutex<Vec<Group>>,
    processed: AtomicU64,
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            config,
            found: Mutex::new(Vec::new()),
            processed: AtomicU64::new(0),
        }
    }

    /// Groups collected so far in the current (or last) run.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Group> {
        self.found.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn found_count(&self) -> usize {
        self.found.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Runs one discovery pass.
    ///
    /// With a non-empty `selectors` list only matching groups are kept and
    /// the walk stops once every selector has matched at least one group.
    /// Hitting the wall-clock timeout, cancellation, or a non-fatal remote
    /// failure ends the walk with a partial result rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Fatal`] if the session is no longer valid.
    pub async fn discover(
        &self,
        selectors: &[String],
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult, ScanError> {
        self.found
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.processed.store(0, Ordering::Relaxed);

        let selectors: Vec<&str> = selectors
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        tracing::info!(
            selectors = selectors.len(),
            timeout_secs = self.config.timeout.as_secs(),
            "discovery started"
        );

        let mut result = DiscoveryResult::default();
        let walk = self.walk(&selectors, cancel);
        let outcome = match Instant::now().checked_add(self.config.timeout) {
            Some(deadline) => tokio::time::timeout_at(deadline, walk).await,
            None => Ok(walk.await),
        };
        match outcome {
            Ok(Ok(WalkEnd::Exhausted | WalkEnd::AllSelectorsFound)) => {}
            Ok(Ok(WalkEnd::Cancelled)) => result.cancelled = true,
            Ok(Err(e)) if e.is_fatal() => {
                tracing::error!(error = %e, "discovery aborted by fatal error");
                return Err(e);
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "discovery interrupted; keeping partial result");
                result.interrupted_by = Some(e.to_string());
            }
            Err(_) => {
                tracing::warn!(
                    found = self.found_count(),
                    "discovery timed out; keeping partial result"
                );
                result.timed_out = true;
            }
        }

        result.groups = self.snapshot();
        result.processed = self.processed();
        tracing::info!(
            found = result.groups.len(),
            processed = result.processed,
            timed_out = result.timed_out,
            cancelled = result.cancelled,
            "discovery finished"
        );
        Ok(result)
    }

    async fn walk(
        &self,
        selectors: &[&str],
        cancel: &CancellationToken,
    ) -> Result<WalkEnd, ScanError> {
        let mut pending: Vec<&str> = selectors.to_vec();
        let mut cursor: Option<DialogCursor> = None;
        let client = &self.client;
        let limit = self.config.page_size;

        for page_no in 1..=MAX_PAGES {
            if cancel.is_cancelled() {
                return Ok(WalkEnd::Cancelled);
            }

            self.limiter.acquire(1).await?;
            let page = retry_with_backoff(&self.limiter, &self.retry, "dialogs_page", || {
                let cursor = cursor.clone();
                async move { client.dialogs_page(cursor, limit).await }
            })
            .await?;
            tracing::debug!(page = page_no, dialogs = page.dialogs.len(), "dialog page fetched");

            for dialog in page.dialogs {
                if cancel.is_cancelled() {
                    return Ok(WalkEnd::Cancelled);
                }
                let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
                if processed % PACE_EVERY == 0 {
                    self.limiter.acquire(1).await?;
                }
                if processed % LOG_EVERY == 0 {
                    tracing::info!(processed, found = self.found_count(), "discovery progress");
                }

                let Some(group) = dialog.into_group() else {
                    continue;
                };
                if !selectors.is_empty() {
                    if !selectors.iter().any(|s| group.matches_selector(s)) {
                        continue;
                    }
                    pending.retain(|s| !group.matches_selector(s));
                }
                self.record(group);

                if !selectors.is_empty() && pending.is_empty() {
                    tracing::info!(processed, "all selected groups located");
                    return Ok(WalkEnd::AllSelectorsFound);
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(WalkEnd::Exhausted),
            }
        }

        tracing::warn!(max_pages = MAX_PAGES, "dialog listing did not terminate");
        Ok(WalkEnd::Exhausted)
    }

    fn record(&self, group: Group) {
        let mut found = self.found.lock().unwrap_or_else(PoisonError::into_inner);
        match found.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => found.push(group),
        }
    }
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("config", &self.config)
            .field("processed", &self.processed())
            .finish_non_exhaustive()
    }
}
