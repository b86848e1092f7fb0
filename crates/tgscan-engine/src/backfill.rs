//! Newest-first history scan of each group down to a date cutoff.
//!
//! The stop condition is the message's own timestamp. History is requested
//! without any server-side date parameter and paging stops at the first
//! message older than the cutoff, so nothing past it is ever fetched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use tgscan_core::{Group, MatchResult};

use crate::error::ScanError;
use crate::filter::{evaluate, Criteria};
use crate::rate_limit::RateLimiter;
use crate::remote::RemoteClient;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::sink::MatchSink;

/// Per-group outcome of a backfill scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub group_id: i64,
    pub scanned_count: usize,
    /// Relevant matches, newest first.
    pub relevant: Vec<MatchResult>,
    /// `true` if the scan stopped on a message older than the cutoff.
    pub reached_cutoff: bool,
    pub cancelled: bool,
}

/// Aggregate of a multi-group backfill.
#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    /// Ids of groups scanned without error.
    pub completed: Vec<i64>,
    /// Groups skipped after a non-fatal error, with the reason.
    pub skipped: Vec<(i64, String)>,
    pub scanned_count: usize,
    pub relevant_count: usize,
    pub cancelled: bool,
}

pub struct BackfillScanner {
    client: Arc<dyn RemoteClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    page_size: usize,
}

impl BackfillScanner {
    #[must_use]
    pub fn new(
        client: Arc<dyn RemoteClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Scans `group` newest-first until a message older than `cutoff`.
    ///
    /// Cancellation is checked between pages; a cancelled scan returns what
    /// it had with `cancelled = true`.
    ///
    /// # Errors
    ///
    /// Propagates remote errors after retries, including
    /// [`ScanError::PermissionDenied`] for unreadable groups.
    pub async fn scan(
        &self,
        group: &Group,
        cutoff: DateTime<Utc>,
        criteria: &Criteria,
        cancel: &CancellationToken,
    ) -> Result<ScanResult, ScanError> {
        let mut result = ScanResult {
            group_id: group.id,
            ..ScanResult::default()
        };
        let client = &self.client;
        let limit = self.page_size;
        let mut before_id: Option<i64> = None;

        'pages: loop {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            self.limiter.acquire(1).await?;
            let page = retry_with_backoff(
                &self.limiter,
                &self.retry,
                "history_page",
                move || async move { client.history_page(group, before_id, limit).await },
            )
            .await?;

            if page.is_empty() {
                break;
            }

            let mut oldest_id = before_id;
            for message in page {
                if message.timestamp < cutoff {
                    result.reached_cutoff = true;
                    break 'pages;
                }
                if oldest_id.is_some_and(|id| message.id >= id) {
                    tracing::warn!(
                        group_id = group.id,
                        message_id = message.id,
                        "history page is not strictly older than the last; stopping"
                    );
                    break 'pages;
                }
                oldest_id = Some(message.id);
                result.scanned_count += 1;

                let matched = evaluate(message, criteria);
                if matched.is_relevant {
                    tracing::debug!(
                        group_id = group.id,
                        message_id = matched.message.id,
                        score = matched.score,
                        "relevant history message"
                    );
                    result.relevant.push(matched);
                }
            }
            before_id = oldest_id;
        }

        tracing::info!(
            group_id = group.id,
            title = %group.title,
            scanned = result.scanned_count,
            found = result.relevant.len(),
            reached_cutoff = result.reached_cutoff,
            "backfill finished for group"
        );
        Ok(result)
    }

    /// Scans every group in turn and forwards matches to `sink`.
    ///
    /// One group's failure never stops the others: non-fatal errors are
    /// logged and the group is recorded as skipped. `on_group_done` runs
    /// after each successfully scanned group.
    ///
    /// # Errors
    ///
    /// Only [`ScanError::Fatal`] is returned; it aborts the remaining groups.
    pub async fn scan_groups<F>(
        &self,
        groups: &[Group],
        cutoff: DateTime<Utc>,
        criteria: &Criteria,
        sink: &dyn MatchSink,
        cancel: &CancellationToken,
        mut on_group_done: F,
    ) -> Result<BackfillSummary, ScanError>
    where
        F: FnMut(&ScanResult) + Send,
    {
        let mut summary = BackfillSummary::default();

        for group in groups {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let result = match self.scan(group, cutoff, criteria, cancel).await {
                Ok(result) => result,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        group_id = group.id,
                        title = %group.title,
                        error = %e,
                        "backfill failed for group; skipping"
                    );
                    summary.skipped.push((group.id, e.to_string()));
                    continue;
                }
            };

            summary.scanned_count += result.scanned_count;
            summary.relevant_count += result.relevant.len();
            for matched in &result.relevant {
                if let Err(e) = sink.accept(matched.clone()).await {
                    tracing::warn!(
                        group_id = group.id,
                        message_id = matched.message.id,
                        error = %e,
                        "sink rejected backfill match"
                    );
                }
            }

            if result.cancelled {
                summary.cancelled = true;
                break;
            }
            on_group_done(&result);
            summary.completed.push(group.id);
        }

        Ok(summary)
    }
}

impl std::fmt::Debug for BackfillScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillScanner")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}
