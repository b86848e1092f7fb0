//! Phases of one scanner run, executed in a background task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use tgscan_core::{Group, ScannerState};

use super::Inner;
use crate::error::{CacheError, ScanError};
use crate::pipeline::{IngestionPipeline, PipelineHandle};
use crate::retry::retry_with_backoff;

pub(super) async fn run(inner: Arc<Inner>, cancel: CancellationToken, force: bool) {
    if let Err(e) = execute(&inner, &cancel, force).await {
        tracing::error!(error = %e, "scanner run failed");
        inner.record_error(&e);
        inner.stop_pipeline().await;
        if !cancel.is_cancelled() {
            inner.set_state(ScannerState::Error);
        }
    }
}

async fn execute(inner: &Inner, cancel: &CancellationToken, force: bool) -> Result<(), ScanError> {
    let groups = load_groups(inner, cancel, force).await?;
    inner.publish_groups(groups);
    if cancel.is_cancelled() {
        return Ok(());
    }

    if inner.config.backfill_enabled() {
        inner.set_state(ScannerState::Backfilling);
        backfill(inner, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(());
        }
    } else {
        tracing::info!(
            max_history_days = inner.config.max_history_days,
            "history window is empty; skipping backfill"
        );
    }

    {
        let mut slot = inner.pipeline.lock().await;
        if cancel.is_cancelled() {
            return Ok(());
        }
        *slot = Some(inner.spawn_pipeline().await?);
        inner.set_state(ScannerState::Running);
    }

    supervise(inner, cancel).await
}

/// Discovering: cached groups when usable, otherwise a discovery pass.
///
/// A forced pass that ran to completion or to its timeout replaces the
/// cache. Any other pass is merged into the cache by id, so a scoped or
/// interrupted walk never drops groups it did not see. A pass that found
/// nothing before failing leaves the cache untouched and the run continues
/// on the cached groups.
async fn load_groups(
    inner: &Inner,
    cancel: &CancellationToken,
    force: bool,
) -> Result<Vec<Group>, ScanError> {
    let selectors = &inner.config.selected_groups;
    let previous = match inner.cache.load().await {
        Ok(groups) => Some(groups),
        Err(CacheError::NotFound { .. }) => {
            tracing::info!("no group cache; running full discovery");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "group cache unusable; running full discovery");
            None
        }
    };

    if let Some(cached) = previous.as_ref().filter(|_| !force) {
        let selected = select(cached, selectors);
        let unmatched: Vec<&String> = selectors
            .iter()
            .filter(|s| !selected.iter().any(|g| g.matches_selector(s)))
            .collect();
        if unmatched.is_empty() {
            tracing::info!(groups = selected.len(), "using cached groups");
            return Ok(selected);
        }
        tracing::info!(
            unmatched = unmatched.len(),
            "cached groups do not cover every selector; running discovery"
        );
    }

    let result = inner.discovery.discover(selectors, cancel).await?;
    if result.cancelled && result.groups.is_empty() {
        return Ok(Vec::new());
    }
    let complete = result.is_complete();
    if result.groups.is_empty() && !complete {
        let fallback = previous.as_deref().map(|p| select(p, selectors)).unwrap_or_default();
        tracing::warn!(
            cached = fallback.len(),
            "discovery found nothing before stopping; keeping cached groups"
        );
        return Ok(fallback);
    }

    let mut groups = result.groups;
    let replace = force && result.interrupted_by.is_none();
    let to_save = match previous {
        Some(mut cached) => {
            carry_last_scanned(&mut groups, &cached);
            if replace {
                groups.clone()
            } else {
                merge_by_id(&mut cached, &groups);
                cached
            }
        }
        None => groups.clone(),
    };
    if let Err(e) = inner.cache.save(&to_save).await {
        tracing::warn!(error = %e, "failed to save discovered groups");
    }
    if !complete {
        tracing::warn!(found = groups.len(), "continuing with partial discovery result");
    }
    Ok(groups)
}

fn select(groups: &[Group], selectors: &[String]) -> Vec<Group> {
    if selectors.is_empty() {
        return groups.to_vec();
    }
    groups
        .iter()
        .filter(|g| selectors.iter().any(|s| g.matches_selector(s)))
        .cloned()
        .collect()
}

/// Overwrites entries of `cached` with `fresh` by id and appends new ones.
fn merge_by_id(cached: &mut Vec<Group>, fresh: &[Group]) {
    for group in fresh {
        match cached.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group.clone(),
            None => cached.push(group.clone()),
        }
    }
}

fn carry_last_scanned(groups: &mut [Group], previous: &[Group]) {
    let known: HashMap<i64, DateTime<Utc>> = previous
        .iter()
        .filter_map(|g| g.last_scanned.map(|t| (g.id, t)))
        .collect();
    for group in groups.iter_mut().filter(|g| g.last_scanned.is_none()) {
        group.last_scanned = known.get(&group.id).copied();
    }
}

/// Backfilling: history scan down to `now - max_history_days`.
async fn backfill(inner: &Inner, cancel: &CancellationToken) -> Result<(), ScanError> {
    let groups = inner.groups();
    let now = Utc::now();
    let window = TimeDelta::try_days(inner.config.max_history_days).unwrap_or(TimeDelta::MAX);
    let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let criteria = inner.criteria.current();

    tracing::info!(groups = groups.len(), %cutoff, "backfill started");
    let mut completed_at: HashMap<i64, DateTime<Utc>> = HashMap::new();
    let summary = inner
        .backfill
        .scan_groups(
            &groups,
            cutoff,
            &criteria,
            inner.sink.as_ref(),
            cancel,
            |result| {
                completed_at.insert(result.group_id, Utc::now());
            },
        )
        .await?;

    inner
        .stats
        .record_processed(u64::try_from(summary.scanned_count).unwrap_or(u64::MAX));
    inner
        .stats
        .record_relevant(u64::try_from(summary.relevant_count).unwrap_or(u64::MAX));

    let mut updated = groups.to_vec();
    for group in &mut updated {
        if let Some(at) = completed_at.get(&group.id) {
            group.last_scanned = Some(*at);
        }
    }
    let mut cached = inner.cache.load().await.unwrap_or_default();
    merge_by_id(&mut cached, &updated);
    if let Err(e) = inner.cache.save(&cached).await {
        tracing::warn!(error = %e, "failed to persist scan timestamps");
    }
    inner.publish_groups(updated);
    if !summary.cancelled {
        inner.info().last_scan_time = Some(Utc::now());
    }

    tracing::info!(
        completed = summary.completed.len(),
        skipped = summary.skipped.len(),
        scanned = summary.scanned_count,
        found = summary.relevant_count,
        "backfill finished"
    );
    Ok(())
}

/// Running: periodic heartbeat until cancelled. Re-subscribes if the live
/// feed ended on its own while the scanner is meant to be running.
async fn supervise(inner: &Inner, cancel: &CancellationToken) -> Result<(), ScanError> {
    let period = Duration::from_secs(inner.config.scan_interval_secs.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let state = *inner.state.borrow();
        let counters = inner.stats.snapshot();
        tracing::info!(
            %state,
            groups = inner.groups().len(),
            processed = counters.processed,
            relevant = counters.relevant,
            dropped = counters.dropped,
            "scanner heartbeat"
        );

        let mut slot = inner.pipeline.lock().await;
        let feed_ended = slot.as_ref().is_some_and(|h| !h.is_running());
        let running = *inner.state.borrow() == ScannerState::Running;
        if cancel.is_cancelled() || !feed_ended || !running {
            continue;
        }
        tracing::warn!("live feed ended unexpectedly; re-subscribing");
        if let Some(old) = slot.take() {
            old.stop().await;
        }
        match inner.spawn_pipeline().await {
            Ok(handle) => *slot = Some(handle),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "re-subscription failed; will retry on next heartbeat");
                inner.record_error(&e);
            }
        }
    }
}

impl Inner {
    /// Subscribes to the current group set and starts a pipeline.
    pub(super) async fn spawn_pipeline(&self) -> Result<PipelineHandle, ScanError> {
        let group_ids: HashSet<i64> = self.groups().iter().map(|g| g.id).collect();
        if group_ids.is_empty() {
            tracing::warn!("no groups to monitor; live feed will be empty");
        }

        let client = self.client.as_ref();
        self.limiter.acquire(1).await?;
        retry_with_backoff(&self.limiter, &self.retry, "subscribe", || {
            IngestionPipeline::start(
                client,
                group_ids.clone(),
                self.criteria.clone(),
                Arc::clone(&self.sink),
                self.pipeline_config.clone(),
                Arc::clone(&self.stats),
            )
        })
        .await
    }
}
