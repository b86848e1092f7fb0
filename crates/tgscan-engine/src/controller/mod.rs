//! The scanner's state machine and control surface.
//!
//! ```text
//! Idle/Stopped/Error --start--> Discovering --> [Backfilling] --> Running <--pause/resume--> Paused
//!                                    \______________|_______________|_______________/
//!                                                      stop --> Stopped
//! Idle/Stopped --rescan--> Discovering (cache ignored and overwritten)
//! any run phase --fatal error--> Error
//! ```
//!
//! Every operation that changes state takes the control lock, so the
//! transitions are the only place where cross-component work begins. The
//! phases themselves run in one background task per run; see [`run`].

mod run;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tgscan_core::{Group, RelevanceSettings, ScannerConfig, ScannerState};

use crate::backfill::BackfillScanner;
use crate::cache::GroupCache;
use crate::discovery::{DiscoveryConfig, DiscoveryEngine};
use crate::error::{ControlError, ScanError};
use crate::filter::{Criteria, CriteriaHandle};
use crate::pipeline::{PipelineConfig, PipelineHandle, PipelineStats};
use crate::rate_limit::{LimiterSnapshot, RateLimiter, RateLimiterConfig};
use crate::remote::RemoteClient;
use crate::retry::RetryPolicy;
use crate::sink::MatchSink;

/// Point-in-time report returned by [`ScannerController::status`].
#[derive(Debug, Clone)]
pub struct ScannerStatus {
    pub state: ScannerState,
    pub run_id: Option<Uuid>,
    /// Time since the current run was started.
    pub uptime: Option<Duration>,
    pub groups_monitored: usize,
    /// Dialogs examined by the current or last discovery.
    pub discovery_processed: u64,
    /// Groups located so far by the current or last discovery.
    pub discovery_found: usize,
    pub messages_processed: u64,
    pub relevant_found: u64,
    pub notifications_dropped: u64,
    pub last_error: Option<String>,
    /// Completion time of the last backfill.
    pub last_scan_time: Option<DateTime<Utc>>,
    pub limiter: LimiterSnapshot,
}

#[derive(Debug, Default)]
struct RunInfo {
    run_id: Option<Uuid>,
    started_at: Option<Instant>,
    last_error: Option<String>,
    last_scan_time: Option<DateTime<Utc>>,
}

struct ActiveRun {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    run: Option<ActiveRun>,
}

struct Inner {
    config: ScannerConfig,
    client: Arc<dyn RemoteClient>,
    sink: Arc<dyn MatchSink>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cache: GroupCache,
    criteria: CriteriaHandle,
    discovery: DiscoveryEngine,
    backfill: BackfillScanner,
    pipeline_config: PipelineConfig,
    stats: Arc<PipelineStats>,
    state: watch::Sender<ScannerState>,
    control: tokio::sync::Mutex<Control>,
    pipeline: tokio::sync::Mutex<Option<PipelineHandle>>,
    groups: RwLock<Arc<Vec<Group>>>,
    info: Mutex<RunInfo>,
}

/// Cheap to clone; clones share one scanner.
#[derive(Clone)]
pub struct ScannerController {
    inner: Arc<Inner>,
}

impl ScannerController {
    /// Builds a controller in the `Idle` state.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidPattern`] if a configured pattern does
    /// not compile.
    pub fn new(
        config: ScannerConfig,
        client: Arc<dyn RemoteClient>,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Self, ScanError> {
        let criteria = CriteriaHandle::new(Criteria::compile(&config.relevance)?);
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from(&config)));
        let retry = RetryPolicy::from(&config);
        let discovery = DiscoveryEngine::new(
            Arc::clone(&client),
            Arc::clone(&limiter),
            retry.clone(),
            DiscoveryConfig::from(&config),
        );
        let backfill = BackfillScanner::new(
            Arc::clone(&client),
            Arc::clone(&limiter),
            retry.clone(),
            config.history_page_size,
        );
        let (state, _) = watch::channel(ScannerState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                cache: GroupCache::new(config.cache_path.clone()),
                pipeline_config: PipelineConfig::from(&config),
                config,
                client,
                sink,
                limiter,
                retry,
                criteria,
                discovery,
                backfill,
                stats: Arc::new(PipelineStats::default()),
                state,
                control: tokio::sync::Mutex::new(Control::default()),
                pipeline: tokio::sync::Mutex::new(None),
                groups: RwLock::new(Arc::new(Vec::new())),
                info: Mutex::new(RunInfo::default()),
            }),
        })
    }

    #[must_use]
    pub fn state(&self) -> ScannerState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ScannerState> {
        self.inner.state.subscribe()
    }

    /// Begins a run from `Idle`, `Stopped`, or `Error`, using the group
    /// cache when it is usable.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] from any other state.
    pub async fn start(&self) -> Result<(), ControlError> {
        self.launch("start", false).await
    }

    /// Begins a run that ignores the group cache and overwrites it.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] unless the scanner is `Idle` or
    /// `Stopped`.
    pub async fn rescan(&self) -> Result<(), ControlError> {
        self.launch("rescan", true).await
    }

    /// Stops the current run from any run phase and waits for it to wind
    /// down: loops exit at their next iteration boundary and the pipeline
    /// drains.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] if no run is active.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let mut control = self.inner.control.lock().await;
        let state = self.state();
        if !state.is_active() {
            return Err(ControlError::InvalidState {
                operation: "stop",
                state,
            });
        }

        if let Some(run) = control.run.take() {
            run.cancel.cancel();
            if let Err(e) = run.task.await {
                tracing::warn!(error = %e, "scanner run task ended abnormally");
            }
        }
        self.inner.stop_pipeline().await;
        self.inner.set_state(ScannerState::Stopped);
        tracing::info!("scanner stopped");
        Ok(())
    }

    /// Suspends live ingestion. The pipeline is stopped gracefully.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] unless the scanner is `Running`.
    pub async fn pause(&self) -> Result<(), ControlError> {
        let _control = self.inner.control.lock().await;
        let mut slot = self.inner.pipeline.lock().await;
        let state = self.state();
        if state != ScannerState::Running {
            return Err(ControlError::InvalidState {
                operation: "pause",
                state,
            });
        }

        if let Some(handle) = slot.take() {
            handle.stop().await;
        }
        self.inner.set_state(ScannerState::Paused);
        tracing::info!("scanner paused");
        Ok(())
    }

    /// Resumes live ingestion with a fresh subscription to the same groups.
    ///
    /// # Errors
    ///
    /// [`ControlError::InvalidState`] unless the scanner is `Paused`;
    /// [`ControlError::Scan`] if the subscription cannot be re-established.
    pub async fn resume(&self) -> Result<(), ControlError> {
        let control = self.inner.control.lock().await;
        let mut slot = self.inner.pipeline.lock().await;
        let state = self.state();
        if state != ScannerState::Paused {
            return Err(ControlError::InvalidState {
                operation: "resume",
                state,
            });
        }

        match self.inner.spawn_pipeline().await {
            Ok(handle) => {
                *slot = Some(handle);
                self.inner.set_state(ScannerState::Running);
                tracing::info!("scanner resumed");
                Ok(())
            }
            Err(e) => {
                self.inner.record_error(&e);
                if e.is_fatal() {
                    if let Some(run) = control.run.as_ref() {
                        run.cancel.cancel();
                    }
                    self.inner.set_state(ScannerState::Error);
                }
                Err(e.into())
            }
        }
    }

    /// Replaces the relevance criteria. Evaluations already in flight keep
    /// the criteria they started with.
    ///
    /// # Errors
    ///
    /// [`ControlError::Scan`] wrapping [`ScanError::InvalidPattern`]; the
    /// previous criteria stay in force.
    pub fn reload_criteria(&self, settings: &RelevanceSettings) -> Result<(), ControlError> {
        let criteria = Criteria::compile(settings)?;
        tracing::info!(
            keywords = settings.keywords.len(),
            patterns = settings.regex_patterns.len(),
            logic = %settings.logic,
            "relevance criteria reloaded"
        );
        self.inner.criteria.replace(criteria);
        Ok(())
    }

    /// The current group set.
    #[must_use]
    pub fn list(&self) -> Arc<Vec<Group>> {
        self.inner.groups()
    }

    #[must_use]
    pub fn status(&self) -> ScannerStatus {
        let info = self.inner.info();
        let counters = self.inner.stats.snapshot();
        ScannerStatus {
            state: self.state(),
            run_id: info.run_id,
            uptime: info.started_at.map(|t| t.elapsed()),
            groups_monitored: self.inner.groups().len(),
            discovery_processed: self.inner.discovery.processed(),
            discovery_found: self.inner.discovery.found_count(),
            messages_processed: counters.processed,
            relevant_found: counters.relevant,
            notifications_dropped: counters.dropped,
            last_error: info.last_error.clone(),
            last_scan_time: info.last_scan_time,
            limiter: self.inner.limiter.snapshot(),
        }
    }

    async fn launch(&self, operation: &'static str, force: bool) -> Result<(), ControlError> {
        let mut control = self.inner.control.lock().await;
        let state = self.state();
        let allowed = if force {
            matches!(state, ScannerState::Idle | ScannerState::Stopped)
        } else {
            state.is_startable()
        };
        if !allowed {
            return Err(ControlError::InvalidState { operation, state });
        }

        // A run that ended in Error leaves its finished task behind.
        if let Some(previous) = control.run.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
        }
        self.inner.stop_pipeline().await;

        let run_id = Uuid::new_v4();
        {
            let mut info = self.inner.info();
            info.run_id = Some(run_id);
            info.started_at = Some(Instant::now());
            info.last_error = None;
        }
        self.inner.set_state(ScannerState::Discovering);
        tracing::info!(%run_id, operation, "scanner run starting");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run::run(Arc::clone(&self.inner), cancel.clone(), force));
        control.run = Some(ActiveRun { cancel, task });
        Ok(())
    }
}

impl std::fmt::Debug for ScannerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerController")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn set_state(&self, next: ScannerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "scanner state changed");
        }
    }

    fn groups(&self) -> Arc<Vec<Group>> {
        Arc::clone(&self.groups.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish_groups(&self, groups: Vec<Group>) {
        *self.groups.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(groups);
    }

    fn info(&self) -> std::sync::MutexGuard<'_, RunInfo> {
        self.info.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_error(&self, err: &ScanError) {
        self.info().last_error = Some(err.to_string());
    }

    async fn stop_pipeline(&self) {
        let handle = self.pipeline.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}
