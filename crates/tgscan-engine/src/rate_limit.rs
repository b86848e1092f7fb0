//! Request budget shared by every remote call.
//!
//! The budget is a sliding window: a grant is admitted only if fewer than
//! `requests_per_minute` grants fall inside the trailing 60 seconds, so there
//! is no window boundary at which a burst can slip through.
//!
//! A flood-control signal from the remote side blocks *all* callers for
//! `seconds * flood_wait_multiplier`. Any wait longer than `max_wait` is
//! surfaced as [`ScanError::RateLimitExceeded`] instead of being slept.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use tgscan_core::ScannerConfig;

use crate::error::ScanError;

const WINDOW: Duration = Duration::from_secs(60);
/// Longest flood block ever recorded.
const MAX_FLOOD_BLOCK: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub requests_per_minute: u32,
    pub flood_wait_multiplier: f64,
    pub max_wait: Duration,
}

impl From<&ScannerConfig> for RateLimiterConfig {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute.max(1),
            flood_wait_multiplier: config.flood_wait_multiplier.max(1.0),
            max_wait: Duration::try_from_secs_f64(config.max_wait_time_secs.max(0.0))
                .unwrap_or(Duration::MAX),
        }
    }
}

/// Point-in-time view of the limiter, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSnapshot {
    /// Grants inside the trailing window.
    pub in_window: usize,
    /// Remaining flood-control block, if one is active.
    pub flood_remaining: Option<Duration>,
}

#[derive(Debug, Default)]
struct WindowState {
    grants: VecDeque<Instant>,
    flood_until: Option<Instant>,
}

impl WindowState {
    fn prune(&mut self, now: Instant) {
        while self
            .grants
            .front()
            .is_some_and(|&granted| granted + WINDOW <= now)
        {
            self.grants.pop_front();
        }
        if self.flood_until.is_some_and(|until| until <= now) {
            self.flood_until = None;
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WindowState::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Waits until `cost` units fit in the budget, then spends them.
    ///
    /// The state lock is never held across a sleep; waiters re-check after
    /// waking, so concurrent callers cannot overshoot the window.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::RateLimitExceeded`] if the required wait exceeds
    /// `max_wait`, or if `cost` can never fit in one window.
    pub async fn acquire(&self, cost: u32) -> Result<(), ScanError> {
        let budget = self.config.requests_per_minute as usize;
        let cost = cost.max(1) as usize;
        if cost > budget {
            let cost = u32::try_from(cost).unwrap_or(u32::MAX);
            return Err(self.exceeded(WINDOW.saturating_mul(cost)));
        }

        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                state.prune(now);

                if let Some(until) = state.flood_until {
                    until - now
                } else if state.grants.len() + cost <= budget {
                    state.grants.extend(std::iter::repeat_n(now, cost));
                    return Ok(());
                } else {
                    // The oldest `overflow` grants must age out first.
                    let overflow = state.grants.len() + cost - budget;
                    let releasing = state.grants[overflow - 1];
                    (releasing + WINDOW).saturating_duration_since(now)
                }
            };

            if wait > self.config.max_wait {
                tracing::warn!(
                    wait_secs = wait.as_secs_f64(),
                    max_wait_secs = self.config.max_wait.as_secs_f64(),
                    "required rate-limit wait exceeds maximum"
                );
                return Err(self.exceeded(wait));
            }

            tracing::debug!(
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                "request budget exhausted; waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Records a flood-control signal of `seconds` from the remote side.
    ///
    /// Every caller of [`acquire`](Self::acquire) is blocked until
    /// `seconds * flood_wait_multiplier` has elapsed. An already longer block
    /// is kept. Returns the effective block duration from now.
    pub fn on_flood_wait(&self, seconds: u64) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let requested = seconds as f64 * self.config.flood_wait_multiplier;
        let block = Duration::try_from_secs_f64(requested)
            .map_or(MAX_FLOOD_BLOCK, |block| block.min(MAX_FLOOD_BLOCK));
        let mut state = self.lock();
        let now = Instant::now();
        let until = now + block;
        let until = match state.flood_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        state.flood_until = Some(until);
        let remaining = until - now;
        tracing::warn!(
            flood_secs = seconds,
            block_secs = remaining.as_secs_f64(),
            "flood control signalled; blocking all remote calls"
        );
        remaining
    }

    #[must_use]
    pub fn snapshot(&self) -> LimiterSnapshot {
        let mut state = self.lock();
        let now = Instant::now();
        state.prune(now);
        LimiterSnapshot {
            in_window: state.grants.len(),
            flood_remaining: state.flood_until.map(|until| until - now),
        }
    }

    fn exceeded(&self, required: Duration) -> ScanError {
        ScanError::RateLimitExceeded {
            required_secs: required.as_secs_f64(),
            max_wait_secs: self.config.max_wait.as_secs_f64(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
