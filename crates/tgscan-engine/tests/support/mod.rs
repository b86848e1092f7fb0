//! In-memory `RemoteClient` and sinks shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, Notify};

use tgscan_core::{Group, MatchResult, Message, ScannerConfig};
use tgscan_engine::{
    Dialog, DialogCursor, DialogKind, DialogPage, MatchSink, RemoteClient, RemoteError, SinkError,
    Subscription,
};

#[derive(Default)]
struct FakeState {
    dialog_errors: VecDeque<RemoteError>,
    history: HashMap<i64, Vec<Message>>,
    history_errors: HashMap<i64, RemoteError>,
    subscribe_errors: VecDeque<RemoteError>,
    live: Option<mpsc::UnboundedSender<Message>>,
    dialog_calls: usize,
    history_calls: Vec<(i64, Option<i64>)>,
    fetched: Vec<(i64, i64)>,
    subscriptions: Vec<HashSet<i64>>,
}

/// Scriptable stand-in for the messaging service.
#[derive(Default)]
pub struct FakeRemote {
    dialogs: Vec<Dialog>,
    page_delay: Option<Duration>,
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialogs(mut self, dialogs: Vec<Dialog>) -> Self {
        self.dialogs = dialogs;
        self
    }

    /// Every dialog page takes this long to arrive.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = Some(delay);
        self
    }

    /// History of `group_id`, newest first.
    pub fn with_history(self, group_id: i64, messages: Vec<Message>) -> Self {
        self.lock().history.insert(group_id, messages);
        self
    }

    pub fn fail_history(self, group_id: i64, err: RemoteError) -> Self {
        self.lock().history_errors.insert(group_id, err);
        self
    }

    /// The next `dialogs_page` calls fail with these errors, in order.
    pub fn fail_dialogs(self, errors: Vec<RemoteError>) -> Self {
        self.lock().dialog_errors.extend(errors);
        self
    }

    pub fn fail_subscribe(self, errors: Vec<RemoteError>) -> Self {
        self.lock().subscribe_errors.extend(errors);
        self
    }

    /// Delivers a live notification to the latest subscription.
    pub fn push_live(&self, message: Message) -> bool {
        self.lock()
            .live
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    /// Ends the live feed as if the remote side dropped it.
    pub fn end_live(&self) {
        self.lock().live = None;
    }

    pub fn dialog_calls(&self) -> usize {
        self.lock().dialog_calls
    }

    pub fn history_calls(&self) -> Vec<(i64, Option<i64>)> {
        self.lock().history_calls.clone()
    }

    /// `(group_id, message_id)` of every history message handed out.
    pub fn fetched(&self) -> Vec<(i64, i64)> {
        self.lock().fetched.clone()
    }

    pub fn subscriptions(&self) -> Vec<HashSet<i64>> {
        self.lock().subscriptions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn dialogs_page(
        &self,
        cursor: Option<DialogCursor>,
        limit: usize,
    ) -> Result<DialogPage, RemoteError> {
        if let Some(delay) = self.page_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        state.dialog_calls += 1;
        if let Some(err) = state.dialog_errors.pop_front() {
            return Err(err);
        }

        let start: usize = cursor.map_or(0, |c| c.0.parse().unwrap());
        let end = (start + limit).min(self.dialogs.len());
        Ok(DialogPage {
            dialogs: self.dialogs[start..end].to_vec(),
            next: (end < self.dialogs.len()).then(|| DialogCursor(end.to_string())),
        })
    }

    async fn history_page(
        &self,
        group: &Group,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut state = self.lock();
        state.history_calls.push((group.id, before_id));
        if let Some(err) = state.history_errors.get(&group.id) {
            return Err(err.clone());
        }

        let page: Vec<Message> = state
            .history
            .get(&group.id)
            .map(|all| {
                all.iter()
                    .filter(|m| before_id.is_none_or(|b| m.id < b))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        state
            .fetched
            .extend(page.iter().map(|m| (m.group_id, m.id)));
        Ok(page)
    }

    async fn subscribe(&self, group_ids: &HashSet<i64>) -> Result<Subscription, RemoteError> {
        let mut state = self.lock();
        if let Some(err) = state.subscribe_errors.pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.live = Some(tx);
        state.subscriptions.push(group_ids.clone());

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|m| (m, rx))
        })
        .boxed();
        Ok(Subscription::new(group_ids.clone(), events))
    }
}

/// Records every accepted result.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<MatchResult>>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    panic_on: Option<String>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each `accept` sleeps this long before recording.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Each `accept` waits for a permit on `gate` before recording.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// `accept` panics on results whose text contains `needle`.
    pub fn panicking_on(mut self, needle: &str) -> Self {
        self.panic_on = Some(needle.to_owned());
        self
    }

    pub fn results(&self) -> Vec<MatchResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn message_ids(&self) -> Vec<i64> {
        self.results().iter().map(|r| r.message.id).collect()
    }
}

#[async_trait]
impl MatchSink for CollectingSink {
    async fn accept(&self, result: MatchResult) -> Result<(), SinkError> {
        if let Some(needle) = &self.panic_on {
            assert!(!result.message.text.contains(needle.as_str()), "sink exploded");
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.results.lock().unwrap().push(result);
        Ok(())
    }
}

pub fn channel(id: i64, title: &str, username: Option<&str>) -> Dialog {
    Dialog {
        id,
        title: title.to_owned(),
        username: username.map(str::to_owned),
        member_count: 100,
        access_hash: id * 31,
        kind: DialogKind::Channel { megagroup: true },
    }
}

pub fn user(id: i64, name: &str) -> Dialog {
    Dialog {
        id,
        title: name.to_owned(),
        username: None,
        member_count: 0,
        access_hash: 0,
        kind: DialogKind::User,
    }
}

pub fn group(id: i64, title: &str) -> Group {
    channel(id, title, None).into_group().unwrap()
}

pub fn message_at(group_id: i64, id: i64, timestamp: DateTime<Utc>, text: &str) -> Message {
    Message {
        id,
        group_id,
        sender_id: 500 + id,
        sender_username: None,
        timestamp,
        text: text.to_owned(),
        media_kind: None,
        extracted_text: None,
    }
}

pub fn message_hours_ago(group_id: i64, id: i64, hours: i64, text: &str) -> Message {
    message_at(group_id, id, Utc::now() - TimeDelta::hours(hours), text)
}

pub fn live(group_id: i64, id: i64, text: &str) -> Message {
    message_at(group_id, id, Utc::now(), text)
}

/// Config suited to tests: no back-off delay, generous limiter, cache in `dir`.
pub fn test_config(dir: &std::path::Path, keywords: &[&str]) -> ScannerConfig {
    let mut config = ScannerConfig {
        cache_path: dir.join("groups_cache.json"),
        scan_interval_secs: 1,
        requests_per_minute: 10_000,
        default_delay_secs: 0.0,
        max_wait_time_secs: 600.0,
        worker_count: 2,
        queue_capacity: 16,
        ..ScannerConfig::default()
    };
    config.relevance.keywords = keywords.iter().map(|s| (*s).to_owned()).collect();
    config
}
