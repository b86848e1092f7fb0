//! Dialog discovery against the in-memory remote.

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tgscan_engine::{
    DiscoveryConfig, DiscoveryEngine, RateLimiter, RateLimiterConfig, RemoteError, RetryPolicy,
    ScanError,
};

use support::{channel, user, FakeRemote};

fn engine(remote: &Arc<FakeRemote>, page_size: usize, timeout: Duration) -> Arc<DiscoveryEngine> {
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_minute: 10_000,
        flood_wait_multiplier: 1.0,
        max_wait: Duration::from_secs(600),
    }));
    Arc::new(DiscoveryEngine::new(
        remote.clone(),
        limiter,
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
        },
        DiscoveryConfig { timeout, page_size },
    ))
}

fn many_channels(n: i64) -> Vec<tgscan_engine::Dialog> {
    (1..=n)
        .map(|id| channel(id, &format!("Group {id}"), Some(&format!("group{id}"))))
        .collect()
}

#[tokio::test]
async fn walks_every_page_and_skips_users() {
    let mut dialogs = many_channels(5);
    dialogs.insert(2, user(900, "Alice"));
    let remote = Arc::new(FakeRemote::new().with_dialogs(dialogs));
    let engine = engine(&remote, 2, Duration::from_secs(60));

    let result = engine.discover(&[], &CancellationToken::new()).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.processed, 6);
    assert_eq!(
        result.groups.iter().map(|g| g.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert_eq!(remote.dialog_calls(), 3);
}

#[tokio::test]
async fn stops_early_once_every_selector_is_found() {
    let remote = Arc::new(FakeRemote::new().with_dialogs(many_channels(100)));
    let engine = engine(&remote, 10, Duration::from_secs(60));
    let selectors = vec!["Group 7".to_owned(), "@group12".to_owned()];

    let result = engine
        .discover(&selectors, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_complete());
    let ids: Vec<i64> = result.groups.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![7, 12]);
    assert_eq!(remote.dialog_calls(), 2, "walk ends on the page with the last selector");
    assert!(result.processed <= 20);
}

#[tokio::test]
async fn numeric_selector_matches_by_id() {
    let remote = Arc::new(FakeRemote::new().with_dialogs(vec![
        channel(1_326_223_284, "Рыбарь", Some("rybar")),
        channel(2, "Other", None),
    ]));
    let engine = engine(&remote, 100, Duration::from_secs(60));
    let result = engine
        .discover(&["1326223284".to_owned()], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.groups.len(), 1);
    assert_eq!(result.groups[0].title, "Рыбарь");
}

#[tokio::test(start_paused = true)]
async fn timeout_returns_partial_result() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_dialogs(many_channels(50))
            .with_page_delay(Duration::from_secs(10)),
    );
    let engine = engine(&remote, 5, Duration::from_secs(35));

    let result = engine.discover(&[], &CancellationToken::new()).await.unwrap();

    assert!(result.timed_out);
    assert!(!result.is_complete());
    assert_eq!(result.groups.len(), 15, "three pages land before the deadline");
    assert_eq!(engine.snapshot().len(), 15);
}

#[tokio::test(start_paused = true)]
async fn found_set_only_grows_while_running() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_dialogs(many_channels(30))
            .with_page_delay(Duration::from_secs(1)),
    );
    let engine = engine(&remote, 3, Duration::from_secs(600));

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.discover(&[], &CancellationToken::new()).await })
    };

    let mut last = 0;
    while !task.is_finished() {
        let now = engine.found_count();
        assert!(now >= last, "found set shrank from {last} to {now}");
        last = now;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    let result = task.await.unwrap().unwrap();
    assert_eq!(result.groups.len(), 30);
}

#[tokio::test]
async fn non_fatal_failure_keeps_partial_result() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_dialogs(many_channels(4))
            .fail_dialogs(vec![RemoteError::Other("INTERNAL".to_owned())]),
    );
    let engine = engine(&remote, 2, Duration::from_secs(60));
    let result = engine.discover(&[], &CancellationToken::new()).await.unwrap();

    assert!(result.interrupted_by.is_some());
    assert!(result.groups.is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_dialogs(many_channels(3))
            .fail_dialogs(vec![
                RemoteError::Network("timeout".to_owned()),
                RemoteError::Network("reset".to_owned()),
            ]),
    );
    let engine = engine(&remote, 10, Duration::from_secs(60));
    let result = engine.discover(&[], &CancellationToken::new()).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.groups.len(), 3);
    assert_eq!(remote.dialog_calls(), 3);
}

#[tokio::test]
async fn unauthorized_session_is_fatal() {
    let remote = Arc::new(
        FakeRemote::new()
            .with_dialogs(many_channels(3))
            .fail_dialogs(vec![RemoteError::Unauthorized("SESSION_REVOKED".to_owned())]),
    );
    let engine = engine(&remote, 10, Duration::from_secs(60));
    let err = engine
        .discover(&[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::Fatal(_)));
}

#[tokio::test]
async fn cancelled_before_start_fetches_nothing() {
    let remote = Arc::new(FakeRemote::new().with_dialogs(many_channels(3)));
    let engine = engine(&remote, 10, Duration::from_secs(60));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine.discover(&[], &cancel).await.unwrap();
    assert!(result.cancelled);
    assert_eq!(remote.dialog_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_is_seen_within_a_page() {
    let remote = Arc::new(FakeRemote::new().with_dialogs(many_channels(100)));
    // Two grants per minute: the page and the 10th dialog pass, the 20th waits.
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        requests_per_minute: 2,
        flood_wait_multiplier: 1.0,
        max_wait: Duration::from_secs(600),
    }));
    let engine = Arc::new(DiscoveryEngine::new(
        remote.clone(),
        limiter,
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
        },
        DiscoveryConfig {
            timeout: Duration::from_secs(3600),
            page_size: 100,
        },
    ));
    let cancel = CancellationToken::new();
    let task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.discover(&[], &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    let result = task.await.unwrap().unwrap();

    assert!(result.cancelled);
    assert_eq!(remote.dialog_calls(), 1);
    assert_eq!(result.groups.len(), 20);
    assert_eq!(result.processed, 20);
}

#[tokio::test]
async fn unbounded_timeout_does_not_overflow() {
    let remote = Arc::new(FakeRemote::new().with_dialogs(many_channels(3)));
    let engine = engine(&remote, 10, Duration::MAX);
    let result = engine.discover(&[], &CancellationToken::new()).await.unwrap();
    assert!(result.is_complete());
    assert_eq!(result.groups.len(), 3);
}
