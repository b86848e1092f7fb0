//! Seam to the external messaging client.
//!
//! Authentication, session transport, and wire encoding live in the client
//! library behind [`RemoteClient`]. The engine only needs three things from
//! it: a paged dialog listing, paged newest-first history, and a live
//! subscription bound to a fixed set of group ids.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use tgscan_core::{Group, Message};

use crate::error::RemoteError;

/// What kind of peer a dialog points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    /// Broadcast channel, or a supergroup when `megagroup` is set.
    Channel { megagroup: bool },
    /// Basic group chat.
    Chat,
    /// One-to-one conversation; never scanned.
    User,
}

/// One entry of the account's dialog list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub member_count: u32,
    pub access_hash: i64,
    pub kind: DialogKind,
}

impl Dialog {
    /// Converts a dialog into a [`Group`], or `None` for user dialogs.
    #[must_use]
    pub fn into_group(self) -> Option<Group> {
        let (is_channel, is_megagroup) = match self.kind {
            DialogKind::Channel { megagroup } => (!megagroup, megagroup),
            DialogKind::Chat => (false, false),
            DialogKind::User => return None,
        };
        Some(Group {
            id: self.id,
            is_private: self.username.is_none(),
            title: self.title,
            username: self.username,
            member_count: self.member_count,
            access_hash: self.access_hash,
            is_channel,
            is_megagroup,
            last_scanned: None,
        })
    }
}

/// Opaque continuation token for dialog paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogCursor(pub String);

/// One page of the dialog listing.
#[derive(Debug, Clone, Default)]
pub struct DialogPage {
    pub dialogs: Vec<Dialog>,
    /// `None` when the listing is exhausted.
    pub next: Option<DialogCursor>,
}

/// A live feed of new messages for a fixed set of groups.
///
/// The id set is bound when the subscription is created; the remote side
/// filters by it. Cancelling the subscription ends the stream at the next
/// poll.
pub struct Subscription {
    group_ids: HashSet<i64>,
    events: BoxStream<'static, Message>,
    token: CancellationToken,
}

impl Subscription {
    #[must_use]
    pub fn new(group_ids: HashSet<i64>, events: BoxStream<'static, Message>) -> Self {
        Self {
            group_ids,
            events,
            token: CancellationToken::new(),
        }
    }

    /// The group ids this subscription was created for.
    #[must_use]
    pub fn group_ids(&self) -> &HashSet<i64> {
        &self.group_ids
    }

    /// A token that ends the subscription when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn unsubscribe(&self) {
        self.token.cancel();
    }

    /// Waits for the next notification. Returns `None` once unsubscribed or
    /// when the remote feed ends.
    pub async fn next(&mut self) -> Option<Message> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            msg = self.events.next() => msg,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("group_ids", &self.group_ids.len())
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Remote messaging operations consumed by the engine.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetches one page of the account's dialog list.
    async fn dialogs_page(
        &self,
        cursor: Option<DialogCursor>,
        limit: usize,
    ) -> Result<DialogPage, RemoteError>;

    /// Fetches up to `limit` messages of `group`, newest first, strictly
    /// older than `before_id` when given.
    ///
    /// No date filter is passed to the remote side; callers stop on the
    /// messages' own timestamps.
    async fn history_page(
        &self,
        group: &Group,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Message>, RemoteError>;

    /// Subscribes to new messages in exactly `group_ids`.
    async fn subscribe(&self, group_ids: &HashSet<i64>) -> Result<Subscription, RemoteError>;
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::stream;

    use super::*;

    fn dialog(kind: DialogKind, username: Option<&str>) -> Dialog {
        Dialog {
            id: 1,
            title: "Test".to_owned(),
            username: username.map(str::to_owned),
            member_count: 1000,
            access_hash: 12345,
            kind,
        }
    }

    #[test]
    fn broadcast_channel_is_channel() {
        let g = dialog(DialogKind::Channel { megagroup: false }, Some("testchannel"))
            .into_group()
            .unwrap();
        assert!(g.is_channel);
        assert!(!g.is_megagroup);
        assert!(!g.is_private);
    }

    #[test]
    fn megagroup_is_not_channel() {
        let g = dialog(DialogKind::Channel { megagroup: true }, None)
            .into_group()
            .unwrap();
        assert!(!g.is_channel);
        assert!(g.is_megagroup);
        assert!(g.is_private);
    }

    #[test]
    fn basic_chat_is_private_group() {
        let g = dialog(DialogKind::Chat, None).into_group().unwrap();
        assert!(!g.is_channel);
        assert!(!g.is_megagroup);
        assert!(g.is_private);
        assert_eq!(g.access_hash, 12345);
    }

    #[test]
    fn user_dialog_is_skipped() {
        assert!(dialog(DialogKind::User, Some("someone")).into_group().is_none());
    }

    fn message(id: i64) -> Message {
        Message {
            id,
            group_id: 1,
            sender_id: 2,
            sender_username: None,
            timestamp: Utc::now(),
            text: format!("msg {id}"),
            media_kind: None,
            extracted_text: None,
        }
    }

    #[tokio::test]
    async fn subscription_yields_until_unsubscribed() {
        let ids: HashSet<i64> = [1].into_iter().collect();
        let events = stream::iter(vec![message(1), message(2)])
            .chain(stream::pending())
            .boxed();
        let mut sub = Subscription::new(ids, events);
        assert_eq!(sub.next().await.map(|m| m.id), Some(1));
        assert_eq!(sub.next().await.map(|m| m.id), Some(2));

        sub.unsubscribe();
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn subscription_ends_with_remote_feed() {
        let ids: HashSet<i64> = [1].into_iter().collect();
        let mut sub = Subscription::new(ids, stream::iter(vec![message(9)]).boxed());
        assert!(sub.next().await.is_some());
        assert!(sub.next().await.is_none());
        assert_eq!(sub.group_ids().len(), 1);
    }
}
