//! Domain records shared by every scanner component.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote group or channel the account can read.
///
/// Identity is `id`. `access_hash` is an opaque capability token issued by the
/// remote side; it is only ever replaced wholesale by re-discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub title: String,
    pub username: Option<String>,
    pub member_count: u32,
    pub is_private: bool,
    pub access_hash: i64,
    pub is_channel: bool,
    pub is_megagroup: bool,
    #[serde(default)]
    pub last_scanned: Option<DateTime<Utc>>,
}

impl Group {
    /// Returns `true` if `selector` names this group.
    ///
    /// A selector matches when it equals the numeric id, or when it is a
    /// case-insensitive substring of the title or the username. A leading `@`
    /// on the selector is ignored for username matching.
    #[must_use]
    pub fn matches_selector(&self, selector: &str) -> bool {
        let selector = selector.trim();
        if selector.is_empty() {
            return false;
        }
        if selector.parse::<i64>().is_ok_and(|id| id == self.id) {
            return true;
        }

        let needle = selector.to_lowercase();
        if self.title.to_lowercase().contains(&needle) {
            return true;
        }

        let handle = needle.trim_start_matches('@');
        !handle.is_empty()
            && self
                .username
                .as_deref()
                .is_some_and(|u| u.to_lowercase().contains(handle))
    }
}

/// Coarse classification of a message attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Classifies a document attachment by its MIME type.
    #[must_use]
    pub fn from_mime_type(mime: &str) -> Self {
        let top = mime
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match top.as_str() {
            "image" => MediaKind::Image,
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            _ => MediaKind::Document,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Document => write!(f, "document"),
        }
    }
}

/// A message received from a group, either from history or live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within `group_id`.
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media_kind: Option<MediaKind>,
    /// Text recovered from an attachment by the external OCR service.
    pub extracted_text: Option<String>,
}

impl Message {
    /// The text that relevance criteria are evaluated against: the message
    /// body followed by any extracted attachment text.
    #[must_use]
    pub fn searchable_text(&self) -> Cow<'_, str> {
        match self.extracted_text.as_deref() {
            Some(extra) if !extra.is_empty() => {
                if self.text.is_empty() {
                    Cow::Borrowed(extra)
                } else {
                    Cow::Owned(format!("{}\n{extra}", self.text))
                }
            }
            _ => Cow::Borrowed(self.text.as_str()),
        }
    }
}

/// Outcome of evaluating one message against the relevance criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub message: Message,
    pub is_relevant: bool,
    /// Fraction of declared criteria that matched, in `[0, 1]`.
    pub score: f64,
    /// Keywords then pattern sources that hit, in declaration order.
    pub matched_terms: Vec<String>,
}

/// Lifecycle state of the scanner. Owned and written by the controller only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerState {
    Idle,
    Discovering,
    Backfilling,
    Running,
    Paused,
    Stopped,
    Error,
}

impl ScannerState {
    /// States from which a fresh run (or a forced rescan) may begin.
    #[must_use]
    pub fn is_startable(self) -> bool {
        matches!(
            self,
            ScannerState::Idle | ScannerState::Stopped | ScannerState::Error
        )
    }

    /// States in which a run is in flight and can be stopped.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ScannerState::Discovering
                | ScannerState::Backfilling
                | ScannerState::Running
                | ScannerState::Paused
        )
    }
}

impl std::fmt::Display for ScannerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScannerState::Idle => write!(f, "idle"),
            ScannerState::Discovering => write!(f, "discovering"),
            ScannerState::Backfilling => write!(f, "backfilling"),
            ScannerState::Running => write!(f, "running"),
            ScannerState::Paused => write!(f, "paused"),
            ScannerState::Stopped => write!(f, "stopped"),
            ScannerState::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: i64, title: &str, username: Option<&str>) -> Group {
        Group {
            id,
            title: title.to_owned(),
            username: username.map(str::to_owned),
            member_count: 10,
            is_private: username.is_none(),
            access_hash: 42,
            is_channel: false,
            is_megagroup: true,
            last_scanned: None,
        }
    }

    fn message(text: &str, extracted: Option<&str>) -> Message {
        Message {
            id: 1,
            group_id: 1,
            sender_id: 7,
            sender_username: None,
            timestamp: Utc::now(),
            text: text.to_owned(),
            media_kind: None,
            extracted_text: extracted.map(str::to_owned),
        }
    }

    #[test]
    fn selector_matches_title_case_insensitively() {
        let g = group(1, "Python Developers", Some("pythondev"));
        assert!(g.matches_selector("python"));
        assert!(g.matches_selector("DEVELOPERS"));
        assert!(!g.matches_selector("javascript"));
    }

    #[test]
    fn selector_matches_username_with_at_prefix() {
        let g = group(2, "Coders", Some("jscoders"));
        assert!(g.matches_selector("@jscoders"));
        assert!(g.matches_selector("jscod"));
    }

    #[test]
    fn selector_matches_numeric_id() {
        let g = group(1_966_291_562, "КиберТопор", None);
        assert!(g.matches_selector("1966291562"));
        assert!(!g.matches_selector("1966291563"));
    }

    #[test]
    fn selector_matches_cyrillic_title() {
        let g = group(3, "КиберТопор", Some("cybertopor"));
        assert!(g.matches_selector("кибертопор"));
    }

    #[test]
    fn blank_selector_matches_nothing() {
        let g = group(4, "Anything", Some("any"));
        assert!(!g.matches_selector("   "));
        assert!(!g.matches_selector("@"));
    }

    #[test]
    fn media_kind_from_mime_type() {
        assert_eq!(MediaKind::from_mime_type("image/png"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime_type("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime_type("audio/mp3"), MediaKind::Audio);
        assert_eq!(
            MediaKind::from_mime_type("application/pdf"),
            MediaKind::Document
        );
        assert_eq!(MediaKind::from_mime_type(""), MediaKind::Document);
    }

    #[test]
    fn searchable_text_appends_extracted_text() {
        let m = message("Check this image", Some("important information"));
        assert_eq!(
            m.searchable_text(),
            "Check this image\nimportant information"
        );
    }

    #[test]
    fn searchable_text_without_extraction_borrows_body() {
        let m = message("plain", None);
        assert!(matches!(m.searchable_text(), Cow::Borrowed("plain")));
        let m = message("", Some("ocr only"));
        assert_eq!(m.searchable_text(), "ocr only");
    }

    #[test]
    fn group_serde_defaults_last_scanned() {
        let json = r#"{"id":1,"title":"t","username":null,"member_count":3,
            "is_private":true,"access_hash":9,"is_channel":false,"is_megagroup":false}"#;
        let g: Group = serde_json::from_str(json).unwrap();
        assert!(g.last_scanned.is_none());
    }

    #[test]
    fn scanner_state_startable_and_active() {
        assert!(ScannerState::Idle.is_startable());
        assert!(ScannerState::Error.is_startable());
        assert!(!ScannerState::Running.is_startable());
        assert!(ScannerState::Paused.is_active());
        assert!(!ScannerState::Stopped.is_active());
        assert_eq!(ScannerState::Backfilling.to_string(), "backfilling");
    }
}
