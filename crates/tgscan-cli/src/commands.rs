//! Offline operator commands. None of these open a remote session.

use chrono::Utc;

use tgscan_core::{Group, MediaKind, Message, ScannerConfig};
use tgscan_engine::{evaluate, CacheError, Criteria, GroupCache};

/// Print the cached groups, optionally narrowed to the configured selectors.
///
/// A missing cache is reported, not treated as an error.
pub(crate) async fn run_groups(config: &ScannerConfig, selected: bool) -> anyhow::Result<()> {
    let cache = GroupCache::new(config.cache_path.clone());
    let groups = match cache.load().await {
        Ok(groups) => groups,
        Err(CacheError::NotFound { path }) => {
            println!("no group cache at {path}; start the scanner to run discovery");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let shown = if selected {
        filter_selected(groups, &config.selected_groups)
    } else {
        groups
    };
    for line in shown.iter().map(format_group) {
        println!("{line}");
    }
    println!("{} groups", shown.len());
    Ok(())
}

/// Evaluate `text` as if it had just arrived and print the result as JSON.
pub(crate) fn run_check(
    config: &ScannerConfig,
    text: String,
    extracted: Option<String>,
    mime: Option<&str>,
) -> anyhow::Result<()> {
    let criteria = Criteria::compile(&config.relevance)?;
    if criteria.is_empty() {
        tracing::warn!("no keywords or patterns configured; nothing can match");
    }
    let result = evaluate(sample_message(text, extracted, mime), &criteria);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn filter_selected(groups: Vec<Group>, selectors: &[String]) -> Vec<Group> {
    if selectors.is_empty() {
        return groups;
    }
    groups
        .into_iter()
        .filter(|g| selectors.iter().any(|s| g.matches_selector(s)))
        .collect()
}

fn format_group(group: &Group) -> String {
    let handle = group
        .username
        .as_deref()
        .map_or_else(|| "-".to_owned(), |u| format!("@{u}"));
    let scanned = group
        .last_scanned
        .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
    format!(
        "{:>14}  {:<32}  {:<20}  {:>8} members  last scanned {scanned}",
        group.id, group.title, handle, group.member_count
    )
}

fn sample_message(text: String, extracted: Option<String>, mime: Option<&str>) -> Message {
    Message {
        id: 0,
        group_id: 0,
        sender_id: 0,
        sender_username: None,
        timestamp: Utc::now(),
        text,
        media_kind: mime.map(MediaKind::from_mime_type),
        extracted_text: extracted,
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
            access_hash: 0,
            is_channel: false,
            is_megagroup: true,
            last_scanned: None,
        }
    }

    #[test]
    fn empty_selectors_keep_everything() {
        let groups = vec![group(1, "a", None), group(2, "b", None)];
        assert_eq!(filter_selected(groups, &[]).len(), 2);
    }

    #[test]
    fn selectors_narrow_the_list() {
        let groups = vec![
            group(1, "Rust Jobs", Some("rustjobs")),
            group(2, "Рыбарь", Some("rybar")),
            group(3, "Other", None),
        ];
        let kept = filter_selected(groups, &["@RYBAR".to_owned(), "3".to_owned()]);
        assert_eq!(kept.iter().map(|g| g.id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn format_marks_unscanned_and_private_groups() {
        let line = format_group(&group(9, "Quiet", None));
        assert!(line.contains("never"));
        assert!(line.contains(" - "));
        assert!(format_group(&group(9, "Loud", Some("loud"))).contains("@loud"));
    }

    #[test]
    fn sample_message_carries_extracted_text() {
        let message = sample_message("body".to_owned(), Some("scan".to_owned()), Some("image/png"));
        assert_eq!(message.searchable_text(), "body\nscan");
        assert_eq!(message.media_kind, Some(MediaKind::Image));
        assert!(sample_message(String::new(), None, None).media_kind.is_none());
    }
}
