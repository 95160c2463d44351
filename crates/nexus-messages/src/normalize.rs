use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use futures_util::future::join_all;
use tracing::warn;

use nexus_types::{ChannelMessage, MessageWithAvatar};

use crate::users::UsernameResolver;

/// Parse a wire timestamp. Accepts RFC 3339, SQL-style
/// `YYYY-MM-DD HH:MM:SS` (taken as UTC) and epoch milliseconds.
pub fn parse_posted_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(ndt.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

/// Wire message -> display message. An unparseable timestamp maps to the
/// Unix epoch so the message still shows, at the old end of the list.
pub fn normalize(raw: ChannelMessage, username: String, avatar: &str) -> MessageWithAvatar {
    let posted_at = parse_posted_at(&raw.posted_at).unwrap_or_else(|| {
        warn!("Corrupt postedAt '{}' on message '{}'", raw.posted_at, raw.id);
        DateTime::default()
    });

    MessageWithAvatar {
        id: raw.id,
        posted_by_user_id: raw.posted_by_user_id,
        posted_at,
        content: raw.content,
        edited: raw.edited,
        channel_id: raw.channel_id,
        attachment_urls: raw.attachment_urls.unwrap_or_default(),
        username,
        avatar: avatar.to_string(),
        pending: false,
    }
}

/// Newest first. Stable, so equal timestamps keep their merge order.
pub fn sort_newest_first(messages: &mut [MessageWithAvatar]) {
    messages.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
}

/// Normalize a fetched page, resolving every author concurrently, and sort it.
pub async fn normalize_page(
    resolver: &UsernameResolver,
    page: Vec<ChannelMessage>,
    avatar: &str,
) -> Vec<MessageWithAvatar> {
    let usernames = join_all(page.iter().map(|msg| resolver.resolve(&msg.posted_by_user_id))).await;

    let mut messages: Vec<MessageWithAvatar> = page
        .into_iter()
        .zip(usernames)
        .map(|(raw, username)| normalize(raw, username, avatar))
        .collect();
    sort_newest_first(&mut messages);
    messages
}
