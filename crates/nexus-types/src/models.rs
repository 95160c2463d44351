use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text channel message as delivered by the GraphQL backend.
/// `posted_at` is kept as the raw ISO-8601 string until normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: String,
    pub posted_by_user_id: String,
    pub posted_at: String,
    pub content: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
}

/// A channel message ready for display: parsed timestamp, resolved author
/// name and avatar. Derived per fetch, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithAvatar {
    pub id: String,
    pub posted_by_user_id: String,
    pub posted_at: DateTime<Utc>,
    pub content: String,
    pub edited: bool,
    pub channel_id: Option<String>,
    pub attachment_urls: Vec<String>,
    pub username: String,
    pub avatar: String,
    /// Locally created and not yet confirmed by the server.
    #[serde(default)]
    pub pending: bool,
}

impl MessageWithAvatar {
    /// Fold a server-confirmed copy over this (optimistic) entry. Fields the
    /// confirmation carries win; optional fields it omits keep the local value.
    pub fn confirm_with(&self, confirmed: MessageWithAvatar) -> MessageWithAvatar {
        MessageWithAvatar {
            channel_id: confirmed.channel_id.or_else(|| self.channel_id.clone()),
            attachment_urls: if confirmed.attachment_urls.is_empty() {
                self.attachment_urls.clone()
            } else {
                confirmed.attachment_urls
            },
            pending: false,
            ..confirmed
        }
    }
}
