use anyhow::Result;
use async_trait::async_trait;

use nexus_types::ChannelMessage;

/// One offset/limit page of a channel's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub channel_id: String,
    pub offset: u32,
    pub limit: u32,
    /// Bumped by every refresh so an identical offset-zero request is
    /// still distinguishable from the previous one.
    pub refresh_trigger: u64,
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Outgoing message. `id` is generated on the client and reused by the
/// server, which is what lets a live push confirm the optimistic copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannelMessage {
    pub id: String,
    pub posted_by_user_id: String,
    pub channel_id: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
}

/// Remote operations the message store depends on.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Page of messages, most recent first as the server defines it.
    async fn fetch_channel_messages(&self, request: &PageRequest) -> Result<Vec<ChannelMessage>>;

    /// Display name for a user id.
    async fn fetch_username(&self, user_id: &str) -> Result<String>;

    async fn create_channel_message(&self, message: &NewChannelMessage) -> Result<()>;
}
