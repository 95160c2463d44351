use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChannelMessage, User};

// -- Envelopes --

/// Body of a GraphQL-over-HTTP POST, also the `payload` of a
/// `graphql-transport-ws` subscribe frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

impl GraphQlRequest {
    pub fn new(operation: &Operation, variables: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            query: operation.document.to_string(),
            variables: serde_json::to_value(variables)?,
            operation_name: Some(operation.name.to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQlErrorEntry {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
}

/// A named GraphQL document.
#[derive(Debug, Clone, Copy)]
pub struct Operation {
    pub name: &'static str,
    pub document: &'static str,
}

// -- Messages --

pub const GET_TEXT_CHANNEL_MESSAGES: Operation = Operation {
    name: "GetTextChannelMessages",
    document: r#"query GetTextChannelMessages($channelId: String!, $offset: Int, $limit: Int) {
    getTextChannelMessages(channelId: $channelId, offset: $offset, limit: $limit) {
        id
        content
        postedAt
        edited
        channelId
        postedByUserId
        attachmentUrls
    }
}"#,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TextChannelMessagesVariables {
    pub channel_id: String,
    pub offset: u32,
    pub limit: u32,
    /// Not declared by the document; varies the request so caches between
    /// client and server cannot answer a refresh with a stale page.
    pub refresh_trigger: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChannelMessagesData {
    /// Items are nullable in the schema.
    pub get_text_channel_messages: Option<Vec<Option<ChannelMessage>>>,
}

pub const CREATE_TEXT_CHANNEL_MESSAGE: Operation = Operation {
    name: "CreateTextChannelMessage",
    document: r#"mutation CreateTextChannelMessage($id: String, $postedByUserId: String!, $channelId: String!, $content: String!, $attachments: [Upload!]) {
    createTextChannelMessage(id: $id, postedByUserId: $postedByUserId, channelId: $channelId, content: $content, attachments: $attachments) {
        content
    }
}"#,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTextChannelMessageVariables {
    pub id: String,
    pub posted_by_user_id: String,
    pub channel_id: String,
    pub content: String,
    /// One `null` placeholder per attached file; the multipart `map` points
    /// each file part at its slot.
    pub attachments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTextChannelMessageData {
    pub create_text_channel_message: Option<CreatedMessage>,
}

#[derive(Debug, Deserialize)]
pub struct CreatedMessage {
    pub content: String,
}

pub const MESSAGE_ADDED: Operation = Operation {
    name: "MessageAdded",
    document: r#"subscription MessageAdded($channelId: String!) {
    messageAdded(channelId: $channelId) {
        id
        content
        postedAt
        edited
        channelId
        postedByUserId
        attachmentUrls
    }
}"#,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAddedVariables {
    pub channel_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAddedData {
    pub message_added: Option<ChannelMessage>,
}

// -- Users --

pub const FETCH_USER: Operation = Operation {
    name: "FetchUser",
    document: r#"query FetchUser($userId: String!) {
    fetchUser(userId: $userId) {
        id
        username
    }
}"#,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchUserVariables {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchUserData {
    pub fetch_user: Option<User>,
}
