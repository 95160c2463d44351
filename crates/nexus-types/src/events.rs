use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{GraphQlErrorEntry, GraphQlRequest};

/// Subprotocol negotiated on the subscription socket.
pub const GRAPHQL_TRANSPORT_WS: &str = "graphql-transport-ws";

/// Frames sent FROM client TO server over the subscription socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection; carries auth.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Start an operation under a client-chosen id
    Subscribe { id: String, payload: GraphQlRequest },

    /// Stop an operation
    Complete { id: String },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

/// Frames sent FROM server TO client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Server accepted `connection_init`
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// One execution result for a running operation
    Next { id: String, payload: ExecutionResult },

    /// Operation failed before producing results; no `complete` follows
    Error {
        id: String,
        payload: Vec<GraphQlErrorEntry>,
    },

    /// Server finished the operation
    Complete { id: String },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl ServerFrame {
    /// Returns the operation id if this frame belongs to a specific operation.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::Next { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphQlErrorEntry>,
}
