use thiserror::Error;

use nexus_types::api::GraphQlErrorEntry;

#[derive(Debug, Error)]
pub enum GraphQlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("GraphQL error: {}", join_messages(.0))]
    Graphql(Vec<GraphQlErrorEntry>),

    #[error("{0} returned no data")]
    MissingData(&'static str),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("subscription protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

fn join_messages(errors: &[GraphQlErrorEntry]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
