//! GraphQL transport for the channel message store: queries and mutations
//! over HTTP, live messages over a `graphql-transport-ws` socket.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod subscription;

pub use config::ClientConfig;
pub use error::GraphQlError;
pub use http::GraphQlClient;
pub use subscription::{MessageSubscription, subscribe_channel_messages};
