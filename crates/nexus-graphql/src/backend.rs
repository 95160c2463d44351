use anyhow::Result;
use async_trait::async_trait;

use nexus_messages::{MessageBackend, NewChannelMessage, PageRequest};
use nexus_types::ChannelMessage;

use crate::http::GraphQlClient;

#[async_trait]
impl MessageBackend for GraphQlClient {
    async fn fetch_channel_messages(&self, request: &PageRequest) -> Result<Vec<ChannelMessage>> {
        Ok(self.text_channel_messages(request).await?)
    }

    async fn fetch_username(&self, user_id: &str) -> Result<String> {
        Ok(self.fetch_user(user_id).await?.username)
    }

    async fn create_channel_message(&self, message: &NewChannelMessage) -> Result<()> {
        Ok(self.create_text_channel_message(message).await?)
    }
}
