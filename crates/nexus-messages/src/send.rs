use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use nexus_types::MessageWithAvatar;

use crate::backend::{Attachment, NewChannelMessage};
use crate::store::TextChannelMessages;

/// Files beyond this many are dropped from a single message.
pub const MAX_ATTACHMENTS: usize = 10;

/// The signed-in user sending messages.
#[derive(Debug, Clone)]
pub struct Author {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { id: String },
    /// Blank text and no attachments; nothing was sent.
    Empty,
    NoChannel,
    /// The mutation failed; the optimistic copy was withdrawn.
    Failed { id: String, error: String },
}

/// Sends messages to the store's active channel with an optimistic local copy.
#[derive(Clone)]
pub struct MessageComposer {
    store: TextChannelMessages,
    author: Author,
}

impl MessageComposer {
    pub fn new(store: TextChannelMessages, author: Author) -> Self {
        store.resolver().remember(&author.user_id, &author.username);
        Self { store, author }
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    /// Show the message immediately, create it on the server under the same
    /// id, then refresh so the list reflects the server's copy.
    pub async fn send(&self, text: &str, mut attachments: Vec<Attachment>) -> SendOutcome {
        let content = text.trim();
        if content.is_empty() && attachments.is_empty() {
            return SendOutcome::Empty;
        }
        let Some(channel_id) = self.store.channel_id().await else {
            return SendOutcome::NoChannel;
        };
        attachments.truncate(MAX_ATTACHMENTS);

        let id = Uuid::new_v4().to_string();
        let optimistic = MessageWithAvatar {
            id: id.clone(),
            posted_by_user_id: self.author.user_id.clone(),
            posted_at: Utc::now(),
            content: content.to_string(),
            edited: false,
            channel_id: Some(channel_id.clone()),
            attachment_urls: vec![],
            username: self.author.username.clone(),
            avatar: self.store.config().avatar_url.clone(),
            pending: true,
        };
        self.store.add_message(optimistic).await;

        let request = NewChannelMessage {
            id: id.clone(),
            posted_by_user_id: self.author.user_id.clone(),
            channel_id,
            content: content.to_string(),
            attachments,
        };

        match self.store.backend().create_channel_message(&request).await {
            Ok(()) => {
                info!("Sent message {} to {}", id, request.channel_id);
                self.store.refresh_messages().await;
                SendOutcome::Sent { id }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Error creating message {}: {}", id, message);
                if !self.store.withdraw_pending(&id).await {
                    warn!("Message {} was confirmed before the create call failed; keeping it", id);
                }
                SendOutcome::Failed { id, error: message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MessageBackend, PageRequest};
    use crate::config::MessagesConfig;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use nexus_types::ChannelMessage;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingBackend {
        created: Mutex<Vec<NewChannelMessage>>,
        reject: bool,
    }

    #[async_trait]
    impl MessageBackend for RecordingBackend {
        async fn fetch_channel_messages(&self, _request: &PageRequest) -> Result<Vec<ChannelMessage>> {
            // The server echoes back whatever was created
            Ok(self
                .created
                .lock()
                .unwrap()
                .iter()
                .map(|m| ChannelMessage {
                    id: m.id.clone(),
                    posted_by_user_id: m.posted_by_user_id.clone(),
                    posted_at: Utc::now().to_rfc3339(),
                    content: m.content.clone(),
                    edited: false,
                    channel_id: Some(m.channel_id.clone()),
                    attachment_urls: None,
                })
                .collect())
        }

        async fn fetch_username(&self, _user_id: &str) -> Result<String> {
            Err(anyhow!("should be served from the cache"))
        }

        async fn create_channel_message(&self, message: &NewChannelMessage) -> Result<()> {
            if self.reject {
                return Err(anyhow!("mutation rejected"));
            }
            self.created.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn attachment(n: usize) -> Attachment {
        Attachment {
            file_name: format!("f{n}.png"),
            content_type: Some("image/png".into()),
            bytes: vec![n as u8],
        }
    }

    async fn composer(backend: Arc<RecordingBackend>) -> (MessageComposer, TextChannelMessages) {
        let store = TextChannelMessages::new(backend, MessagesConfig::default());
        store.open_channel("c1").await;
        let composer = MessageComposer::new(
            store.clone(),
            Author { user_id: "me".into(), username: "Me".into() },
        );
        (composer, store)
    }

    #[tokio::test]
    async fn blank_text_without_files_is_ignored() {
        let backend = Arc::new(RecordingBackend::default());
        let (composer, store) = composer(backend.clone()).await;

        assert_eq!(composer.send("   \n", vec![]).await, SendOutcome::Empty);
        assert!(store.messages().await.is_empty());
        assert!(backend.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_trimmed_content_under_one_id() {
        let backend = Arc::new(RecordingBackend::default());
        let (composer, store) = composer(backend.clone()).await;

        let SendOutcome::Sent { id } = composer.send("  hello  ", vec![]).await else {
            panic!("send should succeed");
        };

        let created = backend.created.lock().unwrap().clone();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, id);
        assert_eq!(created[0].content, "hello");
        assert_eq!(created[0].channel_id, "c1");

        // After the refresh the server copy replaced the optimistic one
        let messages = store.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].username, "Me");
        assert!(!messages[0].pending);
    }

    #[tokio::test]
    async fn attachments_are_capped() {
        let backend = Arc::new(RecordingBackend::default());
        let (composer, _store) = composer(backend.clone()).await;

        let files = (0..14).map(attachment).collect();
        composer.send("", files).await;

        let created = backend.created.lock().unwrap();
        assert_eq!(created[0].attachments.len(), MAX_ATTACHMENTS);
        assert_eq!(created[0].attachments[9].file_name, "f9.png");
    }

    #[tokio::test]
    async fn failed_send_withdraws_optimistic_copy() {
        let backend = Arc::new(RecordingBackend { reject: true, ..Default::default() });
        let (composer, store) = composer(backend).await;
        let mut events = store.subscribe();

        let outcome = composer.send("hi", vec![]).await;
        let SendOutcome::Failed { id, error } = outcome else {
            panic!("send should fail");
        };
        assert!(error.contains("mutation rejected"));
        assert!(store.messages().await.is_empty());

        assert_eq!(events.try_recv().unwrap(), crate::store::MessagesEvent::MessageAdded { id: id.clone() });
        assert_eq!(events.try_recv().unwrap(), crate::store::MessagesEvent::MessageDeleted { id });
    }

    #[tokio::test]
    async fn no_channel_no_send() {
        let backend = Arc::new(RecordingBackend::default());
        let store = TextChannelMessages::new(backend.clone(), MessagesConfig::default());
        let composer = MessageComposer::new(store, Author { user_id: "me".into(), username: "Me".into() });

        assert_eq!(composer.send("hi", vec![]).await, SendOutcome::NoChannel);
        assert!(backend.created.lock().unwrap().is_empty());
    }

    /// Create calls block until released, then fail as a timeout would.
    #[derive(Default)]
    struct TimingOutBackend {
        started: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl MessageBackend for TimingOutBackend {
        async fn fetch_channel_messages(&self, _request: &PageRequest) -> Result<Vec<ChannelMessage>> {
            Ok(vec![])
        }

        async fn fetch_username(&self, _user_id: &str) -> Result<String> {
            Err(anyhow!("should be served from the cache"))
        }

        async fn create_channel_message(&self, _message: &NewChannelMessage) -> Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Err(anyhow!("operation timed out"))
        }
    }

    #[tokio::test]
    async fn failed_send_keeps_message_confirmed_meanwhile() {
        let backend = Arc::new(TimingOutBackend::default());
        let store = TextChannelMessages::new(backend.clone(), MessagesConfig::default());
        store.open_channel("c1").await;
        let composer = MessageComposer::new(
            store.clone(),
            Author { user_id: "me".into(), username: "Me".into() },
        );

        let send = {
            let composer = composer.clone();
            tokio::spawn(async move { composer.send("hi", vec![]).await })
        };
        backend.started.notified().await;

        // The server stored it and pushed it back before the call gave up
        let id = store.messages().await[0].id.clone();
        let echoed = ChannelMessage {
            id: id.clone(),
            posted_by_user_id: "me".into(),
            posted_at: Utc::now().to_rfc3339(),
            content: "hi".into(),
            edited: false,
            channel_id: Some("c1".into()),
            attachment_urls: None,
        };
        assert_eq!(
            store.handle_pushed_message(echoed).await,
            crate::store::PushOutcome::Updated
        );

        backend.release.notify_one();
        assert!(matches!(send.await.unwrap(), SendOutcome::Failed { .. }));

        let messages = store.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, id);
        assert!(!messages[0].pending);
    }
}
