mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use nexus_graphql::{ClientConfig, GraphQlClient, subscribe_channel_messages};
use nexus_messages::{
    Author, MessageBackend, MessageComposer, MessagesConfig, MessagesEvent, SendOutcome,
    TextChannelMessages,
};

/// Wait before reopening a dropped subscription socket.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nexus=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let client_config = ClientConfig::from_env()?;
    let messages_config = MessagesConfig::from_env()?;
    let channel_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NEXUS_CHANNEL_ID").ok())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow!("usage: nexus <channel-id> (or set NEXUS_CHANNEL_ID)"))?;
    let author = std::env::var("NEXUS_USER_ID").ok().map(|user_id| Author {
        user_id,
        username: std::env::var("NEXUS_USERNAME").unwrap_or_else(|_| "me".into()),
    });

    let client = GraphQlClient::new(client_config.clone()).context("building HTTP client")?;
    let backend: Arc<dyn MessageBackend> = Arc::new(client);
    let store = TextChannelMessages::new(backend, messages_config);

    info!("Opening channel {} via {}", channel_id, client_config.http_url);
    let outcome = store.open_channel(&channel_id).await;
    println!("{}", render::page_view(&store.messages().await, &outcome));

    tokio::spawn(render_events(store.clone()));
    let subscription = tokio::spawn(follow_channel(store.clone(), client_config, channel_id));

    let composer = author.map(|author| MessageComposer::new(store.clone(), author));
    if composer.is_none() {
        warn!("NEXUS_USER_ID not set, sending is disabled");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/more" => {
                let outcome = store.load_more_messages().await;
                println!("{}", render::page_view(&store.messages().await, &outcome));
            }
            "/refresh" => {
                let outcome = store.refresh_messages().await;
                println!("{}", render::page_view(&store.messages().await, &outcome));
            }
            text => match &composer {
                Some(composer) => match composer.send(text, vec![]).await {
                    SendOutcome::Sent { .. } | SendOutcome::Empty => {}
                    SendOutcome::NoChannel => println!("-- no channel open --"),
                    SendOutcome::Failed { error, .. } => println!("-- send failed: {} --", error),
                },
                None => println!("-- read-only: set NEXUS_USER_ID to send --"),
            },
        }
    }

    subscription.abort();
    store.close_channel().await;
    Ok(())
}

/// Keep a `messageAdded` subscription open for the channel and feed every
/// push into the store. Reconnects after the socket drops.
async fn follow_channel(store: TextChannelMessages, config: ClientConfig, channel_id: String) {
    loop {
        match subscribe_channel_messages(&config, &channel_id).await {
            Ok(mut subscription) => {
                while let Some(message) = subscription.next().await {
                    store.handle_pushed_message(message).await;
                }
                warn!("Subscription for {} ended, resubscribing", channel_id);
            }
            Err(e) => warn!("Subscribe to {} failed: {}", channel_id, e),
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Print live changes to the list as they happen.
async fn render_events(store: TextChannelMessages) {
    let mut events = store.subscribe();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Renderer skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            MessagesEvent::MessageAdded { id } => {
                let messages = store.messages().await;
                if let Some(message) = messages.iter().find(|m| m.id == id) {
                    println!("{}", render::message_line(message));
                }
            }
            MessagesEvent::MessageDeleted { id } => println!("-- message {} withdrawn --", id),
            MessagesEvent::FetchFailed { error, .. } => println!("-- fetch failed: {} --", error),
            _ => {}
        }
    }
}
