use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info};

use nexus_types::{ChannelMessage, MessageWithAvatar};

use crate::backend::{MessageBackend, PageRequest};
use crate::config::MessagesConfig;
use crate::list::{MessageList, Reconciled};
use crate::normalize::{normalize, normalize_page};
use crate::users::UsernameResolver;

/// Where the store is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// No channel open.
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Initial,
    More,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoChannel,
    AlreadyLoading,
    /// The last page came back short; there is nothing older to fetch.
    Exhausted,
    /// `open_channel` was called with the channel already open.
    AlreadyOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { received: usize },
    /// A newer fetch or a channel switch superseded this one; its page was dropped.
    Stale,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Updated,
    Confirmed { local_id: String },
    Inserted,
    /// Pushed for another channel, or the channel changed while the author
    /// name was being resolved.
    Ignored,
}

/// Change notifications for whatever renders the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagesEvent {
    ChannelOpened { channel_id: String },
    ChannelClosed,
    PageApplied { channel_id: String, offset: u32, received: usize },
    FetchFailed { channel_id: String, offset: u32, error: String },
    MessageAdded { id: String },
    MessageConfirmed { id: String, local_id: Option<String> },
    MessageDeleted { id: String },
}

/// Point-in-time copy of the store for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct MessagesSnapshot {
    pub channel_id: Option<String>,
    pub phase: Phase,
    pub messages: Vec<MessageWithAvatar>,
    pub loading_messages: bool,
    pub loading_more: bool,
    pub offset: u32,
    pub exhausted: bool,
    pub last_error: Option<String>,
}

/// Message list for one text channel at a time.
///
/// Cheap to clone; clones share state. The state lock is never held across
/// a backend call.
#[derive(Clone)]
pub struct TextChannelMessages {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn MessageBackend>,
    resolver: UsernameResolver,
    config: MessagesConfig,
    state: RwLock<StoreState>,
    events_tx: broadcast::Sender<MessagesEvent>,
}

#[derive(Default)]
struct StoreState {
    channel_id: Option<String>,
    /// Bumped on every channel switch or close.
    epoch: u64,
    /// Bumped every time a fetch is issued; only the latest may apply.
    generation: u64,
    in_flight: Option<FetchKind>,
    messages: MessageList,
    /// Offset of the oldest page applied so far.
    offset: u32,
    refresh_trigger: u64,
    loading_messages: bool,
    exhausted: bool,
    last_error: Option<String>,
}

impl StoreState {
    fn phase(&self) -> Phase {
        match (&self.channel_id, self.in_flight) {
            (None, _) => Phase::Idle,
            (Some(_), Some(FetchKind::Initial)) => Phase::LoadingInitial,
            (Some(_), Some(FetchKind::More)) => Phase::LoadingMore,
            (Some(_), Some(FetchKind::Refresh)) => Phase::Refreshing,
            (Some(_), None) => Phase::Ready,
        }
    }
}

impl TextChannelMessages {
    pub fn new(backend: Arc<dyn MessageBackend>, config: MessagesConfig) -> Self {
        let resolver = UsernameResolver::new(
            backend.clone(),
            config.user_cache_capacity,
            config.user_cache_ttl,
        );
        let (events_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                backend,
                resolver,
                config,
                state: RwLock::new(StoreState::default()),
                events_tx,
            }),
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MessagesEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn resolver(&self) -> &UsernameResolver {
        &self.inner.resolver
    }

    pub fn config(&self) -> &MessagesConfig {
        &self.inner.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn MessageBackend> {
        &self.inner.backend
    }

    fn emit(&self, event: MessagesEvent) {
        let _ = self.inner.events_tx.send(event);
    }

    // -- Channel lifecycle --

    /// Switch to `channel_id`: drop the previous channel's messages (the
    /// username cache is kept) and load its newest page.
    pub async fn open_channel(&self, channel_id: &str) -> FetchOutcome {
        {
            let mut state = self.inner.state.write().await;
            if state.channel_id.as_deref() == Some(channel_id) {
                return FetchOutcome::Skipped(SkipReason::AlreadyOpen);
            }
            reset_channel(&mut state, Some(channel_id.to_string()));
        }

        info!("Opened channel {}", channel_id);
        self.emit(MessagesEvent::ChannelOpened {
            channel_id: channel_id.to_string(),
        });
        self.run_fetch(FetchKind::Initial).await
    }

    /// Drop the active channel. In-flight fetches and pushes for it are discarded.
    pub async fn close_channel(&self) {
        {
            let mut state = self.inner.state.write().await;
            if state.channel_id.is_none() {
                return;
            }
            reset_channel(&mut state, None);
        }
        self.emit(MessagesEvent::ChannelClosed);
    }

    // -- Pagination --

    /// Fetch the next older page. Ignored while any page fetch is in flight.
    /// The offset only advances once the page is applied, so calling again
    /// after a failure retries the same page.
    pub async fn load_more_messages(&self) -> FetchOutcome {
        self.run_fetch(FetchKind::More).await
    }

    /// Start over from offset zero. Supersedes any fetch in flight.
    pub async fn refresh_messages(&self) -> FetchOutcome {
        self.run_fetch(FetchKind::Refresh).await
    }

    async fn run_fetch(&self, kind: FetchKind) -> FetchOutcome {
        let (request, generation) = {
            let mut state = self.inner.state.write().await;
            let Some(channel_id) = state.channel_id.clone() else {
                return FetchOutcome::Skipped(SkipReason::NoChannel);
            };

            let offset = match kind {
                FetchKind::Initial => 0,
                FetchKind::More => {
                    if state.in_flight.is_some() {
                        return FetchOutcome::Skipped(SkipReason::AlreadyLoading);
                    }
                    if state.exhausted {
                        return FetchOutcome::Skipped(SkipReason::Exhausted);
                    }
                    state.offset + self.inner.config.page_size
                }
                FetchKind::Refresh => {
                    state.offset = 0;
                    state.exhausted = false;
                    state.refresh_trigger += 1;
                    0
                }
            };

            state.generation += 1;
            state.in_flight = Some(kind);
            let request = PageRequest {
                channel_id,
                offset,
                limit: self.inner.config.page_size,
                refresh_trigger: state.refresh_trigger,
            };
            (request, state.generation)
        };

        debug!(
            "Fetching {:?} page of {} at offset {} (generation {})",
            kind, request.channel_id, request.offset, generation
        );

        let result = match self.inner.backend.fetch_channel_messages(&request).await {
            Ok(page) => {
                let received = page.len();
                let messages =
                    normalize_page(&self.inner.resolver, page, &self.inner.config.avatar_url).await;
                Ok((received, messages))
            }
            Err(e) => Err(e),
        };

        let mut state = self.inner.state.write().await;
        if state.generation != generation {
            debug!(
                "Dropping stale page for {} at offset {} (generation {} < {})",
                request.channel_id, request.offset, generation, state.generation
            );
            return FetchOutcome::Stale;
        }
        state.in_flight = None;
        state.loading_messages = false;

        match result {
            Ok((received, messages)) => {
                state.messages.merge_page(messages);
                state.offset = request.offset;
                state.exhausted = received < request.limit as usize;
                state.last_error = None;
                debug!(
                    "Applied {} messages at offset {}; {} in list",
                    received,
                    request.offset,
                    state.messages.len()
                );
                drop(state);

                self.emit(MessagesEvent::PageApplied {
                    channel_id: request.channel_id,
                    offset: request.offset,
                    received,
                });
                FetchOutcome::Applied { received }
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(
                    "Error fetching messages for {} at offset {}: {}",
                    request.channel_id, request.offset, message
                );
                state.last_error = Some(message.clone());
                drop(state);

                self.emit(MessagesEvent::FetchFailed {
                    channel_id: request.channel_id,
                    offset: request.offset,
                    error: message.clone(),
                });
                FetchOutcome::Failed(message)
            }
        }
    }

    // -- Live pushes --

    /// Reconcile a message pushed by the subscription for the active channel.
    pub async fn handle_pushed_message(&self, raw: ChannelMessage) -> PushOutcome {
        let epoch = {
            let state = self.inner.state.read().await;
            let Some(active) = state.channel_id.as_deref() else {
                return PushOutcome::Ignored;
            };
            if raw.channel_id.as_deref().is_some_and(|c| c != active) {
                debug!("Ignoring push for channel {:?} while {} is open", raw.channel_id, active);
                return PushOutcome::Ignored;
            }
            state.epoch
        };

        let username = self.inner.resolver.resolve(&raw.posted_by_user_id).await;
        let message = normalize(raw, username, &self.inner.config.avatar_url);
        let id = message.id.clone();

        let reconciled = {
            let mut state = self.inner.state.write().await;
            if state.epoch != epoch {
                return PushOutcome::Ignored;
            }
            state.messages.apply_confirmed(message)
        };

        match reconciled {
            Reconciled::Updated => {
                self.emit(MessagesEvent::MessageConfirmed { id, local_id: None });
                PushOutcome::Updated
            }
            Reconciled::ConfirmedPending { local_id } => {
                debug!("Confirmed optimistic message {} as {}", local_id, id);
                self.emit(MessagesEvent::MessageConfirmed {
                    id,
                    local_id: Some(local_id.clone()),
                });
                PushOutcome::Confirmed { local_id }
            }
            Reconciled::Inserted => {
                self.emit(MessagesEvent::MessageAdded { id });
                PushOutcome::Inserted
            }
        }
    }

    // -- Local mutators --

    /// Insert an optimistic message ahead of server confirmation. Returns
    /// false if an entry with that id is already present (it is kept).
    pub async fn add_message(&self, mut message: MessageWithAvatar) -> bool {
        message.pending = true;
        let id = message.id.clone();
        let added = self.inner.state.write().await.messages.insert_local(message);
        if added {
            self.emit(MessagesEvent::MessageAdded { id });
        }
        added
    }

    /// Remove a message from the local list only.
    pub async fn delete_message(&self, id: &str) -> bool {
        let removed = self.inner.state.write().await.messages.remove(id).is_some();
        if removed {
            self.emit(MessagesEvent::MessageDeleted { id: id.to_string() });
        }
        removed
    }

    /// Withdraw an optimistic message the server never confirmed. A copy
    /// already confirmed by a push or a page stays.
    pub async fn withdraw_pending(&self, id: &str) -> bool {
        let removed = self.inner.state.write().await.messages.remove_pending(id).is_some();
        if removed {
            self.emit(MessagesEvent::MessageDeleted { id: id.to_string() });
        }
        removed
    }

    // -- Reads --

    pub async fn messages(&self) -> Vec<MessageWithAvatar> {
        self.inner.state.read().await.messages.as_slice().to_vec()
    }

    pub async fn channel_id(&self) -> Option<String> {
        self.inner.state.read().await.channel_id.clone()
    }

    pub async fn phase(&self) -> Phase {
        self.inner.state.read().await.phase()
    }

    pub async fn loading_messages(&self) -> bool {
        self.inner.state.read().await.loading_messages
    }

    pub async fn loading_more(&self) -> bool {
        self.inner.state.read().await.in_flight.is_some()
    }

    pub async fn snapshot(&self) -> MessagesSnapshot {
        let state = self.inner.state.read().await;
        MessagesSnapshot {
            channel_id: state.channel_id.clone(),
            phase: state.phase(),
            messages: state.messages.as_slice().to_vec(),
            loading_messages: state.loading_messages,
            loading_more: state.in_flight.is_some(),
            offset: state.offset,
            exhausted: state.exhausted,
            last_error: state.last_error.clone(),
        }
    }
}

fn reset_channel(state: &mut StoreState, channel_id: Option<String>) {
    state.loading_messages = channel_id.is_some();
    state.channel_id = channel_id;
    state.epoch += 1;
    state.generation += 1;
    state.in_flight = None;
    state.messages.clear();
    state.offset = 0;
    state.exhausted = false;
    state.last_error = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NewChannelMessage;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves canned pages keyed by offset and records every request.
    #[derive(Default)]
    struct PagedBackend {
        pages: Mutex<Vec<(u32, Vec<ChannelMessage>)>>,
        requests: Mutex<Vec<PageRequest>>,
        fail: Mutex<bool>,
    }

    impl PagedBackend {
        fn with_page(self, offset: u32, page: Vec<ChannelMessage>) -> Self {
            self.pages.lock().unwrap().push((offset, page));
            self
        }
    }

    #[async_trait]
    impl MessageBackend for PagedBackend {
        async fn fetch_channel_messages(&self, request: &PageRequest) -> Result<Vec<ChannelMessage>> {
            self.requests.lock().unwrap().push(request.clone());
            if *self.fail.lock().unwrap() {
                return Err(anyhow!("network unreachable"));
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .iter()
                .find(|(offset, _)| *offset == request.offset)
                .map(|(_, page)| page.clone())
                .unwrap_or_default())
        }

        async fn fetch_username(&self, user_id: &str) -> Result<String> {
            Ok(format!("user {user_id}"))
        }

        async fn create_channel_message(&self, _message: &NewChannelMessage) -> Result<()> {
            Ok(())
        }
    }

    fn wire(id: &str, posted_at: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.to_string(),
            posted_by_user_id: "u1".to_string(),
            posted_at: posted_at.to_string(),
            content: format!("content {id}"),
            edited: false,
            channel_id: None,
            attachment_urls: None,
        }
    }

    fn store(backend: PagedBackend) -> (TextChannelMessages, Arc<PagedBackend>) {
        let backend = Arc::new(backend);
        let config = MessagesConfig {
            page_size: 2,
            ..MessagesConfig::default()
        };
        (TextChannelMessages::new(backend.clone(), config), backend)
    }

    #[tokio::test]
    async fn fetch_without_channel_is_skipped() {
        let (store, backend) = store(PagedBackend::default());
        assert_eq!(store.load_more_messages().await, FetchOutcome::Skipped(SkipReason::NoChannel));
        assert_eq!(store.refresh_messages().await, FetchOutcome::Skipped(SkipReason::NoChannel));
        assert!(backend.requests.lock().unwrap().is_empty());
        assert_eq!(store.phase().await, Phase::Idle);
    }

    #[tokio::test]
    async fn initial_load_clears_flags() {
        let (store, _) = store(
            PagedBackend::default().with_page(0, vec![wire("1", "2024-01-01T00:00:01Z"), wire("2", "2024-01-01T00:00:02Z")]),
        );
        assert_eq!(store.open_channel("c1").await, FetchOutcome::Applied { received: 2 });

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.phase, Phase::Ready);
        assert!(!snapshot.loading_messages);
        assert!(!snapshot.loading_more);
        assert!(!snapshot.exhausted);
        let ids: Vec<_> = snapshot.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(snapshot.messages[0].username, "user u1");
    }

    #[tokio::test]
    async fn reopening_active_channel_is_noop() {
        let (store, backend) = store(PagedBackend::default());
        store.open_channel("c1").await;
        assert_eq!(store.open_channel("c1").await, FetchOutcome::Skipped(SkipReason::AlreadyOpen));
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_page_exhausts_history() {
        let (store, backend) = store(
            PagedBackend::default()
                .with_page(0, vec![wire("1", "2024-01-01T00:00:01Z"), wire("2", "2024-01-01T00:00:02Z")])
                .with_page(2, vec![wire("0", "2024-01-01T00:00:00Z")]),
        );
        store.open_channel("c1").await;
        assert_eq!(store.load_more_messages().await, FetchOutcome::Applied { received: 1 });
        assert!(store.snapshot().await.exhausted);
        assert_eq!(store.load_more_messages().await, FetchOutcome::Skipped(SkipReason::Exhausted));

        // Refresh lifts the exhaustion and restarts at zero
        assert_eq!(store.refresh_messages().await, FetchOutcome::Applied { received: 2 });
        let snapshot = store.snapshot().await;
        assert!(!snapshot.exhausted);
        assert_eq!(snapshot.offset, 0);
        assert_eq!(snapshot.messages.len(), 3);

        let requests = backend.requests.lock().unwrap();
        let triggers: Vec<_> = requests.iter().map(|r| (r.offset, r.refresh_trigger)).collect();
        assert_eq!(triggers, vec![(0, 0), (2, 0), (0, 1)]);
    }

    #[tokio::test]
    async fn failed_page_keeps_list_and_offset() {
        let (store, backend) = store(
            PagedBackend::default()
                .with_page(0, vec![wire("1", "2024-01-01T00:00:01Z"), wire("2", "2024-01-01T00:00:02Z")]),
        );
        store.open_channel("c1").await;
        let mut events = store.subscribe();

        *backend.fail.lock().unwrap() = true;
        let outcome = store.load_more_messages().await;
        assert!(matches!(outcome, FetchOutcome::Failed(ref e) if e.contains("network unreachable")));

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.offset, 0);
        assert!(!snapshot.loading_more);
        assert!(snapshot.last_error.is_some());
        assert!(matches!(events.try_recv(), Ok(MessagesEvent::FetchFailed { offset: 2, .. })));

        // Retrying re-issues the same offset
        *backend.fail.lock().unwrap() = false;
        store.load_more_messages().await;
        let offsets: Vec<_> = backend.requests.lock().unwrap().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 2, 2]);
        assert!(store.snapshot().await.last_error.is_none());
    }

    #[tokio::test]
    async fn pushes_for_other_channels_are_ignored() {
        let (store, _) = store(PagedBackend::default());
        let mut stray = wire("x", "2024-01-01T00:00:05Z");
        stray.channel_id = Some("c2".into());

        assert_eq!(store.handle_pushed_message(stray.clone()).await, PushOutcome::Ignored);
        store.open_channel("c1").await;
        assert_eq!(store.handle_pushed_message(stray).await, PushOutcome::Ignored);
        assert!(store.messages().await.is_empty());
    }

    #[tokio::test]
    async fn delete_emits_event_once() {
        let (store, _) = store(
            PagedBackend::default().with_page(0, vec![wire("1", "2024-01-01T00:00:01Z")]),
        );
        store.open_channel("c1").await;
        let mut events = store.subscribe();

        assert!(store.delete_message("1").await);
        assert!(!store.delete_message("1").await);
        assert_eq!(events.try_recv().unwrap(), MessagesEvent::MessageDeleted { id: "1".into() });
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_channel_returns_to_idle() {
        let (store, _) = store(
            PagedBackend::default().with_page(0, vec![wire("1", "2024-01-01T00:00:01Z")]),
        );
        store.open_channel("c1").await;
        store.close_channel().await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.channel_id, None);
        assert!(!snapshot.loading_messages);
    }
}
