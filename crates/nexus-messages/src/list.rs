use indexmap::IndexMap;

use nexus_types::MessageWithAvatar;

use crate::normalize::sort_newest_first;

/// How a server-confirmed message landed in the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// An entry with the same id was updated in place.
    Updated,
    /// A pending optimistic entry with matching content and author took the
    /// confirmed fields; `local_id` is the id it had before.
    ConfirmedPending { local_id: String },
    /// No counterpart; inserted at its time position.
    Inserted,
}

/// Messages of one channel, newest first, unique by id.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    messages: Vec<MessageWithAvatar>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[MessageWithAvatar] {
        &self.messages
    }

    pub fn ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&MessageWithAvatar> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Merge a fetched page. Page entries replace existing entries with the
    /// same id; existing entries missing from the page stay. Used for the
    /// newest page and for older history alike.
    pub fn merge_page(&mut self, page: Vec<MessageWithAvatar>) {
        let mut by_id: IndexMap<String, MessageWithAvatar> =
            IndexMap::with_capacity(page.len() + self.messages.len());
        for msg in page {
            by_id.insert(msg.id.clone(), msg);
        }
        for msg in self.messages.drain(..) {
            by_id.entry(msg.id.clone()).or_insert(msg);
        }
        self.rebuild(by_id);
    }

    /// Merge one locally created message. An existing entry with the same
    /// id wins, so a confirmation that arrived first is never downgraded.
    /// Returns whether the message was new.
    pub fn insert_local(&mut self, msg: MessageWithAvatar) -> bool {
        let mut by_id: IndexMap<String, MessageWithAvatar> =
            IndexMap::with_capacity(self.messages.len() + 1);
        let id = msg.id.clone();
        by_id.insert(id.clone(), msg);
        let mut existed = false;
        for existing in self.messages.drain(..) {
            if existing.id == id {
                existed = true;
            }
            by_id.insert(existing.id.clone(), existing);
        }
        self.rebuild(by_id);
        !existed
    }

    /// Apply a message pushed by the server.
    pub fn apply_confirmed(&mut self, msg: MessageWithAvatar) -> Reconciled {
        if let Some(idx) = self.messages.iter().position(|m| m.id == msg.id) {
            self.messages[idx] = self.messages[idx].confirm_with(msg);
            sort_newest_first(&mut self.messages);
            return Reconciled::Updated;
        }

        let pending = self.messages.iter().position(|m| {
            m.pending && m.content == msg.content && m.posted_by_user_id == msg.posted_by_user_id
        });
        if let Some(idx) = pending {
            let local_id = self.messages[idx].id.clone();
            self.messages[idx] = self.messages[idx].confirm_with(msg);
            sort_newest_first(&mut self.messages);
            return Reconciled::ConfirmedPending { local_id };
        }

        // Newest-first: slot in ahead of anything at the same instant or older
        let idx = self.messages.partition_point(|m| m.posted_at > msg.posted_at);
        self.messages.insert(idx, msg);
        Reconciled::Inserted
    }

    pub fn remove(&mut self, id: &str) -> Option<MessageWithAvatar> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(idx))
    }

    /// Remove `id` only while it is still an unconfirmed local entry.
    pub fn remove_pending(&mut self, id: &str) -> Option<MessageWithAvatar> {
        let idx = self.messages.iter().position(|m| m.id == id && m.pending)?;
        Some(self.messages.remove(idx))
    }

    fn rebuild(&mut self, by_id: IndexMap<String, MessageWithAvatar>) {
        self.messages = by_id.into_values().collect();
        sort_newest_first(&mut self.messages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> MessageWithAvatar {
        MessageWithAvatar {
            id: id.to_string(),
            posted_by_user_id: "u1".to_string(),
            posted_at: at(secs),
            content: format!("content {id}"),
            edited: false,
            channel_id: Some("c1".to_string()),
            attachment_urls: vec![],
            username: "alice".to_string(),
            avatar: String::new(),
            pending: false,
        }
    }

    fn pending(id: &str, secs: i64, content: &str) -> MessageWithAvatar {
        MessageWithAvatar {
            content: content.to_string(),
            pending: true,
            ..msg(id, secs)
        }
    }

    fn assert_sorted_unique(list: &MessageList) {
        let slice = list.as_slice();
        for pair in slice.windows(2) {
            assert!(pair[0].posted_at >= pair[1].posted_at, "out of order: {:?}", list.ids());
        }
        let mut ids = list.ids();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), slice.len(), "duplicate ids: {:?}", list.ids());
    }

    #[test]
    fn merge_page_sorts_newest_first() {
        let mut list = MessageList::new();
        list.merge_page(vec![msg("1", 1), msg("2", 2)]);
        assert_eq!(list.ids(), vec!["2", "1"]);

        list.merge_page(vec![msg("3", 0)]);
        assert_eq!(list.ids(), vec!["2", "1", "3"]);
    }

    #[test]
    fn merge_page_dedups_and_page_wins() {
        let mut list = MessageList::new();
        list.merge_page(vec![msg("1", 1), msg("2", 2), msg("3", 3)]);

        let mut edited = msg("2", 2);
        edited.content = "edited".into();
        edited.edited = true;
        list.merge_page(vec![edited, msg("4", 4), msg("1", 1)]);

        assert_eq!(list.ids(), vec!["4", "3", "2", "1"]);
        assert_eq!(list.get("2").unwrap().content, "edited");
        assert_sorted_unique(&list);
    }

    #[test]
    fn overlapping_pages_never_duplicate() {
        let mut list = MessageList::new();
        for start in 0..10 {
            let page = (start..start + 5).map(|i| msg(&i.to_string(), (i * 7) % 13)).collect();
            list.merge_page(page);
            assert_sorted_unique(&list);
        }
        assert_eq!(list.len(), 14);
    }

    #[test]
    fn insert_local_keeps_existing_entry() {
        let mut list = MessageList::new();
        list.merge_page(vec![msg("a", 5)]);

        assert!(!list.insert_local(pending("a", 9, "stale")));
        assert_eq!(list.len(), 1);
        assert!(!list.get("a").unwrap().pending);

        assert!(list.insert_local(pending("b", 9, "fresh")));
        assert_eq!(list.ids(), vec!["b", "a"]);
    }

    #[test]
    fn confirmation_replaces_pending_in_place() {
        let mut list = MessageList::new();
        list.merge_page(vec![msg("old", 1)]);
        list.insert_local(pending("local-1", 10, "hi"));

        let mut confirmed = msg("server-9", 10);
        confirmed.content = "hi".into();
        let outcome = list.apply_confirmed(confirmed);

        assert_eq!(outcome, Reconciled::ConfirmedPending { local_id: "local-1".into() });
        assert_eq!(list.ids(), vec!["server-9", "old"]);
        assert!(!list.get("server-9").unwrap().pending);
    }

    #[test]
    fn confirmed_messages_are_not_matched_by_content() {
        let mut list = MessageList::new();
        let mut earlier = msg("m1", 1);
        earlier.content = "ok".into();
        list.merge_page(vec![earlier]);

        let mut repeat = msg("m2", 2);
        repeat.content = "ok".into();
        assert_eq!(list.apply_confirmed(repeat), Reconciled::Inserted);
        assert_eq!(list.ids(), vec!["m2", "m1"]);
    }

    #[test]
    fn confirmation_by_id_keeps_local_attachments() {
        let mut list = MessageList::new();
        let mut local = pending("x", 3, "pic");
        local.attachment_urls = vec!["blob:1".into()];
        list.insert_local(local);

        let mut confirmed = msg("x", 3);
        confirmed.content = "pic".into();
        confirmed.channel_id = None;
        assert_eq!(list.apply_confirmed(confirmed), Reconciled::Updated);

        let entry = list.get("x").unwrap();
        assert_eq!(entry.attachment_urls, vec!["blob:1".to_string()]);
        assert_eq!(entry.channel_id.as_deref(), Some("c1"));
        assert!(!entry.pending);
    }

    #[test]
    fn unmatched_push_lands_in_time_order() {
        let mut list = MessageList::new();
        list.merge_page(vec![msg("a", 30), msg("b", 10)]);

        list.apply_confirmed(msg("newest", 40));
        list.apply_confirmed(msg("middle", 20));

        assert_eq!(list.ids(), vec!["newest", "a", "middle", "b"]);
    }

    #[test]
    fn remove_touches_only_the_target() {
        let mut list = MessageList::new();
        list.merge_page((0..50).map(|i| msg(&format!("m{i}"), i)).collect());

        let removed = list.remove("m17").unwrap();
        assert_eq!(removed.id, "m17");
        assert_eq!(list.len(), 49);
        assert!(list.get("m17").is_none());
        assert!(list.get("m16").is_some() && list.get("m18").is_some());
        assert!(list.remove("m17").is_none());
    }

    #[test]
    fn remove_pending_leaves_confirmed_entries() {
        let mut list = MessageList::new();
        list.insert_local(pending("local", 5, "hi"));
        list.merge_page(vec![msg("server", 3)]);

        assert!(list.remove_pending("server").is_none());
        assert_eq!(list.len(), 2);

        list.apply_confirmed(MessageWithAvatar { content: "hi".into(), ..msg("local", 5) });
        assert!(list.remove_pending("local").is_none());
        assert!(list.get("local").is_some_and(|m| !m.pending));
    }
}
