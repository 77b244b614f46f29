//! Session state store
//!
//! One store instance owns the message log and derived views for a single
//! open group-chat session. Multiple simultaneously open chats each own
//! an independent store; the backend is the only shared source of truth.
//!
//! The log is append-mostly and kept non-decreasing in timestamp. Live
//! frames insert-if-absent; history merges are a union-by-id where the
//! server-fetched copy wins, so a merge and a concurrent live append
//! converge to the same state in either order.

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Message, MessageKind, ReplyTarget};

/// Pre-image of an optimistically removed message, kept so a failed
/// backend delete can restore it.
#[derive(Debug, Clone)]
pub struct RemovedMessage {
    pub message: Message,
    pub was_pinned: bool,
}

/// In-memory state for one open group chat
#[derive(Debug)]
pub struct SessionStore {
    group_id: i64,
    messages: Vec<Message>,
    /// Pin order is preserved; membership is kept duplicate-free
    pinned: Vec<String>,
    reply_draft: Option<ReplyTarget>,
}

impl SessionStore {
    pub fn new(group_id: i64) -> Self {
        Self {
            group_id,
            messages: Vec::new(),
            pinned: Vec::new(),
            reply_draft: None,
        }
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    /// Messages in rendered order (non-decreasing timestamp)
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Insert a live-broadcast message.
    ///
    /// Inserts-if-absent by id: a duplicate delivery (or a live echo of a
    /// message already merged from history) is ignored. Returns whether
    /// the message was inserted.
    pub fn insert_live(&mut self, message: Message) -> bool {
        if self.position(&message.id).is_some() {
            debug!(id = %message.id, "Dropping duplicate live message");
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
        self.debug_validate();
        true
    }

    /// Merge a history fetch into the log.
    ///
    /// Union-by-id: on collision the fetched (server-canonical) copy
    /// wins, since it carries authoritative ids and any edits made while
    /// the client was disconnected. Idempotent, and commutative with
    /// respect to live appends.
    pub fn merge_history(&mut self, fetched: Vec<Message>) {
        for message in fetched {
            match self.position(&message.id) {
                Some(at) => self.messages[at] = message,
                None => self.messages.push(message),
            }
        }
        self.messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        self.debug_validate();
    }

    /// Apply an inbound vote-delta to an existing poll message
    pub fn apply_vote_delta(
        &mut self,
        poll_id: &str,
        option_id: &str,
        vote_count: u32,
    ) -> Result<()> {
        let poll = self
            .messages
            .iter_mut()
            .filter_map(|m| m.poll.as_mut())
            .find(|p| p.poll_id == poll_id)
            .ok_or_else(|| Error::UnknownPoll(poll_id.to_string()))?;

        let option = poll
            .option_mut(option_id)
            .ok_or_else(|| Error::UnknownPoll(format!("{}/{}", poll_id, option_id)))?;
        option.vote_count = vote_count;
        Ok(())
    }

    /// Look up a poll message by poll id
    pub fn find_poll(&self, poll_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.poll.as_ref().is_some_and(|p| p.poll_id == poll_id))
    }

    /// Toggle one reactor's membership in a message's reaction set.
    ///
    /// Returns whether the reaction was added (`true`) or removed
    /// (`false`); calling again with the same arguments inverts the flip.
    pub fn toggle_reaction(&mut self, id: &str, emoji: &str, reactor: i64) -> Result<bool> {
        let at = self
            .position(id)
            .ok_or_else(|| Error::UnknownMessage(id.to_string()))?;
        let reactions = &mut self.messages[at].reactions;

        let set = reactions.entry(emoji.to_string()).or_default();
        let added = set.insert(reactor);
        if !added {
            set.remove(&reactor);
        }
        if set.is_empty() {
            reactions.remove(emoji);
        }
        self.debug_validate();
        Ok(added)
    }

    /// Flip a message's pinned membership.
    ///
    /// Errors on an unknown id. Returns whether the message is pinned
    /// after the flip; toggling twice restores the prior membership.
    pub fn toggle_pin(&mut self, id: &str) -> Result<bool> {
        if self.position(id).is_none() {
            return Err(Error::UnknownMessage(id.to_string()));
        }
        let now_pinned = match self.pinned.iter().position(|p| p == id) {
            Some(at) => {
                self.pinned.remove(at);
                false
            }
            None => {
                self.pinned.push(id.to_string());
                true
            }
        };
        self.debug_validate();
        Ok(now_pinned)
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pinned.iter().any(|p| p == id)
    }

    pub fn pinned_ids(&self) -> &[String] {
        &self.pinned
    }

    /// Pinned messages resolved against the live log, in pin order
    pub fn pinned_messages(&self) -> Vec<&Message> {
        self.pinned.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Replace the pinned set from a backend fetch, keeping only ids
    /// that resolve to a live log entry.
    pub fn seed_pins(&mut self, ids: impl IntoIterator<Item = String>) {
        self.pinned.clear();
        for id in ids {
            if self.position(&id).is_some() && !self.is_pinned(&id) {
                self.pinned.push(id);
            }
        }
        self.debug_validate();
    }

    /// Remove a message optimistically, returning its pre-image
    pub fn remove(&mut self, id: &str) -> Option<RemovedMessage> {
        let at = self.position(id)?;
        let message = self.messages.remove(at);
        let was_pinned = match self.pinned.iter().position(|p| p == id) {
            Some(pin_at) => {
                self.pinned.remove(pin_at);
                true
            }
            None => false,
        };
        self.debug_validate();
        Some(RemovedMessage {
            message,
            was_pinned,
        })
    }

    /// Put a removed message back after a failed backend delete
    pub fn restore(&mut self, removed: RemovedMessage) {
        let id = removed.message.id.clone();
        if self.insert_live(removed.message) && removed.was_pinned {
            self.pinned.push(id);
        }
        self.debug_validate();
    }

    /// Match a server echo against an outstanding provisional entry.
    ///
    /// Provisional ids are local; the echo arrives under the
    /// server-assigned id. A provisional text message from the same
    /// sender with the same content is taken to be confirmed and dropped
    /// so the echo can be inserted under its canonical id.
    pub fn reconcile_provisional(&mut self, incoming: &Message) -> Option<String> {
        let at = self.messages.iter().position(|m| {
            m.provisional
                && m.kind == MessageKind::Text
                && m.sender_id == incoming.sender_id
                && m.content == incoming.content
        })?;
        let old = self.messages.remove(at);
        self.pinned.retain(|p| *p != old.id);
        debug!(provisional = %old.id, canonical = %incoming.id, "Reconciled provisional message");
        Some(old.id)
    }

    /// The single reply draft; replaces any previous one
    pub fn set_reply_draft(&mut self, target: Option<ReplyTarget>) {
        self.reply_draft = target;
    }

    pub fn reply_draft(&self) -> Option<&ReplyTarget> {
        self.reply_draft.as_ref()
    }

    /// Guardrails compiled out of release builds
    fn debug_validate(&self) {
        debug_assert!(
            self.messages
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp),
            "message log out of timestamp order"
        );
        debug_assert!(
            {
                let mut ids: Vec<&str> = self.messages.iter().map(|m| m.id.as_str()).collect();
                ids.sort_unstable();
                ids.windows(2).all(|w| w[0] != w[1])
            },
            "duplicate message id in log"
        );
        debug_assert!(
            self.pinned.iter().all(|id| self.position(id).is_some()),
            "pinned id does not resolve to a live message"
        );
        debug_assert!(
            self.messages
                .iter()
                .all(|m| m.reactions.values().all(|set| !set.is_empty())),
            "empty reaction set not pruned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    use crate::models::{MessageKind, Poll, PollOption};

    fn text(id: &str, ts_millis: i64) -> Message {
        Message {
            id: id.to_string(),
            group_id: 1,
            sender_id: 10,
            sender_name: "alice".to_string(),
            content: format!("body of {}", id),
            kind: MessageKind::Text,
            timestamp: Utc.timestamp_millis_opt(ts_millis).unwrap(),
            reply_to: None,
            reactions: BTreeMap::new(),
            poll: None,
            provisional: false,
        }
    }

    fn poll_message(id: &str, ts_millis: i64) -> Message {
        let mut m = text(id, ts_millis);
        m.kind = MessageKind::Poll;
        m.poll = Some(Poll {
            poll_id: "p1".to_string(),
            question: "Which day?".to_string(),
            options: vec![
                PollOption {
                    option_id: "o1".to_string(),
                    text: "Mon".to_string(),
                    vote_count: 2,
                },
                PollOption {
                    option_id: "o2".to_string(),
                    text: "Tue".to_string(),
                    vote_count: 4,
                },
            ],
        });
        m
    }

    #[test]
    fn test_empty_group() {
        let mut store = SessionStore::new(1);
        store.merge_history(Vec::new());
        assert!(store.is_empty());
        assert!(store.pinned_messages().is_empty());
    }

    #[test]
    fn test_history_sorted_by_timestamp() {
        // Arrival order m1 (ts=100), m2 (ts=50) must render as [m2, m1]
        let mut store = SessionStore::new(1);
        store.merge_history(vec![text("m1", 100), text("m2", 50)]);
        let order: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m2", "m1"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let history = vec![text("m1", 100), text("m2", 50)];
        let mut store = SessionStore::new(1);
        store.merge_history(history.clone());
        let once: Vec<String> = store.messages().iter().map(|m| m.id.clone()).collect();

        store.merge_history(history);
        let twice: Vec<String> = store.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(once, twice);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_merge_commutes_with_live_append() {
        let mut live_then_merge = SessionStore::new(1);
        let mut merge_then_live = SessionStore::new(1);

        let mut live_copy = text("m1", 100);
        live_copy.content = "live copy".to_string();
        let mut server_copy = text("m1", 100);
        server_copy.content = "server copy".to_string();

        live_then_merge.insert_live(live_copy.clone());
        live_then_merge.merge_history(vec![server_copy.clone()]);

        merge_then_live.merge_history(vec![server_copy]);
        merge_then_live.insert_live(live_copy);

        for store in [&live_then_merge, &merge_then_live] {
            assert_eq!(store.len(), 1);
            // Server-canonical copy wins regardless of interleaving
            assert_eq!(store.get("m1").unwrap().content, "server copy");
        }
    }

    #[test]
    fn test_live_insert_keeps_order() {
        let mut store = SessionStore::new(1);
        store.merge_history(vec![text("m1", 100), text("m3", 300)]);
        store.insert_live(text("m2", 200));
        let order: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_redelivery_after_reconnect_not_duplicated() {
        let mut store = SessionStore::new(1);
        // Broadcast arrives live, then a concurrent history reload
        // returns the same message, then the broadcast is re-delivered.
        store.insert_live(text("m1", 100));
        store.merge_history(vec![text("m1", 100), text("m2", 150)]);
        assert!(!store.insert_live(text("m1", 100)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reaction_toggle_roundtrip() {
        let mut store = SessionStore::new(1);
        store.insert_live(text("m1", 100));

        assert!(store.toggle_reaction("m1", "👍", 7).unwrap());
        assert_eq!(store.get("m1").unwrap().reactions["👍"].len(), 1);

        assert!(!store.toggle_reaction("m1", "👍", 7).unwrap());
        // No leftover empty-set entry
        assert!(store.get("m1").unwrap().reactions.is_empty());
    }

    #[test]
    fn test_reaction_set_semantics() {
        let mut store = SessionStore::new(1);
        store.insert_live(text("m1", 100));
        store.toggle_reaction("m1", "👍", 7).unwrap();
        store.toggle_reaction("m1", "👍", 8).unwrap();
        store.toggle_reaction("m1", "👍", 7).unwrap();
        let set = &store.get("m1").unwrap().reactions["👍"];
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![8]);
    }

    #[test]
    fn test_pin_toggle_symmetry() {
        let mut store = SessionStore::new(1);
        store.insert_live(text("m1", 100));

        assert!(store.toggle_pin("m1").unwrap());
        assert!(store.is_pinned("m1"));
        assert!(!store.toggle_pin("m1").unwrap());
        assert!(!store.is_pinned("m1"));
    }

    #[test]
    fn test_pin_unknown_id_is_error() {
        let mut store = SessionStore::new(1);
        assert!(store.toggle_pin("missing").is_err());
    }

    #[test]
    fn test_vote_delta_updates_option_in_place() {
        let mut store = SessionStore::new(1);
        store.insert_live(poll_message("m1", 100));

        store.apply_vote_delta("p1", "o2", 5).unwrap();

        assert_eq!(store.len(), 1);
        let poll = store.get("m1").unwrap().poll.as_ref().unwrap();
        assert_eq!(poll.options[0].vote_count, 2);
        assert_eq!(poll.options[1].vote_count, 5);
    }

    #[test]
    fn test_vote_delta_unknown_poll_is_error() {
        let mut store = SessionStore::new(1);
        assert!(store.apply_vote_delta("p9", "o1", 1).is_err());
    }

    #[test]
    fn test_remove_and_restore() {
        let mut store = SessionStore::new(1);
        store.merge_history(vec![text("m1", 100), text("m2", 200)]);
        store.toggle_pin("m1").unwrap();

        let removed = store.remove("m1").unwrap();
        assert!(store.get("m1").is_none());
        assert!(!store.is_pinned("m1"));

        store.restore(removed);
        assert!(store.get("m1").is_some());
        assert!(store.is_pinned("m1"));
        let order: Vec<&str> = store.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(order, vec!["m1", "m2"]);
    }

    #[test]
    fn test_seed_pins_keeps_only_resolvable_ids() {
        let mut store = SessionStore::new(1);
        store.merge_history(vec![text("m1", 100)]);
        store.seed_pins(vec!["m1".to_string(), "ghost".to_string(), "m1".to_string()]);
        assert_eq!(store.pinned_ids(), &["m1".to_string()]);
    }

    #[test]
    fn test_reconcile_provisional_with_server_echo() {
        let mut store = SessionStore::new(1);
        let local = Message::provisional_text(1, 10, "alice".to_string(), "hello".to_string());
        let provisional_id = local.id.clone();
        store.insert_live(local);

        let mut echo = text("srv-1", 100);
        echo.content = "hello".to_string();

        let confirmed = store.reconcile_provisional(&echo);
        assert_eq!(confirmed, Some(provisional_id));
        store.insert_live(echo);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].id, "srv-1");
    }

    #[test]
    fn test_reply_draft_is_single() {
        let mut store = SessionStore::new(1);
        store.set_reply_draft(Some(ReplyTarget {
            message_id: "m1".to_string(),
            sender_name: "alice".to_string(),
            snippet: "hello".to_string(),
        }));
        store.set_reply_draft(Some(ReplyTarget {
            message_id: "m2".to_string(),
            sender_name: "bob".to_string(),
            snippet: "later".to_string(),
        }));
        assert_eq!(store.reply_draft().unwrap().message_id, "m2");

        store.set_reply_draft(None);
        assert!(store.reply_draft().is_none());
    }
}
