//! Message model for group chat

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Poll;

/// What kind of chat event a message represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    File,
    Poll,
}

/// Weak reference to the message being replied to.
///
/// Carries a snapshot of sender and content so the reply still renders
/// when the referenced message has been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub message_id: String,
    pub sender_name: String,
    pub snippet: String,
}

/// A single chat event in a group's message log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub group_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    /// Body text, or the file name/descriptor when `kind` is `File`
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub reply_to: Option<ReplyTarget>,
    /// Emoji -> reactor identities. Empty reactor sets are pruned.
    pub reactions: BTreeMap<String, BTreeSet<i64>>,
    /// Present only when `kind` is `Poll`
    pub poll: Option<Poll>,
    /// Locally generated entry awaiting server confirmation
    pub provisional: bool,
}

impl Message {
    /// Create a provisional text message for an optimistic local send
    pub fn provisional_text(
        group_id: i64,
        sender_id: i64,
        sender_name: String,
        content: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id,
            sender_id,
            sender_name,
            content,
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            reply_to: None,
            reactions: BTreeMap::new(),
            poll: None,
            provisional: true,
        }
    }

    /// Short content preview used for pinned chips and reply snippets
    pub fn snippet(&self) -> String {
        snippet_of(&self.content)
    }

    /// Day label used for date separators in the rendered log
    pub fn date_label(&self) -> String {
        self.timestamp.format("%b %-d, %Y").to_string()
    }

    pub fn format_timestamp(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

/// Truncate content to a 30-character preview
pub fn snippet_of(content: &str) -> String {
    const MAX: usize = 30;
    if content.chars().count() > MAX {
        let cut: String = content.chars().take(MAX - 3).collect();
        format!("{}...", cut)
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_short_content_unchanged() {
        assert_eq!(snippet_of("hello"), "hello");
    }

    #[test]
    fn test_snippet_long_content_truncated() {
        let long = "a".repeat(40);
        let s = snippet_of(&long);
        assert_eq!(s.chars().count(), 30);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn test_provisional_text_is_flagged() {
        let m = Message::provisional_text(7, 1, "alice".into(), "hi".into());
        assert!(m.provisional);
        assert_eq!(m.kind, MessageKind::Text);
        assert!(m.reactions.is_empty());
    }
}
