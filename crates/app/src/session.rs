//! One open group-chat session
//!
//! Ties the realtime channel, the REST client, and the state store
//! together. Mutations are reflected locally first where that keeps the
//! interface responsive, and rolled back when the backend rejects them.

use cohort_core::{normalize, InboundEvent, Message, ReplyTarget, SessionStore};
use cohort_net::{
    send_destination, ChannelEvent, ChatChannel, ConstantBackoff, NewPoll, ReconnectPolicy,
    RestClient, WireMessage,
};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Model(#[from] cohort_core::Error),
    #[error(transparent)]
    Net(#[from] cohort_net::Error),
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Message is empty")]
    EmptyMessage,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Identity of the signed-in user
#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: i64,
    pub name: String,
}

/// State change surfaced to the interface layer
#[derive(Debug)]
pub enum SessionUpdate {
    /// The channel is live and history/pins have been loaded
    Connected,
    /// A new message landed in the log
    Message(Message),
    /// An existing poll's tallies changed
    VoteUpdated { poll_id: String, option_id: String },
    Reconnecting { attempt: u32 },
    Closed,
}

/// A single open chat for one group.
///
/// Each simultaneously open group gets its own session; nothing is
/// shared between them client-side.
pub struct ChatSession {
    group_id: i64,
    viewer: Option<Viewer>,
    store: SessionStore,
    channel: ChatChannel,
    rest: RestClient,
    /// Reflect own sends locally before the server echo arrives
    optimistic_send: bool,
}

impl ChatSession {
    pub fn open(
        rest_url: &str,
        ws_url: &str,
        token: &str,
        group_id: i64,
        viewer: Option<Viewer>,
    ) -> Result<Self> {
        Self::open_with_policy(
            rest_url,
            ws_url,
            token,
            group_id,
            viewer,
            Box::new(ConstantBackoff::default()),
        )
    }

    pub fn open_with_policy(
        rest_url: &str,
        ws_url: &str,
        token: &str,
        group_id: i64,
        viewer: Option<Viewer>,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Result<Self> {
        let rest = RestClient::new(rest_url, token)?;
        let channel = ChatChannel::connect(ws_url, group_id, token, policy);
        Ok(Self {
            group_id,
            viewer,
            store: SessionStore::new(group_id),
            channel,
            rest,
            optimistic_send: false,
        })
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn set_optimistic_send(&mut self, on: bool) {
        self.optimistic_send = on;
    }

    fn viewer(&self) -> Result<&Viewer> {
        self.viewer.as_ref().ok_or(SessionError::NotAuthenticated)
    }

    /// Pump the channel and fold events into the store.
    ///
    /// Returns `None` once the channel is torn down. Malformed frames and
    /// duplicate deliveries are absorbed here; they never surface as
    /// updates or errors.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            match self.channel.next_event().await? {
                ChannelEvent::Subscribed => {
                    // A reconnect replays the same path as first connect;
                    // the merge heals anything missed in the gap.
                    if let Err(e) = self.load_history().await {
                        warn!(error = %e, "History fetch failed");
                    }
                    if let Err(e) = self.load_pins().await {
                        warn!(error = %e, "Pin fetch failed");
                    }
                    return Some(SessionUpdate::Connected);
                }
                ChannelEvent::Frame(value) => match normalize(self.group_id, &value) {
                    Ok(InboundEvent::Message(message)) => {
                        self.store.reconcile_provisional(&message);
                        if self.store.insert_live(message.clone()) {
                            return Some(SessionUpdate::Message(message));
                        }
                    }
                    Ok(InboundEvent::VoteDelta {
                        poll_id,
                        option_id,
                        vote_count,
                    }) => match self.store.apply_vote_delta(&poll_id, &option_id, vote_count) {
                        Ok(()) => {
                            return Some(SessionUpdate::VoteUpdated { poll_id, option_id });
                        }
                        Err(e) => warn!(error = %e, "Dropping vote update"),
                    },
                    Err(e) => warn!(error = %e, "Dropping malformed frame"),
                },
                ChannelEvent::Reconnecting { attempt } => {
                    return Some(SessionUpdate::Reconnecting { attempt });
                }
                ChannelEvent::Closed => return Some(SessionUpdate::Closed),
            }
        }
    }

    /// Fetch persisted history and merge it into the log
    pub async fn load_history(&mut self) -> Result<usize> {
        let records = self.rest.fetch_messages(self.group_id).await?;
        let mut batch = Vec::with_capacity(records.len());
        for record in &records {
            match normalize(self.group_id, record) {
                Ok(InboundEvent::Message(message)) => batch.push(message),
                // History rows embed their tallies; a stray delta row
                // carries nothing to merge.
                Ok(InboundEvent::VoteDelta { .. }) => {}
                Err(e) => warn!(error = %e, "Skipping malformed history record"),
            }
        }
        let count = batch.len();
        self.store.merge_history(batch);
        info!(group_id = self.group_id, count, "Merged history");
        Ok(count)
    }

    /// Fetch the pinned set and seed it against the current log
    pub async fn load_pins(&mut self) -> Result<usize> {
        let records = self.rest.fetch_pins(self.group_id).await?;
        let ids: Vec<String> = records
            .iter()
            .filter_map(|record| match normalize(self.group_id, record) {
                Ok(InboundEvent::Message(message)) => Some(message.id),
                _ => None,
            })
            .collect();
        let count = ids.len();
        self.store.seed_pins(ids);
        Ok(count)
    }

    /// Send a text message to the group.
    ///
    /// Consumes the reply draft, if any. Fails fast when the body is
    /// blank, the viewer is not signed in, or the channel is down.
    pub async fn send_text(&mut self, body: &str) -> Result<()> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let viewer = self.viewer()?.clone();

        let mut wire = WireMessage::text(
            self.group_id,
            viewer.id,
            viewer.name.clone(),
            body.to_string(),
        );
        if let Some(draft) = self.store.reply_draft() {
            wire = wire.with_reply(
                draft.message_id.clone(),
                draft.sender_name.clone(),
                draft.snippet.clone(),
            );
        }
        let payload = serde_json::to_string(&wire).map_err(cohort_core::Error::from)?;
        self.channel
            .publish(&send_destination(self.group_id), payload)
            .await?;

        if self.optimistic_send {
            let mut provisional =
                Message::provisional_text(self.group_id, viewer.id, viewer.name, body.to_string());
            provisional.reply_to = self.store.reply_draft().cloned();
            self.store.insert_live(provisional);
        }
        self.store.set_reply_draft(None);
        Ok(())
    }

    /// Delete one of the viewer's own messages.
    ///
    /// Removed locally up front; a backend failure puts the pre-image
    /// back, pin membership included.
    pub async fn delete_message(&mut self, id: &str) -> Result<()> {
        let sender_id = self
            .store
            .get(id)
            .ok_or_else(|| cohort_core::Error::UnknownMessage(id.to_string()))?
            .sender_id;
        if sender_id != self.viewer()?.id {
            return Err(cohort_core::Error::NotSender.into());
        }

        let removed = match self.store.remove(id) {
            Some(removed) => removed,
            None => return Err(cohort_core::Error::UnknownMessage(id.to_string()).into()),
        };
        if let Err(e) = self.rest.delete_message(self.group_id, id).await {
            self.store.restore(removed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Flip a message's pinned state, locally first.
    ///
    /// Returns whether the message is pinned afterwards. A backend
    /// failure reverts the flip.
    pub async fn toggle_pin(&mut self, id: &str) -> Result<bool> {
        let now_pinned = self.store.toggle_pin(id)?;
        let outcome = if now_pinned {
            self.rest.pin_message(self.group_id, id).await
        } else {
            self.rest.unpin_message(self.group_id, id).await
        };
        if let Err(e) = outcome {
            let _ = self.store.toggle_pin(id);
            return Err(e.into());
        }
        Ok(now_pinned)
    }

    /// Toggle the viewer's reaction on a message, locally first.
    ///
    /// Returns whether the reaction is present afterwards. A backend
    /// failure inverts the flip.
    pub async fn toggle_reaction(&mut self, id: &str, emoji: &str) -> Result<bool> {
        let viewer_id = self.viewer()?.id;
        let added = self.store.toggle_reaction(id, emoji, viewer_id)?;
        let outcome = if added {
            match self.rest.add_reaction(id, emoji).await {
                // Some backend builds treat a repeated add as a toggle
                // request and reject it; retry as an explicit removal.
                Err(cohort_net::Error::Status(_)) => self.rest.remove_reaction(id, emoji).await,
                other => other,
            }
        } else {
            self.rest.remove_reaction(id, emoji).await
        };
        if let Err(e) = outcome {
            let _ = self.store.toggle_reaction(id, emoji, viewer_id);
            return Err(e.into());
        }
        Ok(added)
    }

    /// Cast the viewer's vote on a known poll.
    ///
    /// The tally is not touched locally; the authoritative count arrives
    /// as a broadcast delta.
    pub async fn cast_vote(&self, poll_id: &str, option_id: &str) -> Result<()> {
        if self.store.find_poll(poll_id).is_none() {
            return Err(cohort_core::Error::UnknownPoll(poll_id.to_string()).into());
        }
        self.rest.cast_vote(poll_id, option_id).await?;
        Ok(())
    }

    /// Create a poll in the group; it arrives back as a broadcast
    pub async fn create_poll(&self, question: &str, options: Vec<String>) -> Result<()> {
        let question = question.trim();
        if question.is_empty() || options.len() < 2 {
            return Err(cohort_core::Error::InvalidOperation(
                "a poll needs a question and at least two options".to_string(),
            )
            .into());
        }
        let poll = NewPoll {
            group_id: self.group_id,
            question: question.to_string(),
            options,
        };
        self.rest.create_poll(self.group_id, &poll).await?;
        Ok(())
    }

    /// Set or clear the reply draft for the next send
    pub fn set_reply_target(&mut self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                let message = self
                    .store
                    .get(id)
                    .ok_or_else(|| cohort_core::Error::UnknownMessage(id.to_string()))?;
                let target = ReplyTarget {
                    message_id: message.id.clone(),
                    sender_name: message.sender_name.clone(),
                    snippet: message.snippet(),
                };
                self.store.set_reply_draft(Some(target));
            }
            None => self.store.set_reply_draft(None),
        }
        Ok(())
    }

    /// Tear the session down; the channel emits nothing afterwards
    pub async fn close(&self) {
        self.channel.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_session(viewer: Option<Viewer>) -> ChatSession {
        // Nothing listens on these endpoints; only local fail-fast paths
        // are exercised.
        ChatSession::open(
            "http://127.0.0.1:1/api",
            "ws://127.0.0.1:1/ws",
            "tok",
            7,
            viewer,
        )
        .unwrap()
    }

    fn viewer() -> Viewer {
        Viewer {
            id: 42,
            name: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_rejects_blank_body() {
        let mut session = offline_session(Some(viewer()));
        assert!(matches!(
            session.send_text("   ").await,
            Err(SessionError::EmptyMessage)
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn test_send_requires_signed_in_viewer() {
        let mut session = offline_session(None);
        assert!(matches!(
            session.send_text("hello").await,
            Err(SessionError::NotAuthenticated)
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn test_send_fails_fast_while_disconnected() {
        let mut session = offline_session(Some(viewer()));
        assert!(matches!(
            session.send_text("hello").await,
            Err(SessionError::Net(cohort_net::Error::NotConnected))
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn test_reply_target_requires_known_message() {
        let mut session = offline_session(Some(viewer()));
        assert!(session.set_reply_target(Some("missing")).is_err());
        assert!(session.set_reply_target(None).is_ok());
        session.close().await;
    }

    #[tokio::test]
    async fn test_vote_requires_known_poll() {
        let session = offline_session(Some(viewer()));
        assert!(matches!(
            session.cast_vote("p9", "o1").await,
            Err(SessionError::Model(cohort_core::Error::UnknownPoll(_)))
        ));
        session.close().await;
    }

    #[tokio::test]
    async fn test_poll_needs_two_options() {
        let session = offline_session(Some(viewer()));
        let result = session
            .create_poll("Which day?", vec!["Mon".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(SessionError::Model(cohort_core::Error::InvalidOperation(_)))
        ));
        session.close().await;
    }
}
