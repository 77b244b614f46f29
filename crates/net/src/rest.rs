//! REST client for the group-chat backend
//!
//! Carries the bearer credential on every request. Raw response records
//! are returned as JSON values; normalization into the canonical message
//! shape is the caller's concern.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::NewPoll;

/// Fixed per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the chat REST endpoints
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(res: reqwest::Response) -> Result<reqwest::Response> {
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(Error::Status(res.status().as_u16()))
        }
    }

    async fn fetch_list(&self, path: &str) -> Result<Vec<Value>> {
        let res = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: Value = Self::check(res)?.json().await?;
        let records = body.as_array().cloned().unwrap_or_default();
        debug!(path, count = records.len(), "Fetched records");
        Ok(records)
    }

    /// Persisted message history for a group
    pub async fn fetch_messages(&self, group_id: i64) -> Result<Vec<Value>> {
        self.fetch_list(&format!("/groups/{}/messages", group_id))
            .await
    }

    /// Currently pinned messages for a group
    pub async fn fetch_pins(&self, group_id: i64) -> Result<Vec<Value>> {
        self.fetch_list(&format!("/groups/{}/pins", group_id)).await
    }

    pub async fn delete_message(&self, group_id: i64, message_id: &str) -> Result<()> {
        let res = self
            .http
            .delete(self.url(&format!("/groups/{}/messages/{}", group_id, message_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn pin_message(&self, group_id: i64, message_id: &str) -> Result<()> {
        let res = self
            .http
            .post(self.url(&format!("/groups/{}/pins/messages/{}", group_id, message_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn unpin_message(&self, group_id: i64, message_id: &str) -> Result<()> {
        let res = self
            .http
            .delete(self.url(&format!("/groups/{}/pins/messages/{}", group_id, message_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<()> {
        let res = self
            .http
            .post(self.url(&format!("/messages/{}/reactions/{}", message_id, emoji)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn remove_reaction(&self, message_id: &str, emoji: &str) -> Result<()> {
        let res = self
            .http
            .delete(self.url(&format!("/messages/{}/reactions/{}", message_id, emoji)))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn create_poll(&self, group_id: i64, poll: &NewPoll) -> Result<()> {
        let res = self
            .http
            .post(self.url(&format!("/groups/{}/polls", group_id)))
            .bearer_auth(&self.token)
            .json(poll)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }

    pub async fn cast_vote(&self, poll_id: &str, option_id: &str) -> Result<()> {
        let res = self
            .http
            .post(self.url(&format!(
                "/groups/polls/{}/options/{}/vote",
                poll_id, option_id
            )))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(res)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RestClient::new("http://localhost:8145/api/", "tok").unwrap();
        assert_eq!(
            client.url("/groups/7/messages"),
            "http://localhost:8145/api/groups/7/messages"
        );
    }

    #[test]
    fn test_url_paths() {
        let client = RestClient::new("http://localhost:8145/api", "tok").unwrap();
        assert_eq!(
            client.url(&format!("/groups/{}/pins/messages/{}", 7, "m1")),
            "http://localhost:8145/api/groups/7/pins/messages/m1"
        );
        assert_eq!(
            client.url(&format!("/groups/polls/{}/options/{}/vote", "p1", "o2")),
            "http://localhost:8145/api/groups/polls/p1/options/o2/vote"
        );
    }
}
