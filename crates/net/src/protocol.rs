//! Wire payload types and destinations
//!
//! Outbound application frames are published to a per-group destination;
//! inbound broadcasts arrive on a per-group topic.

use serde::Serialize;

/// Destination for publishing a chat message to a group
pub fn send_destination(group_id: i64) -> String {
    format!("/app/chat.sendMessage/{}", group_id)
}

/// Broadcast topic for a group
pub fn group_topic(group_id: i64) -> String {
    format!("/topic/group/{}", group_id)
}

/// Outbound chat message payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub group_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_content: Option<String>,
}

impl WireMessage {
    pub fn text(group_id: i64, sender_id: i64, sender_name: String, content: String) -> Self {
        Self {
            group_id,
            sender_id,
            sender_name,
            content,
            message_type: "TEXT".to_string(),
            reply_to_message_id: None,
            reply_to_sender_name: None,
            reply_to_content: None,
        }
    }

    pub fn with_reply(mut self, message_id: String, sender_name: String, snippet: String) -> Self {
        self.reply_to_message_id = Some(message_id);
        self.reply_to_sender_name = Some(sender_name);
        self.reply_to_content = Some(snippet);
        self
    }
}

/// Poll creation request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    pub group_id: i64,
    pub question: String,
    pub options: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destinations() {
        assert_eq!(send_destination(7), "/app/chat.sendMessage/7");
        assert_eq!(group_topic(7), "/topic/group/7");
    }

    #[test]
    fn test_wire_message_field_names() {
        let msg = WireMessage::text(7, 1, "alice".to_string(), "hi".to_string());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["groupId"], 7);
        assert_eq!(json["senderName"], "alice");
        assert_eq!(json["messageType"], "TEXT");
        // Absent reply fields are omitted, not null
        assert!(json.get("replyToMessageId").is_none());
    }

    #[test]
    fn test_wire_message_reply_fields() {
        let msg = WireMessage::text(7, 1, "alice".to_string(), "agreed".to_string()).with_reply(
            "m1".to_string(),
            "bob".to_string(),
            "hello".to_string(),
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["replyToMessageId"], "m1");
        assert_eq!(json["replyToSenderName"], "bob");
        assert_eq!(json["replyToContent"], "hello");
    }
}
