//! Inbound payload normalization
//!
//! Backend responses and broadcast frames have drifted through several
//! field-naming generations (`messageId` vs `id`, `senderName` vs `user`,
//! ISO timestamps vs epoch millis). This module maps any of those shapes
//! onto the canonical [`Message`] in a single pass, driven by ordered
//! alias tables. Control frames (poll creation, vote deltas) are told
//! apart here as well.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{Message, MessageKind, Poll, PollOption, ReplyTarget};

/// Accepted aliases per logical field, tried in priority order
const ID_ALIASES: &[&str] = &["messageId", "id"];
const CONTENT_ALIASES: &[&str] = &["content", "message", "text"];
const SENDER_ID_ALIASES: &[&str] = &["senderId", "userId"];
const SENDER_NAME_ALIASES: &[&str] = &["senderName", "user"];
const TIMESTAMP_ALIASES: &[&str] = &["timestamp", "createdAt"];
const VOTE_COUNT_ALIASES: &[&str] = &["voteCount", "newVoteCount"];

/// One normalized inbound event
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A chat message to append to the log
    Message(Message),
    /// In-place update of one poll option's tally; never appends
    VoteDelta {
        poll_id: String,
        option_id: String,
        vote_count: u32,
    },
}

/// Normalize one raw inbound record.
///
/// Returns an error for records that are not JSON objects, carry an
/// unrecognized message type, or have none of id/content/sender set
/// (the backend broadcasts such blank records on pin changes).
pub fn normalize(group_id: i64, raw: &Value) -> Result<InboundEvent> {
    let obj = raw
        .as_object()
        .ok_or_else(|| Error::MalformedFrame("not a JSON object".to_string()))?;

    let kind_tag = pick_string(obj, &["messageType"])
        .map(|s| s.to_ascii_uppercase())
        .unwrap_or_else(|| "TEXT".to_string());

    if kind_tag == "POLL_VOTE" {
        return normalize_vote_delta(obj);
    }

    let id = pick_string(obj, ID_ALIASES);
    let content = pick_string(obj, CONTENT_ALIASES);
    let sender_id = pick_i64(obj, SENDER_ID_ALIASES);
    if id.is_none() && content.is_none() && sender_id.is_none() {
        return Err(Error::MalformedFrame("empty frame".to_string()));
    }

    let kind = match kind_tag.as_str() {
        "TEXT" => MessageKind::Text,
        "FILE" | "DOCUMENT" => MessageKind::File,
        "POLL" => MessageKind::Poll,
        other => {
            return Err(Error::MalformedFrame(format!(
                "unsupported message type: {}",
                other
            )))
        }
    };

    let sender_id = sender_id.unwrap_or(0);
    let timestamp = pick(obj, TIMESTAMP_ALIASES)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    // Synthesized fallback identity for frames with no id
    let id = id.unwrap_or_else(|| format!("{}_{}", timestamp.timestamp_millis(), sender_id));

    let poll = if kind == MessageKind::Poll {
        Some(parse_poll(obj)?)
    } else {
        None
    };

    Ok(InboundEvent::Message(Message {
        id,
        group_id,
        sender_id,
        sender_name: pick_string(obj, SENDER_NAME_ALIASES).unwrap_or_else(|| "Unknown".to_string()),
        content: content.unwrap_or_default(),
        kind,
        timestamp,
        reply_to: parse_reply(obj),
        reactions: parse_reactions(obj),
        poll,
        provisional: false,
    }))
}

fn normalize_vote_delta(obj: &Map<String, Value>) -> Result<InboundEvent> {
    let poll_id = pick_string(obj, &["pollId"])
        .ok_or_else(|| Error::MalformedFrame("vote delta without pollId".to_string()))?;
    let option_id = pick_string(obj, &["optionId"])
        .ok_or_else(|| Error::MalformedFrame("vote delta without optionId".to_string()))?;
    let vote_count = pick_i64(obj, VOTE_COUNT_ALIASES)
        .ok_or_else(|| Error::MalformedFrame("vote delta without voteCount".to_string()))?;

    Ok(InboundEvent::VoteDelta {
        poll_id,
        option_id,
        vote_count: vote_count.max(0) as u32,
    })
}

fn parse_poll(obj: &Map<String, Value>) -> Result<Poll> {
    let poll_id = pick_string(obj, &["pollId"])
        .ok_or_else(|| Error::MalformedFrame("poll message without pollId".to_string()))?;
    let question =
        pick_string(obj, &["question", "content"]).unwrap_or_else(|| "Poll".to_string());

    let options = obj
        .get("pollOptions")
        .and_then(Value::as_array)
        .map(|opts| {
            opts.iter()
                .filter_map(Value::as_object)
                .filter_map(|o| {
                    Some(PollOption {
                        option_id: pick_string(o, &["optionId", "id"])?,
                        text: pick_string(o, &["text", "label"]).unwrap_or_default(),
                        vote_count: pick_i64(o, &["voteCount", "votes"]).unwrap_or(0).max(0)
                            as u32,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Poll {
        poll_id,
        question,
        options,
    })
}

fn parse_reply(obj: &Map<String, Value>) -> Option<ReplyTarget> {
    let message_id = pick_string(obj, &["replyToMessageId"])?;
    Some(ReplyTarget {
        message_id,
        sender_name: pick_string(obj, &["replyToSenderName"]).unwrap_or_default(),
        snippet: pick_string(obj, &["replyToContent"]).unwrap_or_default(),
    })
}

fn parse_reactions(obj: &Map<String, Value>) -> BTreeMap<String, BTreeSet<i64>> {
    let mut reactions = BTreeMap::new();
    let Some(map) = obj.get("reactions").and_then(Value::as_object) else {
        return reactions;
    };
    for (emoji, reactors) in map {
        let ids: BTreeSet<i64> = reactors
            .as_array()
            .map(|a| a.iter().filter_map(value_as_i64).collect())
            .unwrap_or_default();
        if !ids.is_empty() {
            reactions.insert(emoji.clone(), ids);
        }
    }
    reactions
}

/// First non-null value among the aliases
fn pick<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
}

fn pick_string(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    match pick(obj, aliases)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn pick_i64(obj: &Map<String, Value>, aliases: &[&str]) -> Option<i64> {
    value_as_i64(pick(obj, aliases)?)
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Timestamps arrive as RFC 3339, as offset-less `LocalDateTime` strings,
/// or as epoch milliseconds.
fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let millis = n.as_i64()?;
            Utc.timestamp_millis_opt(millis).single()
        }
        _ => None,
    }
}
