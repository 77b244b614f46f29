//! Canonical data models for the chat session core

mod message;
mod poll;

pub use message::{snippet_of, Message, MessageKind, ReplyTarget};
pub use poll::{Poll, PollOption};
