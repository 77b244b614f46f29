//! Error types for the chat session core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Unknown poll: {0}")]
    UnknownPoll(String),

    #[error("Not the message sender")]
    NotSender,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
