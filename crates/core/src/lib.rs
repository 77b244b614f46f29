//! Cohort Core Library
//!
//! Canonical chat data model, inbound payload normalization, and the
//! per-session state store for the Cohort group-chat client.

pub mod error;
pub mod models;
pub mod normalize;
pub mod store;

pub use error::{Error, Result};
pub use models::{snippet_of, Message, MessageKind, Poll, PollOption, ReplyTarget};
pub use normalize::{normalize, InboundEvent};
pub use store::{RemovedMessage, SessionStore};
