//! Cohort Network Library
//!
//! Realtime channel and REST client for the Cohort group-chat backend.
//!
//! # Architecture
//!
//! - **Channel**: STOMP over WebSocket; subscribes to a group's topic,
//!   delivers broadcast frames in arrival order, reconnects on failure
//!   with an injectable delay policy
//! - **Rest**: history, pins, and mutation endpoints with a bearer
//!   credential per request
//! - **Protocol**: JSON payload shapes and per-group destinations
//!
//! # Usage
//!
//! ```ignore
//! let mut channel = ChatChannel::connect(ws_url, group_id, token, policy);
//!
//! while let Some(event) = channel.next_event().await {
//!     match event {
//!         ChannelEvent::Frame(value) => { /* normalize and store */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod backoff;
pub mod channel;
pub mod error;
pub mod protocol;
pub mod rest;
mod stomp;

pub use backoff::{ConstantBackoff, ReconnectPolicy, SteppedBackoff};
pub use channel::{ChannelEvent, ChannelState, ChatChannel};
pub use error::{Error, Result};
pub use protocol::{group_topic, send_destination, NewPoll, WireMessage};
pub use rest::RestClient;
