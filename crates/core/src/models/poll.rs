//! Poll model embedded in poll-kind messages

use serde::{Deserialize, Serialize};

/// One votable option with its running tally.
///
/// Counts are updated by inbound vote-delta frames, never recomputed
/// from a full resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub option_id: String,
    pub text: String,
    pub vote_count: u32,
}

/// A poll carried by a message of kind `Poll`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<PollOption>,
}

impl Poll {
    pub fn option_mut(&mut self, option_id: &str) -> Option<&mut PollOption> {
        self.options.iter_mut().find(|o| o.option_id == option_id)
    }

    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.vote_count).sum()
    }
}
