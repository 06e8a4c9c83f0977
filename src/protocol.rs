//! Device poll protocol
//!
//! Text frames with `|`-separated fields:
//!
//! - request: `<command>[|battery:<int>]`
//! - reply: `update:<url>|duration:<minutes>` or `no_update|duration:<minutes>`

use std::fmt;

/// Command the device sends to ask for new content
pub const POLL_COMMAND: &str = "checkForImage";

/// A parsed inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest<'a> {
    pub command: &'a str,
    /// Battery percentage, when present and well-formed
    pub battery: Option<u8>,
}

impl<'a> PollRequest<'a> {
    /// Parse a message; malformed telemetry is dropped, never rejected
    pub fn parse(message: &'a str) -> Self {
        let mut fields = message.split('|');
        let command = fields.next().unwrap_or_default().trim();

        let battery = fields
            .filter_map(|field| field.strip_prefix("battery:"))
            .filter_map(|value| value.trim().parse::<u8>().ok())
            .filter(|percent| *percent <= 100)
            .last();

        Self { command, battery }
    }

    pub fn is_poll(&self) -> bool {
        self.command == POLL_COMMAND
    }
}

/// Reply to a poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    Update { url: String, minutes: u32 },
    NoUpdate { minutes: u32 },
}

impl PollReply {
    pub fn minutes(&self) -> u32 {
        match self {
            PollReply::Update { minutes, .. } | PollReply::NoUpdate { minutes } => *minutes,
        }
    }
}

impl fmt::Display for PollReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollReply::Update { url, minutes } => write!(f, "update:{}|duration:{}", url, minutes),
            PollReply::NoUpdate { minutes } => write!(f, "no_update|duration:{}", minutes),
        }
    }
}
