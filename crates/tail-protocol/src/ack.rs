//! Device acknowledgement messages
//!
//! Gear reports the start and end of each command as a short text line,
//! either `BEGIN TAILS1` or `TAILS1 BEGIN` depending on firmware.

use crate::error::ParseError;

const BEGIN: &str = "BEGIN";
const END: &str = "END";

/// A parsed acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAck {
    /// The device started running a command
    Begin(String),
    /// The device finished running a command
    End(String),
}

impl DeviceAck {
    /// Token the acknowledgement refers to
    pub fn token(&self) -> &str {
        match self {
            DeviceAck::Begin(t) | DeviceAck::End(t) => t,
        }
    }

    /// Whether the command is running after this acknowledgement
    pub fn is_running(&self) -> bool {
        matches!(self, DeviceAck::Begin(_))
    }

    /// Parse a device message line
    pub fn parse(message: &str) -> Result<Self, ParseError> {
        let mut words = message.split_whitespace();
        let (Some(first), Some(second), None) = (words.next(), words.next(), words.next()) else {
            return Err(ParseError::NotAcknowledgement(message.to_string()));
        };

        match (first, second) {
            (BEGIN, token) | (token, BEGIN) if token != END => Ok(DeviceAck::Begin(token.to_string())),
            (END, token) | (token, END) if token != BEGIN => Ok(DeviceAck::End(token.to_string())),
            _ => Err(ParseError::NotAcknowledgement(message.to_string())),
        }
    }
}
