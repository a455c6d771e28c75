//! Error types for command tokens, catalog records and device transports

use thiserror::Error;

/// Errors that can occur while parsing command tokens and catalog records
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Token was empty
    #[error("empty command token")]
    EmptyToken,

    /// Pause token with a missing or non-numeric duration
    #[error("invalid pause duration: {0}")]
    InvalidPause(String),

    /// Device message that is not an acknowledgement
    #[error("not an acknowledgement: {0}")]
    NotAcknowledgement(String),
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Catalog record failed validation
    #[error("invalid catalog record {name:?}: {reason}")]
    InvalidRecord {
        /// Name of the offending record
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors reported by a device transport
///
/// A transport error always means "no effect occurred" on the device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device is not known to the transport
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The device is known but not connected
    #[error("device not connected: {0}")]
    NotConnected(String),

    /// Temporary failure, the same operation may succeed later
    #[error("transient transport failure: {0}")]
    Transient(String),

    /// Failure that will not go away by retrying
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    /// Whether retrying the operation is pointless
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransportError::Permanent(_) | TransportError::UnknownDevice(_)
        )
    }
}
