//! Catalog records
//!
//! The command catalog is produced elsewhere (from command-definition files)
//! and handed over as an ordered list of plain records.

use tracing::warn;

use crate::command::{CommandInfo, HOME_COMMAND};
use crate::error::ProtocolError;

/// One command definition as supplied by a catalog source
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct CommandRecord {
    /// Human readable name
    pub name: String,
    /// Raw token
    pub command: String,
    /// Category the command is listed under
    #[cfg_attr(feature = "serde", serde(default))]
    pub category: String,
    /// Mutual-exclusion group
    #[cfg_attr(feature = "serde", serde(default))]
    pub group: String,
    /// Nominal run time in milliseconds
    #[cfg_attr(feature = "serde", serde(default))]
    pub duration: u64,
    /// Cooldown in milliseconds
    #[cfg_attr(feature = "serde", serde(default))]
    pub minimum_cooldown: u64,
}

impl CommandRecord {
    /// Check the record can become a catalog entry
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.command.trim().is_empty() {
            return Err(ProtocolError::InvalidRecord {
                name: self.name.clone(),
                reason: "empty command token".to_string(),
            });
        }
        if self.command.starts_with(crate::command::PAUSE_PREFIX) {
            return Err(ProtocolError::InvalidRecord {
                name: self.name.clone(),
                reason: "pause tokens are reserved".to_string(),
            });
        }
        if self.duration == 0 && self.command != HOME_COMMAND {
            return Err(ProtocolError::InvalidRecord {
                name: self.name.clone(),
                reason: "zero duration".to_string(),
            });
        }
        Ok(())
    }
}

impl From<CommandRecord> for CommandInfo {
    fn from(record: CommandRecord) -> Self {
        CommandInfo::new(
            record.name,
            record.command,
            record.category,
            record.group,
            record.duration,
            record.minimum_cooldown,
        )
    }
}

/// Split records into valid ones and rejections, keeping the input order
pub fn partition_records(
    records: impl IntoIterator<Item = CommandRecord>,
) -> (Vec<CommandRecord>, Vec<ProtocolError>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for record in records {
        match record.validate() {
            Ok(()) => accepted.push(record),
            Err(e) => {
                warn!("Skipping catalog record: {}", e);
                rejected.push(e);
            }
        }
    }
    (accepted, rejected)
}
