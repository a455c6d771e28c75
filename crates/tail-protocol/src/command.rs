//! Command definitions
//!
//! A command is one actuator instruction (a raw token such as `TAILS1`) with
//! the timing constraints the hardware imposes on it. Commands that drive the
//! same physical mechanism share a group and must never run at the same time.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::ParseError;

/// Token of the command that returns the gear to its rest position.
///
/// Homing is always permitted, whatever else is running.
pub const HOME_COMMAND: &str = "TAILHM";

/// Prefix of the synthetic pause pseudo-command (`pause:<seconds>`)
pub const PAUSE_PREFIX: &str = "pause:";

/// Display name given to synthesized pause commands
pub const PAUSE_NAME: &str = "Pause";

/// Structural identity of a command: (category, name, command)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandKey {
    /// Category the command is listed under
    pub category: String,
    /// Human readable name
    pub name: String,
    /// Raw token sent to the device
    pub command: String,
}

impl CommandKey {
    /// Create a key from its parts
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            command: command.into(),
        }
    }
}

/// A catalog command together with its live running/availability state
///
/// Equality and hashing only look at the [`CommandKey`] fields, so two
/// values describing the same command compare equal whatever their state.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandInfo {
    /// Human readable name
    pub name: String,
    /// Raw token sent to the device
    pub command: String,
    /// Category the command is listed under
    pub category: String,
    /// Mutual-exclusion group; an empty group conflicts with nothing else
    pub group: String,
    /// Nominal run time in milliseconds
    pub duration_ms: u64,
    /// Idle time the hardware needs after the run, in milliseconds
    pub minimum_cooldown_ms: u64,
    /// Whether the command is currently running on some device
    pub is_running: bool,
    /// Whether the command may be dispatched right now
    pub is_available: bool,
}

impl CommandInfo {
    /// Create an idle, available command
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        category: impl Into<String>,
        group: impl Into<String>,
        duration_ms: u64,
        minimum_cooldown_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            category: category.into(),
            group: group.into(),
            duration_ms,
            minimum_cooldown_ms,
            is_running: false,
            is_available: true,
        }
    }

    /// Structural identity of this command
    pub fn key(&self) -> CommandKey {
        CommandKey::new(&self.category, &self.name, &self.command)
    }

    /// Whether `other` describes the same command
    pub fn is_equivalent(&self, other: &CommandInfo) -> bool {
        self.category == other.category && self.name == other.name && self.command == other.command
    }

    /// Whether this command conflicts with `other`
    ///
    /// Groups compare as plain strings, so every command with an empty
    /// group sits in the same unnamed group.
    pub fn shares_group_with(&self, other: &CommandInfo) -> bool {
        self.group == other.group
    }

    /// Whether this is the always-available home command
    pub fn is_home(&self) -> bool {
        self.command == HOME_COMMAND
    }

    /// Time after which a run that was never acknowledged is assumed finished
    pub fn fail_safe_window(&self) -> Duration {
        Duration::from_millis(self.duration_ms.saturating_add(self.minimum_cooldown_ms))
    }

    /// Plain metadata view of this command
    pub fn descriptor(&self) -> CommandDescriptor {
        CommandDescriptor {
            name: self.name.clone(),
            command: self.command.clone(),
            category: self.category.clone(),
            group: self.group.clone(),
            duration_ms: self.duration_ms,
            minimum_cooldown_ms: self.minimum_cooldown_ms,
            is_pause: false,
        }
    }
}

impl PartialEq for CommandInfo {
    fn eq(&self, other: &Self) -> bool {
        self.is_equivalent(other)
    }
}

impl Eq for CommandInfo {}

impl Hash for CommandInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.category.hash(state);
        self.name.hash(state);
        self.command.hash(state);
    }
}

/// Command metadata without live state
///
/// This is what lookups by token hand out. Pause pseudo-commands are
/// synthesized here and never appear in a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandDescriptor {
    /// Human readable name
    pub name: String,
    /// Raw token
    pub command: String,
    /// Category (empty for pauses)
    pub category: String,
    /// Mutual-exclusion group (empty for pauses)
    pub group: String,
    /// Nominal run time in milliseconds
    pub duration_ms: u64,
    /// Cooldown in milliseconds
    pub minimum_cooldown_ms: u64,
    /// Whether this is a synthesized pause
    pub is_pause: bool,
}

impl CommandDescriptor {
    /// Synthesize a pause of the given length
    pub fn pause(seconds: u64) -> Self {
        Self {
            name: PAUSE_NAME.to_string(),
            command: format!("{}{}", PAUSE_PREFIX, seconds),
            category: String::new(),
            group: String::new(),
            duration_ms: seconds.saturating_mul(1000),
            minimum_cooldown_ms: 0,
            is_pause: true,
        }
    }

    /// Structural identity of the described command
    pub fn key(&self) -> CommandKey {
        CommandKey::new(&self.category, &self.name, &self.command)
    }

    /// Nominal run time
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Parse a pause token
///
/// Returns `Ok(None)` when `token` is not a pause at all, and the number of
/// seconds when it is a well-formed `pause:<seconds>`.
pub fn parse_pause(token: &str) -> Result<Option<u64>, ParseError> {
    let Some(rest) = token.trim().strip_prefix(PAUSE_PREFIX) else {
        return Ok(None);
    };
    rest.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ParseError::InvalidPause(token.to_string()))
}
