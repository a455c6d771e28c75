//! Command availability tracking
//!
//! The tracker owns the command catalog and the running/available flags of
//! every entry. Running a command makes its whole group unavailable until
//! the device reports the end of the run. Devices sometimes never report
//! that end, so every run also arms a fail-safe deadline of
//! `duration + minimum_cooldown`; when it passes with the command still
//! marked running, the tracker ends the run on its own.
//!
//! All mutation of the running flags goes through
//! [`CommandTracker::set_running`] (or its key-based twin) and the fail-safe
//! expiry path, which share one transition routine.

use std::collections::HashMap;

use tail_protocol::{CommandInfo, CommandKey, HOME_COMMAND};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Events emitted by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Running or availability flags of one catalog entry changed
    CommandStateChanged {
        /// Command whose flags changed
        key: CommandKey,
        /// New running flag
        is_running: bool,
        /// New availability flag
        is_available: bool,
    },
    /// A run was ended by the fail-safe because no end was ever reported
    FailSafeTriggered {
        /// Command that was force-stopped
        key: CommandKey,
    },
    /// Entries were added to or removed from the catalog
    CatalogChanged {
        /// Catalog size after the change
        count: usize,
    },
}

/// Fail-safe deadlines, one per command
///
/// Arming a command that already has a deadline replaces it, so a command
/// never has two live fail-safes.
#[derive(Debug, Default)]
pub struct FailSafeScheduler {
    armed: HashMap<CommandKey, Instant>,
}

impl FailSafeScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the fail-safe for a command
    ///
    /// Returns true if an earlier deadline was replaced.
    pub fn arm(&mut self, key: CommandKey, deadline: Instant) -> bool {
        self.armed.insert(key, deadline).is_some()
    }

    /// Disarm the fail-safe for a command
    pub fn cancel(&mut self, key: &CommandKey) -> bool {
        self.armed.remove(key).is_some()
    }

    /// Deadline currently armed for a command
    pub fn deadline(&self, key: &CommandKey) -> Option<Instant> {
        self.armed.get(key).copied()
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.values().min().copied()
    }

    /// Remove and return every command whose deadline is at or before `now`,
    /// earliest first
    pub fn take_expired(&mut self, now: Instant) -> Vec<CommandKey> {
        let mut expired: Vec<(Instant, CommandKey)> = self
            .armed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        expired.sort();

        for (_, key) in &expired {
            self.armed.remove(key);
        }
        expired.into_iter().map(|(_, key)| key).collect()
    }

    /// Number of armed deadlines
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    /// Whether nothing is armed
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Disarm everything
    pub fn clear(&mut self) {
        self.armed.clear();
    }
}

/// The command catalog with running and availability state
#[derive(Debug, Default)]
pub struct CommandTracker {
    commands: Vec<CommandInfo>,
    fail_safes: FailSafeScheduler,
    event_buffer: Vec<TrackerEvent>,
}

impl CommandTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command to the catalog
    ///
    /// The entry starts idle; it is available unless another command of its
    /// group is already running. Adding a command that is already present
    /// does nothing.
    pub fn add_command(&mut self, info: CommandInfo) {
        if self.commands.iter().any(|c| c.is_equivalent(&info)) {
            debug!("Command {} already in catalog", info.command);
            return;
        }

        let mut info = info;
        info.is_running = false;
        info.is_available = !self
            .commands
            .iter()
            .any(|c| c.is_running && c.shares_group_with(&info));

        debug!("Added command {} ({})", info.command, info.name);
        self.commands.push(info);
        self.event_buffer.push(TrackerEvent::CatalogChanged {
            count: self.commands.len(),
        });
    }

    /// Remove a command from the catalog
    ///
    /// Does nothing if no structurally equal entry exists. Removing a
    /// running command releases its group.
    pub fn remove_command(&mut self, info: &CommandInfo) {
        let Some(index) = self.commands.iter().position(|c| c.is_equivalent(info)) else {
            return;
        };

        if self.commands[index].is_running {
            self.transition(index, false, Instant::now());
        }
        let removed = self.commands.remove(index);
        self.fail_safes.cancel(&removed.key());

        debug!("Removed command {} ({})", removed.command, removed.name);
        self.event_buffer.push(TrackerEvent::CatalogChanged {
            count: self.commands.len(),
        });
    }

    /// Drop the whole catalog and every armed fail-safe
    pub fn clear(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        self.commands.clear();
        self.fail_safes.clear();
        self.event_buffer
            .push(TrackerEvent::CatalogChanged { count: 0 });
    }

    /// Set the running state of the first command with the given token
    ///
    /// Unknown tokens and unchanged values are ignored.
    pub fn set_running(&mut self, token: &str, is_running: bool) {
        self.set_running_at(token, is_running, Instant::now());
    }

    /// [`set_running`](Self::set_running) with an explicit clock reading
    ///
    /// Device acknowledgements only carry the token, so when two categories
    /// list the same token the earlier catalog entry takes the update. Use
    /// [`set_command_running`](Self::set_command_running) to address one
    /// entry exactly.
    pub fn set_running_at(&mut self, token: &str, is_running: bool, now: Instant) {
        let Some(index) = self.commands.iter().position(|c| c.command == token) else {
            debug!("Ignoring running state for unknown command {}", token);
            return;
        };
        self.transition(index, is_running, now);
    }

    /// Set the running state of the command with the given identity
    pub fn set_command_running(&mut self, key: &CommandKey, is_running: bool, now: Instant) {
        let Some(index) = self.index_of(key) else {
            debug!("Ignoring running state for unknown command {}", key.command);
            return;
        };
        self.transition(index, is_running, now);
    }

    /// The single running-state transition
    fn transition(&mut self, index: usize, is_running: bool, now: Instant) {
        if self.commands[index].is_running == is_running {
            return;
        }

        let before: Vec<(bool, bool)> = self
            .commands
            .iter()
            .map(|c| (c.is_running, c.is_available))
            .collect();

        self.commands[index].is_running = is_running;
        let key = self.commands[index].key();

        if is_running {
            let deadline = now + self.commands[index].fail_safe_window();
            self.fail_safes.arm(key.clone(), deadline);
            debug!(
                "Command {} running, fail-safe in {:?}",
                key.command,
                self.commands[index].fail_safe_window()
            );
        } else {
            self.fail_safes.cancel(&key);
            debug!("Command {} stopped", key.command);
        }

        self.refresh_group(index);

        for (i, (was_running, was_available)) in before.into_iter().enumerate() {
            let cmd = &self.commands[i];
            if cmd.is_running != was_running || cmd.is_available != was_available {
                self.event_buffer.push(TrackerEvent::CommandStateChanged {
                    key: cmd.key(),
                    is_running: cmd.is_running,
                    is_available: cmd.is_available,
                });
            }
        }
    }

    /// Recompute availability for every command sharing a group with `index`
    fn refresh_group(&mut self, index: usize) {
        let anchor = self.commands[index].clone();
        let group_busy = self
            .commands
            .iter()
            .any(|c| c.is_running && c.shares_group_with(&anchor));

        for cmd in self
            .commands
            .iter_mut()
            .filter(|c| c.shares_group_with(&anchor))
        {
            cmd.is_available = !group_busy;
        }
    }

    /// Whether the command is currently running
    pub fn is_running(&self, key: &CommandKey) -> bool {
        self.index_of(key)
            .map(|i| self.commands[i].is_running)
            .unwrap_or(false)
    }

    /// Whether the command may be dispatched now
    ///
    /// The home command is always available; unknown commands never are.
    pub fn is_available(&self, key: &CommandKey) -> bool {
        if key.command == HOME_COMMAND {
            return true;
        }
        self.index_of(key)
            .map(|i| self.commands[i].is_available)
            .unwrap_or(false)
    }

    /// Whether the catalog holds this command
    pub fn contains(&self, key: &CommandKey) -> bool {
        self.index_of(key).is_some()
    }

    /// Look up a catalog entry by raw token
    pub fn get_command(&self, token: &str) -> Option<&CommandInfo> {
        self.commands.iter().find(|c| c.command == token)
    }

    /// Read-only view of the catalog, in insertion order
    pub fn all_commands(&self) -> &[CommandInfo] {
        &self.commands
    }

    /// Number of catalog entries
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Earliest armed fail-safe deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.fail_safes.next_deadline()
    }

    /// Fail-safe deadline armed for a command, if any
    pub fn fail_safe_deadline(&self, key: &CommandKey) -> Option<Instant> {
        self.fail_safes.deadline(key)
    }

    /// Number of armed fail-safes
    pub fn armed_fail_safes(&self) -> usize {
        self.fail_safes.len()
    }

    /// Force-stop every command whose fail-safe deadline has passed
    ///
    /// Returns the number of commands that were stopped.
    pub fn expire_due(&mut self, now: Instant) -> usize {
        let mut stopped = 0;
        for key in self.fail_safes.take_expired(now) {
            let Some(index) = self.index_of(&key) else {
                continue;
            };
            if !self.commands[index].is_running {
                continue;
            }

            warn!(
                "No end reported for command {}, assuming it finished",
                key.command
            );
            self.event_buffer
                .push(TrackerEvent::FailSafeTriggered { key: key.clone() });
            self.transition(index, false, now);
            stopped += 1;
        }
        if stopped > 0 {
            info!("Fail-safe released {} command(s)", stopped);
        }
        stopped
    }

    /// Drain pending events
    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    fn index_of(&self, key: &CommandKey) -> Option<usize> {
        self.commands.iter().position(|c| {
            c.category == key.category && c.name == key.name && c.command == key.command
        })
    }
}
