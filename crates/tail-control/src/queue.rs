//! Command dispatch queue
//!
//! Requests wait here until they can be delivered without violating
//! availability or connectivity. The queue is evaluated whenever something
//! that could unblock an entry changes; it never polls.
//!
//! Eligibility is decided per device. An entry goes out to a target when:
//! - that device is connected,
//! - the command is available (pauses skip this check),
//! - no earlier queued entry still waits for that device, and
//! - the device is not held by a running pause.
//!
//! Targets that are not eligible yet stay on the entry, so a command
//! addressed to two devices reaches the second one once it connects.
//! Broadcast entries resolve to the devices connected at dispatch time.
//!
//! Sending and marking the command running happen in the same call, so no
//! other dispatch can see the command available in between.

use std::collections::{HashMap, HashSet, VecDeque};

use tail_protocol::{CommandDescriptor, CommandKey, DeviceId, TransportError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::tracker::CommandTracker;

/// What the queue needs from the device side
pub trait DispatchLink {
    /// Devices that are connected right now, in registry order
    fn connected_devices(&self) -> Vec<DeviceId>;

    /// Send a raw token to one device
    fn send(&mut self, id: &DeviceId, token: &str) -> Result<(), TransportError>;
}

/// A request waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Queue-assigned id, usable for cancellation
    pub id: u64,
    /// Target devices; empty means every connected device
    pub targets: Vec<DeviceId>,
    /// Command to deliver
    pub command: CommandDescriptor,
    /// When the request was queued
    pub enqueued_at: Instant,
}

impl QueueEntry {
    /// Whether this entry goes to every connected device
    pub fn is_broadcast(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether this entry is meant for the given device
    pub fn targets_device(&self, id: &DeviceId) -> bool {
        self.is_broadcast() || self.targets.contains(id)
    }
}

/// Result of one dispatch pass for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Command delivered and marked running
    Sent {
        /// Command token
        command: String,
        /// Devices that accepted it
        devices: Vec<DeviceId>,
    },
    /// Pause started for these devices
    Paused {
        /// Pause length in milliseconds
        duration_ms: u64,
        /// Devices being held
        devices: Vec<DeviceId>,
    },
    /// Some or all sends failed
    Failed {
        /// Command token
        command: String,
        /// Devices that refused, with the transport's reason
        failures: Vec<(DeviceId, TransportError)>,
    },
    /// Entry dropped because its command left the catalog
    Dropped {
        /// Command token
        command: String,
    },
}

/// FIFO dispatch queue
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<QueueEntry>,
    next_id: u64,
    /// Devices held by a running pause, until the given instant
    holds: HashMap<DeviceId, Instant>,
    /// Devices each dispatched command is still running on
    in_flight: HashMap<CommandKey, HashSet<DeviceId>>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Queue a command for the given devices (empty for all connected)
    ///
    /// Returns the entry id.
    pub fn enqueue(&mut self, command: CommandDescriptor, targets: Vec<DeviceId>) -> u64 {
        self.enqueue_at(command, targets, Instant::now())
    }

    /// [`enqueue`](Self::enqueue) with an explicit clock reading
    pub fn enqueue_at(
        &mut self,
        command: CommandDescriptor,
        targets: Vec<DeviceId>,
        now: Instant,
    ) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;

        let mut targets = targets;
        let mut seen = HashSet::new();
        targets.retain(|t| seen.insert(t.clone()));

        debug!(
            "Queued {} for {} (entry {})",
            command.command,
            if targets.is_empty() {
                "all devices".to_string()
            } else {
                format!("{} device(s)", targets.len())
            },
            id
        );

        self.entries.push_back(QueueEntry {
            id,
            targets,
            command,
            enqueued_at: now,
        });
        id
    }

    /// Remove a queued entry by id
    pub fn cancel(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }

    /// Number of outstanding entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over queued entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Devices a dispatched command is still considered running on
    pub fn in_flight_devices(&self, key: &CommandKey) -> Option<&HashSet<DeviceId>> {
        self.in_flight.get(key)
    }

    /// Earliest pause release
    pub fn next_deadline(&self) -> Option<Instant> {
        self.holds.values().min().copied()
    }

    /// Drop everything queued or in flight for one device
    ///
    /// Entries addressed to other devices as well only lose this target.
    /// Broadcast entries are left alone. Commands whose last in-flight
    /// device this was are reported stopped to the tracker, which also
    /// disarms their fail-safe.
    pub fn clear(&mut self, device: &DeviceId, tracker: &mut CommandTracker, now: Instant) {
        let before = self.entries.len();
        self.entries.retain_mut(|entry| {
            if entry.is_broadcast() {
                return true;
            }
            entry.targets.retain(|t| t != device);
            !entry.targets.is_empty()
        });
        let dropped = before - self.entries.len();
        if dropped > 0 {
            info!("Dropped {} queued command(s) for {}", dropped, device);
        }

        self.holds.remove(device);
        self.release_in_flight(device, tracker, now);
    }

    /// Drop every entry, hold and in-flight obligation
    pub fn clear_all(&mut self, tracker: &mut CommandTracker, now: Instant) {
        if !self.entries.is_empty() {
            info!("Dropped all {} queued command(s)", self.entries.len());
        }
        self.entries.clear();
        self.holds.clear();
        for key in std::mem::take(&mut self.in_flight).into_keys() {
            tracker.set_command_running(&key, false, now);
        }
    }

    fn release_in_flight(&mut self, device: &DeviceId, tracker: &mut CommandTracker, now: Instant) {
        let mut finished = Vec::new();
        for (key, devices) in self.in_flight.iter_mut() {
            if devices.remove(device) && devices.is_empty() {
                finished.push(key.clone());
            }
        }
        for key in finished {
            self.in_flight.remove(&key);
            debug!("Releasing {} after {} went away", key.command, device);
            tracker.set_command_running(&key, false, now);
        }
    }

    /// Narrow entry `i` to the devices still owed, or drop it when none are
    ///
    /// Owed devices block later entries for the rest of the pass. Returns
    /// whether the entry is still queued.
    fn keep_owed(
        &mut self,
        i: usize,
        owed: Vec<DeviceId>,
        blocked: &mut HashSet<DeviceId>,
    ) -> bool {
        if owed.is_empty() {
            self.entries.remove(i);
            return false;
        }
        blocked.extend(owed.iter().cloned());
        self.entries[i].targets = owed;
        true
    }

    /// Deliver every entry that is eligible right now
    pub fn dispatch(
        &mut self,
        tracker: &mut CommandTracker,
        link: &mut dyn DispatchLink,
        now: Instant,
    ) -> Vec<DispatchOutcome> {
        self.holds.retain(|_, until| *until > now);
        self.in_flight.retain(|key, _| tracker.is_running(key));

        let connected = link.connected_devices();
        let mut blocked: HashSet<DeviceId> = self.holds.keys().cloned().collect();
        let mut outcomes = Vec::new();

        let mut i = 0;
        while i < self.entries.len() {
            let entry = &self.entries[i];
            let intended: Vec<DeviceId> = if entry.is_broadcast() {
                connected.clone()
            } else {
                entry.targets.clone()
            };
            let reachable: Vec<DeviceId> = intended
                .iter()
                .filter(|d| connected.contains(d))
                .cloned()
                .collect();

            let key = entry.command.key();
            if !entry.command.is_pause && !tracker.contains(&key) && !tracker.is_available(&key)
            {
                debug!("Dropping {}: no longer in the catalog", entry.command.command);
                let command = entry.command.command.clone();
                self.entries.remove(i);
                outcomes.push(DispatchOutcome::Dropped { command });
                continue;
            }

            let available = entry.command.is_pause || tracker.is_available(&key);
            let ready: Vec<DeviceId> = reachable
                .iter()
                .filter(|d| !blocked.contains(*d))
                .cloned()
                .collect();

            if !available || ready.is_empty() {
                blocked.extend(intended);
                i += 1;
                continue;
            }

            // Targets left for a later pass, either offline or behind an
            // earlier entry. They keep their place in the queue.
            let waiting: Vec<DeviceId> = intended
                .iter()
                .filter(|d| !ready.contains(d))
                .cloned()
                .collect();

            if entry.command.is_pause {
                let until = now + entry.command.duration();
                for device in &ready {
                    self.holds.insert(device.clone(), until);
                }
                blocked.extend(ready.iter().cloned());
                outcomes.push(DispatchOutcome::Paused {
                    duration_ms: entry.command.duration_ms,
                    devices: ready,
                });
                if self.keep_owed(i, waiting, &mut blocked) {
                    i += 1;
                }
                continue;
            }

            let token = entry.command.command.clone();
            let mut sent = Vec::new();
            let mut retry = waiting;
            let mut failures = Vec::new();
            for device in &ready {
                match link.send(device, &token) {
                    Ok(()) => sent.push(device.clone()),
                    Err(e) => {
                        warn!("Sending {} to {} failed: {}", token, device, e);
                        if !e.is_permanent() {
                            retry.push(device.clone());
                        }
                        failures.push((device.clone(), e));
                    }
                }
            }

            if !sent.is_empty() {
                tracker.set_command_running(&key, true, now);
                self.in_flight
                    .entry(key)
                    .or_default()
                    .extend(sent.iter().cloned());
                info!("Dispatched {} to {} device(s)", token, sent.len());
                outcomes.push(DispatchOutcome::Sent {
                    command: token.clone(),
                    devices: sent,
                });
            }
            if !failures.is_empty() {
                outcomes.push(DispatchOutcome::Failed {
                    command: token,
                    failures,
                });
            }

            if self.keep_owed(i, retry, &mut blocked) {
                i += 1;
            }
        }

        outcomes
    }
}
