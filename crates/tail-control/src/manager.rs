//! Connection manager engine
//!
//! The top-level orchestrator: it owns the command tracker, the dispatch
//! queue and the device registry, drives the transport, discovery and
//! adapter collaborators, and turns everything that happens into
//! [`ManagerEvent`]s.
//!
//! The engine is synchronous. Every public operation is one step that runs
//! to completion, after which the queue gets a chance to dispatch and the
//! observable counters are compared against what was last reported. The
//! async side lives in [`crate::actor`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tail_protocol::{
    parse_pause, partition_records, AdapterEvent, CommandDescriptor, CommandInfo, CommandRecord,
    ConnectionState, DeviceAck, DeviceId, DeviceInfo, DeviceTransport, DiscoveryAgent,
    DiscoveryEvent, LinkEvent, LocalAdapter, TransportError, TransportEvent,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::ManagerEvent;
use crate::queue::{CommandQueue, DispatchLink, DispatchOutcome};
use crate::registry::DeviceRegistry;
use crate::state::AdapterState;
use crate::tracker::CommandTracker;

/// Connection manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Id of the simulated device inserted in fake-tail mode
    pub fake_device_id: String,
    /// Name of the simulated device
    pub fake_device_name: String,
    /// Address of the simulated device
    pub fake_device_address: String,
    /// Capacity of the actor's command and event channels
    pub channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fake_device_id: "FA:KE:TA:IL".to_string(),
            fake_device_name: "FAKE".to_string(),
            fake_device_address: "FA:KE:TA:IL".to_string(),
            channel_capacity: 256,
        }
    }
}

impl ManagerConfig {
    fn fake_device(&self) -> DeviceInfo {
        DeviceInfo::new(
            self.fake_device_id.as_str(),
            self.fake_device_name.as_str(),
            self.fake_device_address.as_str(),
        )
    }
}

/// Queue-facing view of the registry and transport
///
/// Sends to the simulated device never reach the transport.
struct RegistryLink<'a> {
    registry: &'a DeviceRegistry,
    transport: &'a mut dyn DeviceTransport,
}

impl DispatchLink for RegistryLink<'_> {
    fn connected_devices(&self) -> Vec<DeviceId> {
        self.registry.connected_ids()
    }

    fn send(&mut self, id: &DeviceId, token: &str) -> Result<(), TransportError> {
        match self.registry.get(id) {
            Some(device) if device.is_fake => {
                info!("Fake tail {} running {}", id, token);
                Ok(())
            }
            Some(_) => self.transport.send(id, token),
            None => Err(TransportError::UnknownDevice(id.to_string())),
        }
    }
}

/// Treat `None` and an empty id the same way
fn resolve_id(id: Option<&DeviceId>) -> Option<&DeviceId> {
    id.filter(|id| !id.as_str().is_empty())
}

/// The connection manager engine
pub struct ConnectionManager {
    config: ManagerConfig,
    tracker: CommandTracker,
    queue: CommandQueue,
    registry: DeviceRegistry,
    transport: Box<dyn DeviceTransport>,
    discovery: Box<dyn DiscoveryAgent>,
    adapter: Box<dyn LocalAdapter>,
    discovery_running: bool,
    fake_tail_mode: bool,
    adapter_state: AdapterState,
    current_command: Option<CommandDescriptor>,
    /// Last values reported for the derived observables
    reported_queue_len: usize,
    reported_device_count: usize,
    reported_connected: bool,
    event_buffer: Vec<ManagerEvent>,
}

impl ConnectionManager {
    /// Create a manager with default configuration
    pub fn new(
        transport: Box<dyn DeviceTransport>,
        discovery: Box<dyn DiscoveryAgent>,
        adapter: Box<dyn LocalAdapter>,
    ) -> Self {
        Self::with_config(ManagerConfig::default(), transport, discovery, adapter)
    }

    /// Create with custom configuration
    pub fn with_config(
        config: ManagerConfig,
        transport: Box<dyn DeviceTransport>,
        discovery: Box<dyn DiscoveryAgent>,
        adapter: Box<dyn LocalAdapter>,
    ) -> Self {
        let adapter_state = AdapterState::resolve(adapter.is_valid(), adapter.host_mode());
        info!("Local adapter: {}", adapter_state.name());

        Self {
            config,
            tracker: CommandTracker::new(),
            queue: CommandQueue::new(),
            registry: DeviceRegistry::new(),
            transport,
            discovery,
            adapter,
            discovery_running: false,
            fake_tail_mode: false,
            adapter_state,
            current_command: None,
            reported_queue_len: 0,
            reported_device_count: 0,
            reported_connected: false,
            event_buffer: Vec::new(),
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Start scanning for devices; does nothing if a scan is running
    pub fn start_discovery(&mut self) {
        if self.discovery_running {
            debug!("Discovery already running");
            return;
        }
        self.discovery_running = true;
        self.event_buffer
            .push(ManagerEvent::DiscoveryRunningChanged(true));
        info!("Starting device discovery");
        self.discovery.start();
        self.settle(Instant::now());
    }

    /// Stop scanning
    ///
    /// The agent is always told to stop; observers only hear about it when a
    /// scan was actually running.
    pub fn stop_discovery(&mut self) {
        if self.discovery_running {
            self.discovery_running = false;
            self.event_buffer
                .push(ManagerEvent::DiscoveryRunningChanged(false));
            info!("Stopping device discovery");
        }
        self.discovery.stop();
    }

    /// Whether a scan is running
    pub fn discovery_running(&self) -> bool {
        self.discovery_running
    }

    // -------------------------------------------------------------------------
    // Devices
    // -------------------------------------------------------------------------

    /// Connect to a device
    ///
    /// No id (or an empty one) means the first known device. Unknown ids and
    /// devices that are connected or connecting are ignored.
    pub fn connect_to_device(&mut self, id: Option<&DeviceId>) {
        let target = match resolve_id(id) {
            Some(id) => id.clone(),
            None => match self.registry.device_id_at(0) {
                Some(first) => first.clone(),
                None => {
                    debug!("No devices known, nothing to connect to");
                    return;
                }
            },
        };

        let Some(device) = self.registry.get(&target) else {
            debug!("Ignoring connect to unknown device {}", target);
            return;
        };
        if device.is_fake
            || matches!(
                device.state,
                ConnectionState::Connected | ConnectionState::Connecting
            )
        {
            debug!("Device {} is already {}", target, device.state.name());
            return;
        }

        let info = device.info.clone();
        info!("Attempting to connect to device {} ({})", info.name, info.id);
        match self.transport.connect(&info) {
            Ok(()) => {
                self.registry
                    .set_state(&target, ConnectionState::Connecting);
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", target, e);
                self.report_error("Transport", format!("Connect to {} failed: {}", target, e));
            }
        }
        self.settle(Instant::now());
    }

    /// Disconnect devices
    ///
    /// No id (or an empty one) disconnects every device and empties the
    /// queue. Otherwise only that device is disconnected, if it is
    /// connected, and its queued and in-flight commands are dropped. In
    /// fake-tail mode the simulated device goes away first.
    pub fn disconnect_device(&mut self, id: Option<&DeviceId>) {
        let now = Instant::now();
        if self.fake_tail_mode {
            self.leave_fake_tail_mode(false, now);
        }

        match resolve_id(id) {
            Some(id) => {
                let id = id.clone();
                self.disconnect_one(&id, now);
            }
            None => {
                let ids: Vec<DeviceId> = self.registry.iter().map(|d| d.info.id.clone()).collect();
                for id in ids {
                    self.disconnect_one(&id, now);
                }
                self.queue.clear_all(&mut self.tracker, now);
            }
        }
        self.settle(now);
    }

    fn disconnect_one(&mut self, id: &DeviceId, now: Instant) {
        if !self.registry.is_connected(id) {
            return;
        }
        match self.transport.disconnect(id) {
            Ok(()) => {
                info!("Disconnected device {}", id);
                self.registry.set_state(id, ConnectionState::Disconnected);
                self.queue.clear(id, &mut self.tracker, now);
            }
            Err(e) => {
                warn!("Disconnect of {} failed: {}", id, e);
                self.report_error("Transport", format!("Disconnect of {} failed: {}", id, e));
            }
        }
    }

    /// Whether fake-tail mode is on or any device is connected
    pub fn is_connected(&self) -> bool {
        self.fake_tail_mode || self.registry.any_connected()
    }

    /// Number of known devices
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    /// Read-only view of the known devices
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Set a display name for a device, stored against its address
    pub fn set_device_name(&mut self, id: &DeviceId, name: &str) -> bool {
        self.registry.set_name_override(id, name)
    }

    /// Restore saved display names, keyed by hardware address
    pub fn load_device_names(&mut self, names: HashMap<String, String>) {
        debug!("Loaded {} device name(s)", names.len());
        self.registry.load_name_overrides(names);
    }

    /// Display name overrides, keyed by hardware address
    pub fn device_names(&self) -> &HashMap<String, String> {
        self.registry.name_overrides()
    }

    /// Drop every display name override
    pub fn clear_device_names(&mut self) {
        self.registry.clear_name_overrides();
        info!("Cleared device names");
        self.event_buffer.push(ManagerEvent::DeviceNamesCleared);
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Send a raw line to devices (empty list: every connected device)
    ///
    /// This bypasses the queue and the tracker. Returns how many devices
    /// accepted the line.
    pub fn send_message(&mut self, text: &str, device_ids: &[DeviceId]) -> usize {
        let targets: Vec<DeviceId> = if device_ids.is_empty() {
            self.registry.connected_ids()
        } else {
            device_ids
                .iter()
                .filter(|id| self.registry.is_connected(id))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for id in targets {
            let mut link = RegistryLink {
                registry: &self.registry,
                transport: self.transport.as_mut(),
            };
            match link.send(&id, text) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Sending {:?} to {} failed: {}", text, id, e);
                    self.report_error("Transport", format!("Sending to {} failed: {}", id, e));
                }
            }
        }
        debug!("Sent {:?} to {} device(s)", text, delivered);
        delivered
    }

    /// Send a raw command token to every connected device
    pub fn run_command(&mut self, command: &str) -> usize {
        self.send_message(command, &[])
    }

    /// Queue a catalog command (or a pause) for delivery
    ///
    /// Returns the queue entry id, or `None` if the token is unknown.
    pub fn enqueue(&mut self, command: &str, device_ids: Vec<DeviceId>) -> Option<u64> {
        let Some(descriptor) = self.get_command(command) else {
            debug!("Not queueing unknown command {}", command);
            return None;
        };
        let now = Instant::now();
        let id = self.queue.enqueue_at(descriptor, device_ids, now);
        self.settle(now);
        Some(id)
    }

    /// Remove a queued entry
    pub fn cancel_queued(&mut self, entry_id: u64) -> bool {
        let removed = self.queue.cancel(entry_id);
        self.settle(Instant::now());
        removed
    }

    /// Read-only view of the queue
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    // -------------------------------------------------------------------------
    // Fake-tail mode
    // -------------------------------------------------------------------------

    /// Toggle fake-tail mode
    ///
    /// Turning it on from off adds the simulated device. Every other call,
    /// including turning it on while already on, removes the simulated
    /// device and stores the requested flag. Discovery is stopped either way.
    pub fn set_fake_tail_mode(&mut self, enabled: bool) {
        let now = Instant::now();
        self.stop_discovery();

        if !self.fake_tail_mode && enabled {
            self.fake_tail_mode = true;
            self.registry.insert_fake(self.config.fake_device());
            info!("Fake tail mode on");
            self.event_buffer.push(ManagerEvent::FakeTailModeChanged(true));
        } else {
            self.leave_fake_tail_mode(enabled, now);
        }
        self.settle(now);
    }

    fn leave_fake_tail_mode(&mut self, flag: bool, now: Instant) {
        self.fake_tail_mode = flag;
        for id in self.registry.remove_fake() {
            self.queue.clear(&id, &mut self.tracker, now);
        }
        info!("Fake tail mode {}", if flag { "on" } else { "off" });
        self.event_buffer
            .push(ManagerEvent::FakeTailModeChanged(self.fake_tail_mode));
    }

    /// Whether fake-tail mode is on
    pub fn fake_tail_mode(&self) -> bool {
        self.fake_tail_mode
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Look up command metadata by raw token
    ///
    /// `pause:<seconds>` is synthesized rather than looked up.
    pub fn get_command(&self, token: &str) -> Option<CommandDescriptor> {
        match parse_pause(token) {
            Ok(Some(seconds)) => Some(CommandDescriptor::pause(seconds)),
            Ok(None) => self.tracker.get_command(token).map(CommandInfo::descriptor),
            Err(e) => {
                debug!("Ignoring {}", e);
                None
            }
        }
    }

    /// Make a command the current one
    pub fn set_command(&mut self, token: &str) {
        self.current_command = self.get_command(token);
        self.event_buffer
            .push(ManagerEvent::CommandChanged(self.current_command.clone()));
    }

    /// The current command, if any
    pub fn current_command(&self) -> Option<&CommandDescriptor> {
        self.current_command.as_ref()
    }

    /// Record a running-state change reported from outside
    pub fn set_running(&mut self, token: &str, is_running: bool) {
        let now = Instant::now();
        self.tracker.set_running_at(token, is_running, now);
        self.settle(now);
    }

    /// Replace the catalog
    ///
    /// Invalid records are skipped. Returns how many were accepted.
    pub fn load_catalog(&mut self, records: Vec<CommandRecord>) -> usize {
        let (accepted, rejected) = partition_records(records);
        for e in &rejected {
            self.report_error("Catalog", e.to_string());
        }

        self.tracker.clear();
        let count = accepted.len();
        for record in accepted {
            self.tracker.add_command(record.into());
        }
        info!(
            "Loaded {} command(s), skipped {}",
            count,
            rejected.len()
        );
        self.settle(Instant::now());
        count
    }

    /// Add a single catalog entry
    pub fn add_command(&mut self, info: CommandInfo) {
        self.tracker.add_command(info);
        self.settle(Instant::now());
    }

    /// Remove a single catalog entry
    pub fn remove_command(&mut self, info: &CommandInfo) {
        self.tracker.remove_command(info);
        self.settle(Instant::now());
    }

    /// Read-only view of the catalog and its state
    pub fn tracker(&self) -> &CommandTracker {
        &self.tracker
    }

    // -------------------------------------------------------------------------
    // Adapter
    // -------------------------------------------------------------------------

    /// Re-read the local adapter and report a change of resolved state
    pub fn refresh_adapter_state(&mut self) {
        let state = AdapterState::resolve(self.adapter.is_valid(), self.adapter.host_mode());
        if state != self.adapter_state {
            info!(
                "Local adapter: {} -> {}",
                self.adapter_state.name(),
                state.name()
            );
            self.adapter_state = state;
            self.event_buffer.push(ManagerEvent::AdapterStateChanged(state));
        }
    }

    /// Resolved state of the local adapter
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    // -------------------------------------------------------------------------
    // Events and timers
    // -------------------------------------------------------------------------

    /// Process something the radio side reported
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        let now = Instant::now();
        match event {
            LinkEvent::Transport(TransportEvent::Connected(id)) => {
                match self.registry.set_state(&id, ConnectionState::Connected) {
                    Some(ConnectionState::Connected) => {}
                    Some(_) => {
                        info!("Device connected: {}", id);
                        self.event_buffer.push(ManagerEvent::DeviceConnected(id));
                    }
                    None => debug!("Connect report for unknown device {}", id),
                }
            }
            LinkEvent::Transport(TransportEvent::ConnectFailed { id, reason }) => {
                warn!("Could not connect to {}: {}", id, reason);
                self.registry.set_state(&id, ConnectionState::Disconnected);
                self.report_error("Transport", format!("Could not connect to {}: {}", id, reason));
            }
            LinkEvent::Transport(TransportEvent::Disconnected(id)) => {
                if self.registry.set_state(&id, ConnectionState::Disconnected)
                    == Some(ConnectionState::Connected)
                {
                    info!("Device disconnected: {}", id);
                }
                self.queue.clear(&id, &mut self.tracker, now);
            }
            LinkEvent::Transport(TransportEvent::Message { id, text }) => {
                self.handle_device_message(&id, &text, now);
                self.event_buffer
                    .push(ManagerEvent::DeviceMessage { id, text });
            }
            LinkEvent::Discovery(DiscoveryEvent::DeviceDiscovered(info)) => {
                self.registry.add_discovered(info);
            }
            LinkEvent::Discovery(DiscoveryEvent::Finished) => {
                info!("Device discovery completed");
                if self.discovery_running {
                    self.discovery_running = false;
                    self.event_buffer
                        .push(ManagerEvent::DiscoveryRunningChanged(false));
                }
            }
            LinkEvent::Adapter(AdapterEvent::HostModeChanged) => {
                self.refresh_adapter_state();
            }
        }
        self.settle(now);
    }

    fn handle_device_message(&mut self, id: &DeviceId, text: &str, now: Instant) {
        match DeviceAck::parse(text) {
            Ok(ack) => {
                debug!("{} reports {:?}", id, ack);
                self.tracker
                    .set_running_at(ack.token(), ack.is_running(), now);
            }
            Err(_) => debug!("{} says: {}", id, text.trim()),
        }
    }

    /// Earliest instant at which [`on_deadline`](Self::on_deadline) has
    /// work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.tracker.next_deadline(), self.queue.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Expire fail-safes and pauses that are due at `now`
    pub fn on_deadline(&mut self, now: Instant) {
        self.tracker.expire_due(now);
        self.settle(now);
    }

    /// Drain pending events
    pub fn drain_events(&mut self) -> Vec<ManagerEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    fn report_error(&mut self, source: &str, message: String) {
        self.event_buffer.push(ManagerEvent::Error {
            source: source.to_string(),
            message,
        });
    }

    /// Let the queue dispatch, then report whatever changed
    fn settle(&mut self, now: Instant) {
        let mut link = RegistryLink {
            registry: &self.registry,
            transport: self.transport.as_mut(),
        };
        let outcomes = self.queue.dispatch(&mut self.tracker, &mut link, now);
        for outcome in outcomes {
            if let DispatchOutcome::Failed { command, failures } = outcome {
                for (id, e) in failures {
                    self.report_error(
                        "Transport",
                        format!("Sending {} to {} failed: {}", command, id, e),
                    );
                }
            }
        }

        self.event_buffer
            .extend(self.tracker.drain_events().into_iter().map(ManagerEvent::from));

        let queue_len = self.queue.len();
        if queue_len != self.reported_queue_len {
            self.reported_queue_len = queue_len;
            self.event_buffer
                .push(ManagerEvent::QueueCountChanged(queue_len));
        }

        let device_count = self.registry.len();
        if device_count != self.reported_device_count {
            self.reported_device_count = device_count;
            self.event_buffer
                .push(ManagerEvent::DeviceCountChanged(device_count));
        }

        let connected = self.is_connected();
        if connected != self.reported_connected {
            self.reported_connected = connected;
            self.event_buffer.push(ManagerEvent::ConnectedChanged(connected));
        }
    }
}
