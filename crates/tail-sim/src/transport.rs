//! Simulated device transport
//!
//! Devices "connect" instantly unless marked unreachable. Everything written
//! to them is recorded for test verification, and a device can be told to
//! acknowledge commands the way real gear does (`BEGIN <token>` on receipt,
//! `<token> END` when [`TransportHandle::finish`] is called).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tail_protocol::{
    DeviceId, DeviceInfo, DeviceTransport, LinkEvent, TransportError, TransportEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a simulated device behaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    /// Device id (also used as address when `address` is empty)
    pub id: String,
    /// Advertised name
    pub name: String,
    /// Hardware address
    #[serde(default)]
    pub address: String,
    /// Whether connect attempts succeed
    #[serde(default = "default_true")]
    pub reachable: bool,
    /// Whether the device reports `BEGIN` for every command it receives
    #[serde(default)]
    pub auto_ack: bool,
}

fn default_true() -> bool {
    true
}

impl SimulatedDeviceConfig {
    /// Create a reachable device that does not acknowledge
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: String::new(),
            reachable: true,
            auto_ack: false,
        }
    }

    /// What discovery would report for this device
    pub fn info(&self) -> DeviceInfo {
        let address = if self.address.is_empty() {
            self.id.clone()
        } else {
            self.address.clone()
        };
        DeviceInfo::new(self.id.as_str(), self.name.as_str(), address)
    }
}

#[derive(Debug, Default)]
struct TransportState {
    connected: HashSet<DeviceId>,
    unreachable: HashMap<DeviceId, String>,
    auto_ack: HashSet<DeviceId>,
    send_failures: VecDeque<TransportError>,
    sent: Vec<(DeviceId, String)>,
    connect_attempts: Vec<DeviceId>,
}

fn lock(shared: &Mutex<TransportState>) -> MutexGuard<'_, TransportState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport half handed to the connection manager
pub struct SimulatedTransport {
    shared: Arc<Mutex<TransportState>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

/// Test-side handle for scripting and inspecting the transport
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<Mutex<TransportState>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl SimulatedTransport {
    /// Create a transport reporting on `events`
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>) -> (Self, TransportHandle) {
        let shared = Arc::new(Mutex::new(TransportState::default()));
        let handle = TransportHandle {
            shared: Arc::clone(&shared),
            events: events.clone(),
        };
        (Self { shared, events }, handle)
    }

    /// Create a transport and apply per-device behavior
    pub fn with_devices(
        events: mpsc::UnboundedSender<LinkEvent>,
        devices: &[SimulatedDeviceConfig],
    ) -> (Self, TransportHandle) {
        let (transport, handle) = Self::new(events);
        for device in devices {
            let id = DeviceId::new(device.id.as_str());
            if !device.reachable {
                handle.set_unreachable(id.clone(), "device out of range");
            }
            handle.set_auto_ack(id, device.auto_ack);
        }
        (transport, handle)
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event.into());
    }
}

impl DeviceTransport for SimulatedTransport {
    fn connect(&mut self, device: &DeviceInfo) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        state.connect_attempts.push(device.id.clone());

        if let Some(reason) = state.unreachable.get(&device.id).cloned() {
            drop(state);
            info!("Simulated connect to {} failed: {}", device.id, reason);
            self.emit(TransportEvent::ConnectFailed {
                id: device.id.clone(),
                reason,
            });
            return Ok(());
        }

        state.connected.insert(device.id.clone());
        drop(state);
        info!("Simulated device connected: {} ({})", device.name, device.id);
        self.emit(TransportEvent::Connected(device.id.clone()));
        Ok(())
    }

    fn disconnect(&mut self, id: &DeviceId) -> Result<(), TransportError> {
        if !lock(&self.shared).connected.remove(id) {
            return Err(TransportError::NotConnected(id.to_string()));
        }
        info!("Simulated device disconnected: {}", id);
        self.emit(TransportEvent::Disconnected(id.clone()));
        Ok(())
    }

    fn send(&mut self, id: &DeviceId, token: &str) -> Result<(), TransportError> {
        let mut state = lock(&self.shared);
        if !state.connected.contains(id) {
            return Err(TransportError::NotConnected(id.to_string()));
        }
        if let Some(err) = state.send_failures.pop_front() {
            warn!("Simulated send of {} to {} failing: {}", token, id, err);
            return Err(err);
        }

        debug!("Simulated send to {}: {}", id, token);
        state.sent.push((id.clone(), token.to_string()));
        let ack = state.auto_ack.contains(id);
        drop(state);

        if ack {
            self.emit(TransportEvent::Message {
                id: id.clone(),
                text: format!("BEGIN {}", token),
            });
        }
        Ok(())
    }
}

impl TransportHandle {
    /// Make connect attempts to a device fail
    pub fn set_unreachable(&self, id: DeviceId, reason: impl Into<String>) {
        lock(&self.shared).unreachable.insert(id, reason.into());
    }

    /// Make a previously unreachable device reachable again
    pub fn set_reachable(&self, id: &DeviceId) {
        lock(&self.shared).unreachable.remove(id);
    }

    /// Toggle automatic `BEGIN` acknowledgements for a device
    pub fn set_auto_ack(&self, id: DeviceId, enabled: bool) {
        let mut state = lock(&self.shared);
        if enabled {
            state.auto_ack.insert(id);
        } else {
            state.auto_ack.remove(&id);
        }
    }

    /// Fail the next send with the given error
    pub fn fail_next_send(&self, err: TransportError) {
        lock(&self.shared).send_failures.push_back(err);
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<(DeviceId, String)> {
        lock(&self.shared).sent.clone()
    }

    /// Tokens sent to one device, in order
    pub fn sent_to(&self, id: &DeviceId) -> Vec<String> {
        lock(&self.shared)
            .sent
            .iter()
            .filter(|(to, _)| to == id)
            .map(|(_, token)| token.clone())
            .collect()
    }

    /// Drain the send log
    pub fn take_sent(&self) -> Vec<(DeviceId, String)> {
        std::mem::take(&mut lock(&self.shared).sent)
    }

    /// Devices a connect was attempted on, in order
    pub fn connect_attempts(&self) -> Vec<DeviceId> {
        lock(&self.shared).connect_attempts.clone()
    }

    /// Whether the simulated link to a device is up
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        lock(&self.shared).connected.contains(id)
    }

    /// Have the device report that a command finished
    pub fn finish(&self, id: &DeviceId, token: &str) {
        self.reply(id, format!("{} END", token));
    }

    /// Have the device send a line of text
    pub fn reply(&self, id: &DeviceId, text: impl Into<String>) {
        let _ = self.events.send(
            TransportEvent::Message {
                id: id.clone(),
                text: text.into(),
            }
            .into(),
        );
    }

    /// Drop the link from the device side
    pub fn drop_link(&self, id: &DeviceId) {
        if lock(&self.shared).connected.remove(id) {
            info!("Simulated link to {} lost", id);
            let _ = self
                .events
                .send(TransportEvent::Disconnected(id.clone()).into());
        }
    }
}
