//! Device registry
//!
//! Holds every device the manager knows about, in the order they were first
//! seen, along with user-assigned display names keyed by hardware address.

use std::collections::HashMap;

use tail_protocol::{ConnectionState, DeviceId, DeviceInfo};
use tracing::{debug, info};

/// A known device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// What discovery reported
    pub info: DeviceInfo,
    /// Current link state
    pub state: ConnectionState,
    /// Whether this is the simulated stand-in device
    pub is_fake: bool,
}

impl Device {
    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Ordered collection of known devices
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
    names: HashMap<String, String>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered device
    ///
    /// Returns false if the id was already known, in which case the stored
    /// name and address are refreshed but the connection state is kept.
    pub fn add_discovered(&mut self, info: DeviceInfo) -> bool {
        if let Some(existing) = self.devices.iter_mut().find(|d| d.info.id == info.id) {
            existing.info = info;
            return false;
        }
        info!("Discovered device: {} ({})", info.name, info.id);
        self.devices.push(Device {
            info,
            state: ConnectionState::Discovered,
            is_fake: false,
        });
        true
    }

    /// Insert the simulated device, already connected
    pub fn insert_fake(&mut self, info: DeviceInfo) -> bool {
        if self.get(&info.id).is_some() {
            return false;
        }
        info!("Added simulated device: {} ({})", info.name, info.id);
        self.devices.push(Device {
            info,
            state: ConnectionState::Connected,
            is_fake: true,
        });
        true
    }

    /// Remove every simulated device
    pub fn remove_fake(&mut self) -> Vec<DeviceId> {
        let removed: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|d| d.is_fake)
            .map(|d| d.info.id.clone())
            .collect();
        self.devices.retain(|d| !d.is_fake);
        for id in &removed {
            info!("Removed simulated device {}", id);
        }
        removed
    }

    /// Look up a device
    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| &d.info.id == id)
    }

    /// Id of the device at a position
    pub fn device_id_at(&self, index: usize) -> Option<&DeviceId> {
        self.devices.get(index).map(|d| &d.info.id)
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device is known
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether a specific device is connected
    pub fn is_connected(&self, id: &DeviceId) -> bool {
        self.get(id).map(Device::is_connected).unwrap_or(false)
    }

    /// Whether any device is connected
    pub fn any_connected(&self) -> bool {
        self.devices.iter().any(Device::is_connected)
    }

    /// Ids of connected devices, in registry order
    pub fn connected_ids(&self) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|d| d.is_connected())
            .map(|d| d.info.id.clone())
            .collect()
    }

    /// Update a device's link state
    ///
    /// Returns the previous state, or `None` for unknown devices.
    pub fn set_state(&mut self, id: &DeviceId, state: ConnectionState) -> Option<ConnectionState> {
        let device = self.devices.iter_mut().find(|d| &d.info.id == id)?;
        let previous = device.state;
        if previous != state {
            debug!("Device {} {} -> {}", id, previous.name(), state.name());
            device.state = state;
        }
        Some(previous)
    }

    /// Name to show for a device: the override for its address if any,
    /// otherwise the advertised name
    pub fn display_name(&self, id: &DeviceId) -> Option<&str> {
        let device = self.get(id)?;
        Some(
            self.names
                .get(&device.info.address)
                .map(String::as_str)
                .unwrap_or(device.info.name.as_str()),
        )
    }

    /// Set a display name override for a device
    ///
    /// The override is stored against the device's address, so it survives
    /// the device being forgotten and rediscovered. Unknown ids are ignored.
    pub fn set_name_override(&mut self, id: &DeviceId, name: impl Into<String>) -> bool {
        let Some(address) = self.get(id).map(|d| d.info.address.clone()) else {
            return false;
        };
        let name = name.into();
        info!("Device {} will be shown as {}", address, name);
        self.names.insert(address, name);
        true
    }

    /// Seed name overrides, keyed by address
    pub fn load_name_overrides(&mut self, names: impl IntoIterator<Item = (String, String)>) {
        self.names.extend(names);
    }

    /// Drop every name override
    pub fn clear_name_overrides(&mut self) {
        self.names.clear();
    }

    /// Current name overrides, keyed by address
    pub fn name_overrides(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// Iterate over devices in registry order
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }
}
