//! Contracts with the radio side
//!
//! The control core never talks to a BLE stack directly. It drives three
//! collaborators through non-blocking calls and learns about the results
//! through [`LinkEvent`]s delivered on a channel:
//!
//! - [`DeviceTransport`]: connect, disconnect and send to individual devices
//! - [`DiscoveryAgent`]: start and stop scanning for devices
//! - [`LocalAdapter`]: the host's own Bluetooth adapter

use crate::device::{DeviceId, DeviceInfo};
use crate::error::TransportError;

/// Power mode reported by the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HostMode {
    /// Radio is powered off
    PoweredOff,
    /// Radio is on and connectable
    #[default]
    Connectable,
    /// Radio is on and discoverable by other hosts
    Discoverable,
}

/// Connection and data operations on devices
///
/// All calls return immediately. An `Ok` from [`connect`](Self::connect)
/// only means the attempt started; the outcome arrives later as
/// [`TransportEvent::Connected`] or [`TransportEvent::ConnectFailed`].
/// An `Err` from any call means nothing happened on the device.
pub trait DeviceTransport: Send {
    /// Start connecting to a device
    fn connect(&mut self, device: &DeviceInfo) -> Result<(), TransportError>;

    /// Drop the link to a device
    fn disconnect(&mut self, id: &DeviceId) -> Result<(), TransportError>;

    /// Write a raw command token to a connected device
    fn send(&mut self, id: &DeviceId, token: &str) -> Result<(), TransportError>;
}

/// Device discovery
pub trait DiscoveryAgent: Send {
    /// Begin scanning; results arrive as [`DiscoveryEvent`]s
    fn start(&mut self);

    /// Stop scanning
    fn stop(&mut self);
}

/// The host's Bluetooth adapter
pub trait LocalAdapter: Send {
    /// Whether an adapter is present and usable at all
    fn is_valid(&self) -> bool;

    /// Current power mode
    fn host_mode(&self) -> HostMode;
}

/// Events from the device transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connect attempt completed
    Connected(DeviceId),
    /// A connect attempt failed
    ConnectFailed {
        /// Device that could not be reached
        id: DeviceId,
        /// Transport-provided reason
        reason: String,
    },
    /// The link to a device went down
    Disconnected(DeviceId),
    /// A text line arrived from a device
    Message {
        /// Sending device
        id: DeviceId,
        /// Message text
        text: String,
    },
}

/// Events from discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A device was seen
    DeviceDiscovered(DeviceInfo),
    /// The scan ended on its own
    Finished,
}

/// Events from the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Host mode or validity changed; query the adapter for the new values
    HostModeChanged,
}

/// Everything the radio side can tell the control core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// From the device transport
    Transport(TransportEvent),
    /// From discovery
    Discovery(DiscoveryEvent),
    /// From the local adapter
    Adapter(AdapterEvent),
}

impl LinkEvent {
    /// Get the device id if this event concerns a specific device
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            LinkEvent::Transport(TransportEvent::Connected(id))
            | LinkEvent::Transport(TransportEvent::Disconnected(id))
            | LinkEvent::Transport(TransportEvent::ConnectFailed { id, .. })
            | LinkEvent::Transport(TransportEvent::Message { id, .. }) => Some(id),
            LinkEvent::Discovery(DiscoveryEvent::DeviceDiscovered(info)) => Some(&info.id),
            _ => None,
        }
    }
}

impl From<TransportEvent> for LinkEvent {
    fn from(event: TransportEvent) -> Self {
        LinkEvent::Transport(event)
    }
}

impl From<DiscoveryEvent> for LinkEvent {
    fn from(event: DiscoveryEvent) -> Self {
        LinkEvent::Discovery(event)
    }
}

impl From<AdapterEvent> for LinkEvent {
    fn from(event: AdapterEvent) -> Self {
        LinkEvent::Adapter(event)
    }
}
