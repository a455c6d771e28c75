//! Unified event stream for the connection manager
//!
//! Everything an observer might want to show or react to (catalog state,
//! queue length, devices, adapter, free-text device messages) comes through
//! a single channel in the order it happened.

use tail_protocol::{CommandDescriptor, CommandKey, DeviceId};

use crate::state::AdapterState;
use crate::tracker::TrackerEvent;

/// Unified event enum for all manager activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    // -------------------------------------------------------------------------
    // Command events
    // -------------------------------------------------------------------------
    /// The current command descriptor was replaced
    CommandChanged(Option<CommandDescriptor>),

    /// Running or availability flags of one catalog entry changed
    CommandStateChanged {
        /// Command whose flags changed
        key: CommandKey,
        /// New running flag
        is_running: bool,
        /// New availability flag
        is_available: bool,
    },

    /// A command was force-stopped because its end was never reported
    FailSafeTriggered {
        /// Command that was released
        key: CommandKey,
    },

    /// The catalog grew, shrank or was reloaded
    CatalogChanged {
        /// Catalog size after the change
        count: usize,
    },

    /// Number of queued commands changed
    QueueCountChanged(usize),

    // -------------------------------------------------------------------------
    // Device events
    // -------------------------------------------------------------------------
    /// Number of known devices changed
    DeviceCountChanged(usize),

    /// Discovery started or stopped
    DiscoveryRunningChanged(bool),

    /// Resolved state of the local adapter changed
    AdapterStateChanged(AdapterState),

    /// Aggregate connectivity (any device connected, or fake mode) changed
    ConnectedChanged(bool),

    /// A device finished connecting
    DeviceConnected(DeviceId),

    /// A device sent a line of text
    DeviceMessage {
        /// Sending device
        id: DeviceId,
        /// What it said
        text: String,
    },

    /// Fake-tail mode was toggled
    FakeTailModeChanged(bool),

    /// All display name overrides were dropped
    DeviceNamesCleared,

    // -------------------------------------------------------------------------
    // Error events
    // -------------------------------------------------------------------------
    /// Something failed that the user may want to know about
    Error {
        /// Where it happened (e.g. "Transport", "Discovery")
        source: String,
        /// Error message
        message: String,
    },
}

impl ManagerEvent {
    /// Check if this is a command/catalog event
    pub fn is_command_event(&self) -> bool {
        matches!(
            self,
            ManagerEvent::CommandChanged(_)
                | ManagerEvent::CommandStateChanged { .. }
                | ManagerEvent::FailSafeTriggered { .. }
                | ManagerEvent::CatalogChanged { .. }
                | ManagerEvent::QueueCountChanged(_)
        )
    }

    /// Check if this is a device/adapter event
    pub fn is_device_event(&self) -> bool {
        matches!(
            self,
            ManagerEvent::DeviceCountChanged(_)
                | ManagerEvent::DiscoveryRunningChanged(_)
                | ManagerEvent::AdapterStateChanged(_)
                | ManagerEvent::ConnectedChanged(_)
                | ManagerEvent::DeviceConnected(_)
                | ManagerEvent::DeviceMessage { .. }
                | ManagerEvent::FakeTailModeChanged(_)
                | ManagerEvent::DeviceNamesCleared
        )
    }

    /// Get the device id if this event concerns a specific device
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            ManagerEvent::DeviceConnected(id) | ManagerEvent::DeviceMessage { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Text shown to the user for a device message
    pub fn message_text(&self) -> Option<String> {
        match self {
            ManagerEvent::DeviceMessage { id, text } => Some(format!("{} says:\n{}", id, text)),
            _ => None,
        }
    }
}

impl From<TrackerEvent> for ManagerEvent {
    fn from(event: TrackerEvent) -> Self {
        match event {
            TrackerEvent::CommandStateChanged {
                key,
                is_running,
                is_available,
            } => ManagerEvent::CommandStateChanged {
                key,
                is_running,
                is_available,
            },
            TrackerEvent::FailSafeTriggered { key } => ManagerEvent::FailSafeTriggered { key },
            TrackerEvent::CatalogChanged { count } => ManagerEvent::CatalogChanged { count },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ManagerEvent::QueueCountChanged(2).is_command_event());
        assert!(!ManagerEvent::QueueCountChanged(2).is_device_event());
        assert!(ManagerEvent::AdapterStateChanged(AdapterState::Off).is_device_event());
        assert!(ManagerEvent::DeviceNamesCleared.is_device_event());

        let error = ManagerEvent::Error {
            source: "Transport".into(),
            message: "boom".into(),
        };
        assert!(!error.is_command_event());
        assert!(!error.is_device_event());
    }

    #[test]
    fn test_message_text() {
        let event = ManagerEvent::DeviceMessage {
            id: DeviceId::new("AA:01"),
            text: "VER 1.0".into(),
        };
        assert_eq!(event.message_text().as_deref(), Some("AA:01 says:\nVER 1.0"));
        assert_eq!(event.device_id(), Some(&DeviceId::new("AA:01")));
        assert_eq!(ManagerEvent::DeviceNamesCleared.message_text(), None);
    }

    #[test]
    fn test_from_tracker_event() {
        let key = CommandKey::new("ears", "A", "EARA");
        let event: ManagerEvent = TrackerEvent::FailSafeTriggered { key: key.clone() }.into();
        assert_eq!(event, ManagerEvent::FailSafeTriggered { key });
    }
}
