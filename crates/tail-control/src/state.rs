//! Local adapter state

use serde::{Deserialize, Serialize};
use tail_protocol::HostMode;

/// Resolved state of the host's Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterState {
    /// Adapter present and powered
    On,
    /// Adapter present but powered off
    Off,
    /// No usable adapter
    NoAdapter,
}

impl AdapterState {
    /// Resolve from the adapter's validity and host mode
    ///
    /// An invalid adapter is `NoAdapter` whatever mode it reports.
    pub fn resolve(is_valid: bool, host_mode: HostMode) -> Self {
        if !is_valid {
            AdapterState::NoAdapter
        } else if host_mode == HostMode::PoweredOff {
            AdapterState::Off
        } else {
            AdapterState::On
        }
    }

    /// Numeric code consumers expect (0=On, 1=Off, 2=NoAdapter)
    pub fn code(&self) -> u8 {
        match self {
            AdapterState::On => 0,
            AdapterState::Off => 1,
            AdapterState::NoAdapter => 2,
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            AdapterState::On => "On",
            AdapterState::Off => "Off",
            AdapterState::NoAdapter => "No adapter",
        }
    }
}
