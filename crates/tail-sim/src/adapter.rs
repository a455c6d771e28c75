//! Simulated local Bluetooth adapter

use std::sync::{Arc, Mutex};

use tail_protocol::{AdapterEvent, HostMode, LinkEvent, LocalAdapter};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct AdapterStatus {
    valid: bool,
    host_mode: HostMode,
}

/// Adapter handed to the connection manager
pub struct SimulatedAdapter {
    shared: Arc<Mutex<AdapterStatus>>,
}

/// Test-side handle for flipping the adapter's state
#[derive(Clone)]
pub struct AdapterHandle {
    shared: Arc<Mutex<AdapterStatus>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl SimulatedAdapter {
    /// Create a valid, powered adapter
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>) -> (Self, AdapterHandle) {
        Self::with_state(true, HostMode::Connectable, events)
    }

    /// Create an adapter in a specific state
    pub fn with_state(
        valid: bool,
        host_mode: HostMode,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> (Self, AdapterHandle) {
        let shared = Arc::new(Mutex::new(AdapterStatus { valid, host_mode }));
        let handle = AdapterHandle {
            shared: Arc::clone(&shared),
            events,
        };
        (Self { shared }, handle)
    }

    fn status(&self) -> AdapterStatus {
        *self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl LocalAdapter for SimulatedAdapter {
    fn is_valid(&self) -> bool {
        self.status().valid
    }

    fn host_mode(&self) -> HostMode {
        self.status().host_mode
    }
}

impl AdapterHandle {
    /// Plug in or pull out the adapter
    pub fn set_valid(&self, valid: bool) {
        self.update(|status| status.valid = valid);
    }

    /// Change the power mode
    pub fn set_host_mode(&self, host_mode: HostMode) {
        self.update(|status| status.host_mode = host_mode);
    }

    fn update(&self, apply: impl FnOnce(&mut AdapterStatus)) {
        let status = {
            let mut status = self.shared.lock().unwrap_or_else(|p| p.into_inner());
            apply(&mut status);
            *status
        };
        info!(
            "Simulated adapter now valid={} mode={:?}",
            status.valid, status.host_mode
        );
        let _ = self.events.send(AdapterEvent::HostModeChanged.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changes_are_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (adapter, handle) = SimulatedAdapter::new(tx);
        assert!(adapter.is_valid());
        assert_eq!(adapter.host_mode(), HostMode::Connectable);

        handle.set_host_mode(HostMode::PoweredOff);
        assert_eq!(adapter.host_mode(), HostMode::PoweredOff);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Adapter(AdapterEvent::HostModeChanged)
        );

        handle.set_valid(false);
        assert!(!adapter.is_valid());
        assert!(rx.try_recv().is_ok());
    }
}
