//! Simulated device discovery
//!
//! A scan "finds" a fixed list of devices immediately. By default the scan
//! then reports that it finished, as a real agent does after its timeout;
//! tests that need a scan to stay open can turn that off.

use std::sync::{Arc, Mutex};

use tail_protocol::{DeviceInfo, DiscoveryAgent, DiscoveryEvent, LinkEvent};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct DiscoveryState {
    devices: Vec<DeviceInfo>,
    auto_finish: bool,
    scanning: bool,
    starts: usize,
    stops: usize,
}

/// Discovery agent handed to the connection manager
pub struct SimulatedDiscovery {
    shared: Arc<Mutex<DiscoveryState>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

/// Test-side handle for scripting and inspecting discovery
#[derive(Clone)]
pub struct DiscoveryHandle {
    shared: Arc<Mutex<DiscoveryState>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl SimulatedDiscovery {
    /// Create an agent that will find `devices` on every scan
    pub fn new(
        devices: Vec<DeviceInfo>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> (Self, DiscoveryHandle) {
        let shared = Arc::new(Mutex::new(DiscoveryState {
            devices,
            auto_finish: true,
            ..Default::default()
        }));
        let handle = DiscoveryHandle {
            shared: Arc::clone(&shared),
            events: events.clone(),
        };
        (Self { shared, events }, handle)
    }
}

impl DiscoveryAgent for SimulatedDiscovery {
    fn start(&mut self) {
        let (devices, auto_finish) = {
            let mut state = self.shared.lock().unwrap_or_else(|p| p.into_inner());
            state.starts += 1;
            state.scanning = true;
            (state.devices.clone(), state.auto_finish)
        };

        info!("Simulated discovery started ({} devices in range)", devices.len());
        for device in devices {
            let _ = self
                .events
                .send(DiscoveryEvent::DeviceDiscovered(device).into());
        }

        if auto_finish {
            self.shared
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .scanning = false;
            let _ = self.events.send(DiscoveryEvent::Finished.into());
        }
    }

    fn stop(&mut self) {
        let mut state = self.shared.lock().unwrap_or_else(|p| p.into_inner());
        state.stops += 1;
        state.scanning = false;
        debug!("Simulated discovery stopped");
    }
}

impl DiscoveryHandle {
    /// Whether scans report completion on their own
    pub fn set_auto_finish(&self, enabled: bool) {
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .auto_finish = enabled;
    }

    /// Put another device in range; it is reported on the next scan
    pub fn add_device(&self, device: DeviceInfo) {
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .devices
            .push(device);
    }

    /// Report a device right now, as if an open scan just saw it
    pub fn announce(&self, device: DeviceInfo) {
        let _ = self
            .events
            .send(DiscoveryEvent::DeviceDiscovered(device).into());
    }

    /// End an open scan
    pub fn finish(&self) {
        self.shared
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .scanning = false;
        let _ = self.events.send(DiscoveryEvent::Finished.into());
    }

    /// Whether a scan is open
    pub fn is_scanning(&self) -> bool {
        self.shared.lock().unwrap_or_else(|p| p.into_inner()).scanning
    }

    /// Number of `start` calls seen
    pub fn starts(&self) -> usize {
        self.shared.lock().unwrap_or_else(|p| p.into_inner()).starts
    }

    /// Number of `stop` calls seen
    pub fn stops(&self) -> usize {
        self.shared.lock().unwrap_or_else(|p| p.into_inner()).stops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_reports_devices_then_finishes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut agent, handle) =
            SimulatedDiscovery::new(vec![DeviceInfo::new("t1", "Tail", "AA")], tx);

        agent.start();
        assert!(matches!(
            rx.try_recv().unwrap(),
            LinkEvent::Discovery(DiscoveryEvent::DeviceDiscovered(_))
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Discovery(DiscoveryEvent::Finished)
        );
        assert_eq!(handle.starts(), 1);
        assert!(!handle.is_scanning());
    }

    #[test]
    fn test_open_scan() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut agent, handle) = SimulatedDiscovery::new(Vec::new(), tx);
        handle.set_auto_finish(false);

        agent.start();
        assert!(rx.try_recv().is_err());
        assert!(handle.is_scanning());

        handle.announce(DeviceInfo::new("t2", "Ears", "BB"));
        assert!(rx.try_recv().is_ok());

        agent.stop();
        assert_eq!(handle.stops(), 1);
        assert!(!handle.is_scanning());
    }
}
