//! Connection manager actor
//!
//! The manager engine is plain synchronous state. This module runs it inside
//! a single task so that user commands, link events and timer expiries are
//! handled strictly one at a time, with no locking.
//!
//! # Architecture
//!
//! The actor selects over three inputs:
//! - [`ManagerCommand`]s from the application (through a [`ManagerHandle`])
//! - [`LinkEvent`]s from the transport, discovery and adapter
//! - the earliest fail-safe or pause deadline the engine reports
//!
//! After each input it forwards whatever [`ManagerEvent`]s the engine
//! produced to the event channel. Forwarding never waits: a slow observer
//! loses events rather than stalling the actor.
//!
//! # Example
//!
//! ```rust,ignore
//! use tail_control::{spawn_manager, ConnectionManager};
//! use tokio::sync::mpsc;
//!
//! let (link_tx, link_rx) = mpsc::unbounded_channel();
//! let manager = ConnectionManager::new(transport, discovery, adapter);
//! let (handle, mut events, task) = spawn_manager(manager, link_rx);
//!
//! handle.start_discovery().await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

use std::collections::HashMap;

use tail_protocol::{CommandDescriptor, CommandInfo, CommandRecord, DeviceId, LinkEvent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::events::ManagerEvent;
use crate::manager::ConnectionManager;
use crate::state::AdapterState;

/// Summary of a device for display purposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    /// Device id
    pub id: DeviceId,
    /// Display name (override if set, otherwise advertised)
    pub name: String,
    /// Hardware address
    pub address: String,
    /// Link state name
    pub state: &'static str,
    /// Whether this is the simulated device
    pub is_fake: bool,
}

/// Snapshot of the manager's observable state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSnapshot {
    /// Discovery is running
    pub discovery_running: bool,
    /// Fake-tail mode is on
    pub fake_tail_mode: bool,
    /// Aggregate connectivity
    pub is_connected: bool,
    /// Resolved adapter state
    pub adapter_state: AdapterState,
    /// Known devices
    pub device_count: usize,
    /// Queued commands
    pub queue_len: usize,
    /// Catalog size
    pub catalog_len: usize,
    /// Current command, if one was set
    pub current_command: Option<CommandDescriptor>,
}

impl ManagerSnapshot {
    /// Capture the current state of an engine
    pub fn from_manager(manager: &ConnectionManager) -> Self {
        Self {
            discovery_running: manager.discovery_running(),
            fake_tail_mode: manager.fake_tail_mode(),
            is_connected: manager.is_connected(),
            adapter_state: manager.adapter_state(),
            device_count: manager.device_count(),
            queue_len: manager.queue().len(),
            catalog_len: manager.tracker().len(),
            current_command: manager.current_command().cloned(),
        }
    }
}

/// Commands sent to the manager actor
#[derive(Debug)]
pub enum ManagerCommand {
    /// Start scanning for devices
    StartDiscovery,

    /// Stop scanning
    StopDiscovery,

    /// Connect to a device (None: first known device)
    ConnectToDevice {
        /// Target device
        id: Option<DeviceId>,
    },

    /// Disconnect a device (None: every device)
    DisconnectDevice {
        /// Target device
        id: Option<DeviceId>,
    },

    /// Send a raw line to devices (empty: every connected device)
    SendMessage {
        /// Text to send
        text: String,
        /// Target devices
        device_ids: Vec<DeviceId>,
    },

    /// Send a raw command token to every connected device
    RunCommand {
        /// Command token
        command: String,
    },

    /// Queue a catalog command or pause for delivery
    Enqueue {
        /// Command token
        command: String,
        /// Target devices (empty: every connected device)
        device_ids: Vec<DeviceId>,
        /// Channel to send back the queue entry id (None if the token is unknown)
        response: oneshot::Sender<Option<u64>>,
    },

    /// Remove a queued entry
    CancelQueued {
        /// Queue entry id
        entry_id: u64,
        /// Channel to send back whether an entry was removed
        response: oneshot::Sender<bool>,
    },

    /// Toggle fake-tail mode
    SetFakeTailMode {
        /// Requested flag
        enabled: bool,
    },

    /// Make a command the current one
    SetCommand {
        /// Command token
        command: String,
    },

    /// Look up command metadata
    GetCommand {
        /// Command token
        command: String,
        /// Channel to send back the descriptor
        response: oneshot::Sender<Option<CommandDescriptor>>,
    },

    /// Record a running-state change
    SetRunning {
        /// Command token
        command: String,
        /// New running state
        is_running: bool,
    },

    /// Set a display name for a device
    SetDeviceName {
        /// Device to rename
        id: DeviceId,
        /// New display name
        name: String,
    },

    /// Restore saved display names
    LoadDeviceNames {
        /// Names keyed by hardware address
        names: HashMap<String, String>,
    },

    /// Drop every display name override
    ClearDeviceNames,

    /// Replace the catalog
    LoadCatalog {
        /// New catalog records
        records: Vec<CommandRecord>,
        /// Channel to send back how many records were accepted
        response: oneshot::Sender<usize>,
    },

    /// Query the observable state
    QuerySnapshot {
        /// Channel to send back the snapshot
        response: oneshot::Sender<ManagerSnapshot>,
    },

    /// Query the catalog with its running/available flags
    QueryCommands {
        /// Channel to send back the catalog
        response: oneshot::Sender<Vec<CommandInfo>>,
    },

    /// Query the known devices
    QueryDevices {
        /// Channel to send back the device list
        response: oneshot::Sender<Vec<DeviceSummary>>,
    },

    /// Query the display name overrides
    QueryDeviceNames {
        /// Channel to send back the names keyed by address
        response: oneshot::Sender<HashMap<String, String>>,
    },

    /// Shutdown the actor
    Shutdown,
}

/// Apply one command to the engine
///
/// Returns false when the actor should stop.
fn apply_command(manager: &mut ConnectionManager, cmd: ManagerCommand) -> bool {
    match cmd {
        ManagerCommand::StartDiscovery => manager.start_discovery(),
        ManagerCommand::StopDiscovery => manager.stop_discovery(),
        ManagerCommand::ConnectToDevice { id } => manager.connect_to_device(id.as_ref()),
        ManagerCommand::DisconnectDevice { id } => manager.disconnect_device(id.as_ref()),
        ManagerCommand::SendMessage { text, device_ids } => {
            manager.send_message(&text, &device_ids);
        }
        ManagerCommand::RunCommand { command } => {
            manager.run_command(&command);
        }
        ManagerCommand::Enqueue {
            command,
            device_ids,
            response,
        } => {
            let _ = response.send(manager.enqueue(&command, device_ids));
        }
        ManagerCommand::CancelQueued { entry_id, response } => {
            let _ = response.send(manager.cancel_queued(entry_id));
        }
        ManagerCommand::SetFakeTailMode { enabled } => manager.set_fake_tail_mode(enabled),
        ManagerCommand::SetCommand { command } => manager.set_command(&command),
        ManagerCommand::GetCommand { command, response } => {
            let _ = response.send(manager.get_command(&command));
        }
        ManagerCommand::SetRunning {
            command,
            is_running,
        } => manager.set_running(&command, is_running),
        ManagerCommand::SetDeviceName { id, name } => {
            manager.set_device_name(&id, &name);
        }
        ManagerCommand::LoadDeviceNames { names } => manager.load_device_names(names),
        ManagerCommand::ClearDeviceNames => manager.clear_device_names(),
        ManagerCommand::LoadCatalog { records, response } => {
            let _ = response.send(manager.load_catalog(records));
        }
        ManagerCommand::QuerySnapshot { response } => {
            let _ = response.send(ManagerSnapshot::from_manager(manager));
        }
        ManagerCommand::QueryCommands { response } => {
            let _ = response.send(manager.tracker().all_commands().to_vec());
        }
        ManagerCommand::QueryDevices { response } => {
            let registry = manager.registry();
            let devices = registry
                .iter()
                .map(|d| DeviceSummary {
                    id: d.info.id.clone(),
                    name: registry
                        .display_name(&d.info.id)
                        .unwrap_or(d.info.name.as_str())
                        .to_string(),
                    address: d.info.address.clone(),
                    state: d.state.name(),
                    is_fake: d.is_fake,
                })
                .collect();
            let _ = response.send(devices);
        }
        ManagerCommand::QueryDeviceNames { response } => {
            let _ = response.send(manager.device_names().clone());
        }
        ManagerCommand::Shutdown => {
            info!("Manager actor shutting down");
            return false;
        }
    }
    true
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run the manager actor
///
/// Processes commands and link events until a `Shutdown` command arrives or
/// every command sender is dropped.
///
/// # Arguments
///
/// * `manager` - The engine to drive
/// * `cmd_rx` - Receiver for commands sent to the actor
/// * `link_rx` - Receiver for events from the radio side
/// * `event_tx` - Sender for events emitted by the actor
pub async fn run_manager_actor(
    mut manager: ConnectionManager,
    mut cmd_rx: mpsc::Receiver<ManagerCommand>,
    mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    event_tx: mpsc::Sender<ManagerEvent>,
) {
    info!("Manager actor started");
    let mut links_open = true;
    let mut observers_open = true;

    loop {
        let deadline = manager.next_deadline();
        // Radio-side reports go first so commands see an up-to-date registry
        let keep_running = tokio::select! {
            biased;

            link = link_rx.recv(), if links_open => {
                match link {
                    Some(event) => manager.handle_link_event(event),
                    None => {
                        debug!("Link event channel closed");
                        links_open = false;
                    }
                }
                true
            }
            _ = wait_for(deadline) => {
                manager.on_deadline(Instant::now());
                true
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => apply_command(&mut manager, cmd),
                None => false,
            },
        };

        forward_events(&mut manager, &event_tx, &mut observers_open);

        if !keep_running {
            break;
        }
    }

    info!("Manager actor stopped");
}

/// Hand buffered engine events to observers without ever waiting on them
///
/// A full channel drops the event. Once the receiver is gone events are
/// only drained.
fn forward_events(
    manager: &mut ConnectionManager,
    event_tx: &mpsc::Sender<ManagerEvent>,
    observers_open: &mut bool,
) {
    for event in manager.drain_events() {
        if !*observers_open {
            continue;
        }
        match event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
                *observers_open = false;
            }
        }
    }
}

/// Cloneable handle for talking to a running manager actor
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    /// Wrap a command sender
    pub fn new(cmd_tx: mpsc::Sender<ManagerCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn send(&self, cmd: ManagerCommand) -> Result<(), ControlError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ControlError::ActorStopped)
    }

    async fn request<T>(
        &self,
        what: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await.map_err(|_| ControlError::NoReply(what))
    }

    /// Start scanning for devices
    pub async fn start_discovery(&self) -> Result<(), ControlError> {
        self.send(ManagerCommand::StartDiscovery).await
    }

    /// Stop scanning
    pub async fn stop_discovery(&self) -> Result<(), ControlError> {
        self.send(ManagerCommand::StopDiscovery).await
    }

    /// Connect to a device (None: first known device)
    pub async fn connect_to_device(&self, id: Option<DeviceId>) -> Result<(), ControlError> {
        self.send(ManagerCommand::ConnectToDevice { id }).await
    }

    /// Disconnect a device (None: every device)
    pub async fn disconnect_device(&self, id: Option<DeviceId>) -> Result<(), ControlError> {
        self.send(ManagerCommand::DisconnectDevice { id }).await
    }

    /// Send a raw line to devices
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        device_ids: Vec<DeviceId>,
    ) -> Result<(), ControlError> {
        self.send(ManagerCommand::SendMessage {
            text: text.into(),
            device_ids,
        })
        .await
    }

    /// Send a raw command token to every connected device
    pub async fn run_command(&self, command: impl Into<String>) -> Result<(), ControlError> {
        self.send(ManagerCommand::RunCommand {
            command: command.into(),
        })
        .await
    }

    /// Queue a command; returns the entry id, or None for unknown tokens
    pub async fn enqueue(
        &self,
        command: impl Into<String>,
        device_ids: Vec<DeviceId>,
    ) -> Result<Option<u64>, ControlError> {
        let command = command.into();
        self.request("enqueue", |response| ManagerCommand::Enqueue {
            command,
            device_ids,
            response,
        })
        .await
    }

    /// Remove a queued entry
    pub async fn cancel_queued(&self, entry_id: u64) -> Result<bool, ControlError> {
        self.request("cancel_queued", |response| ManagerCommand::CancelQueued {
            entry_id,
            response,
        })
        .await
    }

    /// Toggle fake-tail mode
    pub async fn set_fake_tail_mode(&self, enabled: bool) -> Result<(), ControlError> {
        self.send(ManagerCommand::SetFakeTailMode { enabled }).await
    }

    /// Make a command the current one
    pub async fn set_command(&self, command: impl Into<String>) -> Result<(), ControlError> {
        self.send(ManagerCommand::SetCommand {
            command: command.into(),
        })
        .await
    }

    /// Look up command metadata
    pub async fn get_command(
        &self,
        command: impl Into<String>,
    ) -> Result<Option<CommandDescriptor>, ControlError> {
        let command = command.into();
        self.request("get_command", |response| ManagerCommand::GetCommand {
            command,
            response,
        })
        .await
    }

    /// Record a running-state change
    pub async fn set_running(
        &self,
        command: impl Into<String>,
        is_running: bool,
    ) -> Result<(), ControlError> {
        self.send(ManagerCommand::SetRunning {
            command: command.into(),
            is_running,
        })
        .await
    }

    /// Set a display name for a device
    pub async fn set_device_name(
        &self,
        id: DeviceId,
        name: impl Into<String>,
    ) -> Result<(), ControlError> {
        self.send(ManagerCommand::SetDeviceName {
            id,
            name: name.into(),
        })
        .await
    }

    /// Restore saved display names, keyed by hardware address
    pub async fn load_device_names(
        &self,
        names: HashMap<String, String>,
    ) -> Result<(), ControlError> {
        self.send(ManagerCommand::LoadDeviceNames { names }).await
    }

    /// Query the display name overrides
    pub async fn device_names(&self) -> Result<HashMap<String, String>, ControlError> {
        self.request("device_names", |response| ManagerCommand::QueryDeviceNames {
            response,
        })
        .await
    }

    /// Drop every display name override
    pub async fn clear_device_names(&self) -> Result<(), ControlError> {
        self.send(ManagerCommand::ClearDeviceNames).await
    }

    /// Replace the catalog; returns how many records were accepted
    pub async fn load_catalog(&self, records: Vec<CommandRecord>) -> Result<usize, ControlError> {
        self.request("load_catalog", |response| ManagerCommand::LoadCatalog {
            records,
            response,
        })
        .await
    }

    /// Query the observable state
    pub async fn snapshot(&self) -> Result<ManagerSnapshot, ControlError> {
        self.request("snapshot", |response| ManagerCommand::QuerySnapshot {
            response,
        })
        .await
    }

    /// Query the catalog
    pub async fn commands(&self) -> Result<Vec<CommandInfo>, ControlError> {
        self.request("commands", |response| ManagerCommand::QueryCommands {
            response,
        })
        .await
    }

    /// Query the known devices
    pub async fn devices(&self) -> Result<Vec<DeviceSummary>, ControlError> {
        self.request("devices", |response| ManagerCommand::QueryDevices {
            response,
        })
        .await
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.send(ManagerCommand::Shutdown).await
    }
}

/// Spawn the manager actor on the current runtime
///
/// Returns the command handle, the event stream and the task handle.
pub fn spawn_manager(
    manager: ConnectionManager,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
) -> (ManagerHandle, mpsc::Receiver<ManagerEvent>, JoinHandle<()>) {
    let capacity = manager.config().channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let task = tokio::spawn(run_manager_actor(manager, cmd_rx, link_rx, event_tx));
    (ManagerHandle::new(cmd_tx), event_rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::ManagerConfig;
    use std::time::Duration;
    use tail_protocol::DeviceInfo;
    use tail_sim::{SimulatedAdapter, SimulatedDiscovery, SimulatedTransport, TransportHandle};

    fn ears() -> Vec<CommandRecord> {
        ["EARA", "EARB"]
            .iter()
            .map(|token| CommandRecord {
                name: token.to_string(),
                command: token.to_string(),
                category: "ears".to_string(),
                group: "ears".to_string(),
                duration: 500,
                minimum_cooldown: 200,
            })
            .collect()
    }

    fn start(
        devices: &[&str],
    ) -> (
        ManagerHandle,
        mpsc::Receiver<ManagerEvent>,
        JoinHandle<()>,
        TransportHandle,
    ) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let infos = devices
            .iter()
            .map(|id| DeviceInfo::new(*id, "Tail", *id))
            .collect();
        let (transport, transport_handle) = SimulatedTransport::new(link_tx.clone());
        let (discovery, _) = SimulatedDiscovery::new(infos, link_tx.clone());
        let (adapter, _) = SimulatedAdapter::new(link_tx);
        let manager =
            ConnectionManager::new(Box::new(transport), Box::new(discovery), Box::new(adapter));
        let (handle, events, task) = spawn_manager(manager, link_rx);
        (handle, events, task, transport_handle)
    }

    async fn connect_all(handle: &ManagerHandle, devices: &[&str]) {
        handle.start_discovery().await.unwrap();
        for id in devices {
            handle
                .connect_to_device(Some(DeviceId::new(*id)))
                .await
                .unwrap();
        }
        handle.snapshot().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_safe_fires_without_ack() {
        let (handle, _events, task, transport) = start(&["t1"]);
        assert_eq!(handle.load_catalog(ears()).await.unwrap(), 2);
        connect_all(&handle, &["t1"]).await;
        assert!(handle.snapshot().await.unwrap().is_connected);

        handle.enqueue("EARA", vec![]).await.unwrap();
        handle.enqueue("EARB", vec![]).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().queue_len, 1);

        tokio::time::sleep(Duration::from_millis(699)).await;
        assert_eq!(handle.snapshot().await.unwrap().queue_len, 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(handle.snapshot().await.unwrap().queue_len, 0);
        assert_eq!(
            transport.sent_to(&DeviceId::new("t1")),
            vec!["EARA".to_string(), "EARB".to_string()]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_delays_next_command() {
        let (handle, _events, task, transport) = start(&["t1"]);
        handle.load_catalog(ears()).await.unwrap();
        connect_all(&handle, &["t1"]).await;

        let descriptor = handle.get_command("pause:3").await.unwrap().unwrap();
        assert_eq!(descriptor.duration_ms, 3000);

        handle.enqueue("pause:3", vec![]).await.unwrap();
        handle.enqueue("EARA", vec![]).await.unwrap();
        assert!(transport.sent().is_empty());

        tokio::time::sleep(Duration::from_millis(3001)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(transport.sent_to(&DeviceId::new("t1")), vec!["EARA".to_string()]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_forwarded() {
        let (handle, mut events, task, _transport) = start(&[]);
        handle.set_fake_tail_mode(true).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&ManagerEvent::FakeTailModeChanged(true)));
        assert!(seen.contains(&ManagerEvent::ConnectedChanged(true)));
        assert!(seen.contains(&ManagerEvent::DeviceCountChanged(1)));
    }

    #[tokio::test]
    async fn test_unread_events_never_stall_requests() {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (transport, _) = SimulatedTransport::new(link_tx.clone());
        let (discovery, _) = SimulatedDiscovery::new(Vec::new(), link_tx.clone());
        let (adapter, _) = SimulatedAdapter::new(link_tx);
        let config = ManagerConfig {
            channel_capacity: 4,
            ..Default::default()
        };
        let manager = ConnectionManager::with_config(
            config,
            Box::new(transport),
            Box::new(discovery),
            Box::new(adapter),
        );
        let (handle, _events, task) = spawn_manager(manager, link_rx);

        let records: Vec<CommandRecord> = (0..10)
            .map(|i| CommandRecord {
                name: format!("Move {}", i),
                command: format!("MOVE{}", i),
                category: "moves".to_string(),
                group: format!("g{}", i),
                duration: 500,
                minimum_cooldown: 0,
            })
            .collect();
        assert_eq!(handle.load_catalog(records).await.unwrap(), 10);

        let snapshot = tokio::time::timeout(Duration::from_secs(2), handle.snapshot())
            .await
            .expect("actor stalled on a full event channel")
            .unwrap();
        assert_eq!(snapshot.catalog_len, 10);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (handle, _events, task, _transport) = start(&[]);
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.snapshot().await,
            Err(ControlError::ActorStopped)
        ));
    }

    #[tokio::test]
    async fn test_queries() {
        let (handle, _events, task, _transport) = start(&["t1", "t2"]);
        handle.load_catalog(ears()).await.unwrap();
        connect_all(&handle, &["t2"]).await;

        let commands = handle.commands().await.unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.is_available));

        let devices = handle.devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].state, "Connected");

        assert!(!handle.cancel_queued(42).await.unwrap());
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
