//! Tail Gear Simulation Library
//!
//! Hardware-free stand-ins for the radio side of tail gear control, for tests
//! and for running the console without a Bluetooth adapter:
//!
//! - **SimulatedTransport**: connects instantly, records every send, can
//!   acknowledge commands and drop links on request
//! - **SimulatedDiscovery**: finds a fixed list of devices
//! - **SimulatedAdapter**: a local adapter whose validity and power mode can
//!   be flipped
//!
//! Each collaborator reports back through the same
//! [`LinkEvent`](tail_protocol::LinkEvent) channel the real ones would use,
//! and comes with a cloneable handle for scripting it from the outside.
//!
//! # Example
//!
//! ```rust
//! use tail_protocol::{DeviceId, DeviceInfo, DeviceTransport};
//! use tail_sim::SimulatedTransport;
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let (mut transport, handle) = SimulatedTransport::new(tx);
//!
//! transport.connect(&DeviceInfo::new("t1", "Tail", "AA:BB")).unwrap();
//! transport.send(&DeviceId::new("t1"), "TAILS1").unwrap();
//!
//! assert_eq!(handle.sent_to(&DeviceId::new("t1")), vec!["TAILS1".to_string()]);
//! assert!(rx.try_recv().is_ok());
//! ```

pub mod adapter;
pub mod discovery;
pub mod transport;

pub use adapter::{AdapterHandle, SimulatedAdapter};
pub use discovery::{DiscoveryHandle, SimulatedDiscovery};
pub use transport::{SimulatedDeviceConfig, SimulatedTransport, TransportHandle};
