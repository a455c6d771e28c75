//! Tail Gear Protocol Library
//!
//! Shared vocabulary for controlling paired wearable actuator gear
//! (tails, ears) over BLE:
//!
//! - **Commands**: catalog entries with timing constraints and
//!   mutual-exclusion groups, plus the synthetic `pause:<seconds>` token
//! - **Catalog records**: the plain form command definitions arrive in
//! - **Devices**: identifiers and discovery information
//! - **Acknowledgements**: `BEGIN`/`END` lines devices report
//! - **Link contracts**: the transport, discovery and adapter traits the
//!   control core drives, and the events they report back
//!
//! # Example
//!
//! ```rust
//! use tail_protocol::{CommandDescriptor, CommandInfo, DeviceAck, parse_pause};
//!
//! let wag = CommandInfo::new("Slow wag", "TAILS1", "calm", "tail", 11_000, 500);
//! assert_eq!(wag.fail_safe_window().as_millis(), 11_500);
//!
//! assert_eq!(parse_pause("pause:3"), Ok(Some(3)));
//! assert_eq!(CommandDescriptor::pause(3).duration_ms, 3000);
//!
//! let ack = DeviceAck::parse("TAILS1 END").unwrap();
//! assert!(!ack.is_running());
//! ```

pub mod ack;
pub mod catalog;
pub mod command;
pub mod device;
pub mod error;
pub mod link;

pub use ack::DeviceAck;
pub use catalog::{partition_records, CommandRecord};
pub use command::{
    parse_pause, CommandDescriptor, CommandInfo, CommandKey, HOME_COMMAND, PAUSE_NAME,
    PAUSE_PREFIX,
};
pub use device::{ConnectionState, DeviceId, DeviceInfo};
pub use error::{ParseError, ProtocolError, TransportError};
pub use link::{
    AdapterEvent, DeviceTransport, DiscoveryAgent, DiscoveryEvent, HostMode, LinkEvent,
    LocalAdapter, TransportEvent,
};
