//! Tail Gear Control Library
//!
//! Command scheduling and connection management for paired tail/ear gear:
//!
//! - **CommandTracker**: the command catalog with running and availability
//!   state, group exclusivity and per-command fail-safe deadlines
//! - **CommandQueue**: FIFO-per-device dispatch that only sends a command
//!   when its targets are connected and its group is free
//! - **DeviceRegistry**: known devices, their link state and display names
//! - **ConnectionManager**: the synchronous engine tying the above to the
//!   transport, discovery agent and local adapter
//! - **Actor**: an async task that owns the engine, with a cloneable handle
//!
//! # Example
//!
//! ```rust
//! use tail_control::CommandTracker;
//! use tail_protocol::CommandInfo;
//!
//! let mut tracker = CommandTracker::new();
//! tracker.add_command(CommandInfo::new("Ears A", "EARA", "ears", "ears", 500, 200));
//! tracker.add_command(CommandInfo::new("Ears B", "EARB", "ears", "ears", 500, 200));
//!
//! tracker.set_running("EARA", true);
//! let b = tracker.get_command("EARB").unwrap().key();
//! assert!(!tracker.is_available(&b));
//! ```

pub mod actor;
pub mod error;
pub mod events;
pub mod manager;
pub mod queue;
pub mod registry;
pub mod state;
pub mod tracker;

pub use actor::{
    run_manager_actor, spawn_manager, DeviceSummary, ManagerCommand, ManagerHandle,
    ManagerSnapshot,
};
pub use error::ControlError;
pub use events::ManagerEvent;
pub use manager::{ConnectionManager, ManagerConfig};
pub use queue::{CommandQueue, DispatchLink, DispatchOutcome, QueueEntry};
pub use registry::{Device, DeviceRegistry};
pub use state::AdapterState;
pub use tracker::{CommandTracker, FailSafeScheduler, TrackerEvent};
