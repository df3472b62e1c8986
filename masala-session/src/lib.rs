//! Masala Session - dispenser link lifecycle and payload transfer
//!
//! This crate is the portable core of the Masala companion stack. It
//! owns the connection state machine for the appliance link, turns the
//! two raw notification streams into complete inventory readings, and
//! fragments outbound dispense jobs into acknowledged chunk writes.
//!
//! The radio itself sits behind the [`Link`] trait, implemented over
//! btleplug in `masala-ble-controller` and by scripted fakes in this
//! crate's tests. App layers talk to the [`Coordinator`] only.

mod config;
mod coordinator;
mod error;
mod link;
mod reassembler;
mod session;

pub use config::SessionConfig;
pub use coordinator::{Coordinator, CoordinatorState};
pub use error::SessionError;
pub use link::{CharacteristicKind, DeviceId, Link, LinkEvent};
pub use reassembler::Reassembler;
pub use session::{LinkState, SendReport, SessionEvent, SessionHandle, TransportSession};

// Re-export commonly used wire types
pub use masala_proto::{DispenseInstruction, SlotReading};
