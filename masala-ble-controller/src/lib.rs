//! Masala BLE Controller
//!
//! btleplug-backed implementation of the session layer's `Link` trait:
//! the central-role radio client that finds and talks to a Masala
//! dispenser.
//!
//! # Example
//!
//! ```ignore
//! use masala_ble_controller::BleLink;
//! use masala_session::{Coordinator, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = BleLink::create().await?;
//!     let coordinator = Coordinator::new(link, SessionConfig::default());
//!     coordinator.on_reading(|reading| {
//!         println!("slot {}: {}", reading.slot, reading.amount);
//!     });
//!     coordinator.start().await?;
//!     Ok(())
//! }
//! ```

pub mod ble;

pub use ble::BleLink;
