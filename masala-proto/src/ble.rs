//! GATT service layout of the Masala dispenser
//!
//! The appliance advertises a single primary service with three
//! characteristics: two notify characteristics carrying the inventory
//! readout (container index and fill amount arrive as separate
//! notifications), and one write characteristic accepting the chunked
//! dispense payload.

use uuid::Uuid;

/// Masala dispenser service: 0xFFE0 on the Bluetooth base UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Container index characteristic (read/notify, 1 byte unsigned)
pub const SLOT_INDEX_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Fill amount characteristic (read/notify, 4-byte little-endian float)
pub const AMOUNT_UUID: Uuid = Uuid::from_u128(0x0000ffe2_0000_1000_8000_00805f9b34fb);

/// Dispense payload characteristic (write, chunked delimited text)
pub const DISPENSE_UUID: Uuid = Uuid::from_u128(0x0000ffe3_0000_1000_8000_00805f9b34fb);

/// Advertised name prefix of Masala appliances
pub const NAME_PREFIX: &str = "Masala";
