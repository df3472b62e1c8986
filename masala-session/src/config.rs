use std::time::Duration;

/// Tunables of a dispenser session.
///
/// The defaults match the shipping appliance: ten containers, 20-byte
/// writes, acknowledged chunk writes. `write_with_response = false`
/// restores the legacy fire-and-forget write mode and exists for
/// firmware compatibility testing only.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inventory readings that make up one complete readout.
    pub expected_readings: usize,
    /// Upper bound on a single outbound write.
    pub max_chunk_size: usize,
    /// How long to wait for an advertising dispenser before giving up
    /// on a connection attempt.
    pub scan_timeout: Duration,
    /// Connection attempts before falling back to offline mode.
    pub connect_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub retry_backoff: Duration,
    /// A received container index older than this is considered stale
    /// and no longer pairs with an incoming amount.
    pub pending_slot_timeout: Duration,
    /// Wait for the peripheral's acknowledgment of each chunk write.
    pub write_with_response: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_readings: masala_proto::CONTAINER_COUNT,
            max_chunk_size: masala_proto::MAX_CHUNK_SIZE,
            scan_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            pending_slot_timeout: Duration::from_secs(2),
            write_with_response: true,
        }
    }
}
