use std::io;
use std::time::Duration;

use crate::link::CharacteristicKind;
use crate::session::LinkState;

/// Errors surfaced by the session layer.
///
/// Transport-library failures cross the [`Link`](crate::Link) boundary
/// as strings so this crate stays independent of any particular BLE
/// backend.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    #[error("no dispenser discovered within {0:?}")]
    ScanTimeout(Duration),

    #[error("link not ready (state {0:?})")]
    NotReady(LinkState),

    #[error("characteristic not found: {0:?}")]
    MissingCharacteristic(CharacteristicKind),

    #[error("transport: {0}")]
    Transport(String),

    #[error("write failed after {sent} of {total} chunks: {source}")]
    Write {
        sent: usize,
        total: usize,
        #[source]
        source: Box<SessionError>,
    },

    #[error("malformed payload: {0}")]
    Decode(#[from] io::Error),

    #[error("session task stopped")]
    Closed,
}
