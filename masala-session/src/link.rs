//! The radio abstraction the session runs against.
//!
//! Operations are methods whose returned future resolves when the
//! operation completes; spontaneous events (a device showing up in a
//! scan, a notification, a dropped connection) arrive on the event
//! queue handed out by [`Link::take_events`]. Bursts of notifications
//! are buffered there in arrival order, so the reassembler always sees
//! them in the order the radio delivered them.

use std::future::Future;

use tokio::sync::mpsc;

use crate::error::SessionError;

/// Platform identifier of a discovered peripheral (its address string).
pub type DeviceId = String;

/// The three characteristics of the dispenser service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    /// Container index, 1 byte unsigned, notify.
    SlotIndex,
    /// Fill amount, 4-byte little-endian float, notify.
    Amount,
    /// Outbound dispense payload, chunked write.
    Dispense,
}

/// Spontaneous transport events.
#[derive(Debug)]
pub enum LinkEvent {
    DeviceDiscovered {
        id: DeviceId,
        name: Option<String>,
    },
    Notification {
        characteristic: CharacteristicKind,
        value: Vec<u8>,
    },
    Disconnected,
}

/// A central-role radio link to one dispenser.
///
/// Implemented by the btleplug backend in `masala-ble-controller` and
/// by scripted fakes in tests. All futures must be `Send` so a session
/// can be spawned onto the runtime regardless of the backend.
pub trait Link: Send + 'static {
    /// Whether the radio is powered and usable right now.
    fn is_available(&mut self) -> impl Future<Output = bool> + Send;

    /// Begin scanning for the dispenser service. Matches are reported
    /// as [`LinkEvent::DeviceDiscovered`].
    fn start_scan(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn stop_scan(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn connect(&mut self, id: &DeviceId) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn discover_services(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Discover the dispenser characteristics; returns the kinds that
    /// were actually found on the device.
    fn discover_characteristics(
        &mut self,
    ) -> impl Future<Output = Result<Vec<CharacteristicKind>, SessionError>> + Send;

    /// Subscribe to notifications, delivered as
    /// [`LinkEvent::Notification`].
    fn subscribe(
        &mut self,
        kind: CharacteristicKind,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn unsubscribe(
        &mut self,
        kind: CharacteristicKind,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Write one chunk to the dispense characteristic. Resolves once
    /// the write is acknowledged (or, in fire-and-forget mode, once it
    /// has been issued).
    fn write_chunk(&mut self, chunk: &[u8])
    -> impl Future<Output = Result<(), SessionError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Take the event queue. Called once, before the session starts.
    fn take_events(&mut self) -> mpsc::Receiver<LinkEvent>;
}
