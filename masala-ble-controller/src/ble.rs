//! BLE central client for the Masala dispenser
//!
//! Implements [`Link`] over btleplug. Scanning is a poll loop over the
//! adapter's peripheral list, matching on the advertised dispenser
//! service or the `Masala` name prefix; notifications are pumped from
//! the peripheral's stream into the link event queue; chunk writes go
//! out with-response by default so each one is acknowledged before the
//! session issues the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use data_encoding::HEXLOWER;
use futures::StreamExt;
use masala_proto::ble;
use masala_session::{CharacteristicKind, DeviceId, Link, LinkEvent, SessionError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const EVENT_QUEUE_DEPTH: usize = 64;
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(300);

fn transport(err: btleplug::Error) -> SessionError {
    SessionError::Transport(err.to_string())
}

/// btleplug-backed [`Link`] to one dispenser.
pub struct BleLink {
    adapter: Adapter,
    device_filter: Option<String>,
    write_with_response: bool,
    device: Option<Peripheral>,
    characteristics: HashMap<CharacteristicKind, Characteristic>,
    connected_id: Arc<Mutex<Option<PeripheralId>>>,
    events_tx: mpsc::Sender<LinkEvent>,
    events_rx: Option<mpsc::Receiver<LinkEvent>>,
    scan_task: Option<JoinHandle<()>>,
    notify_task: Option<JoinHandle<()>>,
}

impl BleLink {
    /// Acquire the default Bluetooth adapter and start watching its
    /// central events for peripheral disconnects.
    pub async fn create() -> Result<Self, SessionError> {
        let manager = Manager::new().await.map_err(transport)?;
        let adapters = manager.adapters().await.map_err(transport)?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SessionError::AdapterUnavailable)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let connected_id: Arc<Mutex<Option<PeripheralId>>> = Arc::new(Mutex::new(None));

        let mut central_events = adapter.events().await.map_err(transport)?;
        {
            let events_tx = events_tx.clone();
            let connected_id = connected_id.clone();
            tokio::spawn(async move {
                while let Some(event) = central_events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        let ours = connected_id.lock().unwrap().as_ref() == Some(&id);
                        if ours {
                            debug!("dispenser connection dropped");
                            if events_tx.send(LinkEvent::Disconnected).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }

        Ok(Self {
            adapter,
            device_filter: None,
            write_with_response: true,
            device: None,
            characteristics: HashMap::new(),
            connected_id,
            events_tx,
            events_rx: Some(events_rx),
            scan_task: None,
            notify_task: None,
        })
    }

    /// Only report devices whose name or address contains `filter`.
    pub fn with_device_filter(mut self, filter: impl Into<String>) -> Self {
        self.device_filter = Some(filter.into());
        self
    }

    /// Toggle acknowledged chunk writes. `false` is the legacy
    /// fire-and-forget mode.
    pub fn write_with_response(mut self, with_response: bool) -> Self {
        self.write_with_response = with_response;
        self
    }

    fn device(&self) -> Result<&Peripheral, SessionError> {
        self.device
            .as_ref()
            .ok_or_else(|| SessionError::Transport("no connected dispenser".into()))
    }

    fn characteristic(&self, kind: CharacteristicKind) -> Result<&Characteristic, SessionError> {
        self.characteristics
            .get(&kind)
            .ok_or(SessionError::MissingCharacteristic(kind))
    }
}

fn kind_of(uuid: Uuid) -> Option<CharacteristicKind> {
    if uuid == ble::SLOT_INDEX_UUID {
        Some(CharacteristicKind::SlotIndex)
    } else if uuid == ble::AMOUNT_UUID {
        Some(CharacteristicKind::Amount)
    } else if uuid == ble::DISPENSE_UUID {
        Some(CharacteristicKind::Dispense)
    } else {
        None
    }
}

impl Link for BleLink {
    async fn is_available(&mut self) -> bool {
        self.adapter.adapter_info().await.is_ok()
    }

    async fn start_scan(&mut self) -> Result<(), SessionError> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![ble::SERVICE_UUID],
            })
            .await
            .map_err(transport)?;
        info!("scanning for dispensers");

        // poll the peripheral list until something matches; the session
        // picks the first match and stops the scan
        let adapter = self.adapter.clone();
        let events_tx = self.events_tx.clone();
        let filter = self.device_filter.clone();
        self.scan_task = Some(tokio::spawn(async move {
            loop {
                let peripherals = match adapter.peripherals().await {
                    Ok(peripherals) => peripherals,
                    Err(err) => {
                        warn!(%err, "scan poll failed");
                        return;
                    }
                };
                for peripheral in peripherals {
                    let Ok(Some(props)) = peripheral.properties().await else {
                        continue;
                    };
                    let name = props.local_name;
                    let is_dispenser = props.services.contains(&ble::SERVICE_UUID)
                        || name
                            .as_deref()
                            .is_some_and(|n| n.starts_with(ble::NAME_PREFIX));
                    if !is_dispenser {
                        continue;
                    }
                    let id = peripheral.address().to_string();
                    if let Some(filter) = &filter {
                        let matches = id.contains(filter.as_str())
                            || name.as_deref().is_some_and(|n| n.contains(filter.as_str()));
                        if !matches {
                            continue;
                        }
                    }
                    if events_tx
                        .send(LinkEvent::DeviceDiscovered { id, name })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        }));
        Ok(())
    }

    async fn stop_scan(&mut self) -> Result<(), SessionError> {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        self.adapter.stop_scan().await.map_err(transport)
    }

    async fn connect(&mut self, id: &DeviceId) -> Result<(), SessionError> {
        let peripherals = self.adapter.peripherals().await.map_err(transport)?;
        let peripheral = peripherals
            .into_iter()
            .find(|peripheral| peripheral.address().to_string() == *id)
            .ok_or_else(|| {
                SessionError::Transport(format!("dispenser {id} disappeared before connect"))
            })?;

        peripheral.connect().await.map_err(transport)?;
        info!(device = %id, "connected");
        *self.connected_id.lock().unwrap() = Some(peripheral.id());
        self.device = Some(peripheral);
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<(), SessionError> {
        self.device()?.discover_services().await.map_err(transport)
    }

    async fn discover_characteristics(&mut self) -> Result<Vec<CharacteristicKind>, SessionError> {
        let characteristics = self.device()?.characteristics();
        self.characteristics.clear();
        let mut found = Vec::new();
        for characteristic in characteristics {
            let Some(kind) = kind_of(characteristic.uuid) else {
                continue;
            };
            debug!(?kind, uuid = %characteristic.uuid, "characteristic mapped");
            self.characteristics.insert(kind, characteristic);
            found.push(kind);
        }
        Ok(found)
    }

    async fn subscribe(&mut self, kind: CharacteristicKind) -> Result<(), SessionError> {
        let characteristic = self.characteristic(kind)?.clone();
        let device = self.device()?.clone();
        device.subscribe(&characteristic).await.map_err(transport)?;
        debug!(?kind, "subscribed");

        if self.notify_task.is_none() {
            let mut notifications = device.notifications().await.map_err(transport)?;
            let events_tx = self.events_tx.clone();
            self.notify_task = Some(tokio::spawn(async move {
                while let Some(notification) = notifications.next().await {
                    let Some(kind) = kind_of(notification.uuid) else {
                        trace!(uuid = %notification.uuid, "notification on unmapped characteristic");
                        continue;
                    };
                    trace!(
                        ?kind,
                        data = %HEXLOWER.encode(&notification.value),
                        "notification"
                    );
                    if events_tx
                        .send(LinkEvent::Notification {
                            characteristic: kind,
                            value: notification.value,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, kind: CharacteristicKind) -> Result<(), SessionError> {
        let characteristic = self.characteristic(kind)?.clone();
        self.device()?
            .unsubscribe(&characteristic)
            .await
            .map_err(transport)?;
        debug!(?kind, "unsubscribed");
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        let characteristic = self.characteristic(CharacteristicKind::Dispense)?;
        let write_type = if self.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.device()?
            .write(characteristic, chunk, write_type)
            .await
            .map_err(transport)
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        *self.connected_id.lock().unwrap() = None;
        self.characteristics.clear();
        if let Some(device) = self.device.take() {
            if let Err(err) = device.disconnect().await {
                debug!(%err, "disconnect failed");
            }
        }
        Ok(())
    }

    fn take_events(&mut self) -> mpsc::Receiver<LinkEvent> {
        self.events_rx.take().expect("link events taken once")
    }
}
