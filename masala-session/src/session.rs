//! The transport session: one link to one dispenser.
//!
//! The session is an actor driven by two queues: commands from the
//! coordinator and events from the [`Link`]. It owns the connection
//! state machine, feeds notifications through the [`Reassembler`], and
//! writes dispense payloads chunk by chunk, each write serialized
//! behind the acknowledgment of the previous one.

use data_encoding::HEXLOWER;
use masala_proto::{DispenseInstruction, SlotReading};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::link::{CharacteristicKind, DeviceId, Link, LinkEvent};
use crate::reassembler::Reassembler;

const COMMAND_QUEUE_DEPTH: usize = 16;
const EVENT_QUEUE_DEPTH: usize = 16;

/// Connection lifecycle. `Ready` is the only state in which the
/// dispense characteristic accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnected,
}

/// What the session reports upward to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The radio is off or the dispenser could not be reached; the
    /// caller may fall back to a default data set.
    Unavailable,
    Connecting,
    Ready,
    Reading(SlotReading),
    /// One full inventory readout has arrived; notifications are
    /// unsubscribed, the connection stays up.
    TransferComplete,
    /// An established link dropped. State is reset; start again to
    /// reconnect.
    Disconnected,
}

/// Outcome of a successful dispense transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub chunks_sent: usize,
    pub chunks_total: usize,
}

pub(crate) enum SessionCommand {
    Start,
    Send {
        instructions: Vec<DispenseInstruction>,
        reply: oneshot::Sender<Result<SendReport, SessionError>>,
    },
}

/// Cheap handle for talking to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Ask the session to bring the link up.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::Start)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Transfer a dispense job; resolves once every chunk is written
    /// or the first write fails.
    pub async fn send(
        &self,
        instructions: Vec<DispenseInstruction>,
    ) -> Result<SendReport, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Send { instructions, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }
}

pub struct TransportSession<L: Link> {
    link: L,
    config: SessionConfig,
    state: LinkState,
    reassembler: Reassembler,
    commands: mpsc::Receiver<SessionCommand>,
    events_out: mpsc::Sender<SessionEvent>,
    transfer_complete_sent: bool,
}

impl<L: Link> TransportSession<L> {
    /// Build a session around a link. Returns the command handle, the
    /// stream of session events, and the session itself, which the
    /// caller spawns via [`TransportSession::run`].
    pub fn new(
        link: L,
        config: SessionConfig,
    ) -> (SessionHandle, mpsc::Receiver<SessionEvent>, Self) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let reassembler = Reassembler::new(config.expected_readings, config.pending_slot_timeout);
        let session = Self {
            link,
            config,
            state: LinkState::Idle,
            reassembler,
            commands: command_rx,
            events_out: event_tx,
            transfer_complete_sent: false,
        };
        (SessionHandle { commands: command_tx }, event_rx, session)
    }

    /// Drive the session until every handle and the link are gone.
    pub async fn run(mut self) {
        let mut link_events = self.link.take_events();
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None => break,
                    Some(SessionCommand::Start) => self.handle_start(&mut link_events).await,
                    Some(SessionCommand::Send { instructions, reply }) => {
                        let result = self.handle_send(&instructions).await;
                        let _ = reply.send(result);
                    }
                },
                event = link_events.recv() => match event {
                    None => break,
                    Some(event) => self.handle_link_event(event).await,
                },
            }
        }
        let _ = self.link.disconnect().await;
    }

    async fn handle_start(&mut self, link_events: &mut mpsc::Receiver<LinkEvent>) {
        if self.state == LinkState::Ready {
            debug!("start requested but link is already up");
            return;
        }
        if !self.link.is_available().await {
            warn!("bluetooth adapter unavailable, falling back to offline mode");
            self.set_state(LinkState::Disconnected);
            self.emit(SessionEvent::Unavailable).await;
            return;
        }

        self.emit(SessionEvent::Connecting).await;
        let mut backoff = self.config.retry_backoff;
        for attempt in 1..=self.config.connect_attempts {
            match self.establish(link_events).await {
                Ok(()) => {
                    self.set_state(LinkState::Ready);
                    info!("dispenser link ready");
                    self.emit(SessionEvent::Ready).await;
                    return;
                }
                Err(err) => {
                    warn!(attempt, %err, "connection attempt failed");
                    let _ = self.link.disconnect().await;
                    self.set_state(LinkState::Idle);
                    if attempt < self.config.connect_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }
        self.set_state(LinkState::Disconnected);
        self.emit(SessionEvent::Unavailable).await;
    }

    /// One connection attempt: scan, connect, discover, subscribe.
    async fn establish(
        &mut self,
        link_events: &mut mpsc::Receiver<LinkEvent>,
    ) -> Result<(), SessionError> {
        self.reassembler.reset();
        self.transfer_complete_sent = false;

        self.set_state(LinkState::Scanning);
        self.link.start_scan().await?;
        let device = match tokio::time::timeout(
            self.config.scan_timeout,
            Self::first_discovered(link_events),
        )
        .await
        {
            Ok(Some(device)) => device,
            Ok(None) => return Err(SessionError::Closed),
            Err(_) => {
                let _ = self.link.stop_scan().await;
                return Err(SessionError::ScanTimeout(self.config.scan_timeout));
            }
        };
        self.link.stop_scan().await?;

        self.set_state(LinkState::Connecting);
        self.link.connect(&device).await?;

        self.set_state(LinkState::DiscoveringServices);
        self.link.discover_services().await?;

        self.set_state(LinkState::DiscoveringCharacteristics);
        let found = self.link.discover_characteristics().await?;
        for kind in [
            CharacteristicKind::SlotIndex,
            CharacteristicKind::Amount,
            CharacteristicKind::Dispense,
        ] {
            if !found.contains(&kind) {
                return Err(SessionError::MissingCharacteristic(kind));
            }
        }

        self.link.subscribe(CharacteristicKind::SlotIndex).await?;
        self.link.subscribe(CharacteristicKind::Amount).await?;
        Ok(())
    }

    /// First responder wins; there is no ranking among dispensers.
    async fn first_discovered(events: &mut mpsc::Receiver<LinkEvent>) -> Option<DeviceId> {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::DeviceDiscovered { id, name } => {
                    debug!(device = %id, ?name, "dispenser discovered");
                    return Some(id);
                }
                other => trace!(?other, "ignoring link event while scanning"),
            }
        }
        None
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Notification { characteristic, value } => {
                self.handle_notification(characteristic, &value).await;
            }
            LinkEvent::Disconnected => {
                if self.state == LinkState::Ready {
                    info!("dispenser disconnected");
                    self.reassembler.reset();
                    self.set_state(LinkState::Idle);
                    self.emit(SessionEvent::Disconnected).await;
                } else {
                    trace!(state = ?self.state, "disconnect event outside an established link");
                }
            }
            LinkEvent::DeviceDiscovered { id, .. } => {
                trace!(device = %id, "late scan result, ignoring");
            }
        }
    }

    async fn handle_notification(&mut self, characteristic: CharacteristicKind, value: &[u8]) {
        if self.state != LinkState::Ready {
            trace!(?characteristic, "notification outside ready state, dropping");
            return;
        }
        match characteristic {
            CharacteristicKind::SlotIndex => {
                if let Err(err) = self.reassembler.on_slot_index(value) {
                    warn!(%err, "dropping malformed slot index notification");
                }
            }
            CharacteristicKind::Amount => match self.reassembler.on_amount(value) {
                Ok(Some(reading)) => {
                    self.emit(SessionEvent::Reading(reading)).await;
                    if self.reassembler.is_complete() && !self.transfer_complete_sent {
                        self.transfer_complete_sent = true;
                        self.finish_readout().await;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "dropping malformed amount notification"),
            },
            CharacteristicKind::Dispense => {
                warn!("unexpected notification on the dispense characteristic");
            }
        }
    }

    /// A full readout is in; stop the notification stream so the
    /// appliance quits re-sending levels. The connection stays up for
    /// outbound jobs.
    async fn finish_readout(&mut self) {
        info!(readings = self.reassembler.received(), "inventory readout complete");
        for kind in [CharacteristicKind::SlotIndex, CharacteristicKind::Amount] {
            if let Err(err) = self.link.unsubscribe(kind).await {
                warn!(?kind, %err, "failed to unsubscribe");
            }
        }
        self.emit(SessionEvent::TransferComplete).await;
    }

    async fn handle_send(
        &mut self,
        instructions: &[DispenseInstruction],
    ) -> Result<SendReport, SessionError> {
        if self.state != LinkState::Ready {
            return Err(SessionError::NotReady(self.state));
        }

        let payload = masala_proto::encode_payload(instructions);
        let total = payload.len().div_ceil(self.config.max_chunk_size);
        let mut sent = 0;
        for chunk in masala_proto::chunks_of(&payload, self.config.max_chunk_size) {
            trace!(len = chunk.len(), data = %HEXLOWER.encode(chunk), "writing chunk");
            if let Err(err) = self.link.write_chunk(chunk).await {
                // remaining chunks are not attempted; the caller decides
                // whether to retry the remainder or the whole payload
                warn!(sent, total, %err, "chunk write failed, aborting transfer");
                return Err(SessionError::Write {
                    sent,
                    total,
                    source: Box::new(err),
                });
            }
            sent += 1;
        }
        debug!(chunks = sent, bytes = payload.len(), "dispense payload written");
        Ok(SendReport {
            chunks_sent: sent,
            chunks_total: total,
        })
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "link state");
            self.state = state;
        }
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.events_out.send(event).await.is_err() {
            debug!("session event receiver dropped");
        }
    }
}
