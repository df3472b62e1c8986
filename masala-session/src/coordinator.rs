//! Public face of the stack: what the app layers talk to.
//!
//! The coordinator spawns the session task, mirrors its coarse state
//! in a watch channel, and forwards each completed reading to the
//! registered sink. When the transport is unavailable it degrades to
//! offline mode: the state stays `Unavailable` and `send` fails, and
//! the caller may substitute a default data set.

use std::sync::{Arc, Mutex};

use masala_proto::{DispenseInstruction, SlotReading};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::link::Link;
use crate::session::{SendReport, SessionEvent, SessionHandle, TransportSession};

/// Coarse session state mirrored for UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Offline: radio off, dispenser unreachable, or link dropped.
    Unavailable,
    Connecting,
    Ready,
}

type ReadingSink = Box<dyn Fn(SlotReading) + Send + Sync>;

pub struct Coordinator {
    handle: SessionHandle,
    state: watch::Receiver<CoordinatorState>,
    sink: Arc<Mutex<Option<ReadingSink>>>,
}

impl Coordinator {
    /// Wrap a link in a running session. Spawns the session task and
    /// the event forwarder onto the current runtime.
    pub fn new<L: Link>(link: L, config: SessionConfig) -> Self {
        let (handle, events, session) = TransportSession::new(link, config);
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Unavailable);
        let sink: Arc<Mutex<Option<ReadingSink>>> = Arc::new(Mutex::new(None));

        tokio::spawn(session.run());
        tokio::spawn(forward_events(events, state_tx, sink.clone()));

        Self {
            handle,
            state: state_rx,
            sink,
        }
    }

    /// Bring the link up. Progress is reported through
    /// [`Coordinator::watch_state`]; if the radio is off the state
    /// settles on `Unavailable` without a scan ever starting.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.handle.start().await
    }

    /// Register the sink invoked once per completed reading. The last
    /// registration wins.
    pub fn on_reading(&self, sink: impl Fn(SlotReading) + Send + Sync + 'static) {
        *self.sink.lock().unwrap() = Some(Box::new(sink));
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    /// Transfer a dispense job. Fails with
    /// [`SessionError::NotReady`] unless the link is up; a write
    /// failure reports how many chunks made it out before the stop.
    pub async fn send(
        &self,
        instructions: &[DispenseInstruction],
    ) -> Result<SendReport, SessionError> {
        self.handle.send(instructions.to_vec()).await
    }
}

async fn forward_events(
    mut events: mpsc::Receiver<SessionEvent>,
    state: watch::Sender<CoordinatorState>,
    sink: Arc<Mutex<Option<ReadingSink>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Unavailable => {
                info!("transport unavailable, offline mode");
                let _ = state.send(CoordinatorState::Unavailable);
            }
            SessionEvent::Connecting => {
                let _ = state.send(CoordinatorState::Connecting);
            }
            SessionEvent::Ready => {
                let _ = state.send(CoordinatorState::Ready);
            }
            SessionEvent::Disconnected => {
                let _ = state.send(CoordinatorState::Unavailable);
            }
            SessionEvent::Reading(reading) => {
                if let Some(sink) = sink.lock().unwrap().as_ref() {
                    sink(reading);
                }
            }
            SessionEvent::TransferComplete => {}
        }
    }
}
