//! Fan-out of engine bus traffic to long-lived observers.
//!
//! Bus events are renamed to their wire names and pushed through a
//! [`broadcast`] channel; every `/events` connection holds one receiver.
//! A slow observer that falls behind skips the messages it missed; a closed
//! one simply drops its receiver.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, warn};

use crate::core::{EventBus, Subscription};
use crate::domain::{EngineEvent, EventKind};

/// Messages buffered per observer before it starts lagging
const CHANNEL_CAPACITY: usize = 256;

/// One server-push message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeMessage {
    pub event: String,
    pub data: Value,
}

impl BridgeMessage {
    fn to_sse(&self) -> Event {
        match Event::default().event(&self.event).json_data(&self.data) {
            Ok(event) => event,
            Err(e) => {
                error!(event = %self.event, error = %e, "Failed to encode bridge message");
                Event::default().comment(" encoding error")
            }
        }
    }
}

/// Wire name for a bus event kind; `None` for kinds not forwarded
pub fn wire_name(kind: EventKind) -> Option<&'static str> {
    match kind {
        EventKind::Log => Some("engine-log"),
        EventKind::State => Some("engine-state"),
        EventKind::Tick => Some("watcher-tick"),
        EventKind::OutputReady => Some("builder-output"),
        EventKind::Zipped => Some("packer-zipped"),
        EventKind::Submitted => Some("packer-submitted"),
        EventKind::Error => Some("engine-error"),
        EventKind::PromptReady | EventKind::PromptWaiting => None,
    }
}

/// Broadcast hub for server-push observers
#[derive(Clone)]
pub struct Bridge {
    tx: broadcast::Sender<BridgeMessage>,
    closed: watch::Sender<bool>,
    heartbeat: Duration,
}

impl Bridge {
    pub fn new(heartbeat: Duration) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            closed,
            heartbeat,
        }
    }

    /// Forward every bus event that has a wire name
    pub fn attach(&self, bus: &EventBus) -> Vec<Subscription> {
        [
            EventKind::Log,
            EventKind::State,
            EventKind::Tick,
            EventKind::OutputReady,
            EventKind::Zipped,
            EventKind::Submitted,
            EventKind::Error,
        ]
        .into_iter()
        .map(|kind| {
            let bridge = self.clone();
            bus.subscribe(kind, move |event| bridge.forward(event))
        })
        .collect()
    }

    fn forward(&self, event: &EngineEvent) {
        let Some(name) = wire_name(event.kind()) else {
            return;
        };
        match event.payload() {
            Ok(data) => self.publish(BridgeMessage {
                event: name.to_string(),
                data,
            }),
            Err(e) => error!(event = name, error = %e, "Failed to serialize bus event"),
        }
    }

    /// Send to every connected observer; a no-op when nobody is listening
    pub fn publish(&self, message: BridgeMessage) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeMessage> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// End every open stream
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Server-push response for one observer.
    ///
    /// Starts with a `connected` comment and sends a `ping` comment every
    /// heartbeat interval while idle.
    pub fn sse(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let mut closed = self.closed.subscribe();
        let shutdown = async move {
            let _ = closed.wait_for(|c| *c).await;
        };

        let updates = BroadcastStream::new(self.tx.subscribe()).filter_map(|msg| async move {
            match msg {
                Ok(message) => Some(Ok(message.to_sse())),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Observer lagging, messages dropped");
                    None
                }
            }
        });

        let stream = stream::once(async { Ok(Event::default().comment(" connected")) })
            .chain(updates)
            .take_until(shutdown);

        Sse::new(stream).keep_alive(KeepAlive::new().interval(self.heartbeat).text(" ping"))
    }
}
