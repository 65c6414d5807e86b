//! In-process live endpoint: every link joins one broadcast bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::warn;

use lms_core::model::ProgressEvent;

use crate::error::TransportError;
use crate::live::{EventSink, EventStream, LiveLink, LiveTransport};

const BUS_CAPACITY: usize = 256;

/// Frames published by the hub itself carry this origin.
const HUB_ORIGIN: u64 = 0;

#[derive(Debug, Clone)]
struct Frame {
    from: u64,
    event: ProgressEvent,
}

/// Fan-out hub standing in for a live server. Clones share the bus.
///
/// An event sent by one link reaches every other open link and every tap,
/// but not the link that sent it.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    bus: broadcast::Sender<Frame>,
    online: watch::Sender<bool>,
    next_link: AtomicU64,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                bus,
                online: watch::Sender::new(true),
                next_link: AtomicU64::new(HUB_ORIGIN + 1),
            }),
        }
    }

    #[must_use]
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport { hub: self.clone() }
    }

    /// Push an event from the hub to every open link.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.inner.bus.send(Frame {
            from: HUB_ORIGIN,
            event,
        });
    }

    /// Observe everything that crosses the bus from now on.
    #[must_use]
    pub fn tap(&self) -> LoopbackTap {
        LoopbackTap {
            rx: self.inner.bus.subscribe(),
        }
    }

    /// Going offline severs open links and refuses new ones.
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_replace(online);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }
}

/// Connects to a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
}

#[async_trait]
impl LiveTransport for LoopbackTransport {
    async fn connect(&self) -> Result<LiveLink, TransportError> {
        let inner = &self.hub.inner;
        if !*inner.online.borrow() {
            return Err(TransportError::Closed);
        }
        let id = inner.next_link.fetch_add(1, Ordering::Relaxed);
        Ok(LiveLink {
            sink: Box::new(LoopbackSink {
                id,
                bus: inner.bus.clone(),
                online: inner.online.subscribe(),
            }),
            stream: Box::new(LoopbackStream {
                id,
                bus: inner.bus.subscribe(),
                online: inner.online.subscribe(),
            }),
        })
    }
}

struct LoopbackSink {
    id: u64,
    bus: broadcast::Sender<Frame>,
    online: watch::Receiver<bool>,
}

#[async_trait]
impl EventSink for LoopbackSink {
    async fn send(&mut self, event: &ProgressEvent) -> Result<(), TransportError> {
        if !*self.online.borrow() {
            return Err(TransportError::Closed);
        }
        let _ = self.bus.send(Frame {
            from: self.id,
            event: event.clone(),
        });
        Ok(())
    }
}

struct LoopbackStream {
    id: u64,
    bus: broadcast::Receiver<Frame>,
    online: watch::Receiver<bool>,
}

#[async_trait]
impl EventStream for LoopbackStream {
    async fn next(&mut self) -> Option<Result<ProgressEvent, TransportError>> {
        loop {
            if !*self.online.borrow_and_update() {
                return None;
            }
            tokio::select! {
                changed = self.online.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                frame = self.bus.recv() => match frame {
                    Ok(frame) if frame.from == self.id => {}
                    Ok(frame) => return Some(Ok(frame.event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "loopback link lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }
}

/// Receives every frame on the hub's bus, whatever its origin.
#[derive(Debug)]
pub struct LoopbackTap {
    rx: broadcast::Receiver<Frame>,
}

impl LoopbackTap {
    /// `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame.event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
