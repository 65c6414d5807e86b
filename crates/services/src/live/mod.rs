//! Live update channel: a reconnecting link that carries progress events both ways.

use async_trait::async_trait;
use tokio::sync::mpsc;

use lms_core::model::ProgressEvent;

use crate::error::TransportError;

mod channel;
mod loopback;
mod tcp;

pub use channel::{ChannelState, LiveChannel};
pub use loopback::{LoopbackHub, LoopbackTap, LoopbackTransport};
pub use tcp::TcpTransport;

/// What the channel reports to its single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// An event received from the server.
    Remote(ProgressEvent),
    /// A link was (re)established; emitted after every successful connect.
    Reconnected,
}

/// The channel's typed event stream. There is exactly one per channel.
#[derive(Debug)]
pub struct LiveEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl LiveEvents {
    /// Next event; `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

pub(crate) fn event_stream() -> (mpsc::UnboundedSender<ChannelEvent>, LiveEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, LiveEvents { rx })
}

/// Opens links to the live endpoint.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// # Errors
    ///
    /// Returns `TransportError` if the endpoint cannot be reached.
    async fn connect(&self) -> Result<LiveLink, TransportError>;
}

/// One established connection, split into its two directions.
pub struct LiveLink {
    pub sink: Box<dyn EventSink>,
    pub stream: Box<dyn EventStream>,
}

#[async_trait]
pub trait EventSink: Send {
    /// # Errors
    ///
    /// Returns `TransportError` if the link can no longer carry the event.
    async fn send(&mut self, event: &ProgressEvent) -> Result<(), TransportError>;
}

#[async_trait]
pub trait EventStream: Send {
    /// `None` means the link ended. `Some(Err(TransportError::Decode(_)))`
    /// is a single bad frame; any other error ends the link.
    async fn next(&mut self) -> Option<Result<ProgressEvent, TransportError>>;
}
