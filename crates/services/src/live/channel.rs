use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use lms_core::model::ProgressEvent;

use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::live::{ChannelEvent, EventSink, LiveEvents, LiveLink, LiveTransport, event_stream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; only reached through [`LiveChannel::shutdown`] or dropping the channel.
    Closed,
}

/// Handle to the background task that owns the live link.
///
/// Announcements are queued while the link is down and flushed in order on
/// reconnect. Dropping the handle closes the channel.
#[derive(Debug)]
pub struct LiveChannel {
    outbox: mpsc::UnboundedSender<ProgressEvent>,
    state: watch::Receiver<ChannelState>,
    shutdown: watch::Sender<bool>,
}

impl LiveChannel {
    /// Start connecting in the background.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(transport: Arc<dyn LiveTransport>, retry: RetryPolicy) -> (Self, LiveEvents) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChannelState::Disconnected);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (events_tx, events) = event_stream();

        let actor = Actor {
            transport,
            retry,
            outbox: outbox_rx,
            queue: VecDeque::new(),
            events: events_tx,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        tokio::spawn(actor.run());

        (
            Self {
                outbox,
                state,
                shutdown,
            },
            events,
        )
    }

    /// Queue `event` for the server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` once the channel has shut down.
    pub fn announce(&self, event: ProgressEvent) -> Result<(), TransportError> {
        self.outbox.send(event).map_err(|_| TransportError::Closed)
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Wait until the channel reaches `target`. Returns `false` on timeout.
    pub async fn wait_for(&self, target: ChannelState, timeout: Duration) -> bool {
        let mut state = self.state.clone();
        tokio::time::timeout(timeout, state.wait_for(|current| *current == target))
            .await
            .is_ok_and(|reached| reached.is_ok())
    }

    /// Stop the channel and wait for the link to be torn down.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let mut state = self.state.clone();
        // An error means the task is already gone.
        let _ = state.wait_for(|current| *current == ChannelState::Closed).await;
    }
}

struct Actor {
    transport: Arc<dyn LiveTransport>,
    retry: RetryPolicy,
    outbox: mpsc::UnboundedReceiver<ProgressEvent>,
    /// Announcements not yet written to a link, oldest first.
    queue: VecDeque<ProgressEvent>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ChannelState>,
    shutdown: watch::Receiver<bool>,
}

/// What the actor does after a link ends or a backoff elapses.
enum Exit {
    Reconnect,
    Shutdown,
}

impl Actor {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        while !*self.shutdown.borrow() {
            self.state.send_replace(ChannelState::Connecting);
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = self.shutdown.changed() => break,
            };
            match connected {
                Ok(link) => {
                    attempt = 0;
                    if matches!(self.serve(link).await, Exit::Shutdown) {
                        break;
                    }
                    warn!(queued = self.queue.len(), "live channel lost; reconnecting");
                    self.state.send_replace(ChannelState::Disconnected);
                    let delay = self.retry.delay(0);
                    if matches!(self.backoff(delay).await, Exit::Shutdown) {
                        break;
                    }
                }
                Err(err) => {
                    self.state.send_replace(ChannelState::Disconnected);
                    let delay = self.retry.delay(attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(error = %err, attempt, "live connect failed");
                    if matches!(self.backoff(delay).await, Exit::Shutdown) {
                        break;
                    }
                }
            }
        }

        if !self.queue.is_empty() {
            warn!(unsent = self.queue.len(), "live channel closed with unsent announcements");
        }
        self.state.send_replace(ChannelState::Closed);
        info!("live channel closed");
    }

    async fn serve(&mut self, link: LiveLink) -> Exit {
        let LiveLink { mut sink, mut stream } = link;
        self.state.send_replace(ChannelState::Connected);
        info!("live channel connected");
        let _ = self.events.send(ChannelEvent::Reconnected);

        loop {
            if self.flush(&mut *sink).await.is_err() {
                return Exit::Reconnect;
            }
            tokio::select! {
                _ = self.shutdown.changed() => return Exit::Shutdown,
                outgoing = self.outbox.recv() => match outgoing {
                    Some(event) => self.queue.push_back(event),
                    None => return Exit::Shutdown,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(event)) => {
                        let _ = self.events.send(ChannelEvent::Remote(event));
                    }
                    Some(Err(TransportError::Decode(reason))) => {
                        warn!(%reason, "skipping malformed live frame");
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "live link failed");
                        return Exit::Reconnect;
                    }
                    None => return Exit::Reconnect,
                },
            }
        }
    }

    /// Write queued announcements in order; an event leaves the queue only once sent.
    async fn flush(&mut self, sink: &mut dyn EventSink) -> Result<(), TransportError> {
        while let Some(event) = self.queue.front() {
            sink.send(event).await?;
            self.queue.pop_front();
        }
        Ok(())
    }

    /// Sleep before the next connect while still accepting announcements.
    async fn backoff(&mut self, delay: Duration) -> Exit {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Exit::Reconnect,
                _ = self.shutdown.changed() => return Exit::Shutdown,
                outgoing = self.outbox.recv() => match outgoing {
                    Some(event) => self.queue.push_back(event),
                    None => return Exit::Shutdown,
                },
            }
        }
    }
}
