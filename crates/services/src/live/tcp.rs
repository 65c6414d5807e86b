use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use lms_core::model::ProgressEvent;

use crate::error::TransportError;
use crate::live::{EventSink, EventStream, LiveLink, LiveTransport};

/// Newline-delimited JSON events over a plain TCP connection.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    #[must_use]
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl LiveTransport for TcpTransport {
    async fn connect(&self) -> Result<LiveLink, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "live tcp link open");

        let (read, write) = stream.into_split();
        Ok(LiveLink {
            sink: Box::new(TcpSink { write }),
            stream: Box::new(TcpEvents {
                read: BufReader::new(read),
                line: Vec::new(),
            }),
        })
    }
}

struct TcpSink {
    write: OwnedWriteHalf,
}

#[async_trait]
impl EventSink for TcpSink {
    async fn send(&mut self, event: &ProgressEvent) -> Result<(), TransportError> {
        let mut frame = serde_json::to_vec(event)?;
        frame.push(b'\n');
        self.write.write_all(&frame).await?;
        self.write.flush().await?;
        Ok(())
    }
}

struct TcpEvents {
    read: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
}

/// One frame's bytes as an event. Bad UTF-8 is a bad frame, like bad JSON.
fn decode_frame(frame: &[u8]) -> Option<Result<ProgressEvent, TransportError>> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text.trim(),
        Err(err) => return Some(Err(TransportError::Decode(err.to_string()))),
    };
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).map_err(Into::into))
}

#[async_trait]
impl EventStream for TcpEvents {
    async fn next(&mut self) -> Option<Result<ProgressEvent, TransportError>> {
        // `line` keeps partial bytes if this future is dropped mid-read.
        loop {
            match self.read.read_until(b'\n', &mut self.line).await {
                Ok(0) => return None,
                Ok(_) => {
                    let frame = decode_frame(&self.line);
                    self.line.clear();
                    if let Some(frame) = frame {
                        return Some(frame);
                    }
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}
