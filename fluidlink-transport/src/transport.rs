//! Link ownership: background read loop, chunk broadcast, lifecycle.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::stream::LinkStream;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the chunk broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Push notifications from the link.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A raw chunk arrived; may contain partial or multiple frames.
    Data(Bytes),
    /// The remote end closed or the port failed; no further data will arrive.
    Closed,
}

/// Owns one open link.
///
/// A dedicated task reads the port and broadcasts every chunk to subscribers;
/// writes go through [`write`](Transport::write). [`close`](Transport::close)
/// is idempotent and does not return until the read loop has exited, so no
/// write can race a half-closed device.
pub struct Transport {
    writer: Mutex<Option<WriteHalf<LinkStream>>>,
    events: broadcast::Sender<TransportEvent>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
}

impl Transport {
    /// Opens the named serial port and starts the read loop.
    pub fn open(port_name: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let stream = LinkStream::open_serial(port_name, config)?;
        tracing::debug!(port = port_name, baud = config.baud, "serial port open");
        Ok(Self::from_stream(stream, config))
    }

    /// Builds a transport over an already-open stream and starts the read
    /// loop. This is the entry point for loopback links.
    pub fn from_stream(stream: LinkStream, config: &TransportConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let open = Arc::new(AtomicBool::new(true));

        let read_task = tokio::spawn(read_loop(
            read_half,
            events.clone(),
            cancel.clone(),
            open.clone(),
            config.read_buffer_size,
        ));

        Self {
            writer: Mutex::new(Some(write_half)),
            events,
            read_task: Mutex::new(Some(read_task)),
            cancel,
            open,
        }
    }

    /// Subscribes to chunk and close notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Returns whether the link is currently open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Writes raw bytes to the link.
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotOpen)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Closes the link.
    ///
    /// Safe to call any number of times, from any task. Returns only after
    /// the read loop has observed cancellation and exited.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        if let Some(task) = self.read_task.lock().await.take() {
            let _ = task.await;
        }
        tracing::debug!("transport closed");
    }
}

async fn read_loop(
    mut reader: ReadHalf<LinkStream>,
    events: broadcast::Sender<TransportEvent>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!("link closed by remote end");
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Closed);
                    break;
                }
                Ok(n) => {
                    let _ = events.send(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n])));
                }
                Err(e) => {
                    tracing::debug!("link read failed: {e}");
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Closed);
                    break;
                }
            }
        }
    }
}
