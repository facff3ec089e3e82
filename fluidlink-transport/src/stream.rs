//! Byte stream abstraction over the physical link.

use crate::config::TransportConfig;
use crate::error::TransportError;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pin_project! {
    /// The byte stream a [`Transport`](crate::Transport) runs over: a native
    /// serial port, or an in-memory loopback for driving the engine without
    /// hardware.
    #[project = LinkStreamProj]
    pub enum LinkStream {
        Serial { #[pin] stream: SerialStream },
        Loopback { #[pin] stream: DuplexStream },
    }
}

impl LinkStream {
    /// Opens the named serial port with the configured baud rate and timeout.
    pub fn open_serial(port_name: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let stream = tokio_serial::new(port_name, config.baud)
            .timeout(config.io_timeout)
            .open_native_async()?;
        Ok(LinkStream::Serial { stream })
    }

    /// Creates a loopback link; the returned [`DuplexStream`] is the far
    /// (device) end.
    pub fn loopback(capacity: usize) -> (Self, DuplexStream) {
        let (near, far) = tokio::io::duplex(capacity);
        (LinkStream::Loopback { stream: near }, far)
    }

    /// Returns whether this stream is backed by real hardware.
    pub fn is_serial(&self) -> bool {
        matches!(self, LinkStream::Serial { .. })
    }
}

impl AsyncRead for LinkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_read(cx, buf),
            LinkStreamProj::Loopback { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LinkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_write(cx, buf),
            LinkStreamProj::Loopback { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_flush(cx),
            LinkStreamProj::Loopback { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            LinkStreamProj::Serial { stream } => stream.poll_shutdown(cx),
            LinkStreamProj::Loopback { stream } => stream.poll_shutdown(cx),
        }
    }
}
