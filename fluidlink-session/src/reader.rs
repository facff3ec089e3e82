//! Reader loop: de-frame, decode, dispatch.

use crate::session::SessionEvent;
use crate::waiters::WaiterTable;
use fluidlink_protocol::{Decoder, DeviceMessage};
use fluidlink_transport::TransportEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Why the reader loop stopped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReaderOutcome {
    /// The connection scope was cancelled (explicit disconnect).
    Cancelled,
    /// The transport reported the link down; the session must tear down.
    LinkClosed,
}

/// Consumes transport chunks, reassembles frames, and dispatches decoded
/// device messages.
///
/// Acks resolve their correlation entry; acks for unknown tokens are dropped
/// (already timed out, or duplicate). Signals and status bodies go out on the
/// session's notification channel. A malformed frame is logged and skipped;
/// the connection stays up.
pub(crate) async fn reader_loop(
    mut chunks: broadcast::Receiver<TransportEvent>,
    waiters: Arc<WaiterTable>,
    notifications: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
) -> ReaderOutcome {
    let mut decoder = Decoder::new();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return ReaderOutcome::Cancelled,
            event = chunks.recv() => event,
        };

        match event {
            Ok(TransportEvent::Data(chunk)) => {
                decoder.extend(&chunk);
                loop {
                    match decoder.decode_device() {
                        Ok(Some(message)) => dispatch(message, &waiters, &notifications),
                        Ok(None) => break,
                        Err(e) => tracing::warn!("dropping malformed frame: {e}"),
                    }
                }
            }
            Ok(TransportEvent::Closed) => return ReaderOutcome::LinkClosed,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Chunks were lost; anything buffered is torn mid-frame.
                tracing::warn!(skipped, "reader lagged behind the transport");
                decoder.clear();
            }
            Err(broadcast::error::RecvError::Closed) => return ReaderOutcome::LinkClosed,
        }
    }
}

fn dispatch(
    message: DeviceMessage,
    waiters: &WaiterTable,
    notifications: &broadcast::Sender<SessionEvent>,
) {
    match message {
        DeviceMessage::Ack {
            ref_token,
            result,
            data,
        } => {
            if !waiters.complete(ref_token, result) {
                tracing::debug!(ref_token, "ack without pending request dropped");
            }
            if let Some(data) = data {
                let _ = notifications.send(SessionEvent::Status(data));
            }
        }
        DeviceMessage::Signal { payload } => {
            let _ = notifications.send(SessionEvent::Signal(payload));
        }
    }
}
