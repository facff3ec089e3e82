//! Writer loop: FIFO drain of the outbound queue.

use crate::waiters::WaiterTable;
use fluidlink_protocol::{Encoder, HostMessage, ResultCode, NO_TOKEN};
use fluidlink_transport::Transport;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A queued command awaiting its token and wire slot.
pub(crate) struct OutboundRequest {
    pub command: Value,
    pub deadline: Duration,
    pub waiter: oneshot::Sender<ResultCode>,
}

/// Drains the outbound queue strictly in submission order.
///
/// For each request: assign the next token, arm the correlation table, start
/// the timeout watchdog, frame and write. The loop never waits for the reply
/// itself; the caller's await on the waiter carries the backpressure.
pub(crate) async fn writer_loop(
    mut queue: mpsc::UnboundedReceiver<OutboundRequest>,
    transport: Arc<Transport>,
    waiters: Arc<WaiterTable>,
    cancel: CancellationToken,
) {
    let mut next_token: u32 = NO_TOKEN;

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        // Tokens start at 1 and wrap around 0, which stays reserved.
        next_token = next_token.wrapping_add(1);
        if next_token == NO_TOKEN {
            next_token = 1;
        }
        let token = next_token;

        waiters.arm(token, request.waiter);
        spawn_watchdog(token, request.deadline, waiters.clone(), cancel.clone());

        let message = HostMessage::new(token, request.command);
        let frame = match Encoder::encode_host(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(token, "failed to encode command: {e}");
                continue;
            }
        };

        // A write failure is not propagated per request: the watchdog
        // resolves the waiter and the transport reports the link state.
        match transport.write(&frame).await {
            Ok(()) => tracing::debug!(token, bytes = frame.len(), "command written"),
            Err(e) => tracing::warn!(token, "link write failed: {e}"),
        }
    }
}

/// One watchdog per in-flight request.
///
/// Resolves the waiter with [`ResultCode::Timeout`] at the deadline, or
/// immediately on connection teardown; the table's atomic remove makes this a
/// no-op whenever the reply got there first.
fn spawn_watchdog(
    token: u32,
    deadline: Duration,
    waiters: Arc<WaiterTable>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {}
        }
        if waiters.complete(token, ResultCode::Timeout) {
            tracing::debug!(token, "request timed out");
        }
    });
}
