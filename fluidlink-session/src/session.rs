//! Session lifecycle and send-and-wait façade.

use crate::config::{PollConfig, SessionConfig};
use crate::error::SessionError;
use crate::reader::{self, ReaderOutcome};
use crate::waiters::WaiterTable;
use crate::writer::{self, OutboundRequest};
use fluidlink_protocol::ResultCode;
use fluidlink_transport::{LinkStream, Transport};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the subscriber notification channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Notifications pushed to session subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The connection opened (`true`) or closed (`false`), whether requested
    /// or device-initiated.
    ConnectionChanged(bool),
    /// Unsolicited device notification.
    Signal(Value),
    /// Response body carried by an acknowledgement (status-poll data).
    Status(Value),
}

/// Connection state; `Active` exists only while connected.
enum LinkState {
    Disconnected,
    Connected(Active),
}

/// Everything owned by one open connection.
struct Active {
    transport: Arc<Transport>,
    cancel: CancellationToken,
    queue: mpsc::UnboundedSender<OutboundRequest>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    poll_task: Option<JoinHandle<()>>,
}

struct SessionInner {
    config: SessionConfig,
    state: Mutex<LinkState>,
    connected: AtomicBool,
    waiters: Arc<WaiterTable>,
    notifications: broadcast::Sender<SessionEvent>,
}

/// A request-correlated session over one serial link.
///
/// Cheap to clone through its internal `Arc`; all methods take `&self`.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                config,
                state: Mutex::new(LinkState::Disconnected),
                connected: AtomicBool::new(false),
                waiters: Arc::new(WaiterTable::new()),
                notifications,
            }),
        }
    }

    /// Subscribes to connection, signal, and status notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.notifications.subscribe()
    }

    /// Returns whether the session currently holds an open connection.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Number of requests currently awaiting a reply or timeout.
    pub fn pending_count(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Opens the named serial port and starts the connection tasks.
    ///
    /// Succeeds immediately when already connected. On open failure the
    /// session stays disconnected and the error is returned.
    pub async fn connect(&self, port_name: &str) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if matches!(&*state, LinkState::Connected(_)) {
            tracing::debug!("connect called while already connected");
            return Ok(());
        }

        let transport = Transport::open(port_name, &self.inner.config.transport)?;
        *state = start_connection(&self.inner, transport);
        drop(state);

        let _ = self
            .inner
            .notifications
            .send(SessionEvent::ConnectionChanged(true));
        Ok(())
    }

    /// Starts a connection over an already-open stream (loopback links,
    /// device simulators).
    pub async fn connect_stream(&self, stream: LinkStream) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        if matches!(&*state, LinkState::Connected(_)) {
            tracing::debug!("connect called while already connected");
            return Ok(());
        }

        let transport = Transport::from_stream(stream, &self.inner.config.transport);
        *state = start_connection(&self.inner, transport);
        drop(state);

        let _ = self
            .inner
            .notifications
            .send(SessionEvent::ConnectionChanged(true));
        Ok(())
    }

    /// Closes the connection and waits for every connection task to finish.
    ///
    /// Outstanding requests resolve with [`ResultCode::Timeout`]. Calling
    /// this while disconnected is a no-op.
    pub async fn disconnect(&self) {
        self.inner.teardown(true).await;
    }

    /// Sends one command and waits for its correlated result.
    ///
    /// Returns within `deadline` even if the transport never answers: the
    /// watchdog resolves the waiter with [`ResultCode::Timeout`].
    pub async fn send_and_wait(
        &self,
        command: Value,
        deadline: Duration,
    ) -> Result<ResultCode, SessionError> {
        submit(&self.inner, command, deadline).await
    }

    /// Sends a command, re-sending on timeout up to `attempts` times.
    ///
    /// Each attempt is a fresh request with its own token. The first
    /// non-timeout result is returned.
    pub async fn send_with_retry(
        &self,
        command: Value,
        deadline: Duration,
        attempts: u32,
    ) -> Result<ResultCode, SessionError> {
        if attempts == 0 {
            return Err(SessionError::BadParameter("attempts must be non-zero"));
        }

        let mut code = ResultCode::Timeout;
        for attempt in 1..=attempts {
            code = submit(&self.inner, command.clone(), deadline).await?;
            if code != ResultCode::Timeout {
                return Ok(code);
            }
            tracing::debug!(attempt, attempts, "no reply before deadline");
        }
        Ok(code)
    }

    /// Sends a command with the configured default deadline and retry count.
    pub async fn send(&self, command: Value) -> Result<ResultCode, SessionError> {
        self.send_with_retry(
            command,
            self.inner.config.deadline,
            self.inner.config.retry_attempts,
        )
        .await
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl SessionInner {
    /// Tears the connection down once; every later call is a no-op.
    ///
    /// `await_loops` is false when called from the reader task itself (the
    /// unsolicited-disconnect path), which cannot await its own handle.
    async fn teardown(&self, await_loops: bool) {
        let active = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, LinkState::Disconnected) {
                LinkState::Connected(active) => active,
                LinkState::Disconnected => return,
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        active.cancel.cancel();
        active.transport.close().await;

        let drained = self.waiters.fail_all(ResultCode::Timeout);
        if drained > 0 {
            tracing::debug!(drained, "outstanding requests resolved on disconnect");
        }

        if await_loops {
            let _ = active.writer_task.await;
            let _ = active.reader_task.await;
            if let Some(poll_task) = active.poll_task {
                let _ = poll_task.await;
            }
        }

        let _ = self
            .notifications
            .send(SessionEvent::ConnectionChanged(false));
        tracing::debug!("session disconnected");
    }
}

/// Spawns the writer, reader, and optional poll tasks for a fresh connection.
fn start_connection(inner: &Arc<SessionInner>, transport: Transport) -> LinkState {
    let transport = Arc::new(transport);
    let cancel = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::unbounded_channel();

    inner.connected.store(true, Ordering::SeqCst);

    let writer_task = tokio::spawn(writer::writer_loop(
        queue_rx,
        transport.clone(),
        inner.waiters.clone(),
        cancel.clone(),
    ));

    let reader_task = {
        let inner = inner.clone();
        let chunks = transport.subscribe();
        let waiters = inner.waiters.clone();
        let notifications = inner.notifications.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = reader::reader_loop(chunks, waiters, notifications, cancel).await;
            if outcome == ReaderOutcome::LinkClosed {
                tracing::debug!("link closed by transport, tearing down");
                inner.teardown(false).await;
            }
        })
    };

    let poll_task = inner.config.poll.clone().map(|poll| {
        let inner = inner.clone();
        let cancel = cancel.clone();
        tokio::spawn(poll_loop(inner, poll, cancel))
    });

    LinkState::Connected(Active {
        transport,
        cancel,
        queue: queue_tx,
        writer_task,
        reader_task,
        poll_task,
    })
}

/// Enqueues one request and awaits its waiter.
async fn submit(
    inner: &SessionInner,
    command: Value,
    deadline: Duration,
) -> Result<ResultCode, SessionError> {
    if deadline.is_zero() {
        return Err(SessionError::BadParameter("deadline must be non-zero"));
    }
    if !inner.connected.load(Ordering::SeqCst) {
        return Err(SessionError::NotConnected);
    }

    let queue = {
        let state = inner.state.lock().await;
        match &*state {
            LinkState::Connected(active) => active.queue.clone(),
            LinkState::Disconnected => return Err(SessionError::NotConnected),
        }
    };

    let (waiter, result) = oneshot::channel();
    queue
        .send(OutboundRequest {
            command,
            deadline,
            waiter,
        })
        .map_err(|_| SessionError::NotConnected)?;

    result.await.map_err(|_| SessionError::ConnectionClosed)
}

/// Issues the fixed status query for as long as the connection stays open,
/// pacing each round by the previous completion.
async fn poll_loop(inner: Arc<SessionInner>, poll: PollConfig, cancel: CancellationToken) {
    loop {
        match submit(&inner, poll.payload.clone(), poll.deadline).await {
            Ok(code) if !code.is_ok() => tracing::debug!(%code, "status poll returned"),
            Ok(_) => {}
            Err(e) => tracing::debug!("status poll not sent: {e}"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluidlink_protocol::{Decoder, DeviceMessage, Encoder, HostMessage};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    /// Far end of a loopback link, speaking the device side of the protocol.
    struct DeviceSim {
        stream: DuplexStream,
        decoder: Decoder,
    }

    impl DeviceSim {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream,
                decoder: Decoder::new(),
            }
        }

        async fn next_command(&mut self) -> HostMessage {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(msg) = self.decoder.decode_host().unwrap() {
                    return msg;
                }
                let n = self.stream.read(&mut buf).await.unwrap();
                assert_ne!(n, 0, "host closed the link mid-test");
                self.decoder.extend(&buf[..n]);
            }
        }

        async fn reply(&mut self, message: &DeviceMessage) {
            let frame = Encoder::encode_device(message).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }
    }

    async fn connected_session(config: SessionConfig) -> (Session, DeviceSim) {
        let (stream, far) = LinkStream::loopback(4096);
        let session = Session::new(config);
        session.connect_stream(stream).await.unwrap();
        (session, DeviceSim::new(far))
    }

    #[tokio::test]
    async fn test_send_and_wait_resolves_with_device_result() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;

        let echo = tokio::spawn(async move {
            let cmd = device.next_command().await;
            assert_eq!(cmd.token, 1);
            device.reply(&DeviceMessage::ack(cmd.token, ResultCode::Ok)).await;
            device
        });

        let code = session
            .send_and_wait(json!({"valve": {"number": 2, "state": "open"}}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(code, ResultCode::Ok);
        assert_eq!(session.pending_count(), 0);

        echo.await.unwrap();
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let session = Session::new(SessionConfig::new());
        let result = session.send_and_wait(json!({}), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_zero_deadline_rejected() {
        let (session, _device) = connected_session(SessionConfig::new()).await;
        let result = session.send_and_wait(json!({}), Duration::ZERO).await;
        assert!(matches!(result, Err(SessionError::BadParameter(_))));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_silent_device_times_out_at_deadline() {
        let (session, _device) = connected_session(SessionConfig::new()).await;

        let start = Instant::now();
        let code = session
            .send_and_wait(json!({"pump": {"rate": 5}}), Duration::from_millis(50))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(code, ResultCode::Timeout);
        assert!(elapsed >= Duration::from_millis(45), "resolved early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "resolved late: {elapsed:?}");
        assert_eq!(session.pending_count(), 0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_out_of_order_replies_route_by_token() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;

        let responder = tokio::spawn(async move {
            let first = device.next_command().await;
            let second = device.next_command().await;
            // Answer the later request first.
            device
                .reply(&DeviceMessage::ack(second.token, ResultCode::Busy))
                .await;
            device
                .reply(&DeviceMessage::ack(first.token, ResultCode::Ok))
                .await;
            device
        });

        let s1 = session.clone();
        let first = tokio::spawn(async move {
            s1.send_and_wait(json!({"seq": 1}), Duration::from_secs(1)).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let s2 = session.clone();
        let second = tokio::spawn(async move {
            s2.send_and_wait(json!({"seq": 2}), Duration::from_secs(1)).await
        });

        assert_eq!(first.await.unwrap().unwrap(), ResultCode::Ok);
        assert_eq!(second.await.unwrap().unwrap(), ResultCode::Busy);

        responder.await.unwrap();
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_wire_order_matches_submission_order() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                session
                    .send_and_wait(json!({"seq": i}), Duration::from_secs(1))
                    .await
            }));
            // Stagger submissions so the queue order is deterministic.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for i in 0..5u32 {
            let cmd = device.next_command().await;
            assert_eq!(cmd.token, i + 1);
            assert_eq!(cmd.command["seq"], i);
            device.reply(&DeviceMessage::ack(cmd.token, ResultCode::Ok)).await;
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), ResultCode::Ok);
        }
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, _device) = connected_session(SessionConfig::new()).await;

        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let session = Session::new(SessionConfig::new());
        session.disconnect().await;
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (session, _device) = connected_session(SessionConfig::new()).await;

        let (stream, _far) = LinkStream::loopback(64);
        tokio_test::assert_ok!(session.connect_stream(stream).await);
        assert!(session.is_connected());

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connection_events_on_connect_and_disconnect() {
        let (stream, _far) = LinkStream::loopback(4096);
        let session = Session::new(SessionConfig::new());
        let mut events = session.subscribe();

        session.connect_stream(stream).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectionChanged(true)
        ));

        session.disconnect().await;
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::ConnectionChanged(false)
        ));
    }

    #[tokio::test]
    async fn test_device_drop_drives_unsolicited_disconnect() {
        let (session, device) = connected_session(SessionConfig::new()).await;
        let mut events = session.subscribe();

        drop(device);

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::ConnectionChanged(false) => break,
                _ => continue,
            }
        }
        assert!(!session.is_connected());

        // Later sends are rejected without wire traffic.
        let result = session.send_and_wait(json!({}), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_pending_request_resolves_when_device_drops() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;

        let killer = tokio::spawn(async move {
            let _ = device.next_command().await;
            drop(device);
        });

        let start = Instant::now();
        let code = session
            .send_and_wait(json!({"pump": {"rate": 1}}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code, ResultCode::Timeout);
        assert!(start.elapsed() < Duration::from_secs(2));

        killer.await.unwrap();
    }

    #[tokio::test]
    async fn test_signal_reaches_subscribers() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;
        let mut events = session.subscribe();

        device
            .reply(&DeviceMessage::signal(json!({"bubble_detected": true})))
            .await;

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::Signal(payload) => {
                    assert_eq!(payload["bubble_detected"], true);
                    break;
                }
                _ => continue,
            }
        }
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_retry_resends_after_timeout() {
        let (session, mut device) = connected_session(SessionConfig::new()).await;

        let responder = tokio::spawn(async move {
            // Ignore the first attempt, ack the second.
            let first = device.next_command().await;
            let second = device.next_command().await;
            assert_ne!(first.token, second.token, "each attempt gets a fresh token");
            assert_eq!(first.command, second.command);
            device.reply(&DeviceMessage::ack(second.token, ResultCode::Ok)).await;
            device
        });

        let code = session
            .send_with_retry(json!({"home": {"axis": "z"}}), Duration::from_millis(80), 3)
            .await
            .unwrap();
        assert_eq!(code, ResultCode::Ok);

        responder.await.unwrap();
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_retry_rejects_zero_attempts() {
        let (session, _device) = connected_session(SessionConfig::new()).await;
        let result = session
            .send_with_retry(json!({}), Duration::from_millis(10), 0)
            .await;
        assert!(matches!(result, Err(SessionError::BadParameter(_))));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_status_poll_queries_and_reports() {
        let poll = PollConfig::new(json!({"query_system": {"request_data": 1}}))
            .with_interval(Duration::from_millis(20))
            .with_deadline(Duration::from_millis(200));
        let config = SessionConfig::new().with_poll(poll);

        let (session, mut device) = connected_session(config).await;
        let mut events = session.subscribe();

        let responder = tokio::spawn(async move {
            for _ in 0..3 {
                let cmd = device.next_command().await;
                assert_eq!(cmd.command["query_system"]["request_data"], 1);
                device
                    .reply(&DeviceMessage::ack_with_data(
                        cmd.token,
                        ResultCode::Ok,
                        json!({"flow_ul_min": 118}),
                    ))
                    .await;
            }
            device
        });

        let mut status_reports = 0;
        while status_reports < 3 {
            match events.recv().await.unwrap() {
                SessionEvent::Status(data) => {
                    assert_eq!(data["flow_ul_min"], 118);
                    status_reports += 1;
                }
                _ => continue,
            }
        }

        responder.await.unwrap();
        session.disconnect().await;
    }
}
