//! Session configuration.

use fluidlink_transport::TransportConfig;
use serde_json::{json, Value};
use std::time::Duration;

/// Default per-request deadline.
pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(430);

/// Default number of send attempts for [`Session::send`](crate::Session::send).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default status-poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Periodic status-poll settings.
///
/// While the connection is open, the session issues `payload` as a regular
/// correlated request every `interval`, pacing each round by the previous
/// reply (or its timeout).
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Fixed command body sent on every poll round.
    pub payload: Value,
    /// Delay between the completion of one poll and the start of the next.
    pub interval: Duration,
    /// Deadline applied to each poll request.
    pub deadline: Duration,
}

impl PollConfig {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial link settings.
    pub transport: TransportConfig,
    /// Default per-request deadline.
    pub deadline: Duration,
    /// Default attempt count for [`Session::send`](crate::Session::send).
    pub retry_attempts: u32,
    /// Status poll, started on connect when set.
    pub poll: Option<PollConfig>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the fluidics instrument: default link settings plus
    /// the periodic system-status query.
    pub fn fluidics() -> Self {
        Self::new().with_poll(PollConfig::new(json!({
            "query_system": { "request_data": 1 }
        })))
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = Some(poll);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            deadline: DEFAULT_DEADLINE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            poll: None,
        }
    }
}
