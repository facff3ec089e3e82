//! Message envelopes for host commands and device replies.
//!
//! The command body itself is opaque to this layer: the engine only addresses
//! the correlation token and the sender tag on outbound messages, and the
//! ack/signal discrimination on inbound ones.

use crate::error::ResultCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of the link produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Host,
    Device,
}

/// Outbound command envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMessage {
    /// Originator tag, always [`Sender::Host`] for messages built here.
    pub sender: Sender,

    /// Correlation token assigned by the writer loop; never zero on the wire.
    pub token: u32,

    /// Opaque command body supplied by the caller.
    #[serde(default)]
    pub command: Value,
}

impl HostMessage {
    pub fn new(token: u32, command: Value) -> Self {
        Self {
            sender: Sender::Host,
            token,
            command,
        }
    }
}

/// Inbound device message.
///
/// An `ack` correlates to an outstanding request through `ref_token`; a
/// `signal` is device-initiated and correlates to nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Ack {
        /// Token of the request this acknowledges.
        ref_token: u32,

        /// Outcome reported by the device.
        result: ResultCode,

        /// Optional response body (status reports ride along here).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Signal {
        /// Device-defined notification body.
        #[serde(default)]
        payload: Value,
    },
}

impl DeviceMessage {
    /// Builds an acknowledgement (device side; used by tests and simulators).
    pub fn ack(ref_token: u32, result: ResultCode) -> Self {
        DeviceMessage::Ack {
            ref_token,
            result,
            data: None,
        }
    }

    /// Builds an acknowledgement carrying a response body.
    pub fn ack_with_data(ref_token: u32, result: ResultCode, data: Value) -> Self {
        DeviceMessage::Ack {
            ref_token,
            result,
            data: Some(data),
        }
    }

    /// Builds an unsolicited signal.
    pub fn signal(payload: Value) -> Self {
        DeviceMessage::Signal { payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_host_message_envelope() {
        let msg = HostMessage::new(42, json!({"valve": 3}));
        assert_eq!(msg.sender, Sender::Host);
        assert_eq!(msg.token, 42);

        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"sender\":\"host\""));
        assert!(encoded.contains("\"token\":42"));

        let parsed: HostMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed.token, 42);
        assert_eq!(parsed.command["valve"], 3);
    }

    #[test]
    fn test_ack_roundtrip() {
        let msg = DeviceMessage::ack(7, ResultCode::Ok);
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"ack\""));

        let parsed: DeviceMessage = serde_json::from_str(&encoded).unwrap();
        match parsed {
            DeviceMessage::Ack {
                ref_token,
                result,
                data,
            } => {
                assert_eq!(ref_token, 7);
                assert_eq!(result, ResultCode::Ok);
                assert!(data.is_none());
            }
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_with_data() {
        let msg = DeviceMessage::ack_with_data(9, ResultCode::Ok, json!({"flow_ul_min": 120}));
        let encoded = serde_json::to_vec(&msg).unwrap();
        let parsed: DeviceMessage = serde_json::from_slice(&encoded).unwrap();
        match parsed {
            DeviceMessage::Ack { data: Some(d), .. } => assert_eq!(d["flow_ul_min"], 120),
            other => panic!("expected ack with data, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_discrimination() {
        let msg = DeviceMessage::signal(json!({"bubble_detected": true}));
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"signal\""));

        let parsed: DeviceMessage = serde_json::from_str(&encoded).unwrap();
        assert!(matches!(parsed, DeviceMessage::Signal { .. }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<DeviceMessage>(r#"{"type":"telemetry"}"#);
        assert!(result.is_err());
    }
}
