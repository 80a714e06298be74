//! Client events and state types.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use dhtlink_core::packet::{Publish, QoS};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    Connected,
    /// Transport lost; waiting for backoff or for the CONNACK of a new attempt.
    Reconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
        })
    }
}

/// A PUBLISH received from the broker, as handed to subscription handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl InboundMessage {
    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl From<Publish> for InboundMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

/// Lifecycle notifications, drained with `Client::next_event`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// CONNACK accepted.
    Connected {
        /// Whether the broker restored a previous session.
        session_present: bool,
    },
    /// The transport failed while connected.
    ConnectionLost { reason: String },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before this attempt.
        delay: Duration,
    },
    /// Connected again after a loss.
    Reconnected {
        /// Attempts it took.
        attempts: u32,
    },
    /// The reconnect budget ran out.
    ReconnectFailed { attempts: u32 },
    /// A command issued by the client itself (resubscribe) got no answer.
    CommandTimedOut { packet_id: u16, filter: String },
    /// The broker refused a resubscribe after reconnect.
    SubscriptionRejected { filter: String },
    /// The session ended.
    Disconnected {
        /// Reason for disconnection, if not requested by the caller.
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_from_publish() {
        let publish = Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: true,
            topic: "node1/dht11".into(),
            packet_id: Some(4),
            payload: Bytes::from_static(b"{\"humidity\":50.00}"),
        };
        let msg = InboundMessage::from(publish);
        assert_eq!(msg.topic, "node1/dht11");
        assert_eq!(msg.qos, QoS::AtLeastOnce);
        assert!(msg.retain);
        assert_eq!(msg.payload_str(), Some("{\"humidity\":50.00}"));
    }
}
