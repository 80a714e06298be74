//! Client error types.

use std::fmt;
use std::io;

use dhtlink_core::packet::ConnackCode;
use dhtlink_core::ProtocolError;
use thiserror::Error;

use crate::events::SessionState;

/// Why a connection attempt did not reach the Connected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRejection {
    /// The broker answered CONNACK with a non-zero return code.
    Refused(ConnackCode),
    /// No CONNACK arrived within the command timeout.
    Timeout,
}

impl fmt::Display for ConnectRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectRejection::Refused(code) => write!(f, "refused: {:?}", code),
            ConnectRejection::Timeout => f.write_str("no CONNACK before timeout"),
        }
    }
}

/// Client error type.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection rejected while {state}: {reason}")]
    ConnectRejected {
        reason: ConnectRejection,
        state: SessionState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] ProtocolError),

    #[error("Invalid topic: {0}")]
    InvalidTopic(ProtocolError),

    #[error("Command timed out (packet {packet_id})")]
    CommandTimeout { packet_id: u16 },

    #[error("Publish to '{topic}' not acknowledged after {attempts} attempts (packet {packet_id})")]
    PublishTimeout {
        topic: String,
        packet_id: u16,
        attempts: u32,
    },

    #[error("Subscribe to '{filter}' not acknowledged (packet {packet_id})")]
    SubscribeTimeout { filter: String, packet_id: u16 },

    #[error("Subscribe to '{filter}' rejected by broker")]
    SubscribeRejected { filter: String },

    #[error("Reconnect failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Not connected (state: {state})")]
    NotConnected { state: SessionState },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ClientError {
    /// Errors after which the client stays Disconnected until the caller
    /// intervenes.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Tls(_)
                | ClientError::ConnectRejected { .. }
                | ClientError::MalformedPacket(_)
                | ClientError::ReconnectFailed { .. }
        )
    }

    /// The broker did not acknowledge a command in time. The session stays
    /// connected.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::CommandTimeout { .. }
                | ClientError::PublishTimeout { .. }
                | ClientError::SubscribeTimeout { .. }
        )
    }

    /// Errors caused by the network that an automatic reconnect may cure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Io(_) | ClientError::ConnectionLost { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
