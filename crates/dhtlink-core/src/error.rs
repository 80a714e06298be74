//! Error types for packet encoding and decoding.

use thiserror::Error;

/// MQTT protocol errors.
///
/// Every variant describes a violation found in bytes received from the
/// peer (or a topic rejected before it is put on the wire). None of them
/// are recoverable on the same connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
