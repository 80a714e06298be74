//! dhtlink-core - MQTT 3.1.1 packet types and codec.
//!
//! This crate holds everything about the wire format that does not need a
//! socket: packet structs, the variable byte integer, stateless
//! encoders/decoders, a resumable stream decoder and topic matching.

pub mod error;
pub mod packet;
pub mod stream;
pub mod topic;
pub mod varint;

pub use error::{ProtocolError, Result};
pub use packet::*;
pub use stream::StreamDecoder;
pub use topic::{topic_matches_filter, validate_topic_filter, validate_topic_name};
