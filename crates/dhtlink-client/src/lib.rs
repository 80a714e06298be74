//! dhtlink-client - cooperative MQTT 3.1.1 client over TLS.
//!
//! A single-threaded client: every operation runs on the caller's thread and
//! the connection only advances while the caller is inside a client method.
//! Keep-alive pings, QoS 1 resends and automatic reconnects with exponential
//! backoff all happen from within [`Client::yield_now`] and the blocking
//! calls.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use dhtlink_client::{Client, ClientConfig, InboundMessage, QoS, TlsConfig};
//!
//! let tls = TlsConfig {
//!     ca_cert: Some("certs/root-CA.crt".into()),
//!     client_cert: Some("certs/node1.cert.pem".into()),
//!     client_key: Some("certs/node1.private.key".into()),
//!     ..Default::default()
//! };
//! let config = ClientConfig::new("broker.example.com", 8883)
//!     .client_id("dht11_node1_sub")
//!     .tls(tls);
//!
//! let mut client = Client::new(config);
//! client.connect()?;
//! client.subscribe("node1/dht11", QoS::AtMostOnce, |msg: &InboundMessage| {
//!     println!("{}: {:?}", msg.topic, msg.payload_str());
//!     Ok(())
//! })?;
//!
//! loop {
//!     client.yield_now(Duration::from_millis(200))?;
//! }
//! ```

mod client;
mod clock;
mod config;
mod error;
mod events;
mod pending;
mod reconnect;
mod session;
mod subscription;
mod tls;
mod transport;

#[cfg(test)]
mod mock;

pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ClientConfig, ReconnectConfig, TlsConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_KEEP_ALIVE, DEFAULT_TLS_PORT,
};
pub use error::{ClientError, ConnectRejection, Result};
pub use events::{ClientEvent, InboundMessage, SessionState};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use subscription::{HandlerResult, MessageHandler};
pub use transport::{Connector, TcpTransport, TlsConnector, Transport};

// Re-export useful types from core
pub use dhtlink_core::packet::{ConnackCode, QoS};
