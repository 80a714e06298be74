//! In-memory broker for session tests.
//!
//! Decodes everything the client writes with the real codec and answers
//! like a minimal clean-session broker. Reads with nothing queued advance
//! the shared `ManualClock` by the requested timeout.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use dhtlink_core::packet::{
    encode_packet, Connack, ConnackCode, Packet, Publish, QoS, Suback, SUBACK_FAILURE,
};
use dhtlink_core::{topic_matches_filter, StreamDecoder};
use parking_lot::Mutex;

use crate::clock::{Clock, ManualClock};
use crate::config::TlsConfig;
use crate::error::{ClientError, Result};
use crate::transport::{Connector, Transport};

struct Connection {
    id: u32,
    to_client: VecDeque<u8>,
    decoder: StreamDecoder,
    filters: Vec<String>,
    dropped: bool,
}

struct BrokerState {
    connack: Option<ConnackCode>,
    ack_subscribes: bool,
    reject_filters: Vec<String>,
    ack_publishes: bool,
    answer_pings: bool,
    refuse_opens: u32,
    tls_failure: bool,
    opens: u32,
    connection: Option<Connection>,
    received: Vec<Packet>,
}

impl BrokerState {
    fn live_connection(&mut self, id: u32) -> Option<&mut Connection> {
        self.connection
            .as_mut()
            .filter(|c| c.id == id && !c.dropped)
    }

    fn handle(&mut self, packet: Packet) {
        self.received.push(packet.clone());
        let mut replies = Vec::new();
        match packet {
            Packet::Connect(_) => {
                if let Some(code) = self.connack {
                    replies.push(Packet::Connack(Connack {
                        session_present: false,
                        code,
                    }));
                }
            }
            Packet::Subscribe(subscribe) => {
                let mut return_codes = Vec::new();
                for (filter, qos) in subscribe.filters {
                    if self.reject_filters.contains(&filter) {
                        return_codes.push(SUBACK_FAILURE);
                    } else {
                        return_codes.push(qos as u8);
                        if let Some(conn) = self.connection.as_mut() {
                            conn.filters.push(filter);
                        }
                    }
                }
                if self.ack_subscribes {
                    replies.push(Packet::Suback(Suback {
                        packet_id: subscribe.packet_id,
                        return_codes,
                    }));
                }
            }
            Packet::Publish(publish) => {
                if let (QoS::AtLeastOnce, Some(packet_id), true) =
                    (publish.qos, publish.packet_id, self.ack_publishes)
                {
                    replies.push(Packet::Puback { packet_id });
                }
                let subscribed = self.connection.as_ref().map_or(false, |c| {
                    c.filters
                        .iter()
                        .any(|f| topic_matches_filter(&publish.topic, f))
                });
                if subscribed {
                    replies.push(Packet::Publish(Publish {
                        dup: false,
                        qos: QoS::AtMostOnce,
                        retain: false,
                        topic: publish.topic,
                        packet_id: None,
                        payload: publish.payload,
                    }));
                }
            }
            Packet::Pingreq => {
                if self.answer_pings {
                    replies.push(Packet::Pingresp);
                }
            }
            Packet::Disconnect => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.dropped = true;
                }
            }
            _ => {}
        }
        for reply in replies {
            self.queue(&reply);
        }
    }

    fn queue(&mut self, packet: &Packet) {
        let mut bytes = Vec::new();
        encode_packet(packet, &mut bytes).unwrap();
        self.queue_raw(&bytes);
    }

    fn queue_raw(&mut self, bytes: &[u8]) {
        if let Some(conn) = self.connection.as_mut() {
            conn.to_client.extend(bytes.iter().copied());
        }
    }
}

/// Handle for configuring and inspecting the broker from a test.
#[derive(Clone)]
pub(crate) struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
    clock: ManualClock,
}

impl MockBroker {
    pub(crate) fn new(clock: ManualClock) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                connack: Some(ConnackCode::Accepted),
                ack_subscribes: true,
                reject_filters: Vec::new(),
                ack_publishes: true,
                answer_pings: true,
                refuse_opens: 0,
                tls_failure: false,
                opens: 0,
                connection: None,
                received: Vec::new(),
            })),
            clock,
        }
    }

    pub(crate) fn connector(&self) -> MockConnector {
        MockConnector {
            broker: self.clone(),
        }
    }

    /// `None` means CONNECT is never answered.
    pub(crate) fn set_connack(&self, code: Option<ConnackCode>) {
        self.state.lock().connack = code;
    }

    pub(crate) fn set_ack_subscribes(&self, ack: bool) {
        self.state.lock().ack_subscribes = ack;
    }

    pub(crate) fn reject_filter(&self, filter: &str) {
        self.state.lock().reject_filters.push(filter.to_string());
    }

    pub(crate) fn set_ack_publishes(&self, ack: bool) {
        self.state.lock().ack_publishes = ack;
    }

    pub(crate) fn set_answer_pings(&self, answer: bool) {
        self.state.lock().answer_pings = answer;
    }

    /// Refuse the next `count` connection attempts at the TCP level.
    pub(crate) fn refuse_opens(&self, count: u32) {
        self.state.lock().refuse_opens = count;
    }

    pub(crate) fn fail_tls(&self, fail: bool) {
        self.state.lock().tls_failure = fail;
    }

    /// Break the current connection; the next client read or write fails.
    pub(crate) fn drop_connection(&self) {
        if let Some(conn) = self.state.lock().connection.as_mut() {
            conn.dropped = true;
        }
    }

    pub(crate) fn inject(&self, packet: &Packet) {
        self.state.lock().queue(packet);
    }

    pub(crate) fn inject_raw(&self, bytes: &[u8]) {
        self.state.lock().queue_raw(bytes);
    }

    pub(crate) fn opens(&self) -> u32 {
        self.state.lock().opens
    }

    pub(crate) fn received(&self) -> Vec<Packet> {
        self.state.lock().received.clone()
    }

    pub(crate) fn subscribes_for(&self, filter: &str) -> usize {
        self.received()
            .iter()
            .filter(|p| match p {
                Packet::Subscribe(s) => s.filters.iter().any(|(f, _)| f == filter),
                _ => false,
            })
            .count()
    }

    pub(crate) fn publishes(&self) -> Vec<Publish> {
        self.received()
            .into_iter()
            .filter_map(|p| match p {
                Packet::Publish(publish) => Some(publish),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Packet) -> bool) -> usize {
        self.received().iter().filter(|p| matches(p)).count()
    }
}

pub(crate) struct MockConnector {
    broker: MockBroker,
}

impl Connector for MockConnector {
    fn open(
        &mut self,
        host: &str,
        port: u16,
        _tls: &TlsConfig,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>> {
        let mut state = self.broker.state.lock();
        state.opens += 1;
        if state.tls_failure {
            return Err(ClientError::Tls("invalid peer certificate: UnknownIssuer".into()));
        }
        if state.refuse_opens > 0 {
            state.refuse_opens -= 1;
            return Err(ClientError::Connect {
                address: format!("{}:{}", host, port),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            });
        }
        let id = state.opens;
        state.connection = Some(Connection {
            id,
            to_client: VecDeque::new(),
            decoder: StreamDecoder::default(),
            filters: Vec::new(),
            dropped: false,
        });
        Ok(Box::new(MockTransport {
            broker: self.broker.clone(),
            id,
        }))
    }
}

struct MockTransport {
    broker: MockBroker,
    id: u32,
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        {
            let mut state = self.broker.state.lock();
            let Some(conn) = state.live_connection(self.id) else {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            };
            if !conn.to_client.is_empty() {
                let n = buf.len().min(conn.to_client.len());
                for (slot, byte) in buf.iter_mut().zip(conn.to_client.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        self.broker.clock.sleep(timeout);
        Err(io::Error::from(io::ErrorKind::WouldBlock))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.broker.state.lock();
        let Some(conn) = state.live_connection(self.id) else {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        };
        conn.decoder.feed(bytes);
        let mut packets = Vec::new();
        while let Some(packet) = conn
            .decoder
            .next_packet()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        {
            packets.push(packet);
        }
        for packet in packets {
            state.handle(packet);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(conn) = self.broker.state.lock().live_connection(self.id) {
            conn.dropped = true;
        }
    }
}
