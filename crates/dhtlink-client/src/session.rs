//! Connection state machine.
//!
//! ```text
//! Disconnected --connect()--> Connecting --CONNACK ok--> Connected
//! Connecting --refused / timeout--> Disconnected
//! Connected --transport loss, auto_reconnect--> Reconnecting
//! Connected --transport loss--> Disconnected
//! Reconnecting --CONNACK ok--> Connected (resubscribes)
//! Reconnecting --budget exhausted / TLS failure--> Disconnected
//! any --disconnect()--> Disconnected
//! ```
//!
//! Nothing runs in the background. The session only advances inside
//! `poll`, which the client calls from its blocking operations and from
//! `yield_now`.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dhtlink_core::packet::{
    encode_packet, Connack, ConnackCode, Connect, Packet, Publish, QoS, Suback, Subscribe,
    SUBACK_FAILURE,
};
use dhtlink_core::{ProtocolError, StreamDecoder};

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{ClientError, ConnectRejection, Result};
use crate::events::{ClientEvent, InboundMessage, SessionState};
use crate::pending::{CommandKind, PendingCommand, PendingCommands};
use crate::reconnect::{Backoff, ReconnectPolicy};
use crate::subscription::SubscriptionTable;
use crate::transport::{Connector, Transport};

const READ_BUFFER_SIZE: usize = 4096;
const MAX_QUEUED_EVENTS: usize = 256;

/// Successful outcome of an awaited command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ack {
    Subscribed { return_code: u8 },
    Published,
}

pub(crate) struct Session {
    config: ClientConfig,
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock>,
    state: SessionState,
    transport: Option<Box<dyn Transport>>,
    decoder: StreamDecoder,
    write_buf: Vec<u8>,
    pending: PendingCommands,
    outcomes: HashMap<u16, Result<Ack>>,
    subscriptions: SubscriptionTable,
    inbound: VecDeque<InboundMessage>,
    events: VecDeque<ClientEvent>,
    backoff: Backoff,
    auto_reconnect: bool,
    /// Last time anything was written; drives keep-alive.
    last_sent: Instant,
    ping_sent_at: Option<Instant>,
    connack_deadline: Option<Instant>,
    next_reconnect_at: Option<Instant>,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Box<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let backoff = Backoff::new(ReconnectPolicy::new(&config.reconnect));
        let decoder = StreamDecoder::new(config.max_packet_size);
        let auto_reconnect = config.auto_reconnect;
        let now = clock.now();
        Self {
            config,
            connector,
            clock,
            state: SessionState::Disconnected,
            transport: None,
            decoder,
            write_buf: Vec::with_capacity(READ_BUFFER_SIZE),
            pending: PendingCommands::new(),
            outcomes: HashMap::new(),
            subscriptions: SubscriptionTable::new(),
            inbound: VecDeque::new(),
            events: VecDeque::new(),
            backoff,
            auto_reconnect,
            last_sent: now,
            ping_sent_at: None,
            connack_deadline: None,
            next_reconnect_at: None,
        }
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub(crate) fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub(crate) fn subscriptions_mut(&mut self) -> &mut SubscriptionTable {
        &mut self.subscriptions
    }

    pub(crate) fn take_inbound(&mut self) -> VecDeque<InboundMessage> {
        std::mem::take(&mut self.inbound)
    }

    pub(crate) fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    pub(crate) fn take_outcome(&mut self, packet_id: u16) -> Option<Result<Ack>> {
        self.outcomes.remove(&packet_id)
    }

    /// Forget a command nobody waits for any more.
    pub(crate) fn abandon(&mut self, packet_id: u16) {
        if self.pending.complete(packet_id).is_some() {
            log::warn!("Abandoned unacknowledged packet {}", packet_id);
        }
        self.outcomes.remove(&packet_id);
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.state == SessionState::Connected {
            Ok(())
        } else {
            Err(ClientError::NotConnected { state: self.state })
        }
    }

    /// Open a transport and send CONNECT. CONNACK is handled by `poll`.
    pub(crate) fn start_connect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(ClientError::InvalidState(format!(
                "cannot connect while {}",
                self.state
            )));
        }
        self.outcomes.clear();
        self.next_reconnect_at = None;
        self.backoff.reset();
        let transport = self.open_transport()?;
        self.state = SessionState::Connecting;
        self.begin_session(transport)
    }

    /// Drop whatever connection or reconnect schedule exists, keeping
    /// subscriptions, so that `start_connect` can run.
    pub(crate) fn reset_for_reconnect(&mut self) {
        self.close_transport();
        self.fail_pending("reconnect requested");
        self.state = SessionState::Disconnected;
        self.next_reconnect_at = None;
        self.backoff.reset();
    }

    /// Send DISCONNECT if connected and tear everything down.
    pub(crate) fn disconnect(&mut self) -> Result<()> {
        if self.state == SessionState::Disconnected {
            return Ok(());
        }
        if self.state == SessionState::Connected {
            if let Some(transport) = self.transport.as_mut() {
                self.write_buf.clear();
                encode_packet(&Packet::Disconnect, &mut self.write_buf)
                    .map_err(|e| ClientError::InvalidState(e.to_string()))?;
                if let Err(e) = transport.write_all(&self.write_buf) {
                    log::debug!("Failed to send DISCONNECT: {}", e);
                }
            }
        }
        self.close_transport();
        self.fail_pending("disconnected by client");
        self.outcomes.clear();
        self.inbound.clear();
        self.state = SessionState::Disconnected;
        self.next_reconnect_at = None;
        self.backoff.reset();
        if !self.config.retain_subscriptions {
            self.subscriptions.clear();
        }
        log::info!("Disconnected from {}", self.config.address());
        self.push_event(ClientEvent::Disconnected { reason: None });
        Ok(())
    }

    /// Send SUBSCRIBE for one filter and track it.
    pub(crate) fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<u16> {
        self.ensure_connected()?;
        self.send_subscribe(filter, qos, true)
    }

    /// Send PUBLISH. Returns the packet identifier for QoS 1.
    pub(crate) fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS) -> Result<Option<u16>> {
        self.ensure_connected()?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.allocate_id()?),
        };
        let publish = Publish {
            dup: false,
            qos,
            retain: false,
            topic: topic.to_string(),
            packet_id,
            payload,
        };
        self.send(&Packet::Publish(publish.clone()))?;
        if let Some(packet_id) = packet_id {
            let now = self.clock.now();
            self.pending.insert(PendingCommand {
                packet_id,
                kind: CommandKind::Publish {
                    publish,
                    attempts: 1,
                },
                issued_at: now,
                timeout_at: now + self.config.command_timeout,
                awaited: true,
            });
        }
        Ok(packet_id)
    }

    /// Advance the state machine, waiting at most `max_wait` for input.
    pub(crate) fn poll(&mut self, max_wait: Duration) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {
                return Err(ClientError::NotConnected { state: self.state })
            }
            SessionState::Reconnecting if self.transport.is_none() => {
                return self.poll_reconnect(max_wait)
            }
            _ => {}
        }
        self.read_available(max_wait)?;
        self.check_timers()
    }

    fn open_transport(&mut self) -> Result<Box<dyn Transport>> {
        self.connector.open(
            &self.config.host,
            self.config.port,
            &self.config.tls,
            self.config.connect_timeout,
        )
    }

    fn begin_session(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.transport = Some(transport);
        self.decoder.clear();
        self.ping_sent_at = None;

        let mut connect = Connect::new(
            self.config.client_id.clone(),
            self.config.keep_alive,
            self.config.clean_session,
        );
        connect.username = self.config.username.clone();
        connect.password = self.config.password.clone();
        self.send(&Packet::Connect(connect))?;
        self.connack_deadline = Some(self.clock.now() + self.config.command_timeout);
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<u16> {
        self.pending
            .allocate_id()
            .ok_or_else(|| ClientError::InvalidState("no free packet identifier".to_string()))
    }

    fn send_subscribe(&mut self, filter: &str, qos: QoS, awaited: bool) -> Result<u16> {
        let packet_id = self.allocate_id()?;
        self.send(&Packet::Subscribe(Subscribe {
            packet_id,
            filters: vec![(filter.to_string(), qos)],
        }))?;
        let now = self.clock.now();
        self.pending.insert(PendingCommand {
            packet_id,
            kind: CommandKind::Subscribe {
                filter: filter.to_string(),
                qos,
            },
            issued_at: now,
            timeout_at: now + self.config.command_timeout,
            awaited,
        });
        Ok(packet_id)
    }

    /// Encode and write one packet. A write failure is handled as a
    /// connection loss before the I/O error is returned.
    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.write_buf.clear();
        encode_packet(packet, &mut self.write_buf).map_err(|e| {
            ClientError::InvalidState(format!("cannot encode {:?}: {}", packet.packet_type(), e))
        })?;
        let Some(transport) = self.transport.as_mut() else {
            return Err(ClientError::NotConnected { state: self.state });
        };
        match transport.write_all(&self.write_buf) {
            Ok(()) => {
                log::trace!("Sent {:?} ({} bytes)", packet.packet_type(), self.write_buf.len());
                self.last_sent = self.clock.now();
                Ok(())
            }
            Err(e) => {
                self.connection_lost(&format!("write failed: {}", e))?;
                Err(ClientError::Io(e))
            }
        }
    }

    /// `send` for packets the session emits on its own. A lost connection
    /// is already handled, so only errors that end the session surface.
    fn send_internal(&mut self, packet: &Packet) -> Result<()> {
        match self.send(packet) {
            Err(ClientError::Io(_)) | Err(ClientError::NotConnected { .. }) => Ok(()),
            other => other,
        }
    }

    fn read_available(&mut self, max_wait: Duration) -> Result<()> {
        let wait = self.read_timeout(max_wait);
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        match transport.read(&mut buf, wait) {
            Ok(0) => return self.connection_lost("connection closed by broker"),
            Ok(n) => self.decoder.feed(&buf[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(())
            }
            Err(e) => return self.connection_lost(&format!("read failed: {}", e)),
        }

        let packets: Vec<_> = self.decoder.packets().collect();
        for packet in packets {
            // A handler may have dropped the connection; the rest belongs to it.
            if self.transport.is_none() {
                break;
            }
            match packet {
                Ok(packet) => self.handle_packet(packet)?,
                Err(e) => return self.protocol_violation(e),
            }
        }
        Ok(())
    }

    /// How long a read may block before some timer needs attention.
    fn read_timeout(&self, max_wait: Duration) -> Duration {
        let now = self.clock.now();
        let deadline = [
            self.connack_deadline,
            self.pending.next_deadline(),
            self.keep_alive_deadline(),
        ]
        .into_iter()
        .flatten()
        .fold(now + max_wait, Instant::min);
        deadline.saturating_duration_since(now)
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        match self.config.keep_alive {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs)) / 2),
        }
    }

    fn keep_alive_deadline(&self) -> Option<Instant> {
        if self.state != SessionState::Connected {
            return None;
        }
        let interval = self.keep_alive_interval()?;
        Some(match self.ping_sent_at {
            Some(sent) => sent + self.config.command_timeout,
            None => self.last_sent + interval,
        })
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        log::trace!("Received {:?}", packet.packet_type());
        match packet {
            Packet::Connack(connack) => self.handle_connack(connack),
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::Puback { packet_id } => {
                self.handle_puback(packet_id);
                Ok(())
            }
            Packet::Suback(suback) => {
                self.handle_suback(suback);
                Ok(())
            }
            Packet::Pingresp => {
                self.ping_sent_at = None;
                Ok(())
            }
            other => self.protocol_violation(ProtocolError::MalformedPacket(format!(
                "unexpected {:?} from broker",
                other.packet_type()
            ))),
        }
    }

    fn handle_connack(&mut self, connack: Connack) -> Result<()> {
        let awaiting = self.connack_deadline.is_some()
            && matches!(
                self.state,
                SessionState::Connecting | SessionState::Reconnecting
            );
        if !awaiting {
            return self.protocol_violation(ProtocolError::MalformedPacket(
                "unexpected CONNACK".to_string(),
            ));
        }
        if connack.code == ConnackCode::Accepted {
            return self.on_connected(connack.session_present);
        }

        let state = self.state;
        log::error!(
            "Broker {} refused connection: {:?}",
            self.config.address(),
            connack.code
        );
        self.close_transport();
        self.fail_pending("connection refused");
        self.state = SessionState::Disconnected;
        self.next_reconnect_at = None;
        self.backoff.reset();
        self.push_event(ClientEvent::Disconnected {
            reason: Some(format!("connection refused: {:?}", connack.code)),
        });
        Err(ClientError::ConnectRejected {
            reason: ConnectRejection::Refused(connack.code),
            state,
        })
    }

    fn on_connected(&mut self, session_present: bool) -> Result<()> {
        let reconnected = self.state == SessionState::Reconnecting;
        let attempts = self.backoff.attempts();
        self.connack_deadline = None;
        self.state = SessionState::Connected;
        self.backoff.reset();

        log::info!(
            "Connected to {} as '{}' (session present: {})",
            self.config.address(),
            self.config.client_id,
            session_present
        );
        self.push_event(ClientEvent::Connected { session_present });
        if reconnected {
            self.push_event(ClientEvent::Reconnected { attempts });
        }
        self.resubscribe()
    }

    /// Re-send SUBSCRIBE for every registered filter, in registration order.
    fn resubscribe(&mut self) -> Result<()> {
        let filters: Vec<(String, QoS)> = self
            .subscriptions
            .iter()
            .map(|(filter, qos)| (filter.to_string(), qos))
            .collect();
        for (filter, qos) in filters {
            if self.state != SessionState::Connected {
                break;
            }
            log::debug!("Resubscribing to '{}' ({:?})", filter, qos);
            match self.send_subscribe(&filter, qos, false) {
                Ok(_) | Err(ClientError::Io(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn handle_publish(&mut self, publish: Publish) -> Result<()> {
        let ack = match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => Some(packet_id),
            (QoS::ExactlyOnce, _) => {
                log::warn!(
                    "Received QoS 2 PUBLISH on '{}', delivering without handshake",
                    publish.topic
                );
                None
            }
            _ => None,
        };
        self.inbound.push_back(InboundMessage::from(publish));
        if let Some(packet_id) = ack {
            self.send_internal(&Packet::Puback { packet_id })?;
        }
        Ok(())
    }

    fn handle_puback(&mut self, packet_id: u16) {
        match self.pending.complete(packet_id) {
            Some(command) => match command.kind {
                CommandKind::Publish { .. } => {
                    if command.awaited {
                        self.outcomes.insert(packet_id, Ok(Ack::Published));
                    }
                }
                CommandKind::Subscribe { .. } => {
                    log::warn!("PUBACK for SUBSCRIBE packet {}, ignoring", packet_id);
                    self.pending.insert(command);
                }
            },
            None => log::debug!("PUBACK for unknown packet {}", packet_id),
        }
    }

    fn handle_suback(&mut self, suback: Suback) {
        let packet_id = suback.packet_id;
        let return_code = suback
            .return_codes
            .first()
            .copied()
            .unwrap_or(SUBACK_FAILURE);
        let Some(command) = self.pending.complete(packet_id) else {
            log::debug!("SUBACK for unknown packet {}", packet_id);
            return;
        };
        match command.kind {
            CommandKind::Subscribe { ref filter, qos } => {
                if command.awaited {
                    self.outcomes
                        .insert(packet_id, Ok(Ack::Subscribed { return_code }));
                } else if return_code == SUBACK_FAILURE {
                    log::warn!("Broker rejected resubscribe to '{}'", filter);
                    self.push_event(ClientEvent::SubscriptionRejected {
                        filter: filter.clone(),
                    });
                } else if return_code < qos as u8 {
                    log::warn!(
                        "Resubscribed to '{}' with QoS {} (requested {:?})",
                        filter,
                        return_code,
                        qos
                    );
                } else {
                    log::debug!("Resubscribed to '{}' ({:?})", filter, qos);
                }
            }
            CommandKind::Publish { .. } => {
                log::warn!("SUBACK for PUBLISH packet {}, ignoring", packet_id);
                self.pending.insert(command);
            }
        }
    }

    fn check_timers(&mut self) -> Result<()> {
        let now = self.clock.now();
        if let Some(deadline) = self.connack_deadline {
            if now >= deadline {
                return self.connack_timed_out();
            }
        }
        if self.state != SessionState::Connected {
            return Ok(());
        }

        if let Some(interval) = self.keep_alive_interval() {
            match self.ping_sent_at {
                Some(sent) if now.duration_since(sent) >= self.config.command_timeout => {
                    return self.connection_lost("no PINGRESP within command timeout");
                }
                Some(_) => {}
                None if now.duration_since(self.last_sent) >= interval => {
                    log::trace!("Keep-alive ping");
                    self.send_internal(&Packet::Pingreq)?;
                    if self.state == SessionState::Connected {
                        self.ping_sent_at = Some(now);
                    }
                }
                None => {}
            }
        }

        for command in self.pending.take_expired(now) {
            self.command_expired(command, now)?;
        }
        Ok(())
    }

    fn command_expired(&mut self, command: PendingCommand, now: Instant) -> Result<()> {
        let packet_id = command.packet_id;
        match command.kind {
            CommandKind::Subscribe { filter, qos } => {
                log::warn!(
                    "SUBSCRIBE to '{}' ({:?}, packet {}) timed out",
                    filter,
                    qos,
                    packet_id
                );
                if command.awaited {
                    self.outcomes.insert(
                        packet_id,
                        Err(ClientError::SubscribeTimeout { filter, packet_id }),
                    );
                } else {
                    self.push_event(ClientEvent::CommandTimedOut { packet_id, filter });
                }
            }
            CommandKind::Publish {
                mut publish,
                attempts,
            } => {
                if self.state == SessionState::Connected && attempts <= self.config.publish_retries {
                    log::debug!(
                        "Resending PUBLISH to '{}' (packet {}, attempt {})",
                        publish.topic,
                        packet_id,
                        attempts + 1
                    );
                    publish.dup = true;
                    self.send_internal(&Packet::Publish(publish.clone()))?;
                    if self.state == SessionState::Connected {
                        self.pending.insert(PendingCommand {
                            packet_id,
                            kind: CommandKind::Publish {
                                publish,
                                attempts: attempts + 1,
                            },
                            issued_at: command.issued_at,
                            timeout_at: now + self.config.command_timeout,
                            awaited: command.awaited,
                        });
                    } else if command.awaited {
                        self.outcomes.insert(
                            packet_id,
                            Err(ClientError::ConnectionLost {
                                reason: "connection lost during resend".to_string(),
                            }),
                        );
                    }
                } else {
                    log::warn!(
                        "PUBLISH to '{}' (packet {}) not acknowledged after {} attempts",
                        publish.topic,
                        packet_id,
                        attempts
                    );
                    if command.awaited {
                        self.outcomes.insert(
                            packet_id,
                            Err(ClientError::PublishTimeout {
                                topic: publish.topic,
                                packet_id,
                                attempts,
                            }),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn connack_timed_out(&mut self) -> Result<()> {
        let state = self.state;
        log::warn!(
            "No CONNACK from {} within {:?}",
            self.config.address(),
            self.config.command_timeout
        );
        self.close_transport();
        if state == SessionState::Reconnecting && self.auto_reconnect {
            return self.schedule_reconnect();
        }
        self.state = SessionState::Disconnected;
        self.backoff.reset();
        self.push_event(ClientEvent::Disconnected {
            reason: Some("no CONNACK".to_string()),
        });
        Err(ClientError::ConnectRejected {
            reason: ConnectRejection::Timeout,
            state,
        })
    }

    fn connection_lost(&mut self, reason: &str) -> Result<()> {
        let previous = self.state;
        self.close_transport();
        self.fail_pending(reason);

        match previous {
            SessionState::Connected if self.auto_reconnect => {
                log::warn!("Connection lost: {}", reason);
                self.push_event(ClientEvent::ConnectionLost {
                    reason: reason.to_string(),
                });
                self.state = SessionState::Reconnecting;
                self.schedule_reconnect()
            }
            SessionState::Reconnecting if self.auto_reconnect => {
                log::warn!("Reconnect attempt failed: {}", reason);
                self.schedule_reconnect()
            }
            _ => {
                log::warn!("Connection lost while {}: {}", previous, reason);
                if previous == SessionState::Connected {
                    self.push_event(ClientEvent::ConnectionLost {
                        reason: reason.to_string(),
                    });
                }
                self.state = SessionState::Disconnected;
                self.next_reconnect_at = None;
                self.backoff.reset();
                self.push_event(ClientEvent::Disconnected {
                    reason: Some(reason.to_string()),
                });
                Err(ClientError::ConnectionLost {
                    reason: reason.to_string(),
                })
            }
        }
    }

    fn schedule_reconnect(&mut self) -> Result<()> {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempts();
                log::info!("Reconnect attempt {} in {:?}", attempt, delay);
                self.next_reconnect_at = Some(self.clock.now() + delay);
                self.push_event(ClientEvent::Reconnecting { attempt, delay });
                Ok(())
            }
            None => {
                let attempts = self.backoff.attempts();
                log::error!("Giving up after {} reconnect attempts", attempts);
                self.state = SessionState::Disconnected;
                self.next_reconnect_at = None;
                self.backoff.reset();
                self.push_event(ClientEvent::ReconnectFailed { attempts });
                self.push_event(ClientEvent::Disconnected {
                    reason: Some(format!("reconnect failed after {} attempts", attempts)),
                });
                Err(ClientError::ReconnectFailed { attempts })
            }
        }
    }

    fn poll_reconnect(&mut self, max_wait: Duration) -> Result<()> {
        if !self.auto_reconnect {
            let reason = "automatic reconnect disabled".to_string();
            self.state = SessionState::Disconnected;
            self.next_reconnect_at = None;
            self.backoff.reset();
            self.push_event(ClientEvent::Disconnected {
                reason: Some(reason.clone()),
            });
            return Err(ClientError::ConnectionLost { reason });
        }

        let now = self.clock.now();
        let due = self.next_reconnect_at.unwrap_or(now);
        if now < due {
            self.clock.sleep((due - now).min(max_wait));
            return Ok(());
        }

        self.next_reconnect_at = None;
        let attempt = self.backoff.attempts();
        log::info!(
            "Reconnecting to {} (attempt {})",
            self.config.address(),
            attempt
        );
        match self.open_transport() {
            Ok(transport) => match self.begin_session(transport) {
                Err(ClientError::Io(e)) if self.state == SessionState::Reconnecting => {
                    log::debug!("CONNECT write failed during reconnect: {}", e);
                    Ok(())
                }
                other => other,
            },
            Err(e @ ClientError::Tls(_)) => {
                log::error!("Reconnect aborted: {}", e);
                self.state = SessionState::Disconnected;
                self.backoff.reset();
                self.push_event(ClientEvent::Disconnected {
                    reason: Some(e.to_string()),
                });
                Err(e)
            }
            Err(e) => {
                log::warn!("Reconnect attempt {} failed: {}", attempt, e);
                self.schedule_reconnect()
            }
        }
    }

    fn protocol_violation(&mut self, err: ProtocolError) -> Result<()> {
        log::error!("Protocol violation from {}: {}", self.config.address(), err);
        self.close_transport();
        self.fail_pending(&err.to_string());
        self.state = SessionState::Disconnected;
        self.next_reconnect_at = None;
        self.backoff.reset();
        self.push_event(ClientEvent::Disconnected {
            reason: Some(err.to_string()),
        });
        Err(ClientError::MalformedPacket(err))
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.decoder.clear();
        self.ping_sent_at = None;
        self.connack_deadline = None;
    }

    /// Fail every in-flight command. Callers blocked on one see
    /// `ConnectionLost`.
    fn fail_pending(&mut self, reason: &str) {
        for command in self.pending.drain() {
            if command.awaited {
                self.outcomes.insert(
                    command.packet_id,
                    Err(ClientError::ConnectionLost {
                        reason: reason.to_string(),
                    }),
                );
            } else {
                log::debug!("Dropped pending packet {}: {}", command.packet_id, reason);
            }
        }
    }

    fn push_event(&mut self, event: ClientEvent) {
        if self.events.len() >= MAX_QUEUED_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}
