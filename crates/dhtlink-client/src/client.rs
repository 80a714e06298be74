//! Blocking client API over the session state machine.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dhtlink_core::packet::{QoS, SUBACK_FAILURE};
use dhtlink_core::{validate_topic_filter, validate_topic_name};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, InboundMessage, SessionState};
use crate::session::{Ack, Session};
use crate::subscription::{HandlerResult, MessageHandler};
use crate::transport::{Connector, TlsConnector};

/// Upper bound for a single poll while blocked on an acknowledgment.
const WAIT_STEP: Duration = Duration::from_millis(100);

/// MQTT client.
///
/// All I/O happens on the calling thread. Blocking calls (`connect`,
/// `subscribe`, QoS 1 `publish`) drive the connection until their
/// acknowledgment arrives; between them, call [`Client::yield_now`] to
/// receive messages, answer keep-alives and run reconnects.
pub struct Client {
    session: Session,
}

impl Client {
    /// Create a client that connects over TCP/TLS.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, TlsConnector::new(), Arc::new(SystemClock))
    }

    /// Create a client with a custom transport and time source.
    pub fn with_connector<C>(config: ClientConfig, connector: C, clock: Arc<dyn Clock>) -> Self
    where
        C: Connector + 'static,
    {
        Self {
            session: Session::new(config, Box::new(connector), clock),
        }
    }

    /// Connect and wait for CONNACK.
    pub fn connect(&mut self) -> Result<()> {
        let config = self.session.config();
        log::info!(
            "Connecting to {} as '{}'",
            config.address(),
            config.client_id
        );
        self.session.start_connect()?;
        while self.session.state() != SessionState::Connected {
            self.session.poll(WAIT_STEP)?;
            self.dispatch();
        }
        Ok(())
    }

    /// Publish `payload` to `topic`.
    ///
    /// QoS 0 returns once the packet is written. QoS 1 waits for PUBACK,
    /// re-sending with DUP set up to `publish_retries` times.
    pub fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> Result<()> {
        validate_topic_name(topic).map_err(ClientError::InvalidTopic)?;
        check_qos(qos)?;
        match self
            .session
            .publish(topic, Bytes::copy_from_slice(payload), qos)?
        {
            None => Ok(()),
            Some(packet_id) => self.wait_for(packet_id).map(|_| ()),
        }
    }

    /// Subscribe to `filter` and wait for SUBACK. Returns the granted QoS.
    ///
    /// Subscribing again to a registered filter replaces its handler. The
    /// registration survives reconnects; it is rolled back if the broker
    /// rejects it or does not answer.
    pub fn subscribe<F>(&mut self, filter: &str, qos: QoS, handler: F) -> Result<QoS>
    where
        F: FnMut(&InboundMessage) -> HandlerResult + Send + 'static,
    {
        self.subscribe_with(filter, qos, Box::new(handler))
    }

    /// Like [`Client::subscribe`], for handlers that are not closures.
    pub fn subscribe_with(
        &mut self,
        filter: &str,
        qos: QoS,
        handler: Box<dyn MessageHandler>,
    ) -> Result<QoS> {
        validate_topic_filter(filter).map_err(ClientError::InvalidTopic)?;
        check_qos(qos)?;
        self.session.ensure_connected()?;

        let previous = self.session.subscriptions_mut().insert(filter, qos, handler);
        let result = match self.session.subscribe(filter, qos) {
            Ok(packet_id) => self.wait_for(packet_id),
            Err(e) => Err(e),
        };

        match result {
            Ok(Ack::Subscribed { return_code }) if return_code != SUBACK_FAILURE => {
                let granted = QoS::try_from(return_code).unwrap_or(qos);
                log::info!("Subscribed to '{}' (granted {:?})", filter, granted);
                Ok(granted)
            }
            Ok(_) => {
                log::warn!("Broker rejected subscription to '{}'", filter);
                self.session.subscriptions_mut().restore(filter, previous);
                Err(ClientError::SubscribeRejected {
                    filter: filter.to_string(),
                })
            }
            Err(e) => {
                self.session.subscriptions_mut().restore(filter, previous);
                Err(e)
            }
        }
    }

    /// Drive I/O and dispatch messages for up to `max_wait`.
    ///
    /// Returns early only on error. While reconnecting this waits out the
    /// backoff and makes the next attempt when it is due.
    pub fn yield_now(&mut self, max_wait: Duration) -> Result<()> {
        let clock = Arc::clone(self.session.clock());
        let deadline = clock.now() + max_wait;
        loop {
            let remaining = deadline.saturating_duration_since(clock.now());
            let result = self.session.poll(remaining);
            self.dispatch();
            result?;
            if clock.now() >= deadline {
                return Ok(());
            }
        }
    }

    /// Send DISCONNECT (if connected) and close the connection.
    ///
    /// Subscriptions are kept for the next `connect` unless
    /// `retain_subscriptions` is off.
    pub fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect()
    }

    /// Drop any current connection or reconnect schedule and connect again,
    /// re-subscribing every registered filter. No-op when connected.
    pub fn reconnect(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Connected {
            log::debug!("reconnect() while connected, nothing to do");
            return Ok(());
        }
        self.session.reset_for_reconnect();
        self.connect()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Connected
    }

    /// Enable or disable automatic reconnects at runtime.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.session.set_auto_reconnect(enabled);
    }

    pub fn is_auto_reconnect_enabled(&self) -> bool {
        self.session.auto_reconnect()
    }

    /// Next lifecycle event, oldest first.
    pub fn next_event(&mut self) -> Option<ClientEvent> {
        self.session.next_event()
    }

    /// Commands still waiting for an acknowledgment.
    pub fn pending_commands(&self) -> usize {
        self.session.pending_len()
    }

    /// Registered filters and their requested QoS, in registration order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.session
            .subscriptions()
            .iter()
            .map(|(filter, qos)| (filter.to_string(), qos))
            .collect()
    }

    pub fn config(&self) -> &ClientConfig {
        self.session.config()
    }

    /// Drive the session until `packet_id` is resolved.
    ///
    /// The session resolves every command through its own timers; the hard
    /// limit here only bounds the wait if a custom transport or clock keeps
    /// that from happening.
    fn wait_for(&mut self, packet_id: u16) -> Result<Ack> {
        let clock = Arc::clone(self.session.clock());
        let config = self.session.config();
        let limit = config
            .command_timeout
            .saturating_mul(config.publish_retries.saturating_add(2));
        let deadline = clock.now() + limit;
        loop {
            if let Some(outcome) = self.session.take_outcome(packet_id) {
                return outcome;
            }
            if clock.now() >= deadline {
                self.session.abandon(packet_id);
                return Err(ClientError::CommandTimeout { packet_id });
            }
            if let Err(e) = self.session.poll(WAIT_STEP) {
                self.session.take_outcome(packet_id);
                return Err(e);
            }
            self.dispatch();
        }
    }

    fn dispatch(&mut self) {
        for message in self.session.take_inbound() {
            self.session.subscriptions_mut().dispatch(&message);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

fn check_qos(qos: QoS) -> Result<()> {
    if qos == QoS::ExactlyOnce {
        return Err(ClientError::InvalidState(
            "QoS 2 is not supported".to_string(),
        ));
    }
    Ok(())
}
