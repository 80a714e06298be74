//! Telemetry payloads and the publisher/subscriber loops.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use dhtlink_client::{Client, ClientError, ClientEvent, InboundMessage, QoS, SessionState};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::value::RawValue;

use crate::config::{ConfigError, TelemetryConfig};
use crate::error::{NodeError, Result};
use crate::sensor::{Sample, Sensor};

/// Local time, two-digit year, `T` separator: `10/15/26T09:30:00`.
pub const TIME_FORMAT: &str = "%m/%d/%yT%H:%M:%S";

/// Default client id of the publisher binary.
pub const PUBLISHER_CLIENT_ID: &str = "dht11_node1_pub";
/// Default client id of the subscriber binary.
pub const SUBSCRIBER_CLIENT_ID: &str = "default_sub";

// Field order is the key order on the wire.
#[derive(Serialize)]
struct Payload {
    time: String,
    humidity: Box<RawValue>,
    temperature: Box<RawValue>,
}

fn two_decimals(value: f32) -> Result<Box<RawValue>> {
    Ok(RawValue::from_string(format!("{:.2}", value))?)
}

/// Render a sample as `{"time":..,"humidity":..,"temperature":..}` with both
/// numbers fixed to two decimals.
pub fn format_payload(sample: &Sample, time: &NaiveDateTime) -> Result<String> {
    let payload = Payload {
        time: time.format(TIME_FORMAT).to_string(),
        humidity: two_decimals(sample.humidity)?,
        temperature: two_decimals(sample.temperature)?,
    };
    Ok(serde_json::to_string(&payload)?)
}

/// `topic<TAB>payload`, the subscriber's output line.
pub fn format_message(message: &InboundMessage) -> String {
    format!(
        "{}\t{}",
        message.topic,
        String::from_utf8_lossy(&message.payload)
    )
}

/// Where the publisher sends payloads.
pub trait TelemetrySink {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> dhtlink_client::Result<()>;
}

/// The connection the run loops drive between ticks.
pub trait TelemetryLink: TelemetrySink {
    fn yield_now(&mut self, max_wait: Duration) -> dhtlink_client::Result<()>;
    fn reconnect(&mut self) -> dhtlink_client::Result<()>;
    fn state(&self) -> SessionState;
    fn is_auto_reconnect_enabled(&self) -> bool;
    fn next_event(&mut self) -> Option<ClientEvent>;
}

impl TelemetrySink for Client {
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> dhtlink_client::Result<()> {
        Client::publish(self, topic, payload, qos)
    }
}

impl TelemetryLink for Client {
    fn yield_now(&mut self, max_wait: Duration) -> dhtlink_client::Result<()> {
        Client::yield_now(self, max_wait)
    }

    fn reconnect(&mut self) -> dhtlink_client::Result<()> {
        Client::reconnect(self)
    }

    fn state(&self) -> SessionState {
        Client::state(self)
    }

    fn is_auto_reconnect_enabled(&self) -> bool {
        Client::is_auto_reconnect_enabled(self)
    }

    fn next_event(&mut self) -> Option<ClientEvent> {
        Client::next_event(self)
    }
}

fn telemetry_qos(config: &TelemetryConfig) -> Result<QoS> {
    QoS::try_from(config.qos)
        .map_err(|e| NodeError::from(ConfigError::Validation(e.to_string())))
}

/// Reads the sensor and publishes one payload per tick.
pub struct TelemetryPublisher<S> {
    sensor: S,
    topic: String,
    qos: QoS,
    publish_interval: Duration,
    retry_interval: Duration,
    published: u64,
}

impl<S: Sensor> TelemetryPublisher<S> {
    pub fn new(sensor: S, config: &TelemetryConfig) -> Result<Self> {
        Ok(Self {
            sensor,
            topic: config.topic.clone(),
            qos: telemetry_qos(config)?,
            publish_interval: config.publish_interval(),
            retry_interval: config.retry_interval(),
            published: 0,
        })
    }

    /// Payloads handed to the sink successfully.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Take one reading and publish it. Returns how long to wait before the
    /// next tick.
    ///
    /// A failed sensor read shortens the wait to the retry interval. A
    /// failed publish is logged and skipped unless the client can no longer
    /// recover on its own.
    pub fn tick<T: TelemetrySink>(&mut self, sink: &mut T, now: NaiveDateTime) -> Result<Duration> {
        let sample = match self.sensor.read_sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Sensor read failed: {}", e);
                return Ok(self.retry_interval);
            }
        };

        let payload = format_payload(&sample, &now)?;
        match sink.publish(&self.topic, payload.as_bytes(), self.qos) {
            Ok(()) => {
                self.published += 1;
                info!("Published to {}: {}", self.topic, payload);
            }
            Err(e) if is_terminal(&e) => return Err(e.into()),
            Err(e) if e.is_timeout() => warn!("Publish to {} not acknowledged: {}", self.topic, e),
            Err(e) => warn!("Publish to {} failed: {}", self.topic, e),
        }
        Ok(self.publish_interval)
    }
}

/// Errors the run loops cannot continue past: the client is Disconnected
/// and will not reconnect by itself.
fn is_terminal(err: &ClientError) -> bool {
    err.is_fatal()
        || matches!(
            err,
            ClientError::NotConnected {
                state: SessionState::Disconnected
            }
        )
}

/// Drain client events and decide whether the loop goes on.
///
/// With automatic reconnects off, a lost connection gets one manual
/// reconnect attempt. If that fails the loop ends.
fn settle<L: TelemetryLink>(link: &mut L, result: dhtlink_client::Result<()>) -> Result<()> {
    while let Some(event) = link.next_event() {
        debug!("Client event: {:?}", event);
    }
    let err = match result {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    let recoverable = err.is_transient()
        || matches!(
            err,
            ClientError::NotConnected {
                state: SessionState::Disconnected
            }
        );
    if recoverable
        && !link.is_auto_reconnect_enabled()
        && link.state() == SessionState::Disconnected
    {
        warn!("{}; attempting manual reconnect", err);
        return match link.reconnect() {
            Ok(()) => {
                info!("Manual reconnect succeeded");
                Ok(())
            }
            Err(e) => {
                error!("Manual reconnect failed: {}", e);
                Err(e.into())
            }
        };
    }

    if is_terminal(&err) {
        return Err(err.into());
    }
    warn!("{}", err);
    Ok(())
}

/// Publish readings forever. Returns only when the client gives up.
pub fn run_publisher<L: TelemetryLink, S: Sensor>(
    link: &mut L,
    publisher: &mut TelemetryPublisher<S>,
) -> Result<()> {
    loop {
        let wait = publisher.tick(link, Local::now().naive_local())?;
        let result = link.yield_now(wait);
        settle(link, result)?;
    }
}

/// Subscribe to the telemetry topic and log every message. Returns only
/// when the client gives up.
pub fn run_subscriber(client: &mut Client, config: &TelemetryConfig) -> Result<()> {
    let granted = client.subscribe(&config.topic, telemetry_qos(config)?, |msg: &InboundMessage| {
        info!("{}", format_message(msg));
        Ok(())
    })?;
    info!("Subscribed to {} (granted {:?})", config.topic, granted);

    let poll = config.poll_interval();
    loop {
        let result = client.yield_now(poll);
        settle(client, result)?;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use bytes::Bytes;
    use chrono::NaiveDate;

    use super::*;
    use crate::sensor::{SensorError, SimulatedSensor};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<(String, String, QoS)>,
        fail_with: Option<fn() -> ClientError>,
    }

    impl TelemetrySink for RecordingSink {
        fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> dhtlink_client::Result<()> {
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            self.sent.push((
                topic.to_string(),
                String::from_utf8(payload.to_vec()).unwrap(),
                qos,
            ));
            Ok(())
        }
    }

    struct FlakySensor {
        failures: u32,
    }

    impl Sensor for FlakySensor {
        fn read_sample(&mut self) -> std::result::Result<Sample, SensorError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(SensorError::Timeout);
            }
            Ok(Sample {
                temperature: 21.456,
                humidity: 40.0,
            })
        }
    }

    #[test]
    fn test_payload_format() {
        let sample = Sample {
            temperature: 32.0,
            humidity: 50.0,
        };
        let payload = format_payload(&sample, &at(9, 30, 5)).unwrap();
        assert_eq!(
            payload,
            r#"{"time":"10/15/26T09:30:05","humidity":50.00,"temperature":32.00}"#
        );
    }

    #[test]
    fn test_payload_rounds_to_two_decimals() {
        let sample = Sample {
            temperature: 21.456,
            humidity: 7.0,
        };
        let payload = format_payload(&sample, &at(23, 59, 59)).unwrap();
        assert_eq!(
            payload,
            r#"{"time":"10/15/26T23:59:59","humidity":7.00,"temperature":21.46}"#
        );
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["humidity"], 7.0);
    }

    #[test]
    fn test_payload_rejects_nan() {
        let sample = Sample {
            temperature: f32::NAN,
            humidity: 50.0,
        };
        assert!(matches!(
            format_payload(&sample, &at(0, 0, 0)),
            Err(NodeError::Payload(_))
        ));
    }

    #[test]
    fn test_message_line() {
        let message = InboundMessage {
            topic: "node1/dht11".into(),
            payload: Bytes::from_static(br#"{"humidity":50.00}"#),
            qos: QoS::AtMostOnce,
            retain: false,
        };
        assert_eq!(format_message(&message), "node1/dht11\t{\"humidity\":50.00}");
    }

    #[test]
    fn test_tick_publishes_and_waits_publish_interval() {
        let config = TelemetryConfig::default();
        let mut publisher = TelemetryPublisher::new(SimulatedSensor::new(), &config).unwrap();
        let mut sink = RecordingSink::default();

        let wait = publisher.tick(&mut sink, at(12, 0, 0)).unwrap();

        assert_eq!(wait, Duration::from_secs(5));
        assert_eq!(publisher.published(), 1);
        assert_eq!(
            sink.sent,
            vec![(
                "node1/dht11".to_string(),
                r#"{"time":"10/15/26T12:00:00","humidity":50.00,"temperature":32.00}"#.to_string(),
                QoS::AtMostOnce,
            )]
        );
    }

    #[test]
    fn test_tick_retries_sooner_after_sensor_failure() {
        let config = TelemetryConfig::default();
        let mut publisher = TelemetryPublisher::new(FlakySensor { failures: 2 }, &config).unwrap();
        let mut sink = RecordingSink::default();

        assert_eq!(publisher.tick(&mut sink, at(12, 0, 0)).unwrap(), Duration::from_secs(1));
        assert_eq!(publisher.tick(&mut sink, at(12, 0, 1)).unwrap(), Duration::from_secs(1));
        assert!(sink.sent.is_empty());

        assert_eq!(publisher.tick(&mut sink, at(12, 0, 2)).unwrap(), Duration::from_secs(5));
        assert_eq!(sink.sent.len(), 1);
        assert!(sink.sent[0].1.contains(r#""temperature":21.46"#));
    }

    #[test]
    fn test_tick_skips_recoverable_publish_failure() {
        let config = TelemetryConfig::default();
        let mut publisher = TelemetryPublisher::new(SimulatedSensor::new(), &config).unwrap();
        let mut sink = RecordingSink {
            fail_with: Some(|| ClientError::ConnectionLost {
                reason: "connection reset".into(),
            }),
            ..Default::default()
        };

        let wait = publisher.tick(&mut sink, at(12, 0, 0)).unwrap();
        assert_eq!(wait, Duration::from_secs(5));
        assert_eq!(publisher.published(), 0);

        let mut sink = RecordingSink {
            fail_with: Some(|| ClientError::NotConnected {
                state: SessionState::Reconnecting,
            }),
            ..Default::default()
        };
        assert!(publisher.tick(&mut sink, at(12, 0, 5)).is_ok());

        let mut sink = RecordingSink {
            fail_with: Some(|| ClientError::PublishTimeout {
                topic: "node1/dht11".into(),
                packet_id: 3,
                attempts: 3,
            }),
            ..Default::default()
        };
        let wait = publisher.tick(&mut sink, at(12, 0, 10)).unwrap();
        assert_eq!(wait, Duration::from_secs(5));
        assert_eq!(publisher.published(), 0);
    }

    #[test]
    fn test_tick_stops_when_client_gives_up() {
        let config = TelemetryConfig::default();
        let mut publisher = TelemetryPublisher::new(SimulatedSensor::new(), &config).unwrap();

        let mut sink = RecordingSink {
            fail_with: Some(|| ClientError::ReconnectFailed { attempts: 10 }),
            ..Default::default()
        };
        assert!(matches!(
            publisher.tick(&mut sink, at(12, 0, 0)),
            Err(NodeError::Client(ClientError::ReconnectFailed { attempts: 10 }))
        ));

        let mut sink = RecordingSink {
            fail_with: Some(|| ClientError::NotConnected {
                state: SessionState::Disconnected,
            }),
            ..Default::default()
        };
        assert!(publisher.tick(&mut sink, at(12, 0, 5)).is_err());
    }

    #[test]
    fn test_publisher_uses_configured_qos() {
        let config = TelemetryConfig {
            qos: 1,
            topic: "node7/dht11".into(),
            ..Default::default()
        };
        let mut publisher = TelemetryPublisher::new(SimulatedSensor::new(), &config).unwrap();
        let mut sink = RecordingSink::default();
        publisher.tick(&mut sink, at(8, 0, 0)).unwrap();
        assert_eq!(sink.sent[0].0, "node7/dht11");
        assert_eq!(sink.sent[0].2, QoS::AtLeastOnce);
    }

    /// A connection whose `yield_now` outcomes are scripted. Each entry
    /// also sets the state the client is left in.
    struct ScriptedLink {
        state: SessionState,
        auto_reconnect: bool,
        yields: VecDeque<(Option<ClientError>, SessionState)>,
        reconnect_error: Option<fn() -> ClientError>,
        reconnects: u32,
        published: u32,
        events: VecDeque<ClientEvent>,
    }

    impl ScriptedLink {
        fn new(state: SessionState, auto_reconnect: bool) -> Self {
            Self {
                state,
                auto_reconnect,
                yields: VecDeque::new(),
                reconnect_error: None,
                reconnects: 0,
                published: 0,
                events: VecDeque::new(),
            }
        }
    }

    impl TelemetrySink for ScriptedLink {
        fn publish(&mut self, _topic: &str, _payload: &[u8], _qos: QoS) -> dhtlink_client::Result<()> {
            if self.state != SessionState::Connected {
                return Err(ClientError::NotConnected { state: self.state });
            }
            self.published += 1;
            Ok(())
        }
    }

    impl TelemetryLink for ScriptedLink {
        fn yield_now(&mut self, _max_wait: Duration) -> dhtlink_client::Result<()> {
            let (error, state) = self
                .yields
                .pop_front()
                .unwrap_or((Some(ClientError::ReconnectFailed { attempts: 10 }), SessionState::Disconnected));
            self.state = state;
            match error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn reconnect(&mut self) -> dhtlink_client::Result<()> {
            self.reconnects += 1;
            if let Some(make) = self.reconnect_error {
                return Err(make());
            }
            self.state = SessionState::Connected;
            Ok(())
        }

        fn state(&self) -> SessionState {
            self.state
        }

        fn is_auto_reconnect_enabled(&self) -> bool {
            self.auto_reconnect
        }

        fn next_event(&mut self) -> Option<ClientEvent> {
            self.events.pop_front()
        }
    }

    fn lost() -> ClientError {
        ClientError::ConnectionLost {
            reason: "connection closed by broker".into(),
        }
    }

    #[test]
    fn test_manual_reconnect_when_auto_reconnect_disabled() {
        let mut link = ScriptedLink::new(SessionState::Disconnected, false);
        link.events.push_back(ClientEvent::ConnectionLost {
            reason: "connection closed by broker".into(),
        });

        settle(&mut link, Err(lost())).unwrap();

        assert_eq!(link.reconnects, 1);
        assert_eq!(link.state, SessionState::Connected);
        assert!(link.events.is_empty());

        // A publish that found the client already disconnected is retried
        // the same way on the next pass.
        link.state = SessionState::Disconnected;
        settle(
            &mut link,
            Err(ClientError::NotConnected {
                state: SessionState::Disconnected,
            }),
        )
        .unwrap();
        assert_eq!(link.reconnects, 2);
    }

    #[test]
    fn test_failed_manual_reconnect_ends_loop() {
        let mut link = ScriptedLink::new(SessionState::Disconnected, false);
        link.reconnect_error = Some(|| ClientError::Connect {
            address: "broker.local:8883".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });

        assert!(matches!(
            settle(&mut link, Err(lost())),
            Err(NodeError::Client(ClientError::Connect { .. }))
        ));
        assert_eq!(link.reconnects, 1);
    }

    #[test]
    fn test_no_manual_reconnect_while_auto_reconnect_runs() {
        let mut link = ScriptedLink::new(SessionState::Reconnecting, true);
        settle(
            &mut link,
            Err(ClientError::NotConnected {
                state: SessionState::Reconnecting,
            }),
        )
        .unwrap();
        assert_eq!(link.reconnects, 0);

        link.state = SessionState::Disconnected;
        assert!(matches!(
            settle(&mut link, Err(ClientError::ReconnectFailed { attempts: 10 })),
            Err(NodeError::Client(ClientError::ReconnectFailed { .. }))
        ));
        assert_eq!(link.reconnects, 0);
    }

    #[test]
    fn test_fatal_errors_skip_manual_reconnect() {
        let mut link = ScriptedLink::new(SessionState::Disconnected, false);
        assert!(settle(&mut link, Err(ClientError::Tls("bad certificate".into()))).is_err());
        assert_eq!(link.reconnects, 0);
    }

    #[test]
    fn test_publisher_recovers_from_dropped_connection() {
        let mut link = ScriptedLink::new(SessionState::Connected, false);
        link.yields.push_back((Some(lost()), SessionState::Disconnected));
        link.yields.push_back((None, SessionState::Connected));

        let config = TelemetryConfig::default();
        let mut publisher = TelemetryPublisher::new(SimulatedSensor::new(), &config).unwrap();
        let result = run_publisher(&mut link, &mut publisher);

        assert!(matches!(
            result,
            Err(NodeError::Client(ClientError::ReconnectFailed { .. }))
        ));
        assert_eq!(link.reconnects, 1);
        assert_eq!(link.published, 3);
        assert_eq!(publisher.published(), 3);
    }
}
