//! MQTT 3.1.1 packet types and codec.
//!
//! Encoders append to a caller-owned `Vec<u8>` so a session can batch
//! several packets into one write. `decode_packet` never blocks: it
//! returns `Ok(None)` until a whole packet is present in the buffer.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::varint;

/// Protocol name carried in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;
/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// MQTT Control Packet Types (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    Connack = 2,
    Publish = 3,
    Puback = 4,
    Subscribe = 8,
    Suback = 9,
    Pingreq = 12,
    Pingresp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::Connack),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::Puback),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::Suback),
            12 => Ok(PacketType::Pingreq),
            13 => Ok(PacketType::Pingresp),
            14 => Ok(PacketType::Disconnect),
            _ => Err(ProtocolError::InvalidPacketType(value)),
        }
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)] // MQTT protocol names
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid QoS: {}",
                value
            ))),
        }
    }
}

/// CONNACK return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnackCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernamePassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnackCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnackCode::Accepted),
            1 => Ok(ConnackCode::UnacceptableProtocolVersion),
            2 => Ok(ConnackCode::IdentifierRejected),
            3 => Ok(ConnackCode::ServerUnavailable),
            4 => Ok(ConnackCode::BadUsernamePassword),
            5 => Ok(ConnackCode::NotAuthorized),
            _ => Err(ProtocolError::MalformedPacket(format!(
                "Invalid CONNACK return code: {}",
                value
            ))),
        }
    }
}

/// MQTT Packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Connack(Connack),
    Publish(Publish),
    Puback { packet_id: u16 },
    Subscribe(Subscribe),
    Suback(Suback),
    Pingreq,
    Pingresp,
    Disconnect,
}

impl Packet {
    /// Fixed-header packet type.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::Connack(_) => PacketType::Connack,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Puback { .. } => PacketType::Puback,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Suback(_) => PacketType::Suback,
            Packet::Pingreq => PacketType::Pingreq,
            Packet::Pingresp => PacketType::Pingresp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }
}

/// CONNECT packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl Connect {
    /// CONNECT without credentials (certificate-authenticated brokers).
    pub fn new(client_id: impl Into<String>, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }
}

/// CONNACK packet data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connack {
    pub session_present: bool,
    pub code: ConnackCode,
}

/// PUBLISH packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present exactly when `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

/// SUBSCRIBE packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

/// SUBACK packet data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suback {
    pub packet_id: u16,
    /// One per requested filter: granted QoS (0x00-0x02) or 0x80 on failure.
    pub return_codes: Vec<u8>,
}

/// Cursor over the variable header and payload of one packet.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| truncated("expected 1 byte"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated(&format!(
                "expected {} bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        // MQTT-1.5.3-2: UTF-8 string MUST NOT contain null character U+0000
        if bytes.contains(&0u8) {
            return Err(ProtocolError::MalformedPacket(
                "UTF-8 string must not contain null character".into(),
            ));
        }
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    fn finish(&self, packet_type: PacketType) -> Result<()> {
        if self.remaining() != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "{:?} has {} trailing bytes",
                packet_type,
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn truncated(detail: &str) -> ProtocolError {
    ProtocolError::MalformedPacket(format!("truncated packet: {}", detail))
}

/// Try to decode a complete packet from the start of `buf`.
///
/// Returns `Ok(Some((packet, bytes_consumed)))` if successful, `Ok(None)` if
/// more data is needed, or `Err` on protocol errors.
/// `max_packet_size` of 0 means no limit beyond the varint maximum.
pub fn decode_packet(buf: &[u8], max_packet_size: usize) -> Result<Option<(Packet, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let fixed_header = buf[0];
    let packet_type = PacketType::try_from(fixed_header >> 4)?;
    let flags = fixed_header & 0x0F;

    let Some((remaining_len, len_bytes)) = varint::decode(&buf[1..])? else {
        return Ok(None);
    };

    let header_len = 1 + len_bytes;
    let total_len = header_len + remaining_len;

    if max_packet_size > 0 && total_len > max_packet_size {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size,
        });
    }

    if buf.len() < total_len {
        return Ok(None);
    }

    // MQTT-3.8.1-1: SUBSCRIBE fixed header flags MUST be 0010; every other
    // packet except PUBLISH reserves them as 0000.
    let expected_flags = match packet_type {
        PacketType::Publish => None,
        PacketType::Subscribe => Some(0x02),
        _ => Some(0x00),
    };
    if let Some(expected) = expected_flags {
        if flags != expected {
            return Err(ProtocolError::MalformedPacket(format!(
                "{:?} fixed header flags must be {:#04x}, got {:#04x}",
                packet_type, expected, flags
            )));
        }
    }

    let body = &buf[header_len..total_len];
    let packet = match packet_type {
        PacketType::Connect => decode_connect(body)?,
        PacketType::Connack => decode_connack(body)?,
        PacketType::Publish => decode_publish(flags, body)?,
        PacketType::Puback => decode_puback(body)?,
        PacketType::Subscribe => decode_subscribe(body)?,
        PacketType::Suback => decode_suback(body)?,
        PacketType::Pingreq => decode_empty(body, PacketType::Pingreq, Packet::Pingreq)?,
        PacketType::Pingresp => decode_empty(body, PacketType::Pingresp, Packet::Pingresp)?,
        PacketType::Disconnect => {
            decode_empty(body, PacketType::Disconnect, Packet::Disconnect)?
        }
    };

    Ok(Some((packet, total_len)))
}

fn decode_empty(body: &[u8], packet_type: PacketType, packet: Packet) -> Result<Packet> {
    Decoder::new(body).finish(packet_type)?;
    Ok(packet)
}

fn decode_connect(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);

    let protocol_name = dec.read_string()?;
    if protocol_name != PROTOCOL_NAME {
        return Err(ProtocolError::MalformedPacket(format!(
            "Invalid protocol name: {}",
            protocol_name
        )));
    }
    let level = dec.read_u8()?;
    if level != PROTOCOL_LEVEL {
        return Err(ProtocolError::MalformedPacket(format!(
            "Unsupported protocol level: {}",
            level
        )));
    }

    let flags = dec.read_u8()?;
    // MQTT-3.1.2-3: reserved bit must be zero
    if flags & 0x01 != 0 {
        return Err(ProtocolError::MalformedPacket(
            "CONNECT reserved flag set".into(),
        ));
    }
    if flags & 0x04 != 0 {
        return Err(ProtocolError::MalformedPacket(
            "Will messages are not supported".into(),
        ));
    }
    let clean_session = flags & 0x02 != 0;
    let has_password = flags & 0x40 != 0;
    let has_username = flags & 0x80 != 0;
    if has_password && !has_username {
        return Err(ProtocolError::MalformedPacket(
            "Password flag set without username".into(),
        ));
    }

    let keep_alive = dec.read_u16()?;
    let client_id = dec.read_string()?;
    let username = if has_username {
        Some(dec.read_string()?)
    } else {
        None
    };
    let password = if has_password {
        Some(dec.read_binary()?)
    } else {
        None
    };
    dec.finish(PacketType::Connect)?;

    Ok(Packet::Connect(Connect {
        client_id,
        keep_alive,
        clean_session,
        username,
        password,
    }))
}

fn decode_connack(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let ack_flags = dec.read_u8()?;
    if ack_flags & 0xFE != 0 {
        return Err(ProtocolError::MalformedPacket(format!(
            "Invalid CONNACK flags: {:#04x}",
            ack_flags
        )));
    }
    let code = ConnackCode::try_from(dec.read_u8()?)?;
    dec.finish(PacketType::Connack)?;

    Ok(Packet::Connack(Connack {
        session_present: ack_flags & 0x01 != 0,
        code,
    }))
}

fn decode_publish(flags: u8, body: &[u8]) -> Result<Packet> {
    let dup = flags & 0x08 != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = flags & 0x01 != 0;

    let mut dec = Decoder::new(body);
    let topic = dec.read_string()?;

    let packet_id = if qos != QoS::AtMostOnce {
        let id = dec.read_u16()?;
        if id == 0 {
            return Err(ProtocolError::MalformedPacket(
                "PUBLISH packet identifier must be non-zero".into(),
            ));
        }
        Some(id)
    } else {
        None
    };

    let payload = Bytes::copy_from_slice(dec.read_rest());

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload,
    }))
}

fn decode_puback(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_u16()?;
    dec.finish(PacketType::Puback)?;
    Ok(Packet::Puback { packet_id })
}

fn decode_subscribe(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_u16()?;

    let mut filters = Vec::new();
    while dec.remaining() > 0 {
        let filter = dec.read_string()?;
        let options = dec.read_u8()?;
        if options & 0xFC != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "Invalid requested QoS byte: {:#04x}",
                options
            )));
        }
        filters.push((filter, QoS::try_from(options)?));
    }

    // MQTT-3.8.3-3: at least one topic filter
    if filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE must contain at least one topic filter".into(),
        ));
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, filters }))
}

fn decode_suback(body: &[u8]) -> Result<Packet> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_u16()?;
    let return_codes = dec.read_rest().to_vec();
    if let Some(code) = return_codes
        .iter()
        .find(|&&c| c > 0x02 && c != SUBACK_FAILURE)
    {
        return Err(ProtocolError::MalformedPacket(format!(
            "Invalid SUBACK return code: {:#04x}",
            code
        )));
    }
    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

// === Encoding ===

/// Encode any packet into `buf`.
pub fn encode_packet(packet: &Packet, buf: &mut Vec<u8>) -> Result<()> {
    match packet {
        Packet::Connect(connect) => encode_connect(connect, buf),
        Packet::Connack(connack) => {
            encode_connack(connack, buf);
            Ok(())
        }
        Packet::Publish(publish) => encode_publish(publish, buf),
        Packet::Puback { packet_id } => {
            encode_puback(*packet_id, buf);
            Ok(())
        }
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe, buf),
        Packet::Suback(suback) => encode_suback(suback, buf),
        Packet::Pingreq => {
            encode_pingreq(buf);
            Ok(())
        }
        Packet::Pingresp => {
            encode_pingresp(buf);
            Ok(())
        }
        Packet::Disconnect => {
            encode_disconnect(buf);
            Ok(())
        }
    }
}

/// Encode a CONNECT packet.
pub fn encode_connect(connect: &Connect, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::with_capacity(16 + connect.client_id.len());

    write_string(PROTOCOL_NAME, &mut body)?;
    body.push(PROTOCOL_LEVEL);

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }
    body.push(flags);
    body.extend_from_slice(&connect.keep_alive.to_be_bytes());

    write_string(&connect.client_id, &mut body)?;
    if let Some(ref username) = connect.username {
        write_string(username, &mut body)?;
    }
    if let Some(ref password) = connect.password {
        write_binary(password, &mut body)?;
    }

    write_packet(PacketType::Connect, 0, &body, buf)
}

/// Encode a CONNACK packet.
pub fn encode_connack(connack: &Connack, buf: &mut Vec<u8>) {
    buf.push((PacketType::Connack as u8) << 4);
    buf.push(2);
    buf.push(u8::from(connack.session_present));
    buf.push(connack.code as u8);
}

/// Encode a PUBLISH packet.
pub fn encode_publish(publish: &Publish, buf: &mut Vec<u8>) -> Result<()> {
    if (publish.qos == QoS::AtMostOnce) != publish.packet_id.is_none() {
        return Err(ProtocolError::MalformedPacket(
            "PUBLISH packet identifier must be present exactly when QoS > 0".into(),
        ));
    }

    let mut flags = (publish.qos as u8) << 1;
    if publish.dup {
        flags |= 0x08;
    }
    if publish.retain {
        flags |= 0x01;
    }

    let mut body = Vec::with_capacity(4 + publish.topic.len() + publish.payload.len());
    write_string(&publish.topic, &mut body)?;
    if let Some(id) = publish.packet_id {
        body.extend_from_slice(&id.to_be_bytes());
    }
    body.extend_from_slice(&publish.payload);

    write_packet(PacketType::Publish, flags, &body, buf)
}

/// Encode a PUBACK packet.
pub fn encode_puback(packet_id: u16, buf: &mut Vec<u8>) {
    buf.push((PacketType::Puback as u8) << 4);
    buf.push(2);
    buf.extend_from_slice(&packet_id.to_be_bytes());
}

/// Encode a SUBSCRIBE packet.
pub fn encode_subscribe(subscribe: &Subscribe, buf: &mut Vec<u8>) -> Result<()> {
    if subscribe.filters.is_empty() {
        return Err(ProtocolError::MalformedPacket(
            "SUBSCRIBE must contain at least one topic filter".into(),
        ));
    }

    let mut body = Vec::new();
    body.extend_from_slice(&subscribe.packet_id.to_be_bytes());
    for (filter, qos) in &subscribe.filters {
        write_string(filter, &mut body)?;
        body.push(*qos as u8);
    }

    // Fixed header flags must be 0x02
    write_packet(PacketType::Subscribe, 0x02, &body, buf)
}

/// Encode a SUBACK packet.
pub fn encode_suback(suback: &Suback, buf: &mut Vec<u8>) -> Result<()> {
    let mut body = Vec::with_capacity(2 + suback.return_codes.len());
    body.extend_from_slice(&suback.packet_id.to_be_bytes());
    body.extend_from_slice(&suback.return_codes);
    write_packet(PacketType::Suback, 0, &body, buf)
}

/// Encode a PINGREQ packet.
pub fn encode_pingreq(buf: &mut Vec<u8>) {
    buf.push((PacketType::Pingreq as u8) << 4);
    buf.push(0);
}

/// Encode a PINGRESP packet.
pub fn encode_pingresp(buf: &mut Vec<u8>) {
    buf.push((PacketType::Pingresp as u8) << 4);
    buf.push(0);
}

/// Encode a DISCONNECT packet.
pub fn encode_disconnect(buf: &mut Vec<u8>) {
    buf.push((PacketType::Disconnect as u8) << 4);
    buf.push(0);
}

fn write_packet(packet_type: PacketType, flags: u8, body: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    let start = buf.len();
    buf.reserve(1 + varint::encoded_len(body.len()) + body.len());
    buf.push(((packet_type as u8) << 4) | flags);
    if let Err(e) = varint::encode(body.len(), buf) {
        buf.truncate(start);
        return Err(e);
    }
    buf.extend_from_slice(body);
    Ok(())
}

fn write_string(s: &str, buf: &mut Vec<u8>) -> Result<()> {
    write_binary(s.as_bytes(), buf)
}

fn write_binary(bytes: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        ProtocolError::MalformedPacket(format!(
            "field of {} bytes exceeds 65535",
            bytes.len()
        ))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}
