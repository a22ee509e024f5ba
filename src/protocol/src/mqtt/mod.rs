// Copyright 2024 ProtoSim Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! MQTT 3.1.1 wire codec (§4.1). Fixed header + variable-length remaining
//! length + per-packet-type variable header/payload. Each packet type gets
//! its own `read`/`write` pair, following the fixed-header-then-dispatch
//! shape used across this workspace's codecs.

pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed packet")]
    MalformedPacket,
    #[error("insufficient data to parse a full packet, need {0} more bytes")]
    InsufficientBytes(usize),
    #[error("invalid remaining length")]
    InvalidRemainingLength,
    #[error("invalid protocol level {0}")]
    InvalidProtocolLevel(u8),
    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),
    #[error("invalid qos {0}")]
    InvalidQos(u8),
    #[error("invalid subscribe reason code {0}")]
    InvalidSubscribeReasonCode(u8),
    #[error("invalid connack return code {0}")]
    InvalidConnAckCode(u8),
    #[error("utf8 error")]
    Utf8,
    #[error("boundary error: {0}")]
    BoundaryError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(byte: u8) -> Result<QoS, Error> {
        match byte {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            v => Err(Error::InvalidQos(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_u8(byte: u8) -> Result<PacketType, Error> {
        use PacketType::*;
        Ok(match byte {
            1 => Connect,
            2 => ConnAck,
            3 => Publish,
            4 => PubAck,
            5 => PubRec,
            6 => PubRel,
            7 => PubComp,
            8 => Subscribe,
            9 => SubAck,
            10 => Unsubscribe,
            11 => UnsubAck,
            12 => PingReq,
            13 => PingResp,
            14 => Disconnect,
            v => return Err(Error::InvalidPacketType(v)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedHeader {
    pub byte1: u8,
    pub fixed_header_len: usize,
    pub remaining_len: usize,
}

impl FixedHeader {
    pub fn packet_type(&self) -> Result<PacketType, Error> {
        PacketType::from_u8(self.byte1 >> 4)
    }

    pub fn frame_len(&self) -> usize {
        self.fixed_header_len + self.remaining_len
    }
}

/// Parse the fixed header (1 byte flags + up to 4 bytes remaining length) of
/// a buffered stream without consuming it. Returns `InsufficientBytes` when
/// the full remaining-length field hasn't arrived yet.
pub fn parse_fixed_header(mut stream: impl Iterator<Item = u8>) -> Result<FixedHeader, Error> {
    let byte1 = stream.next().ok_or(Error::InsufficientBytes(2))?;
    let mut remaining_len: usize = 0;
    let mut multiplier = 1usize;
    let mut fixed_header_len = 1usize;
    for _ in 0..4 {
        let byte = stream.next().ok_or(Error::InsufficientBytes(1))?;
        fixed_header_len += 1;
        remaining_len += (byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(FixedHeader {
                byte1,
                fixed_header_len,
                remaining_len,
            });
        }
        multiplier *= 128;
    }
    Err(Error::InvalidRemainingLength)
}

pub fn write_remaining_length(buffer: &mut BytesMut, mut len: usize) -> Result<usize, Error> {
    if len > 268_435_455 {
        return Err(Error::InvalidRemainingLength);
    }
    let mut count = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buffer.put_u8(byte);
        count += 1;
        if len == 0 {
            break;
        }
    }
    Ok(count)
}

pub fn read_u8(bytes: &mut Bytes) -> Result<u8, Error> {
    if !bytes.has_remaining() {
        return Err(Error::MalformedPacket);
    }
    Ok(bytes.get_u8())
}

pub fn read_u16(bytes: &mut Bytes) -> Result<u16, Error> {
    if bytes.remaining() < 2 {
        return Err(Error::MalformedPacket);
    }
    Ok(bytes.get_u16())
}

pub fn read_mqtt_string(bytes: &mut Bytes) -> Result<String, Error> {
    let len = read_u16(bytes)? as usize;
    if bytes.remaining() < len {
        return Err(Error::MalformedPacket);
    }
    let raw = bytes.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Utf8)
}

pub fn read_mqtt_bytes(bytes: &mut Bytes) -> Result<Bytes, Error> {
    let len = read_u16(bytes)? as usize;
    if bytes.remaining() < len {
        return Err(Error::MalformedPacket);
    }
    Ok(bytes.copy_to_bytes(len))
}

pub fn write_mqtt_string(buffer: &mut BytesMut, s: &str) {
    write_mqtt_bytes(buffer, s.as_bytes());
}

pub fn write_mqtt_bytes(buffer: &mut BytesMut, bytes: &[u8]) {
    buffer.put_u16(bytes.len() as u16);
    buffer.extend_from_slice(bytes);
}

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub keep_alive: u16,
    pub client_id: String,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<LastWill>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub message: Bytes,
    pub qos: QoSCode,
    pub retain: bool,
}

pub type QoSCode = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    BadProtocolVersion = 1,
    BadClientId = 2,
    ServiceUnavailable = 3,
    BadUserNamePassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_u8(byte: u8) -> Result<ConnectReturnCode, Error> {
        use ConnectReturnCode::*;
        Ok(match byte {
            0 => Accepted,
            1 => BadProtocolVersion,
            2 => BadClientId,
            3 => ServiceUnavailable,
            4 => BadUserNamePassword,
            5 => NotAuthorized,
            v => return Err(Error::InvalidConnAckCode(v)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub pkid: u16,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub pkid: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRec {
    pub pkid: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubRel {
    pub pkid: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubComp {
    pub pkid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub pkid: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReasonCode {
    Success(QoS),
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub pkid: u16,
    pub return_codes: Vec<SubscribeReasonCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub pkid: u16,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub pkid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// Parse one complete packet out of `buf`, returning the packet and the
/// number of bytes consumed. Returns `Ok(None)` when the buffer doesn't yet
/// hold a full frame (caller should wait for more bytes), and `Err` for a
/// malformed frame -- the caller closes the owning connection, per §7.
pub fn read_packet(buf: &[u8]) -> Result<Option<(Packet, usize)>, Error> {
    let fixed_header = match parse_fixed_header(buf.iter().copied()) {
        Ok(h) => h,
        Err(Error::InsufficientBytes(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    if buf.len() < fixed_header.frame_len() {
        return Ok(None);
    }
    let frame = Bytes::copy_from_slice(&buf[..fixed_header.frame_len()]);
    let packet = match fixed_header.packet_type()? {
        PacketType::Connect => Packet::Connect(connect::read(fixed_header, frame)?),
        PacketType::ConnAck => Packet::ConnAck(connack::read(fixed_header, frame)?),
        PacketType::Publish => Packet::Publish(publish::read(fixed_header, frame)?),
        PacketType::PubAck => Packet::PubAck(puback::read(fixed_header, frame)?),
        PacketType::PubRec => Packet::PubRec(pubrec::read(fixed_header, frame)?),
        PacketType::PubRel => Packet::PubRel(pubrel::read(fixed_header, frame)?),
        PacketType::PubComp => Packet::PubComp(pubcomp::read(fixed_header, frame)?),
        PacketType::Subscribe => Packet::Subscribe(subscribe::read(fixed_header, frame)?),
        PacketType::SubAck => Packet::SubAck(suback::read(fixed_header, frame)?),
        PacketType::Unsubscribe => Packet::Unsubscribe(unsubscribe::read(fixed_header, frame)?),
        PacketType::UnsubAck => Packet::UnsubAck(unsuback::read(fixed_header, frame)?),
        PacketType::PingReq => Packet::PingReq,
        PacketType::PingResp => Packet::PingResp,
        PacketType::Disconnect => Packet::Disconnect,
    };
    Ok(Some((packet, fixed_header.frame_len())))
}

pub fn write_packet(packet: &Packet, buffer: &mut BytesMut) -> Result<usize, Error> {
    match packet {
        Packet::Connect(p) => connect::write(p, buffer),
        Packet::ConnAck(p) => connack::write(p, buffer),
        Packet::Publish(p) => publish::write(p, buffer),
        Packet::PubAck(p) => puback::write(p, buffer),
        Packet::PubRec(p) => pubrec::write(p, buffer),
        Packet::PubRel(p) => pubrel::write(p, buffer),
        Packet::PubComp(p) => pubcomp::write(p, buffer),
        Packet::Subscribe(p) => subscribe::write(p, buffer),
        Packet::SubAck(p) => suback::write(p, buffer),
        Packet::Unsubscribe(p) => unsubscribe::write(p, buffer),
        Packet::UnsubAck(p) => unsuback::write(p, buffer),
        Packet::PingReq => pingreq::write(buffer),
        Packet::PingResp => pingresp::write(buffer),
        Packet::Disconnect => disconnect::write(buffer),
    }
}
