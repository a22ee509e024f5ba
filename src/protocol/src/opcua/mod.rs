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

//! OPC UA handshake-only codec (§4.1): HEL/ACK/ERR messages over TCP. The
//! full SecureChannel/Session handshake is out of scope; this is enough to
//! satisfy clients probing the framing layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed message header")]
    MalformedHeader,
    #[error("unknown message type {0:?}")]
    UnknownMessageType([u8; 3]),
    #[error("insufficient bytes")]
    InsufficientBytes,
}

pub const CHUNK_TYPE_FINAL: u8 = b'F';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledge {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub error_code: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Acknowledge(Acknowledge),
    Error(ErrorMessage),
}

fn read_string(bytes: &mut Bytes) -> Result<String, Error> {
    if bytes.remaining() < 4 {
        return Err(Error::InsufficientBytes);
    }
    let len = bytes.get_i32();
    if len < 0 {
        return Ok(String::new());
    }
    let len = len as usize;
    if bytes.remaining() < len {
        return Err(Error::InsufficientBytes);
    }
    let raw = bytes.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| Error::MalformedHeader)
}

fn write_string(s: &str, out: &mut BytesMut) {
    out.put_i32(s.len() as i32);
    out.extend_from_slice(s.as_bytes());
}

pub fn parse(buf: &[u8]) -> Result<(Message, usize), Error> {
    if buf.len() < 8 {
        return Err(Error::InsufficientBytes);
    }
    let mut header = Bytes::copy_from_slice(&buf[..8]);
    let mut message_type = [0u8; 3];
    message_type.copy_from_slice(&buf[..3]);
    header.advance(3);
    let _chunk_type = header.get_u8();
    let message_size = header.get_u32() as usize;
    if buf.len() < message_size {
        return Err(Error::InsufficientBytes);
    }
    let mut body = Bytes::copy_from_slice(&buf[8..message_size]);

    let message = match &message_type {
        b"HEL" => Message::Hello(Hello {
            protocol_version: body.get_u32(),
            receive_buffer_size: body.get_u32(),
            send_buffer_size: body.get_u32(),
            max_message_size: body.get_u32(),
            max_chunk_count: body.get_u32(),
            endpoint_url: read_string(&mut body)?,
        }),
        b"ACK" => Message::Acknowledge(Acknowledge {
            protocol_version: body.get_u32(),
            receive_buffer_size: body.get_u32(),
            send_buffer_size: body.get_u32(),
            max_message_size: body.get_u32(),
            max_chunk_count: body.get_u32(),
        }),
        b"ERR" => Message::Error(ErrorMessage {
            error_code: body.get_u32(),
            reason: read_string(&mut body)?,
        }),
        other => return Err(Error::UnknownMessageType(*other)),
    };

    Ok((message, message_size))
}

pub fn encode(message: &Message) -> BytesMut {
    let mut body = BytesMut::new();
    let message_type: &[u8; 3] = match message {
        Message::Hello(hello) => {
            body.put_u32(hello.protocol_version);
            body.put_u32(hello.receive_buffer_size);
            body.put_u32(hello.send_buffer_size);
            body.put_u32(hello.max_message_size);
            body.put_u32(hello.max_chunk_count);
            write_string(&hello.endpoint_url, &mut body);
            b"HEL"
        }
        Message::Acknowledge(ack) => {
            body.put_u32(ack.protocol_version);
            body.put_u32(ack.receive_buffer_size);
            body.put_u32(ack.send_buffer_size);
            body.put_u32(ack.max_message_size);
            body.put_u32(ack.max_chunk_count);
            b"ACK"
        }
        Message::Error(err) => {
            body.put_u32(err.error_code);
            write_string(&err.reason, &mut body);
            b"ERR"
        }
    };

    let mut buf = BytesMut::with_capacity(8 + body.len());
    buf.extend_from_slice(message_type);
    buf.put_u8(CHUNK_TYPE_FINAL);
    buf.put_u32((8 + body.len()) as u32);
    buf.extend_from_slice(&body);
    buf
}

/// Negotiate ACK values against a server's own limits: each field is the
/// minimum of what the client asked for and what the server allows, with 0
/// on either side meaning "no limit" per the OPC UA handshake semantics.
pub fn negotiate(hello: &Hello, server: &Acknowledge) -> Acknowledge {
    let pick = |client: u32, server: u32| -> u32 {
        match (client, server) {
            (0, s) => s,
            (c, 0) => c,
            (c, s) => c.min(s),
        }
    };
    Acknowledge {
        protocol_version: hello.protocol_version.min(server.protocol_version),
        receive_buffer_size: pick(hello.receive_buffer_size, server.receive_buffer_size),
        send_buffer_size: pick(hello.send_buffer_size, server.send_buffer_size),
        max_message_size: pick(hello.max_message_size, server.max_message_size),
        max_chunk_count: pick(hello.max_chunk_count, server.max_chunk_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_with_endpoint_url() {
        let hello = Hello {
            protocol_version: 0,
            receive_buffer_size: 65536,
            send_buffer_size: 65536,
            max_message_size: 1 << 20,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
        };
        let encoded = encode(&Message::Hello(hello.clone()));
        let (decoded, consumed) = parse(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, Message::Hello(hello));
    }

    #[test]
    fn ack_negotiates_minimum_of_client_and_server_limits() {
        let hello = Hello {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 65536,
            max_message_size: 1 << 20,
            max_chunk_count: 0,
            endpoint_url: String::new(),
        };
        let server = Acknowledge {
            protocol_version: 0,
            receive_buffer_size: 65536,
            send_buffer_size: 32768,
            max_message_size: 1 << 18,
            max_chunk_count: 5,
        };
        let ack = negotiate(&hello, &server);
        assert_eq!(ack.receive_buffer_size, 8192);
        assert_eq!(ack.send_buffer_size, 32768);
        assert_eq!(ack.max_message_size, 1 << 18);
        assert_eq!(ack.max_chunk_count, 5);
    }

    #[test]
    fn error_message_round_trips() {
        let err = ErrorMessage {
            error_code: 0x8004_0000,
            reason: "bad protocol version".to_string(),
        };
        let encoded = encode(&Message::Error(err.clone()));
        let (decoded, _) = parse(&encoded).unwrap();
        assert_eq!(decoded, Message::Error(err));
    }
}
