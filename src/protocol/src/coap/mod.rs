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

//! CoAP (RFC 7252 subset) wire codec (§4.1). 4-byte fixed header, token,
//! delta/length-nibble-encoded options in ascending option-number order,
//! `0xFF` payload marker.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed message")]
    MalformedMessage,
    #[error("unsupported coap version {0}")]
    UnsupportedVersion(u8),
    #[error("insufficient bytes")]
    InsufficientBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Confirmable = 0,
    NonConfirmable = 1,
    Acknowledgement = 2,
    Reset = 3,
}

impl MessageType {
    fn from_bits(bits: u8) -> Result<Self, Error> {
        Ok(match bits {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            3 => MessageType::Reset,
            _ => return Err(Error::MalformedMessage),
        })
    }
}

/// Method and response codes as `(class, detail)`, packed `class<<5 | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code(0x00);
    pub const GET: Code = Code(0x01);
    pub const POST: Code = Code(0x02);
    pub const PUT: Code = Code(0x03);
    pub const DELETE: Code = Code(0x04);
    pub const CONTENT: Code = Code(0x45); // 2.05
    pub const CHANGED: Code = Code(0x44); // 2.04
    pub const DELETED: Code = Code(0x42); // 2.02
    pub const NOT_FOUND: Code = Code(0x84); // 4.04
    pub const BAD_REQUEST: Code = Code(0x80); // 4.00
    pub const INTERNAL_SERVER_ERROR: Code = Code(0xA0); // 5.00

    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }
}

/// Content-Format numeric codes (RFC 7252 §12.3). Distinct from each other:
/// link-format=40, json=50, octet-stream=42, xml=41 (the RFC in fact assigns
/// 41 to XML and 42 to octet-stream; both are kept distinct here).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    LinkFormat,
    Xml,
    OctetStream,
    Json,
    Other(u16),
}

impl ContentFormat {
    pub fn code(self) -> u16 {
        match self {
            ContentFormat::LinkFormat => 40,
            ContentFormat::Xml => 41,
            ContentFormat::OctetStream => 42,
            ContentFormat::Json => 50,
            ContentFormat::Other(v) => v,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            40 => ContentFormat::LinkFormat,
            41 => ContentFormat::Xml,
            42 => ContentFormat::OctetStream,
            50 => ContentFormat::Json,
            other => ContentFormat::Other(other),
        }
    }
}

pub const OPTION_NUMBER_OBSERVE: u16 = 6;
pub const OPTION_NUMBER_URI_PATH: u16 = 11;
pub const OPTION_NUMBER_CONTENT_FORMAT: u16 = 12;
pub const OPTION_NUMBER_ETAG: u16 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Option_ {
    pub number: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Vec<u8>,
    pub options: Vec<Option_>,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn option_value(&self, number: u16) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.value.as_slice())
    }

    pub fn uri_path(&self) -> String {
        let segments: Vec<&str> = self
            .options
            .iter()
            .filter(|o| o.number == OPTION_NUMBER_URI_PATH)
            .filter_map(|o| std::str::from_utf8(&o.value).ok())
            .collect();
        format!("/{}", segments.join("/"))
    }
}

fn decode_option_length(nibble: u8, bytes: &mut Bytes) -> Result<u16, Error> {
    match nibble {
        0..=12 => Ok(nibble as u16),
        13 => {
            if !bytes.has_remaining() {
                return Err(Error::InsufficientBytes);
            }
            Ok(bytes.get_u8() as u16 + 13)
        }
        14 => {
            if bytes.remaining() < 2 {
                return Err(Error::InsufficientBytes);
            }
            Ok(bytes.get_u16() + 269)
        }
        _ => Err(Error::MalformedMessage),
    }
}

fn encode_option_length_nibble(len: u16, out: &mut BytesMut) -> u8 {
    if len <= 12 {
        len as u8
    } else if len <= 268 {
        out.put_u8((len - 13) as u8);
        13
    } else {
        out.put_u16(len - 269);
        14
    }
}

pub fn parse(buf: &[u8]) -> Result<(Message, usize), Error> {
    if buf.len() < 4 {
        return Err(Error::InsufficientBytes);
    }
    let mut bytes = Bytes::copy_from_slice(buf);
    let first = bytes.get_u8();
    let version = first >> 6;
    if version != 1 {
        return Err(Error::UnsupportedVersion(version));
    }
    let msg_type = MessageType::from_bits((first >> 4) & 0x03)?;
    let token_len = (first & 0x0F) as usize;
    let code = Code(bytes.get_u8());
    let message_id = bytes.get_u16();
    if bytes.remaining() < token_len {
        return Err(Error::InsufficientBytes);
    }
    let token = bytes.copy_to_bytes(token_len).to_vec();

    let mut options = Vec::new();
    let mut running_number: u16 = 0;
    loop {
        if !bytes.has_remaining() {
            break;
        }
        let marker = bytes.chunk()[0];
        if marker == 0xFF {
            bytes.advance(1);
            break;
        }
        let header = bytes.get_u8();
        let delta_nibble = header >> 4;
        let length_nibble = header & 0x0F;
        let delta = decode_option_length(delta_nibble, &mut bytes)?;
        let length = decode_option_length(length_nibble, &mut bytes)?;
        if bytes.remaining() < length as usize {
            return Err(Error::InsufficientBytes);
        }
        running_number += delta;
        let value = bytes.copy_to_bytes(length as usize).to_vec();
        options.push(Option_ {
            number: running_number,
            value,
        });
    }
    let payload = bytes.copy_to_bytes(bytes.remaining()).to_vec();

    Ok((
        Message {
            msg_type,
            code,
            message_id,
            token,
            options,
            payload,
        },
        buf.len(),
    ))
}

pub fn encode(message: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    let first = (1u8 << 6) | ((message.msg_type as u8) << 4) | (message.token.len() as u8 & 0x0F);
    buf.put_u8(first);
    buf.put_u8(message.code.0);
    buf.put_u16(message.message_id);
    buf.extend_from_slice(&message.token);

    let mut sorted_options = message.options.clone();
    sorted_options.sort_by_key(|o| o.number);

    let mut running_number: u16 = 0;
    for option in &sorted_options {
        let delta = option.number - running_number;
        running_number = option.number;
        let mut extra = BytesMut::new();
        let delta_nibble = encode_option_length_nibble(delta, &mut extra);
        let mut extra2 = BytesMut::new();
        let length_nibble = encode_option_length_nibble(option.value.len() as u16, &mut extra2);
        buf.put_u8((delta_nibble << 4) | length_nibble);
        buf.extend_from_slice(&extra);
        buf.extend_from_slice(&extra2);
        buf.extend_from_slice(&option.value);
    }

    if !message.payload.is_empty() {
        buf.put_u8(0xFF);
        buf.extend_from_slice(&message.payload);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri_path_option(path: &str) -> Vec<Option_> {
        path.trim_start_matches('/')
            .split('/')
            .map(|segment| Option_ {
                number: OPTION_NUMBER_URI_PATH,
                value: segment.as_bytes().to_vec(),
            })
            .collect()
    }

    #[test]
    fn round_trips_get_with_observe_option() {
        let message = Message {
            msg_type: MessageType::Confirmable,
            code: Code::GET,
            message_id: 0x1234,
            token: vec![0xAB, 0xCD],
            options: {
                let mut opts = vec![Option_ {
                    number: OPTION_NUMBER_OBSERVE,
                    value: vec![0],
                }];
                opts.extend(uri_path_option("temperature"));
                opts
            },
            payload: vec![],
        };
        let encoded = encode(&message);
        let (decoded, consumed) = parse(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.code, Code::GET);
        assert_eq!(decoded.uri_path(), "/temperature");
        assert_eq!(decoded.option_value(OPTION_NUMBER_OBSERVE), Some(&[0u8][..]));
    }

    #[test]
    fn options_are_emitted_in_ascending_number_order() {
        let message = Message {
            msg_type: MessageType::NonConfirmable,
            code: Code::CONTENT,
            message_id: 1,
            token: vec![],
            options: vec![
                Option_ {
                    number: OPTION_NUMBER_CONTENT_FORMAT,
                    value: vec![50],
                },
                Option_ {
                    number: OPTION_NUMBER_ETAG,
                    value: vec![1, 2, 3, 4],
                },
            ],
            payload: b"{}".to_vec(),
        };
        let encoded = encode(&message);
        let (decoded, _) = parse(&encoded).unwrap();
        let numbers: Vec<u16> = decoded.options.iter().map(|o| o.number).collect();
        assert_eq!(numbers, vec![OPTION_NUMBER_ETAG, OPTION_NUMBER_CONTENT_FORMAT]);
    }

    #[test]
    fn content_format_json_and_octet_stream_are_distinct() {
        assert_ne!(ContentFormat::Json.code(), ContentFormat::OctetStream.code());
        assert_eq!(ContentFormat::Json.code(), 50);
        assert_eq!(ContentFormat::OctetStream.code(), 42);
    }

    #[test]
    fn large_option_value_uses_extended_length_encoding() {
        let value = vec![7u8; 300];
        let message = Message {
            msg_type: MessageType::Confirmable,
            code: Code::PUT,
            message_id: 9,
            token: vec![],
            options: vec![Option_ {
                number: OPTION_NUMBER_URI_PATH,
                value: value.clone(),
            }],
            payload: vec![],
        };
        let encoded = encode(&message);
        let (decoded, _) = parse(&encoded).unwrap();
        assert_eq!(decoded.options[0].value, value);
    }
}
