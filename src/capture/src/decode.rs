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

//! Best-effort decoded view of a captured payload (§4.6: "each stored
//! packet gets a lazy decoded view produced by the protocol's decoder").
//! Decoding is attempted on demand, never at ingest time, and a payload
//! that doesn't parse as a request in its protocol's codec (a server
//! response, say, captured on the `Outbound` side) falls back to a
//! raw-bytes summary rather than failing the capture.

use bytes::Bytes;
use protocol::{bacnet, coap, modbus, mqtt, opcua};
use sim_core::packet::Protocol;
use sim_core::Value;

/// Decode `payload` using the codec named by `protocol`. Always succeeds;
/// an undecodable payload yields a map carrying `{"error": "..."}"` plus
/// the raw length, so capture export never blocks on a decode failure.
pub fn decode(protocol: Protocol, payload: &[u8]) -> Value {
    match protocol {
        Protocol::Modbus => decode_modbus(payload),
        Protocol::Mqtt => decode_mqtt(payload),
        Protocol::Coap => decode_coap(payload),
        Protocol::Bacnet => decode_bacnet(payload),
        Protocol::OpcUa => decode_opcua(payload),
        Protocol::RawTcp => decode_raw_tcp(payload),
    }
}

fn error_view(message: impl Into<String>, len: usize) -> Value {
    let mut map = Value::map();
    map.set_path("error", Value::String(message.into()));
    map.set_path("byte_len", Value::Int(len as i64));
    map
}

fn decode_modbus(payload: &[u8]) -> Value {
    match modbus::parse_request(payload) {
        Ok((frame, _consumed)) => {
            let mut map = Value::map();
            map.set_path("transaction_id", Value::Int(frame.header.transaction_id as i64));
            map.set_path("unit_id", Value::Int(frame.header.unit_id as i64));
            map.set_path("function", Value::String(format!("{:?}", frame.function)));
            map
        }
        Err(err) => error_view(format!("not a modbus request frame: {err}"), payload.len()),
    }
}

fn decode_mqtt(payload: &[u8]) -> Value {
    let stream = payload.iter().copied();
    let fixed_header = match mqtt::parse_fixed_header(stream) {
        Ok(h) => h,
        Err(err) => return error_view(format!("bad mqtt fixed header: {err}"), payload.len()),
    };
    let packet_type = match fixed_header.packet_type() {
        Ok(t) => t,
        Err(err) => return error_view(format!("bad mqtt packet type: {err}"), payload.len()),
    };

    let mut map = Value::map();
    map.set_path("packet_type", Value::String(format!("{packet_type:?}")));

    if matches!(packet_type, mqtt::PacketType::Publish) {
        if let Ok(publish) = mqtt::publish::read(fixed_header, Bytes::copy_from_slice(payload)) {
            map.set_path("topic", Value::String(publish.topic.clone()));
            map.set_path("qos", Value::Int(publish.qos as i64));
            map.set_path("retain", Value::Bool(publish.retain));
            map.set_path("payload_len", Value::Int(publish.payload.len() as i64));
        }
    }
    map
}

fn decode_coap(payload: &[u8]) -> Value {
    match coap::parse(payload) {
        Ok((message, _consumed)) => {
            let mut map = Value::map();
            map.set_path("code", Value::String(format!("{:?}", message.code)));
            map.set_path("message_id", Value::Int(message.message_id as i64));
            map.set_path("token_len", Value::Int(message.token.len() as i64));
            map.set_path("option_count", Value::Int(message.options.len() as i64));
            map
        }
        Err(err) => error_view(format!("bad coap frame: {err}"), payload.len()),
    }
}

fn decode_bacnet(payload: &[u8]) -> Value {
    match bacnet::parse(payload) {
        Ok((frame, _consumed)) => {
            let mut map = Value::map();
            map.set_path("broadcast", Value::Bool(frame.broadcast));
            map.set_path("service", Value::String(format!("{:?}", frame.service)));
            map
        }
        Err(err) => error_view(format!("bad bacnet frame: {err}"), payload.len()),
    }
}

fn decode_opcua(payload: &[u8]) -> Value {
    match opcua::parse(payload) {
        Ok((message, _consumed)) => {
            let mut map = Value::map();
            map.set_path("message", Value::String(format!("{:?}", message)));
            map
        }
        Err(err) => error_view(format!("bad opcua frame: {err}"), payload.len()),
    }
}

fn decode_raw_tcp(payload: &[u8]) -> Value {
    let mut map = Value::map();
    map.set_path("byte_len", Value::Int(payload.len() as i64));
    map.set_path(
        "preview",
        Value::String(String::from_utf8_lossy(&payload[..payload.len().min(64)]).to_string()),
    );
    map
}
