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

use common_base::utils::time_util::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
pub enum Protocol {
    Modbus,
    Mqtt,
    OpcUa,
    Bacnet,
    Coap,
    RawTcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Modbus => "modbus",
            Protocol::Mqtt => "mqtt",
            Protocol::OpcUa => "opcua",
            Protocol::Bacnet => "bacnet",
            Protocol::Coap => "coap",
            Protocol::RawTcp => "raw_tcp",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
    Local,
}

/// One captured unit of protocol traffic. Emitted by every protocol server
/// on every inbound/outbound PDU (and on locally-generated state changes,
/// tagged `Local`), and consumed by the packet capturer, the bridge engine
/// and the recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketEvent {
    pub seq: u64,
    pub timestamp: Timestamp,
    pub direction: Direction,
    pub src_addr: String,
    pub src_port: u16,
    pub dst_addr: String,
    pub dst_port: u16,
    pub protocol: Protocol,
    pub payload: Vec<u8>,
    pub info: String,
}

impl PacketEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq: u64,
        direction: Direction,
        src_addr: impl Into<String>,
        src_port: u16,
        dst_addr: impl Into<String>,
        dst_port: u16,
        protocol: Protocol,
        payload: Vec<u8>,
        info: impl Into<String>,
    ) -> Self {
        PacketEvent {
            seq,
            timestamp: Timestamp::now(),
            direction,
            src_addr: src_addr.into(),
            src_port,
            dst_addr: dst_addr.into(),
            dst_port,
            protocol,
            payload,
            info: info.into(),
        }
    }

    pub fn payload_hex(&self) -> String {
        self.payload.iter().map(|b| format!("{b:02x}")).collect()
    }
}
