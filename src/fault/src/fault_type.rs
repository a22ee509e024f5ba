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

//! The nine fault kinds (§4.8), each carrying its own magnitude
//! parameters. The registry's `probability` field (shared by every fault)
//! is the Bernoulli draw rate used both by the background monitor and by
//! `should_modify_packet`; the fields here are per-kind severity, not hit
//! rate (e.g. `Corruption::rate` is the fraction of bits flipped once a
//! hit occurs, not the chance of a hit).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultType {
    PacketLoss { percent: f64 },
    LatencySpike { delay_ms: u64, duration_ms: u64 },
    Jitter { jitter_ms: u64 },
    Corruption { rate: f64 },
    Reordering { buffer_size: usize },
    Duplication { rate: f64 },
    ConnectionDrop { duration_seconds: u64 },
    ProtocolError { kind: String },
    DeviceOffline { duration_seconds: u64 },
}

impl FaultType {
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::PacketLoss { .. } => "packet_loss",
            FaultType::LatencySpike { .. } => "latency_spike",
            FaultType::Jitter { .. } => "jitter",
            FaultType::Corruption { .. } => "corruption",
            FaultType::Reordering { .. } => "reordering",
            FaultType::Duplication { .. } => "duplication",
            FaultType::ConnectionDrop { .. } => "connection_drop",
            FaultType::ProtocolError { .. } => "protocol_error",
            FaultType::DeviceOffline { .. } => "device_offline",
        }
    }
}
