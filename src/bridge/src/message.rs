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

//! A published message on the bridge (§4.3): a simulator-agnostic
//! `(protocol, topic, data)` triple. The protocol servers emit raw
//! `sim_core::PacketEvent`s for the capturer/recorder; the bridge instead
//! routes this higher-level, already-decoded shape, since mappings and
//! rules walk dotted paths on structured payloads, never wire bytes.

use serde::{Deserialize, Serialize};
use sim_core::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub protocol: String,
    pub topic: String,
    pub data: Value,
}

impl Message {
    pub fn new(protocol: impl Into<String>, topic: impl Into<String>, data: Value) -> Self {
        Message {
            protocol: protocol.into(),
            topic: topic.into(),
            data,
        }
    }
}
