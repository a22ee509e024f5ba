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

use crate::value::Value;
use common_base::tools::unique_id;
use common_base::utils::time_util::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DataChange,
    DeviceOnline,
    DeviceOffline,
    Alert,
    Metric,
    Command,
    Status,
    Packet,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DataChange => "data_change",
            EventType::DeviceOnline => "device_online",
            EventType::DeviceOffline => "device_offline",
            EventType::Alert => "alert",
            EventType::Metric => "metric",
            EventType::Command => "command",
            EventType::Status => "status",
            EventType::Packet => "packet",
        }
    }
}

/// Delivery priority. Higher fires earlier within the in-memory bus and
/// gates the Redis-backed backend's secondary LPUSH (see eventbus crate).
pub type EventPriority = i32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub source: String,
    pub data: Value,
    pub timestamp: Timestamp,
    pub correlation_id: Option<String>,
    pub priority: EventPriority,
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, data: Value) -> Self {
        Event {
            id: unique_id(),
            event_type,
            source: source.into(),
            data,
            timestamp: Timestamp::now(),
            correlation_id: None,
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
