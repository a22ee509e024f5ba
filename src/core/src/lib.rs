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

//! Shared data model for the simulation platform: the dynamic payload value
//! used by bridge transforms and rule conditions, packet/event envelopes
//! published by every protocol server, MQTT-style topic matching (reused by
//! the MQTT simulator and the bridge engine), and the restricted expression
//! evaluator used in place of a generic runtime interpreter.

pub mod event;
pub mod expr;
pub mod hook;
pub mod packet;
pub mod topic;
pub mod value;

pub use event::{Event, EventPriority, EventType};
pub use hook::{NoopHook, PacketDecision, PacketHook};
pub use packet::{Direction, PacketEvent, Protocol};
pub use value::Value;
