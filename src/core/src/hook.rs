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

//! The seam the fault injector hooks into the capture/bridge packet path
//! through (§4.8), kept here rather than in the `fault` crate so that
//! `capture` and `bridge` don't need to depend on `fault` directly.

use std::time::Duration;

use crate::packet::PacketEvent;

/// What a fault wants done with one packet as it crosses the capture or
/// bridge path. `should_modify_packet` in the fault registry is
/// synchronous by contract (§4.8); callers apply the decision themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketDecision {
    Pass,
    Drop,
    Delay(Duration),
    Duplicate,
    Corrupt,
}

pub trait PacketHook: Send + Sync {
    fn should_modify_packet(&self, event: &PacketEvent) -> PacketDecision;
}

/// No-op hook used when no fault injector is wired in.
pub struct NoopHook;

impl PacketHook for NoopHook {
    fn should_modify_packet(&self, _event: &PacketEvent) -> PacketDecision {
        PacketDecision::Pass
    }
}
