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

//! Per-protocol device state and servers (§3, §4.2). Each server owns a
//! listener, a device-state table guarded per-device, and the background
//! activities that mutate state on a timer. `Orchestrator` starts and stops
//! all of them together, replacing the original's global singleton.

pub mod bacnet;
pub mod coap;
pub mod datasim;
pub mod modbus;
pub mod mqtt;
pub mod opcua;
pub mod orchestrator;
pub mod tcp;

pub use orchestrator::Orchestrator;

use common_base::tools::SequenceCounter;

/// Per-server monotonic `PacketEvent.seq` source (§3: "seq strictly
/// increases per capture session"). Each server owns one so sequence
/// numbers from different servers don't interleave into a false ordering.
#[derive(Debug, Default)]
pub struct SequenceSource(SequenceCounter);

impl SequenceSource {
    pub fn new() -> Self {
        SequenceSource(SequenceCounter::new())
    }

    pub fn next(&self) -> u64 {
        self.0.next()
    }
}
