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

//! Network topology graph and synthetic device fleet generator
//! (SPEC_FULL §15), grounded on the original's
//! `backend/src/simulation/network.py`.

pub mod fleet;
pub mod graph;

pub use fleet::{DeviceFleet, DeviceKind, DeviceTemplate, FleetDevice, FleetStats};
pub use graph::{NetworkLink, NetworkNode, NetworkTopology, NodeType, LinkType, TopologyError, TopologyResult, TopologyStats};
