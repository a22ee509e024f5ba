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

//! Wire codecs for every protocol this workspace impersonates (§4.1).
//! Every codec here is a pure `parse`/`encode` pair over byte slices; none
//! of them hold connection or device state. Stateful dispatch lives in
//! `sim-simulators`.

pub mod bacnet;
pub mod coap;
pub mod modbus;
pub mod mqtt;
pub mod opcua;
