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

//! What a virtual user drives (§4.9: "issue protocol request"). The load
//! tester itself is protocol-agnostic; `cmd` wires a concrete client per
//! protocol server (Modbus read, MQTT publish, CoAP GET, ...) that
//! implements this trait.

use async_trait::async_trait;

/// One request/response exchange against a simulated server.
/// "Success/failure is protocol-defined (expected ACK received, no
/// timeout)" (§4.9) — the implementation decides what counts as success
/// and returns it rather than the harness guessing from a status code.
#[async_trait]
pub trait LoadTarget: Send + Sync {
    async fn issue_request(&self) -> bool;
}

/// A target whose requests always succeed after a fixed delay; useful for
/// exercising the scheduler/metrics machinery without a live server.
pub struct FixedLatencyTarget {
    pub delay: std::time::Duration,
    pub success: bool,
}

#[async_trait]
impl LoadTarget for FixedLatencyTarget {
    async fn issue_request(&self) -> bool {
        tokio::time::sleep(self.delay).await;
        self.success
    }
}
