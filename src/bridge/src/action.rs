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

//! Rule actions (§4.4): `log, publish_message, set_value, send_alert,
//! webhook, delay, throttle, trigger_rule, create_event`. Actions that
//! reach outside the rules engine itself (publishing, mutating device
//! state, sending a webhook) go through the `ActionSink` trait so the
//! engine stays decoupled from the bridge/simulators/HTTP layer --
//! mirroring how `sim_core::hook::PacketHook` decouples the fault
//! injector from the capture path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sim_core::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Log {
        message: String,
    },
    PublishMessage {
        protocol: String,
        topic: String,
        data: Value,
    },
    SetValue {
        path: String,
        value: Value,
    },
    SendAlert {
        message: String,
        #[serde(default = "default_severity")]
        severity: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        payload: Value,
    },
    Delay {
        ms: u64,
    },
    Throttle {
        key: String,
        ms: u64,
    },
    TriggerRule {
        name: String,
    },
    CreateEvent {
        event_type: String,
        #[serde(default)]
        data: Value,
    },
}

fn default_severity() -> String {
    "info".to_string()
}

/// One step in a rule's action list: the action itself plus the
/// `abort_on_error` parameter §4.4 describes ("unless the action's
/// parameters set abort_on_error=true") -- modeled as a sibling field
/// rather than folded into every `Action` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub abort_on_error: bool,
}

/// Effects an action reaches for outside the rules engine's own state.
/// Every method is async and fallible; a failed action is recorded by the
/// caller (`RulesEngine::execute_actions`) and does not abort the
/// remaining actions unless the rule step sets `abort_on_error=true`.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn publish_message(&self, protocol: &str, topic: &str, data: &Value) -> Result<(), String>;
    async fn set_value(&self, path: &str, value: &Value) -> Result<(), String>;
    async fn webhook(&self, url: &str, payload: &Value) -> Result<(), String>;
}

/// A sink that records every call instead of performing it; used in tests
/// and as a safe default when no bridge/HTTP layer is wired in.
#[derive(Default)]
pub struct NoopActionSink;

#[async_trait]
impl ActionSink for NoopActionSink {
    async fn publish_message(&self, _protocol: &str, _topic: &str, _data: &Value) -> Result<(), String> {
        Ok(())
    }

    async fn set_value(&self, _path: &str, _value: &Value) -> Result<(), String> {
        Ok(())
    }

    async fn webhook(&self, _url: &str, _payload: &Value) -> Result<(), String> {
        Ok(())
    }
}
