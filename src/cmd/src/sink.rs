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

//! Wires the rules engine's `ActionSink` (§4.4) into the rest of the
//! running binary: `publish_message` re-enters the bridge engine so a
//! rule can publish onto the same routing fabric a simulator would,
//! `set_value` mutates a shared dotted-path `Value` store rather than
//! reaching into any one protocol server's typed device state (the rules
//! engine only ever sees the generic `Value` shape bridge messages carry,
//! never a protocol-specific register table), and `webhook` issues a
//! best-effort POST via `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use bridge::{ActionSink, BridgeEngine, Message};
use sim_core::Value;
use tokio::sync::RwLock;

/// The shared state `set_value` actions mutate and that rule conditions
/// can be evaluated against on the next tick. Independent of any protocol
/// server's own device-state table.
#[derive(Default)]
pub struct SharedState {
    value: RwLock<Value>,
}

impl SharedState {
    pub fn new() -> Self {
        SharedState { value: RwLock::new(Value::map()) }
    }

    pub async fn snapshot(&self) -> Value {
        self.value.read().await.clone()
    }
}

pub struct BridgeActionSink {
    bridge: Arc<BridgeEngine>,
    state: Arc<SharedState>,
    http: reqwest::Client,
}

impl BridgeActionSink {
    pub fn new(bridge: Arc<BridgeEngine>, state: Arc<SharedState>) -> Self {
        BridgeActionSink {
            bridge,
            state,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ActionSink for BridgeActionSink {
    async fn publish_message(&self, protocol: &str, topic: &str, data: &Value) -> Result<(), String> {
        self.bridge.publish(Message::new(protocol, topic, data.clone())).await;
        Ok(())
    }

    async fn set_value(&self, path: &str, value: &Value) -> Result<(), String> {
        let mut state = self.state.value.write().await;
        state.set_path(path, value.clone());
        Ok(())
    }

    async fn webhook(&self, url: &str, payload: &Value) -> Result<(), String> {
        let json: serde_json::Value = serde_json::to_value(payload).map_err(|e| e.to_string())?;
        self.http
            .post(url)
            .json(&json)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_value_is_visible_in_snapshot() {
        let state = Arc::new(SharedState::new());
        let sink = BridgeActionSink::new(Arc::new(BridgeEngine::new()), state.clone());
        sink.set_value("device.temp", &Value::Float(42.0)).await.unwrap();
        let snap = state.snapshot().await;
        assert_eq!(snap.get_path("device.temp").and_then(|v| v.as_f64()), Some(42.0));
    }
}
