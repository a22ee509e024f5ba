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

//! The bridge engine (§4.3): routes a published `Message` to every
//! matching mapping across every enabled `BridgeRule`, in descending
//! priority (insertion order tie-break, matching the rules engine's
//! priority evaluation in §4.4).
//!
//! The bridge's message queue (§5) is a `tokio::sync::broadcast` channel:
//! on a full/lagging receiver it silently drops the oldest unconsumed
//! messages for that receiver rather than applying backpressure to
//! `publish`, matching the ring-buffer-style "drop oldest" policy chosen
//! for the packet capturer (`capture::PacketCapturer`). `publish` never
//! blocks and is async-only per the Design Notes (no fire-and-forget
//! spawn inside it).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::condition::{evaluate_all, Condition, ConditionLogic};
use crate::mapping::{Mapping, TransformError};
use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub mappings: Vec<Mapping>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct MappingFile {
    bridges: Vec<BridgeRule>,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid mapping file: {0}")]
    Config(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Default)]
pub struct BridgeStats {
    pub messages_forwarded: AtomicU64,
    pub messages_transformed: AtomicU64,
    pub errors: AtomicU64,
}

impl BridgeStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.messages_forwarded.load(Ordering::Relaxed),
            self.messages_transformed.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }
}

pub struct BridgeEngine {
    rules: RwLock<Vec<BridgeRule>>,
    stats: BridgeStats,
    forwarded: broadcast::Sender<Message>,
}

impl Default for BridgeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeEngine {
    pub fn new() -> Self {
        let (forwarded, _rx) = broadcast::channel(1024);
        BridgeEngine {
            rules: RwLock::new(Vec::new()),
            stats: BridgeStats::default(),
            forwarded,
        }
    }

    pub fn subscribe_forwarded(&self) -> broadcast::Receiver<Message> {
        self.forwarded.subscribe()
    }

    pub fn add_rule(&self, rule: BridgeRule) {
        let mut rules = self.rules.write().unwrap();
        rules.push(rule);
        // Stable sort: priority descending, insertion order preserved for ties.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove_rule(&self, name: &str) {
        self.rules.write().unwrap().retain(|r| r.name != name);
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        if let Some(rule) = self.rules.write().unwrap().iter_mut().find(|r| r.name == name) {
            rule.enabled = enabled;
        }
    }

    pub fn rules(&self) -> Vec<BridgeRule> {
        self.rules.read().unwrap().clone()
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        self.stats.snapshot()
    }

    /// Loads bridge rules from a YAML or JSON mapping file (§6: top-level
    /// `bridges` key), replacing the engine's entire rule set atomically
    /// -- a parse failure leaves the existing rules untouched and no
    /// partial set is ever installed (§7 ConfigError: "no partial load").
    pub fn load_mappings(&self, content: &str) -> BridgeResult<()> {
        let parsed: MappingFile = serde_yaml::from_str(content)
            .or_else(|yaml_err| serde_json::from_str(content).map_err(|json_err| {
                BridgeError::Config(format!("not valid YAML ({yaml_err}) or JSON ({json_err})"))
            }))?;

        let mut rules = parsed.bridges;
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        *self.rules.write().unwrap() = rules;
        Ok(())
    }

    /// Route `msg` through every enabled rule's mappings, forwarding a
    /// transformed message onto the broadcast channel for each match.
    /// Async-only per the Design Notes; does no I/O and never awaits, so
    /// nothing here can hold the rules lock across a suspension point.
    pub async fn publish(&self, msg: Message) {
        let rules = self.rules.read().unwrap().clone();

        for rule in rules.iter().filter(|r| r.enabled) {
            if !evaluate_all(&rule.conditions, ConditionLogic::And, &msg.data) {
                continue;
            }
            for mapping in &rule.mappings {
                let Some(direction) = mapping.matches(&msg) else {
                    continue;
                };
                match mapping.forward(&msg, &direction) {
                    Ok(out) => {
                        if mapping.transform.is_some() {
                            self.stats.messages_transformed.fetch_add(1, Ordering::Relaxed);
                        }
                        self.stats.messages_forwarded.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(rule = %rule.name, target = %out.protocol, topic = %out.topic, "bridge forwarded message");
                        let _ = self.forwarded.send(out);
                    }
                    Err(TransformError::Formula(field, reason)) => {
                        // §7: a failed transform step skips the whole
                        // mapping -- the original message is NOT
                        // delivered even if the failure happened after
                        // some of the transform already "succeeded"
                        // conceptually, since `Transform::apply` only
                        // returns a completed object or an error.
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(rule = %rule.name, field = %field, %reason, "bridge transform failed, mapping skipped");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{Direction, FieldMapping, Formula, Transform};
    use serde_json::json;
    use sim_core::Value;

    fn sample_rule() -> BridgeRule {
        BridgeRule {
            name: "modbus-to-mqtt".into(),
            enabled: true,
            priority: 0,
            conditions: vec![],
            mappings: vec![Mapping {
                source_protocol: "modbus".into(),
                source_topic: "holding-registers".into(),
                target_protocol: "mqtt".into(),
                target_topic: "sensors/modbus".into(),
                direction: Direction::SourceToTarget,
                transform: Some(Transform {
                    field_mappings: vec![FieldMapping { source: "value".into(), target: "sensor_value".into(), value_type: Some("float".into()) }],
                    formulas: vec![Formula { field: "kwh".into(), expression: "data['value'] * 0.001".into() }],
                    filters: vec![],
                }),
            }],
        }
    }

    #[tokio::test]
    async fn publish_forwards_and_updates_stats() {
        let engine = BridgeEngine::new();
        engine.add_rule(sample_rule());
        let mut rx = engine.subscribe_forwarded();

        engine
            .publish(Message::new("modbus", "holding-registers", Value::from(json!({ "value": 1000, "address": 4 }))))
            .await;

        let out = rx.try_recv().expect("forwarded message");
        assert_eq!(out.topic, "sensors/modbus");
        let (forwarded, transformed, errors) = engine.stats();
        assert_eq!(forwarded, 1);
        assert_eq!(transformed, 1);
        assert_eq!(errors, 0);
    }

    #[tokio::test]
    async fn disabled_rule_never_forwards() {
        let engine = BridgeEngine::new();
        let mut rule = sample_rule();
        rule.enabled = false;
        engine.add_rule(rule);
        let mut rx = engine.subscribe_forwarded();

        engine.publish(Message::new("modbus", "holding-registers", Value::map())).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_formula_skips_mapping_and_counts_error() {
        let engine = BridgeEngine::new();
        let mut rule = sample_rule();
        rule.mappings[0].transform.as_mut().unwrap().formulas[0].expression = "data[".into();
        engine.add_rule(rule);
        let mut rx = engine.subscribe_forwarded();

        engine.publish(Message::new("modbus", "holding-registers", Value::map())).await;
        assert!(rx.try_recv().is_err());
        let (forwarded, _, errors) = engine.stats();
        assert_eq!(forwarded, 0);
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn bridge_rule_conditions_gate_all_of_its_mappings() {
        let engine = BridgeEngine::new();
        let mut rule = sample_rule();
        rule.conditions.push(Condition { field: "address".into(), op: crate::condition::ConditionOp::Eq, value: Value::Int(99), value2: Value::Null });
        engine.add_rule(rule);
        let mut rx = engine.subscribe_forwarded();

        engine.publish(Message::new("modbus", "holding-registers", Value::from(json!({ "value": 1000, "address": 4 })))).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn load_mappings_parses_yaml_seed_scenario() {
        let engine = BridgeEngine::new();
        let yaml = r#"
bridges:
  - name: modbus-to-mqtt
    enabled: true
    priority: 5
    mappings:
      - source_protocol: modbus
        source_topic: holding-registers
        target_protocol: mqtt
        target_topic: sensors/modbus
        direction: s->t
        transform:
          field_mappings:
            - source: value
              target: sensor_value
              type: float
          formulas:
            - field: kwh
              expression: "data['value'] * 0.001"
"#;
        engine.load_mappings(yaml).unwrap();
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rules()[0].priority, 5);
    }

    #[test]
    fn load_mappings_rejects_malformed_content_without_clearing_existing_rules() {
        let engine = BridgeEngine::new();
        engine.add_rule(sample_rule());
        assert!(engine.load_mappings("not valid: [yaml or json").is_err());
        assert_eq!(engine.rules().len(), 1, "a failed load must not clear existing rules");
    }

    #[test]
    fn priority_breaks_ties_by_insertion_order() {
        let engine = BridgeEngine::new();
        let mut a = sample_rule();
        a.name = "a".into();
        a.priority = 5;
        let mut b = sample_rule();
        b.name = "b".into();
        b.priority = 5;
        engine.add_rule(a);
        engine.add_rule(b);
        let names: Vec<String> = engine.rules().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
