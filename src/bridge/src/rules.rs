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

//! The automation rules engine (§4.4): evaluates conditions against a
//! data object and, on match, runs an ordered action list. Cooldown is
//! checked *before* conditions are evaluated at all -- "a rule under
//! cooldown is skipped without evaluating its conditions" -- and
//! `trigger_rule` recurses into this same engine with a depth counter
//! capped at 16 (§4.4 cycle protection).
//!
//! Alerts (SPEC_FULL §15, from the original's `routers/alerts.py`): every
//! `send_alert` action and every rule evaluation append an `Event` of
//! type `Alert` to a bounded in-process accumulator; the HTTP surface
//! that would list/clear them is out of scope per §1, the accumulator
//! itself is not.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use common_base::utils::duration::MillisDuration;
use common_base::utils::time_util::Timestamp;
use serde::{Deserialize, Serialize};
use sim_core::{Event, EventType, Value};

use crate::action::{Action, ActionSink, ActionStep, NoopActionSink};
use crate::condition::{evaluate_all, Condition, ConditionLogic};

const MAX_TRIGGER_DEPTH: u32 = 16;
const MAX_ALERTS: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_logic")]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub actions: Vec<ActionStep>,
    #[serde(default)]
    pub cooldown_seconds: u64,
    #[serde(skip)]
    pub last_triggered: Option<Timestamp>,
    #[serde(skip)]
    pub trigger_count: u64,
}

fn default_true() -> bool {
    true
}

fn default_logic() -> ConditionLogic {
    ConditionLogic::And
}

impl Rule {
    fn cooldown(&self) -> MillisDuration {
        MillisDuration::from_secs(self.cooldown_seconds)
    }

    /// True while this rule is still within its cooldown window after
    /// `last_triggered`. A rule that has never fired is never in cooldown.
    fn in_cooldown(&self, now: Timestamp) -> bool {
        let cooldown = self.cooldown();
        if cooldown.is_zero() {
            return false;
        }
        match self.last_triggered {
            Some(last) => now.delta_since(last) < cooldown.as_millis() * 1_000,
            None => false,
        }
    }
}

pub struct RulesEngine {
    rules: RwLock<Vec<Rule>>,
    sink: Arc<dyn ActionSink>,
    alerts: Mutex<VecDeque<Event>>,
}

impl RulesEngine {
    pub fn new(sink: Arc<dyn ActionSink>) -> Self {
        RulesEngine {
            rules: RwLock::new(Vec::new()),
            sink,
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_noop_sink() -> Self {
        Self::new(Arc::new(NoopActionSink))
    }

    pub fn add_rule(&self, rule: Rule) {
        let mut rules = self.rules.write().unwrap();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules.read().unwrap().clone()
    }

    pub fn remove_rule(&self, name: &str) {
        self.rules.write().unwrap().retain(|r| r.name != name);
    }

    pub fn alerts(&self) -> Vec<Event> {
        self.alerts.lock().unwrap().iter().cloned().collect()
    }

    pub fn clear_alerts(&self) {
        self.alerts.lock().unwrap().clear();
    }

    fn push_alert(&self, source: &str, message: String) {
        let mut alerts = self.alerts.lock().unwrap();
        if alerts.len() >= MAX_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(Event::new(EventType::Alert, source, Value::String(message)));
    }

    /// Evaluate every enabled rule (priority order, descending, ties by
    /// insertion order) against `data`, firing matching rules.
    pub async fn process(&self, data: &Value) {
        self.process_inner(data, 0).await;
    }

    async fn process_inner(&self, data: &Value, depth: u32) {
        if depth > MAX_TRIGGER_DEPTH {
            tracing::warn!(depth, "trigger_rule cycle protection engaged, aborting recursion");
            return;
        }

        let names: Vec<String> = self.rules.read().unwrap().iter().map(|r| r.name.clone()).collect();
        for name in names {
            self.evaluate_one(&name, data, depth).await;
        }
    }

    async fn evaluate_one(&self, name: &str, data: &Value, depth: u32) {
        let now = Timestamp::now();

        let (should_run, logic, conditions, actions) = {
            let rules = self.rules.read().unwrap();
            let Some(rule) = rules.iter().find(|r| r.name == name) else {
                return;
            };
            if !rule.enabled || rule.in_cooldown(now) {
                (false, rule.condition_logic, Vec::new(), Vec::new())
            } else {
                (true, rule.condition_logic, rule.conditions.clone(), rule.actions.clone())
            }
        };

        if !should_run || !evaluate_all(&conditions, logic, data) {
            return;
        }

        {
            let mut rules = self.rules.write().unwrap();
            if let Some(rule) = rules.iter_mut().find(|r| r.name == name) {
                rule.last_triggered = Some(now);
                rule.trigger_count += 1;
            }
        }

        tracing::info!(rule = name, "rule triggered");
        self.execute_actions(name, &actions, data, depth).await;
    }

    async fn execute_actions(&self, rule_name: &str, actions: &[ActionStep], data: &Value, depth: u32) {
        for step in actions {
            let result = self.execute_one(rule_name, &step.action, data, depth).await;
            if let Err(reason) = result {
                tracing::warn!(rule = rule_name, %reason, "rule action failed");
                if step.abort_on_error {
                    return;
                }
            }
        }
    }

    async fn execute_one(&self, rule_name: &str, action: &Action, data: &Value, depth: u32) -> Result<(), String> {
        match action {
            Action::Log { message } => {
                tracing::info!(rule = rule_name, %message, "rule log action");
                Ok(())
            }
            Action::PublishMessage { protocol, topic, data: payload } => {
                self.sink.publish_message(protocol, topic, payload).await
            }
            Action::SetValue { path, value } => self.sink.set_value(path, value).await,
            Action::SendAlert { message, severity } => {
                self.push_alert(rule_name, format!("[{severity}] {message}"));
                Ok(())
            }
            Action::Webhook { url, payload } => self.sink.webhook(url, payload).await,
            Action::Delay { ms } => {
                tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
                Ok(())
            }
            Action::Throttle { key, ms } => {
                tracing::debug!(rule = rule_name, %key, ms, "rule throttle action (no-op beyond the delay)");
                tokio::time::sleep(std::time::Duration::from_millis(*ms)).await;
                Ok(())
            }
            Action::TriggerRule { name } => {
                if depth + 1 > MAX_TRIGGER_DEPTH {
                    return Err(format!("trigger_rule depth exceeded at rule '{name}'"));
                }
                Box::pin(self.evaluate_one(name, data, depth + 1)).await;
                Ok(())
            }
            Action::CreateEvent { event_type, data: payload } => {
                tracing::debug!(rule = rule_name, %event_type, "rule created event");
                if event_type == "alert" {
                    self.push_alert(rule_name, payload.to_display_string());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct CountingSink {
        publishes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ActionSink for CountingSink {
        async fn publish_message(&self, _protocol: &str, _topic: &str, _data: &Value) -> Result<(), String> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn set_value(&self, _path: &str, _value: &Value) -> Result<(), String> {
            Ok(())
        }
        async fn webhook(&self, _url: &str, _payload: &Value) -> Result<(), String> {
            Ok(())
        }
    }

    fn temp_payload(value: f64) -> Value {
        let mut m = BTreeMap::new();
        m.insert("temp".to_string(), Value::Float(value));
        Value::Map(m)
    }

    #[tokio::test]
    async fn rule_fires_when_conditions_hold() {
        let sink = Arc::new(CountingSink::default());
        let engine = RulesEngine::new(sink.clone());
        engine.add_rule(Rule {
            name: "hot".into(),
            enabled: true,
            priority: 0,
            conditions: vec![Condition { field: "temp".into(), op: crate::condition::ConditionOp::Gt, value: Value::Int(40), value2: Value::Null }],
            condition_logic: ConditionLogic::And,
            actions: vec![ActionStep { action: Action::PublishMessage { protocol: "mqtt".into(), topic: "alerts/temp".into(), data: Value::Null }, abort_on_error: false }],
            cooldown_seconds: 0,
            last_triggered: None,
            trigger_count: 0,
        });

        engine.process(&temp_payload(45.0)).await;
        assert_eq!(sink.publishes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.rules()[0].trigger_count, 1);
    }

    #[tokio::test]
    async fn rule_under_cooldown_is_skipped_without_evaluating_conditions() {
        let engine = RulesEngine::with_noop_sink();
        engine.add_rule(Rule {
            name: "hot".into(),
            enabled: true,
            priority: 0,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            actions: vec![ActionStep { action: Action::Log { message: "fired".into() }, abort_on_error: false }],
            cooldown_seconds: 60,
            last_triggered: None,
            trigger_count: 0,
        });

        engine.process(&Value::map()).await;
        assert_eq!(engine.rules()[0].trigger_count, 1);
        engine.process(&Value::map()).await;
        assert_eq!(engine.rules()[0].trigger_count, 1, "cooldown must block a second trigger within the window");
    }

    #[tokio::test]
    async fn send_alert_action_appends_to_alerts() {
        let engine = RulesEngine::with_noop_sink();
        engine.add_rule(Rule {
            name: "alerting".into(),
            enabled: true,
            priority: 0,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            actions: vec![ActionStep { action: Action::SendAlert { message: "overheat".into(), severity: "critical".into() }, abort_on_error: false }],
            cooldown_seconds: 0,
            last_triggered: None,
            trigger_count: 0,
        });

        engine.process(&Value::map()).await;
        let alerts = engine.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].data.to_display_string().contains("overheat"));
    }

    #[tokio::test]
    async fn trigger_rule_runs_the_named_rule_recursively() {
        let sink = Arc::new(CountingSink::default());
        let engine = RulesEngine::new(sink.clone());
        engine.add_rule(Rule {
            name: "inner".into(),
            enabled: true,
            priority: 0,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            actions: vec![ActionStep { action: Action::PublishMessage { protocol: "mqtt".into(), topic: "t".into(), data: Value::Null }, abort_on_error: false }],
            cooldown_seconds: 0,
            last_triggered: None,
            trigger_count: 0,
        });
        engine.add_rule(Rule {
            name: "outer".into(),
            enabled: true,
            priority: 1,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            actions: vec![ActionStep { action: Action::TriggerRule { name: "inner".into() }, abort_on_error: false }],
            cooldown_seconds: 0,
            last_triggered: None,
            trigger_count: 0,
        });

        engine.process(&Value::map()).await;
        assert_eq!(sink.publishes.load(Ordering::SeqCst), 1);
        assert_eq!(engine.rules().iter().find(|r| r.name == "inner").unwrap().trigger_count, 1);
    }

    #[tokio::test]
    async fn action_failure_does_not_abort_remaining_actions_by_default() {
        struct FailingSink;
        #[async_trait::async_trait]
        impl ActionSink for FailingSink {
            async fn publish_message(&self, _p: &str, _t: &str, _d: &Value) -> Result<(), String> {
                Err("boom".into())
            }
            async fn set_value(&self, _p: &str, _v: &Value) -> Result<(), String> {
                Ok(())
            }
            async fn webhook(&self, _u: &str, _p: &Value) -> Result<(), String> {
                Ok(())
            }
        }

        let engine = RulesEngine::new(Arc::new(FailingSink));
        engine.add_rule(Rule {
            name: "r".into(),
            enabled: true,
            priority: 0,
            conditions: vec![],
            condition_logic: ConditionLogic::And,
            actions: vec![
                ActionStep { action: Action::PublishMessage { protocol: "mqtt".into(), topic: "t".into(), data: Value::Null }, abort_on_error: false },
                ActionStep { action: Action::SendAlert { message: "after failure".into(), severity: "info".into() }, abort_on_error: false },
            ],
            cooldown_seconds: 0,
            last_triggered: None,
            trigger_count: 0,
        });

        engine.process(&Value::map()).await;
        assert_eq!(engine.alerts().len(), 1, "the SendAlert action must still run after the prior action failed");
    }

    #[tokio::test]
    async fn priority_order_runs_descending_with_insertion_order_ties() {
        let sink = Arc::new(CountingSink::default());
        let engine = RulesEngine::new(sink);
        engine.add_rule(Rule { name: "low".into(), enabled: true, priority: 0, conditions: vec![], condition_logic: ConditionLogic::And, actions: vec![], cooldown_seconds: 0, last_triggered: None, trigger_count: 0 });
        engine.add_rule(Rule { name: "high".into(), enabled: true, priority: 10, conditions: vec![], condition_logic: ConditionLogic::And, actions: vec![], cooldown_seconds: 0, last_triggered: None, trigger_count: 0 });
        let names: Vec<String> = engine.rules().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }
}
