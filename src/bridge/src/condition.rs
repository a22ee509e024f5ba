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

//! Condition evaluation shared by the bridge engine (§4.3: `eq, ne, gt, lt,
//! gte, lte, in, contains`) and the rules engine (§4.4: the bridge's set
//! plus `regex, starts_with, ends_with, not_contains, between, is_null,
//! is_not_null, not_in`). One enum covers both op sets; the bridge mapping
//! file format only ever emits the §4.3 subset, but nothing stops a bridge
//! condition from using the richer set too since both walk the same
//! dotted-path payload.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sim_core::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    Contains,
    Regex,
    StartsWith,
    EndsWith,
    NotContains,
    Between,
    IsNull,
    IsNotNull,
    NotIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
    /// Second bound for `between`; unused by every other op.
    #[serde(default)]
    pub value2: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    And,
    Or,
}

impl Condition {
    /// Evaluate this condition against `payload` (dotted-path lookup via
    /// `Value::get_path`, matching both the bridge's and the rules
    /// engine's field resolution per §4.3/§4.4).
    pub fn evaluate(&self, payload: &Value) -> bool {
        let field = payload.get_path(&self.field);
        match self.op {
            ConditionOp::IsNull => match field {
                None => true,
                Some(v) => matches!(v, Value::Null),
            },
            ConditionOp::IsNotNull => match field {
                None => false,
                Some(v) => !matches!(v, Value::Null),
            },
            _ => match field {
                Some(field) => self.evaluate_present(field),
                None => false,
            },
        }
    }

    fn evaluate_present(&self, field: &Value) -> bool {
        match self.op {
            ConditionOp::Eq => values_equal(field, &self.value),
            ConditionOp::Ne => !values_equal(field, &self.value),
            ConditionOp::Gt => numeric_cmp(field, &self.value, |a, b| a > b),
            ConditionOp::Lt => numeric_cmp(field, &self.value, |a, b| a < b),
            ConditionOp::Gte => numeric_cmp(field, &self.value, |a, b| a >= b),
            ConditionOp::Lte => numeric_cmp(field, &self.value, |a, b| a <= b),
            ConditionOp::In => match &self.value {
                Value::List(items) => items.iter().any(|v| values_equal(v, field)),
                _ => false,
            },
            ConditionOp::NotIn => match &self.value {
                Value::List(items) => !items.iter().any(|v| values_equal(v, field)),
                _ => true,
            },
            ConditionOp::Contains => field.contains(&self.value),
            ConditionOp::NotContains => !field.contains(&self.value),
            ConditionOp::StartsWith => str_predicate(field, &self.value, str::starts_with),
            ConditionOp::EndsWith => str_predicate(field, &self.value, str::ends_with),
            ConditionOp::Regex => match (field.as_str(), self.value.as_str()) {
                (Some(s), Some(pattern)) => Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false),
                _ => false,
            },
            ConditionOp::Between => match (field.as_f64(), self.value.as_f64(), self.value2.as_f64()) {
                (Some(f), Some(lo), Some(hi)) => f >= lo.min(hi) && f <= lo.max(hi),
                _ => false,
            },
            ConditionOp::IsNull | ConditionOp::IsNotNull => unreachable!("handled in evaluate"),
        }
    }
}

fn str_predicate(field: &Value, needle: &Value, predicate: fn(&str, &str) -> bool) -> bool {
    match (field.as_str(), needle.as_str()) {
        (Some(s), Some(n)) => predicate(s, n),
        _ => false,
    }
}

fn numeric_cmp(a: &Value, b: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        if !matches!(a, Value::String(_)) && !matches!(b, Value::String(_)) {
            return x == y;
        }
    }
    a.to_display_string() == b.to_display_string()
}

/// Evaluate a list of conditions under AND/OR logic (§4.4; the bridge's
/// own conditions, per §4.3, are always implicitly AND-ed: "A rule fires
/// only if all conditions hold").
pub fn evaluate_all(conditions: &[Condition], logic: ConditionLogic, payload: &Value) -> bool {
    match logic {
        ConditionLogic::And => conditions.iter().all(|c| c.evaluate(payload)),
        ConditionLogic::Or => {
            if conditions.is_empty() {
                true
            } else {
                conditions.iter().any(|c| c.evaluate(payload))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn payload() -> Value {
        let mut m = BTreeMap::new();
        m.insert("temp".to_string(), Value::Float(42.5));
        m.insert("status".to_string(), Value::String("running-hot".to_string()));
        m.insert("tags".to_string(), Value::List(vec![Value::String("a".into()), Value::String("b".into())]));
        Value::Map(m)
    }

    #[test]
    fn gt_and_lte_compare_numerically() {
        let p = payload();
        assert!(Condition { field: "temp".into(), op: ConditionOp::Gt, value: Value::Int(40), value2: Value::Null }.evaluate(&p));
        assert!(!Condition { field: "temp".into(), op: ConditionOp::Lte, value: Value::Int(40), value2: Value::Null }.evaluate(&p));
    }

    #[test]
    fn starts_with_and_ends_with() {
        let p = payload();
        assert!(Condition { field: "status".into(), op: ConditionOp::StartsWith, value: Value::String("running".into()), value2: Value::Null }.evaluate(&p));
        assert!(Condition { field: "status".into(), op: ConditionOp::EndsWith, value: Value::String("hot".into()), value2: Value::Null }.evaluate(&p));
    }

    #[test]
    fn between_is_inclusive() {
        let p = payload();
        let c = Condition { field: "temp".into(), op: ConditionOp::Between, value: Value::Int(40), value2: Value::Int(45) };
        assert!(c.evaluate(&p));
    }

    #[test]
    fn is_null_and_is_not_null() {
        let p = payload();
        assert!(Condition { field: "missing".into(), op: ConditionOp::IsNull, value: Value::Null, value2: Value::Null }.evaluate(&p));
        assert!(Condition { field: "temp".into(), op: ConditionOp::IsNotNull, value: Value::Null, value2: Value::Null }.evaluate(&p));
    }

    #[test]
    fn missing_field_is_false_for_non_null_ops() {
        let p = payload();
        assert!(!Condition { field: "missing".into(), op: ConditionOp::Eq, value: Value::Int(1), value2: Value::Null }.evaluate(&p));
    }

    #[test]
    fn cooldown_style_and_or_logic() {
        let p = payload();
        let conds = vec![
            Condition { field: "temp".into(), op: ConditionOp::Gt, value: Value::Int(100), value2: Value::Null },
            Condition { field: "status".into(), op: ConditionOp::Contains, value: Value::String("hot".into()), value2: Value::Null },
        ];
        assert!(!evaluate_all(&conds, ConditionLogic::And, &p));
        assert!(evaluate_all(&conds, ConditionLogic::Or, &p));
    }
}
