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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dynamic payload value. Bridge transforms and rule conditions walk
/// JSON-shaped trees coming from any of the protocol simulators; rather than
/// threading `serde_json::Value` through every call site (and inheriting its
/// untyped-number ambiguity) the platform owns this tagged variant with an
/// explicit `Bytes` case for binary payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn map() -> Value {
        Value::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::String(s) => match s.as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Bytes(b) => hex_encode(b),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_else(|_| "<unserializable>".to_string())
            }
        }
    }

    /// Resolve a dotted path (`"data.value"`, `"a.b.c"`) against this value,
    /// treating `self` as the root object. List indices are not addressed by
    /// dotted paths in this platform -- mappings and conditions only walk
    /// maps, matching the bridge/rules spec.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            if segment.is_empty() {
                continue;
            }
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Write `value` at `path`, creating intermediate maps as needed.
    /// Requires `self` to already be (or become) a `Map`.
    pub fn set_path(&mut self, path: &str, value: Value) {
        if matches!(self, Value::Null) {
            *self = Value::map();
        }
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            *self = value;
            return;
        }
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            let map = match current {
                Value::Map(m) => m,
                _ => {
                    *current = Value::map();
                    match current {
                        Value::Map(m) => m,
                        _ => unreachable!(),
                    }
                }
            };
            current = map
                .entry((*segment).to_string())
                .or_insert_with(Value::map);
        }
        if let Value::Map(m) = current {
            m.insert(segments[segments.len() - 1].to_string(), value);
        }
    }

    /// Remove a field at a dotted path. Used by bridge transform `exclude`
    /// filters. Only the final segment is removed; intermediate maps are
    /// left untouched even if they become empty.
    pub fn remove_path(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return;
        }
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            match current.as_map_mut().and_then(|m| m.get_mut(*segment)) {
                Some(next) => current = next,
                None => return,
            }
        }
        if let Some(m) = current.as_map_mut() {
            m.remove(segments[segments.len() - 1]);
        }
    }

    /// Ensure a field exists at `path`, inserting `Null` if absent. Used by
    /// bridge transform `keep` filters.
    pub fn ensure_path(&mut self, path: &str) {
        if self.get_path(path).is_none() {
            self.set_path(path, Value::Null);
        }
    }

    /// Coerce this value to the named type, per the bridge field_mapping
    /// `type` attribute: `integer, float, boolean, string, json, binary`.
    pub fn coerce(&self, type_name: &str) -> Value {
        match type_name {
            "integer" => self
                .as_i64()
                .map(Value::Int)
                .unwrap_or(Value::Null),
            "float" => self
                .as_f64()
                .map(Value::Float)
                .unwrap_or(Value::Null),
            "boolean" => self
                .as_bool()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            "string" => Value::String(self.to_display_string()),
            "json" => self.clone(),
            "binary" => match self {
                Value::Bytes(_) => self.clone(),
                Value::String(s) => Value::Bytes(s.as_bytes().to_vec()),
                other => Value::Bytes(other.to_display_string().into_bytes()),
            },
            _ => self.clone(),
        }
    }

    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(items) => items.contains(needle),
            Value::String(s) => match needle {
                Value::String(n) => s.contains(n.as_str()),
                _ => false,
            },
            Value::Map(m) => match needle.as_str() {
                Some(key) => m.contains_key(key),
                None => false,
            },
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::json!(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(hex_encode(&b)),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let json = serde_json::json!({
            "protocol": "modbus",
            "topic": "holding-registers",
            "data": { "value": 1000, "address": 4 }
        });
        Value::from(json)
    }

    #[test]
    fn get_path_resolves_nested_fields() {
        let v = sample();
        assert_eq!(v.get_path("data.value"), Some(&Value::Int(1000)));
        assert_eq!(v.get_path("data.address"), Some(&Value::Int(4)));
        assert_eq!(v.get_path("missing.field"), None);
    }

    #[test]
    fn set_path_creates_intermediate_maps() {
        let mut v = Value::map();
        v.set_path("sensor.reading.value", Value::Float(1.0));
        assert_eq!(v.get_path("sensor.reading.value"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn remove_path_deletes_leaf_only() {
        let mut v = sample();
        v.remove_path("data.address");
        assert_eq!(v.get_path("data.address"), None);
        assert_eq!(v.get_path("data.value"), Some(&Value::Int(1000)));
    }

    #[test]
    fn ensure_path_inserts_null_when_absent() {
        let mut v = sample();
        v.ensure_path("data.units");
        assert_eq!(v.get_path("data.units"), Some(&Value::Null));
    }

    #[test]
    fn coerce_float_from_int() {
        let v = Value::Int(1000);
        assert_eq!(v.coerce("float"), Value::Float(1000.0));
    }

    #[test]
    fn coerce_string_from_bool() {
        let v = Value::Bool(true);
        assert_eq!(v.coerce("string"), Value::String("true".to_string()));
    }
}
