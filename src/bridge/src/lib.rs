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

//! Bridge engine (§4.3) and rules engine (§4.4): topic-aware routing
//! between simulators with conditional rules, transforms, and an
//! automation engine whose actions can publish, mutate state, alert, or
//! recursively trigger other rules.

pub mod action;
pub mod condition;
pub mod engine;
pub mod mapping;
pub mod message;
pub mod rules;

pub use action::{Action, ActionSink, ActionStep, NoopActionSink};
pub use condition::{Condition, ConditionLogic, ConditionOp};
pub use engine::{BridgeEngine, BridgeError, BridgeResult, BridgeRule, BridgeStats};
pub use mapping::{Direction, FieldMapping, Filter, ForwardDirection, Formula, Mapping, Transform, TransformError};
pub use message::Message;
pub use rules::{Rule, RulesEngine};
