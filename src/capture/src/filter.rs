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

//! Capture filter rules (§4.6): "rule evaluation is linear over active
//! rules; the first matching rule decides keep or drop (insertion order)".
//! When no rule matches, the packet is kept — an empty filter set is a
//! pass-through, matching the capturer's default of retaining everything
//! until an operator narrows it down.

use sim_core::packet::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Keep,
    Drop,
}

/// One filter rule. Every populated criterion must match for the rule to
/// apply (AND across criteria); unset criteria (`None`) are ignored.
#[derive(Debug, Clone, Default)]
pub struct FilterRule {
    pub name: String,
    pub protocols: Option<Vec<Protocol>>,
    pub ports: Option<Vec<u16>>,
    pub addresses: Option<Vec<String>>,
    pub keyword: Option<String>,
    pub action: Option<FilterAction>,
}

impl FilterRule {
    pub fn new(name: impl Into<String>, action: FilterAction) -> Self {
        FilterRule {
            name: name.into(),
            protocols: None,
            ports: None,
            addresses: None,
            keyword: None,
            action: Some(action),
        }
    }

    pub fn with_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        self.protocols = Some(protocols);
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn with_addresses(mut self, addresses: Vec<String>) -> Self {
        self.addresses = Some(addresses);
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    fn matches(&self, protocol: Protocol, src_port: u16, dst_port: u16, src_addr: &str, dst_addr: &str, info: &str) -> bool {
        if let Some(protocols) = &self.protocols {
            if !protocols.contains(&protocol) {
                return false;
            }
        }
        if let Some(ports) = &self.ports {
            if !ports.contains(&src_port) && !ports.contains(&dst_port) {
                return false;
            }
        }
        if let Some(addresses) = &self.addresses {
            if !addresses.iter().any(|a| a == src_addr || a == dst_addr) {
                return false;
            }
        }
        if let Some(keyword) = &self.keyword {
            if !info.contains(keyword.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Evaluate `rules` in order against one packet's fields; the first match
/// decides. No match at all means keep.
pub fn evaluate(
    rules: &[FilterRule],
    protocol: Protocol,
    src_port: u16,
    dst_port: u16,
    src_addr: &str,
    dst_addr: &str,
    info: &str,
) -> FilterAction {
    for rule in rules {
        if rule.matches(protocol, src_port, dst_port, src_addr, dst_addr, info) {
            return rule.action.unwrap_or(FilterAction::Keep);
        }
    }
    FilterAction::Keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rules_keep_everything() {
        let action = evaluate(&[], Protocol::Modbus, 502, 51000, "127.0.0.1", "127.0.0.1", "read holding registers");
        assert_eq!(action, FilterAction::Keep);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            FilterRule::new("drop-mqtt", FilterAction::Drop).with_protocols(vec![Protocol::Mqtt]),
            FilterRule::new("keep-all", FilterAction::Keep),
        ];
        let action = evaluate(&rules, Protocol::Mqtt, 1883, 51000, "127.0.0.1", "127.0.0.1", "publish");
        assert_eq!(action, FilterAction::Drop);
    }

    #[test]
    fn keyword_filter_matches_info_substring() {
        let rules = vec![FilterRule::new("drop-keepalive", FilterAction::Drop).with_keyword("pingreq")];
        let drop = evaluate(&rules, Protocol::Mqtt, 1883, 51000, "127.0.0.1", "127.0.0.1", "pingreq received");
        assert_eq!(drop, FilterAction::Drop);
        let keep = evaluate(&rules, Protocol::Mqtt, 1883, 51000, "127.0.0.1", "127.0.0.1", "publish received");
        assert_eq!(keep, FilterAction::Keep);
    }

    #[test]
    fn unmatched_ports_fall_through_to_next_rule() {
        let rules = vec![
            FilterRule::new("drop-502", FilterAction::Drop).with_ports(vec![502]),
            FilterRule::new("keep-rest", FilterAction::Keep),
        ];
        let action = evaluate(&rules, Protocol::Mqtt, 1883, 51000, "127.0.0.1", "127.0.0.1", "publish");
        assert_eq!(action, FilterAction::Keep);
    }
}
