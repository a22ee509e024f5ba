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

//! MQTT topic-filter matching (§4.1, §4.3). `+` matches exactly one level,
//! `#` matches the rest of the topic and must be the final token. Shared
//! between the MQTT broker simulator's subscription matching and the bridge
//! engine's mapping matching -- the bridge deliberately reuses MQTT wildcard
//! semantics for every protocol's topic strings (see REDESIGN FLAGS: the
//! ambiguous `_matches_mapping` behavior is resolved by always treating both
//! source and target topics as MQTT-style filters).

pub fn matches(filter: &str, topic: &str) -> bool {
    let filter_levels: Vec<&str> = filter.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();
    matches_levels(&filter_levels, &topic_levels)
}

fn matches_levels(filter: &[&str], topic: &[&str]) -> bool {
    match filter.first() {
        None => topic.is_empty(),
        Some(&"#") => filter.len() == 1,
        Some(&"+") => {
            if topic.is_empty() {
                false
            } else {
                matches_levels(&filter[1..], &topic[1..])
            }
        }
        Some(literal) => {
            if topic.first() == Some(literal) {
                matches_levels(&filter[1..], &topic[1..])
            } else {
                false
            }
        }
    }
}

/// True when `filter` is a syntactically valid subscription filter: `#` may
/// only appear as the last token, `+` may only occupy a whole level.
pub fn is_valid_filter(filter: &str) -> bool {
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_match() {
        assert!(matches("a/b/c", "a/b/c"));
        assert!(!matches("a/b/c", "a/b/d"));
    }

    #[test]
    fn plus_matches_one_level() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/c/d"));
        assert!(!matches("a/+", "a"));
    }

    #[test]
    fn hash_matches_remaining_levels() {
        assert!(matches("a/#", "a/b/c"));
        assert!(matches("a/#", "a"));
        assert!(matches("#", "a/b/c"));
    }

    #[test]
    fn hash_must_be_final_token_to_be_valid() {
        assert!(is_valid_filter("a/#"));
        assert!(!is_valid_filter("a/#/b"));
        assert!(!is_valid_filter("a/b#"));
    }

    #[test]
    fn plus_must_occupy_whole_level_to_be_valid() {
        assert!(is_valid_filter("a/+/c"));
        assert!(!is_valid_filter("a/b+"));
    }

    #[test]
    fn sys_topics_are_not_special_cased() {
        assert!(matches("sensors/+/temp", "sensors/room1/temp"));
    }
}
