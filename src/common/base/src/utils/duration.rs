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

use humantime::format_duration;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
    time::Duration,
};

pub const SEC_IN_MICRO: u64 = 1_000_000;

/// A duration newtype that (de)serializes as whole milliseconds and parses
/// humantime strings ("30s", "1m", "0" / "unlimited" for zero). Used for
/// cooldowns, fault durations, connection idle timeouts and replay deltas.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MillisDuration(u64);

impl MillisDuration {
    pub const ZERO: MillisDuration = MillisDuration(0);

    pub fn from_millis(millis: u64) -> Self {
        MillisDuration(millis)
    }

    pub fn from_secs(secs: u64) -> Self {
        MillisDuration(secs * 1000)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn scaled(&self, factor: f64) -> MillisDuration {
        MillisDuration(((self.0 as f64) * factor).round() as u64)
    }
}

impl From<Duration> for MillisDuration {
    fn from(d: Duration) -> Self {
        MillisDuration(d.as_millis() as u64)
    }
}

impl From<MillisDuration> for Duration {
    fn from(d: MillisDuration) -> Self {
        d.as_duration()
    }
}

impl FromStr for MillisDuration {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        if lower == "0" || lower == "unlimited" || lower == "disabled" || lower == "none" {
            return Ok(MillisDuration::ZERO);
        }
        let d = humantime::parse_duration(&lower)?;
        Ok(MillisDuration::from(d))
    }
}

impl Display for MillisDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", format_duration(self.as_duration()))
    }
}

impl Default for MillisDuration {
    fn default() -> Self {
        MillisDuration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_humantime_strings() {
        let d: MillisDuration = "30s".parse().unwrap();
        assert_eq!(d.as_millis(), 30_000);
    }

    #[test]
    fn zero_aliases_parse_to_zero() {
        for alias in ["0", "unlimited", "disabled", "none"] {
            let d: MillisDuration = alias.parse().unwrap();
            assert!(d.is_zero());
        }
    }

    #[test]
    fn scales_proportionally() {
        let d = MillisDuration::from_millis(1000);
        assert_eq!(d.scaled(0.5).as_millis(), 500);
        assert_eq!(d.scaled(2.0).as_millis(), 2000);
    }
}
