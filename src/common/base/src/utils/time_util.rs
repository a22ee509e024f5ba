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

use chrono::{DateTime, Utc};
use core::fmt;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn get_current_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_micros() as u64
}

/// UTC microsecond timestamp used on PacketEvent, RecordedPacket and Event.
/// Stored as a plain u64 on the wire (JSON export, recorder persistence) but
/// manipulated as a typed value internally.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Timestamp(u64);

pub const UTC_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(get_current_micros())
    }

    pub fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn to_utc_string(&self, format: &str) -> String {
        let secs = (self.0 / 1_000_000) as i64;
        let nanos = ((self.0 % 1_000_000) * 1_000) as u32;
        match DateTime::<Utc>::from_timestamp(secs, nanos) {
            Some(dt) => dt.format(format).to_string(),
            None => String::from("invalid-timestamp"),
        }
    }

    /// Difference in microseconds, saturating at zero if `self` is earlier.
    pub fn delta_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_utc_string(UTC_TIME_FORMAT))
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(value: Timestamp) -> u64 {
        value.0
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_u64(TimestampVisitor)
    }
}

struct TimestampVisitor;

impl Visitor<'_> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a microsecond UTC timestamp as a u64")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Timestamp::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_positive() {
        assert!(Timestamp::now().as_micros() > 0);
    }

    #[test]
    fn delta_since_is_strictly_positive_for_later_timestamp() {
        let a = Timestamp::from_micros(1_000);
        let b = Timestamp::from_micros(1_500);
        assert_eq!(b.delta_since(a), 500);
        assert_eq!(a.delta_since(b), 0);
    }

    #[test]
    fn formats_as_utc_string() {
        let ts = Timestamp::from_micros(1_738_405_752_000_000);
        assert!(ts.to_utc_string("%Y-%m-%d").starts_with("2025-"));
    }
}
