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

//! The periodic value-evolution rule shared by every protocol's data
//! simulator (§4.2): `v' = clamp(v + N(0, sigma), min, max)` for analog
//! quantities, a 10%-per-tick flip for booleans, and a weighted rotation
//! for status strings.

use rand::Rng;

pub const TICK_INTERVAL_SECS: u64 = 1;

/// Built-in per-name sigma profile (§4.2). Falls back to `default_sigma`
/// (typically derived from an object's declared resolution) when the name
/// doesn't match a known quantity.
pub fn sigma_for_name(name: &str, default_sigma: f64) -> f64 {
    let lower = name.to_ascii_lowercase();
    if lower.contains("temperature") || lower.contains("temp") {
        0.5
    } else if lower.contains("pressure") {
        1.0
    } else if lower.contains("humidity") {
        2.0
    } else if lower.contains("voltage") {
        5.0
    } else if lower.contains("current") {
        rand::thread_rng().gen_range(0.0..=20.0)
    } else if lower.contains("power") {
        rand::thread_rng().gen_range(0.0..=5000.0)
    } else if lower.contains("light") {
        50.0
    } else {
        default_sigma
    }
}

/// Draws one `N(0, sigma)` sample via the Box-Muller transform.
fn sample_normal(sigma: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let radius = (-2.0 * u1.ln()).sqrt();
    radius * (2.0 * std::f64::consts::PI * u2).cos() * sigma
}

/// One analog evolution step, clamped to `[min, max]`.
pub fn evolve_analog(value: f64, sigma: f64, min: f64, max: f64) -> f64 {
    let sigma = sigma.max(f64::EPSILON);
    let delta = sample_normal(sigma);
    (value + delta).clamp(min, max)
}

/// Flip a boolean with the fixed per-tick probability from §4.2.
pub fn evolve_boolean(value: bool) -> bool {
    const FLIP_PROBABILITY: f64 = 0.1;
    if rand::thread_rng().gen_bool(FLIP_PROBABILITY) {
        !value
    } else {
        value
    }
}

/// Status-string rotation, heavily weighted toward `"running"`.
pub fn evolve_status(current: &str) -> &'static str {
    const BAG: &[(&str, u32)] = &[
        ("running", 70),
        ("idle", 15),
        ("warning", 10),
        ("error", 5),
    ];
    let total: u32 = BAG.iter().map(|(_, w)| w).sum();
    let mut roll = rand::thread_rng().gen_range(0..total);
    for (name, weight) in BAG {
        if roll < *weight {
            return name;
        }
        roll -= weight;
    }
    let _ = current;
    "running"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analog_evolution_stays_within_bounds() {
        for _ in 0..1000 {
            let v = evolve_analog(50.0, 10.0, 0.0, 60.0);
            assert!((0.0..=60.0).contains(&v));
        }
    }

    #[test]
    fn sigma_profile_matches_documented_values() {
        assert_eq!(sigma_for_name("room_temperature", 1.0), 0.5);
        assert_eq!(sigma_for_name("line_pressure", 1.0), 1.0);
        assert_eq!(sigma_for_name("unrecognized_field", 3.0), 3.0);
    }

    #[test]
    fn status_rotation_always_returns_known_value() {
        let known = ["running", "idle", "warning", "error"];
        for _ in 0..200 {
            assert!(known.contains(&evolve_status("running")));
        }
    }
}
