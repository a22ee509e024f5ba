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

//! The five load-test schedules (§4.9), each a pure function from
//! elapsed time to a target virtual-user count. `stress` additionally
//! needs the live failure rate, since its stop condition is "until
//! failure rate explodes or max reached" — the caller feeds that back in.
//!
//! Design Notes' ambiguous "spike... halve users" step: this
//! implementation interprets "halve" as *graceful* shrink — the runner
//! lets any of the now-excess virtual users finish their in-flight
//! request/think-time cycle before it stops, rather than aborting mid
//! request. `target_users` only ever reports the desired pool size; the
//! runner (not this module) performs that graceful reconciliation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    RampUp,
    Spike,
    Soak,
    Stress,
    Burst,
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleParams {
    pub initial_users: usize,
    pub max_users: usize,
    pub test_duration: Duration,
    pub ramp_up_duration: Duration,
    pub burst_size: usize,
}

/// Desired virtual-user count at `elapsed` into the run. `failure_rate` is
/// only consulted by `stress` (0.0 when unknown/at the first call).
pub fn target_users(test_type: TestType, elapsed: Duration, params: &ScheduleParams, failure_rate: f64) -> usize {
    match test_type {
        TestType::RampUp => ramp_up(elapsed, params),
        TestType::Spike => spike(elapsed, params),
        TestType::Soak => params.max_users / 2,
        TestType::Stress => stress(elapsed, params, failure_rate),
        TestType::Burst => burst(elapsed, params),
    }
}

fn ramp_up(elapsed: Duration, params: &ScheduleParams) -> usize {
    let step_duration = params.ramp_up_duration.as_secs_f64() / 10.0;
    if step_duration <= 0.0 || elapsed >= params.ramp_up_duration {
        return params.max_users;
    }
    let step = (elapsed.as_secs_f64() / step_duration).floor() as usize;
    let step = step.min(10);
    let per_step = (params.max_users.saturating_sub(params.initial_users)) / 10;
    params.initial_users + per_step * step
}

fn spike(elapsed: Duration, params: &ScheduleParams) -> usize {
    let hold = Duration::from_secs(30);
    let spike_duration = params.test_duration / 3;
    if elapsed < hold {
        params.initial_users
    } else if elapsed < hold + spike_duration {
        params.max_users
    } else {
        params.max_users / 2
    }
}

fn stress(elapsed: Duration, params: &ScheduleParams, failure_rate: f64) -> usize {
    const FAILURE_RATE_CEILING: f64 = 0.5;
    if failure_rate >= FAILURE_RATE_CEILING {
        return 0;
    }
    let step_duration = params.test_duration.as_secs_f64() / 5.0;
    if step_duration <= 0.0 {
        return params.max_users;
    }
    let step = (elapsed.as_secs_f64() / step_duration).floor() as usize + 1;
    let increment = params.max_users / 5;
    (params.initial_users + increment * step).min(params.max_users)
}

fn burst(elapsed: Duration, params: &ScheduleParams) -> usize {
    let window = Duration::from_secs(10);
    let into_window = Duration::from_nanos((elapsed.as_nanos() % window.as_nanos().max(1)) as u64);
    if into_window < Duration::from_secs(1) {
        params.burst_size
    } else {
        params.initial_users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScheduleParams {
        ScheduleParams {
            initial_users: 10,
            max_users: 110,
            test_duration: Duration::from_secs(300),
            ramp_up_duration: Duration::from_secs(100),
            burst_size: 200,
        }
    }

    #[test]
    fn ramp_up_climbs_in_ten_even_steps_then_sustains() {
        let p = params();
        assert_eq!(target_users(TestType::RampUp, Duration::from_secs(0), &p, 0.0), 10);
        assert_eq!(target_users(TestType::RampUp, Duration::from_secs(10), &p, 0.0), 20);
        assert_eq!(target_users(TestType::RampUp, Duration::from_secs(99), &p, 0.0), 100);
        assert_eq!(target_users(TestType::RampUp, Duration::from_secs(150), &p, 0.0), 110);
    }

    #[test]
    fn spike_holds_then_jumps_then_halves() {
        let p = params();
        assert_eq!(target_users(TestType::Spike, Duration::from_secs(5), &p, 0.0), 10);
        assert_eq!(target_users(TestType::Spike, Duration::from_secs(40), &p, 0.0), 110);
        assert_eq!(target_users(TestType::Spike, Duration::from_secs(250), &p, 0.0), 55);
    }

    #[test]
    fn soak_holds_half_max_for_the_whole_run() {
        let p = params();
        assert_eq!(target_users(TestType::Soak, Duration::from_secs(0), &p, 0.0), 55);
        assert_eq!(target_users(TestType::Soak, Duration::from_secs(299), &p, 0.0), 55);
    }

    #[test]
    fn stress_stops_increasing_once_failure_rate_explodes() {
        let p = params();
        assert_eq!(target_users(TestType::Stress, Duration::from_secs(0), &p, 0.0), 32);
        assert_eq!(target_users(TestType::Stress, Duration::from_secs(0), &p, 0.6), 0);
    }

    #[test]
    fn burst_spikes_for_one_second_per_ten_second_window() {
        let p = params();
        assert_eq!(target_users(TestType::Burst, Duration::from_secs(0), &p, 0.0), 200);
        assert_eq!(target_users(TestType::Burst, Duration::from_secs(5), &p, 0.0), 10);
        assert_eq!(target_users(TestType::Burst, Duration::from_secs(20), &p, 0.0), 200);
    }
}
