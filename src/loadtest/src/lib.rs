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

//! Load tester (§4.9): a virtual-user pool driven by one of five
//! schedules, reporting latency percentiles at the end of a run.

pub mod metrics;
pub mod runner;
pub mod schedule;
pub mod target;

pub use metrics::{LoadTestMetrics, MetricsRecorder};
pub use runner::{LoadTestConfig, LoadTester};
pub use schedule::TestType;
pub use target::LoadTarget;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadTestError {
    #[error("load test already running")]
    AlreadyRunning,
    #[error("load test not running")]
    NotRunning,
}

pub type LoadTestResult<T> = Result<T, LoadTestError>;
