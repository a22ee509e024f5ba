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

//! The load-test runner (§4.9): reconciles a live virtual-user pool
//! against the active schedule's target count once per second, and each
//! virtual user loops `{request -> record latency -> sleep think_time}`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::{LoadTestMetrics, MetricsRecorder};
use crate::schedule::{target_users, ScheduleParams, TestType};
use crate::target::LoadTarget;
use crate::{LoadTestError, LoadTestResult};

#[derive(Debug, Clone, Copy)]
pub struct LoadTestConfig {
    pub test_type: TestType,
    pub initial_users: usize,
    pub max_users: usize,
    pub test_duration: Duration,
    pub ramp_up_duration: Duration,
    pub burst_size: usize,
    pub think_time_ms: u64,
}

/// One running or completed load test. `target` is boxed once at
/// construction; virtual users hold an `Arc` clone so the pool can grow
/// without re-wiring anything.
pub struct LoadTester {
    config: LoadTestConfig,
    target: Arc<dyn LoadTarget>,
    metrics: Arc<MetricsRecorder>,
    stop: CancellationToken,
    running: AtomicBool,
    active_users: Arc<AtomicUsize>,
    user_stop_flags: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    start_time: std::sync::Mutex<Option<Instant>>,
    controller: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LoadTester {
    pub fn new(config: LoadTestConfig, target: Arc<dyn LoadTarget>) -> Self {
        LoadTester {
            config,
            target,
            metrics: Arc::new(MetricsRecorder::new()),
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
            active_users: Arc::new(AtomicUsize::new(0)),
            user_stop_flags: std::sync::Mutex::new(Vec::new()),
            start_time: std::sync::Mutex::new(None),
            controller: std::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn params(&self) -> ScheduleParams {
        ScheduleParams {
            initial_users: self.config.initial_users,
            max_users: self.config.max_users,
            test_duration: self.config.test_duration,
            ramp_up_duration: self.config.ramp_up_duration,
            burst_size: self.config.burst_size,
        }
    }

    /// Spawn `count` new virtual-user tasks, each looping request →
    /// record → think-time sleep until its own stop flag is set.
    fn spawn_users(&self, count: usize) {
        let mut flags = self.user_stop_flags.lock().unwrap();
        for _ in 0..count {
            let stop_flag = Arc::new(AtomicBool::new(false));
            let target = self.target.clone();
            let metrics = self.metrics.clone();
            let think_time = Duration::from_millis(self.config.think_time_ms);
            let active_users = self.active_users.clone();
            let task_stop = stop_flag.clone();
            let global_stop = self.stop.clone();

            active_users.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while !task_stop.load(Ordering::SeqCst) && !global_stop.is_cancelled() {
                    let started = Instant::now();
                    let success = target.issue_request().await;
                    metrics.record(started.elapsed(), success);

                    tokio::select! {
                        _ = tokio::time::sleep(think_time) => {}
                        _ = global_stop.cancelled() => break,
                    }
                }
                active_users.fetch_sub(1, Ordering::SeqCst);
            });
            flags.push(stop_flag);
        }
    }

    /// Gracefully shrink the pool by `count`: mark that many user tasks'
    /// stop flags so they finish their current request/think-time cycle
    /// and exit on their own, rather than aborting mid-request (the
    /// "let half finish" reading of the ambiguous spike step).
    fn shrink_users(&self, count: usize) {
        let mut flags = self.user_stop_flags.lock().unwrap();
        for _ in 0..count {
            if let Some(flag) = flags.pop() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    fn reconcile(&self, desired: usize) {
        let current = self.user_stop_flags.lock().unwrap().len();
        if desired > current {
            self.spawn_users(desired - current);
        } else if desired < current {
            self.shrink_users(current - desired);
        }
    }

    pub async fn start(self: &Arc<Self>) -> LoadTestResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(LoadTestError::AlreadyRunning);
        }
        *self.start_time.lock().unwrap() = Some(Instant::now());

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let params = this.params();
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = this.stop.cancelled() => break,
                }
                let elapsed = this.start_time.lock().unwrap().map(|s| s.elapsed()).unwrap_or_default();
                if elapsed >= this.config.test_duration {
                    break;
                }
                let snapshot = this.metrics.snapshot(elapsed.max(Duration::from_millis(1)));
                let failure_rate = if snapshot.total > 0 { snapshot.failed as f64 / snapshot.total as f64 } else { 0.0 };
                let desired = target_users(this.config.test_type, elapsed, &params, failure_rate);
                this.reconcile(desired);
            }
            let remaining = this.user_stop_flags.lock().unwrap().len();
            this.shrink_users(remaining);
        });
        *self.controller.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> LoadTestResult<LoadTestMetrics> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(LoadTestError::NotRunning);
        }
        self.stop.cancel();
        if let Some(handle) = self.controller.lock().unwrap().take() {
            let _ = handle.await;
        }
        let elapsed = self.start_time.lock().unwrap().map(|s| s.elapsed()).unwrap_or_default();
        Ok(self.metrics.snapshot(elapsed.max(Duration::from_millis(1))))
    }

    pub fn result(&self) -> LoadTestMetrics {
        let elapsed = self.start_time.lock().unwrap().map(|s| s.elapsed()).unwrap_or_default();
        self.metrics.snapshot(elapsed.max(Duration::from_millis(1)))
    }

    pub fn active_user_count(&self) -> usize {
        self.active_users.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::FixedLatencyTarget;

    fn config() -> LoadTestConfig {
        LoadTestConfig {
            test_type: TestType::Soak,
            initial_users: 2,
            max_users: 4,
            test_duration: Duration::from_millis(300),
            ramp_up_duration: Duration::from_millis(100),
            burst_size: 10,
            think_time_ms: 5,
        }
    }

    #[tokio::test]
    async fn start_and_stop_produce_nonzero_metrics() {
        let target = Arc::new(FixedLatencyTarget { delay: Duration::from_millis(1), success: true });
        let tester = Arc::new(LoadTester::new(config(), target));
        tester.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let metrics = tester.stop().await.unwrap();
        assert!(metrics.total > 0);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let target = Arc::new(FixedLatencyTarget { delay: Duration::from_millis(1), success: true });
        let tester = Arc::new(LoadTester::new(config(), target));
        tester.start().await.unwrap();
        assert!(matches!(tester.start().await, Err(LoadTestError::AlreadyRunning)));
        tester.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stopping_when_not_running_is_rejected() {
        let target = Arc::new(FixedLatencyTarget { delay: Duration::from_millis(1), success: true });
        let tester = Arc::new(LoadTester::new(config(), target));
        assert!(matches!(tester.stop().await, Err(LoadTestError::NotRunning)));
    }
}
