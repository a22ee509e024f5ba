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

//! Latency/throughput accounting (§4.9/§8: "for an i.i.d. latency sample
//! of size n >= 1000, the reported p95 equals the 95th percentile of the
//! stored samples"). Every virtual user's request latency is appended to
//! one shared sample vec; percentiles are computed from a sorted copy at
//! report time, never maintained incrementally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LoadTestMetrics {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub rps: f64,
    pub errors_per_sec: f64,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Default)]
pub struct MetricsRecorder {
    successful: AtomicU64,
    failed: AtomicU64,
    latencies_micros: Mutex<Vec<u64>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        MetricsRecorder::default()
    }

    pub fn record(&self, latency: Duration, success: bool) {
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latencies_micros.lock().unwrap().push(latency.as_micros() as u64);
    }

    /// Nearest-rank percentile: `ceil(p * n)`th smallest sample, 1-indexed,
    /// clamped into range. Matches the reference semantics used by most
    /// load-testing tools for p95/p99 reporting.
    fn percentile(sorted: &[u64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = ((p * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
        sorted[rank - 1] as f64 / 1000.0
    }

    pub fn snapshot(&self, elapsed: Duration) -> LoadTestMetrics {
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total = successful + failed;

        let mut samples = self.latencies_micros.lock().unwrap().clone();
        samples.sort_unstable();

        let elapsed_secs = elapsed.as_secs_f64().max(1e-9);
        let min_ms = samples.first().copied().unwrap_or(0) as f64 / 1000.0;
        let max_ms = samples.last().copied().unwrap_or(0) as f64 / 1000.0;
        let avg_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64 / 1000.0
        };

        LoadTestMetrics {
            total,
            successful,
            failed,
            rps: total as f64 / elapsed_secs,
            errors_per_sec: failed as f64 / elapsed_secs,
            min_ms,
            avg_ms,
            max_ms,
            p95_ms: Self::percentile(&samples, 0.95),
            p99_ms: Self::percentile(&samples, 0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_nearest_rank_on_a_known_sample() {
        let recorder = MetricsRecorder::new();
        for i in 1..=1000u64 {
            recorder.record(Duration::from_micros(i * 1000), true);
        }
        let metrics = recorder.snapshot(Duration::from_secs(1));
        assert_eq!(metrics.total, 1000);
        assert!((metrics.p95_ms - 950.0).abs() < 1.0);
        assert!((metrics.p99_ms - 990.0).abs() < 1.0);
        assert!((metrics.min_ms - 1.0).abs() < 1e-6);
        assert!((metrics.max_ms - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn failed_requests_count_toward_errors_per_sec() {
        let recorder = MetricsRecorder::new();
        recorder.record(Duration::from_millis(10), true);
        recorder.record(Duration::from_millis(10), false);
        let metrics = recorder.snapshot(Duration::from_secs(2));
        assert_eq!(metrics.successful, 1);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.errors_per_sec - 0.5).abs() < 1e-9);
    }
}
