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

//! Replayer (§4.7): loads one recorded session and emits its packets
//! respecting inter-arrival intervals, scaled by a speed factor and mode.
//! Pause/resume preserve the current index; `step` mode waits for an
//! external signal between packets instead of sleeping.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use sim_core::packet::PacketEvent;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Normal,
    Fast,
    Slow,
    Step,
    Loop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayProgress {
    pub current: usize,
    pub total: usize,
    pub progress_percent: f64,
}

/// Drives emission of one recorded session's packets through an mpsc
/// channel at the recorded pace. Owns no network I/O itself — the caller
/// (typically `cmd`, wiring this to a simulator's inbound path) decides
/// what "emitting" a packet means.
pub struct Replayer {
    packets: Vec<PacketEvent>,
    mode: ReplayMode,
    speed: f64,
    index: AtomicUsize,
    paused: AtomicBool,
    stop: CancellationToken,
    step_signal: Notify,
}

impl Replayer {
    pub fn new(packets: Vec<PacketEvent>, mode: ReplayMode, speed: f64) -> Self {
        Replayer {
            packets,
            mode,
            speed: speed.max(0.001),
            index: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            stop: CancellationToken::new(),
            step_signal: Notify::new(),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Signal a waiting `step` replay to emit the next packet.
    pub fn step(&self) {
        self.step_signal.notify_one();
    }

    pub fn progress(&self) -> ReplayProgress {
        let current = self.index.load(Ordering::SeqCst);
        let total = self.packets.len();
        let progress_percent = if total == 0 { 100.0 } else { (current as f64 / total as f64) * 100.0 };
        ReplayProgress { current, total, progress_percent }
    }

    fn scaled_delay(&self, delta_micros: u64) -> Duration {
        let base = Duration::from_micros(delta_micros).div_f64(self.speed);
        match self.mode {
            ReplayMode::Fast => base.div_f64(2.0),
            ReplayMode::Slow => base.mul_f64(2.0),
            _ => base,
        }
    }

    /// Run the replay loop, sending each packet on `out`. Returns when the
    /// session is exhausted (non-loop modes) or `stop()` is called.
    pub async fn run(&self, out: mpsc::Sender<PacketEvent>) {
        if self.packets.is_empty() {
            return;
        }

        loop {
            loop {
                let idx = self.index.load(Ordering::SeqCst);
                if idx >= self.packets.len() {
                    break;
                }
                if self.stop.is_cancelled() {
                    return;
                }

                while self.paused.load(Ordering::SeqCst) {
                    if self.stop.is_cancelled() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }

                if idx > 0 {
                    let delta = self.packets[idx].timestamp.delta_since(self.packets[idx - 1].timestamp);
                    match self.mode {
                        ReplayMode::Step => {
                            tokio::select! {
                                _ = self.step_signal.notified() => {}
                                _ = self.stop.cancelled() => return,
                            }
                        }
                        _ => {
                            tokio::select! {
                                _ = tokio::time::sleep(self.scaled_delay(delta)) => {}
                                _ = self.stop.cancelled() => return,
                            }
                        }
                    }
                }

                if out.send(self.packets[idx].clone()).await.is_err() {
                    return;
                }
                self.index.fetch_add(1, Ordering::SeqCst);
            }

            if self.mode == ReplayMode::Loop {
                self.index.store(0, Ordering::SeqCst);
                continue;
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_base::utils::time_util::Timestamp;
    use sim_core::packet::{Direction, Protocol};

    fn sample(seq: u64, micros: u64) -> PacketEvent {
        let mut event = PacketEvent::new(seq, Direction::Inbound, "127.0.0.1", 51000, "127.0.0.1", 502, Protocol::Modbus, vec![0u8; 2], "x");
        event.timestamp = Timestamp::from_micros(micros);
        event
    }

    #[tokio::test]
    async fn emits_all_packets_once_in_normal_mode() {
        let packets = vec![sample(1, 0), sample(2, 1_000), sample(3, 2_000)];
        let replayer = Replayer::new(packets, ReplayMode::Normal, 1000.0);
        let (tx, mut rx) = mpsc::channel(8);

        replayer.run(tx).await;

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event.seq);
        }
        assert_eq!(received, vec![1, 2, 3]);
        assert_eq!(replayer.progress().current, 3);
    }

    #[tokio::test]
    async fn step_mode_waits_for_external_signal() {
        let packets = vec![sample(1, 0), sample(2, 1_000)];
        let replayer = std::sync::Arc::new(Replayer::new(packets, ReplayMode::Step, 1.0));
        let (tx, mut rx) = mpsc::channel(8);

        let runner = {
            let replayer = replayer.clone();
            tokio::spawn(async move { replayer.run(tx).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.seq, 1);

        replayer.step();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.seq, 2);

        runner.await.unwrap();
    }
}
