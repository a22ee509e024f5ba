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

//! The packet capturer (§4.6): a fixed-size ring buffer fed by every
//! simulator's `PacketEvent` stream. `ingest` is the single entry point;
//! everything downstream (recorder, bridge) sees the same filtered stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use sim_core::packet::PacketEvent;
use sim_core::Value;
use tokio::sync::RwLock;

use crate::decode::decode;
use crate::filter::{evaluate, FilterAction, FilterRule};

/// A retained packet plus its lazily computed decoded view. `decoded()`
/// re-runs the protocol decoder on every call rather than caching the
/// result, since most captured packets are never inspected.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub event: PacketEvent,
}

impl CapturedPacket {
    pub fn decoded(&self) -> Value {
        decode(self.event.protocol, &self.event.payload)
    }
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub received: AtomicU64,
    pub kept: AtomicU64,
    pub dropped_by_filter: AtomicU64,
    pub dropped_overflow: AtomicU64,
}

impl CaptureStats {
    fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            kept: self.kept.load(Ordering::Relaxed),
            dropped_by_filter: self.dropped_by_filter.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStatsSnapshot {
    pub received: u64,
    pub kept: u64,
    pub dropped_by_filter: u64,
    pub dropped_overflow: u64,
}

/// Bounded ring buffer of `CapturedPacket`, FIFO drop-oldest on overflow
/// (§4.6). Filters are evaluated before a packet enters the buffer, so a
/// dropped packet never occupies a slot.
pub struct PacketCapturer {
    capacity: usize,
    buffer: RwLock<VecDeque<CapturedPacket>>,
    filters: RwLock<Vec<FilterRule>>,
    stats: CaptureStats,
}

impl PacketCapturer {
    pub fn new(capacity: usize) -> Self {
        PacketCapturer {
            capacity,
            buffer: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            filters: RwLock::new(Vec::new()),
            stats: CaptureStats::default(),
        }
    }

    pub async fn add_filter(&self, rule: FilterRule) {
        self.filters.write().await.push(rule);
    }

    pub async fn clear_filters(&self) {
        self.filters.write().await.clear();
    }

    pub async fn remove_filter(&self, name: &str) {
        self.filters.write().await.retain(|r| r.name != name);
    }

    pub async fn list_filters(&self) -> Vec<FilterRule> {
        self.filters.read().await.clone()
    }

    /// Apply active filters to `event`, then retain it unless dropped.
    /// This is the only write path into the ring buffer.
    pub async fn ingest(&self, event: PacketEvent) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let filters = self.filters.read().await;
        let action = evaluate(
            &filters,
            event.protocol,
            event.src_port,
            event.dst_port,
            &event.src_addr,
            &event.dst_addr,
            &event.info,
        );
        drop(filters);

        if action == FilterAction::Drop {
            self.stats.dropped_by_filter.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut buffer = self.buffer.write().await;
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.stats.dropped_overflow.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(CapturedPacket { event });
        self.stats.kept.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> Vec<CapturedPacket> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.buffer.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::packet::{Direction, Protocol};

    fn sample(seq: u64) -> PacketEvent {
        PacketEvent::new(seq, Direction::Inbound, "127.0.0.1", 51000, "127.0.0.1", 502, Protocol::Modbus, vec![0x01, 0x03], "read")
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let capturer = PacketCapturer::new(2);
        capturer.ingest(sample(1)).await;
        capturer.ingest(sample(2)).await;
        capturer.ingest(sample(3)).await;

        let snapshot = capturer.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].event.seq, 2);
        assert_eq!(snapshot[1].event.seq, 3);
        assert_eq!(capturer.stats().dropped_overflow, 1);
    }

    #[tokio::test]
    async fn filter_drop_keeps_packet_out_of_buffer() {
        let capturer = PacketCapturer::new(10);
        capturer
            .add_filter(FilterRule::new("drop-modbus", crate::filter::FilterAction::Drop).with_protocols(vec![Protocol::Modbus]))
            .await;
        capturer.ingest(sample(1)).await;
        assert!(capturer.is_empty().await);
        assert_eq!(capturer.stats().dropped_by_filter, 1);
    }

    #[tokio::test]
    async fn decoded_view_is_computed_on_demand() {
        let capturer = PacketCapturer::new(10);
        capturer.ingest(sample(1)).await;
        let snapshot = capturer.snapshot().await;
        let decoded = snapshot[0].decoded();
        assert!(decoded.as_map().is_some());
    }
}
