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

//! `reordering (buffer_size)`: "buffer up to N then release in shuffled
//! order" (§4.8). This doesn't fit the single-packet `PacketDecision`
//! contract (it needs to hold multiple packets at once), so it's a small
//! stateful buffer the bridge/capture path opts into explicitly rather
//! than a case in `should_modify_packet`.

use rand::seq::SliceRandom;
use sim_core::packet::PacketEvent;

pub struct ReorderBuffer {
    capacity: usize,
    held: Vec<PacketEvent>,
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        ReorderBuffer {
            capacity: capacity.max(1),
            held: Vec::new(),
        }
    }

    /// Push `event` into the buffer. Once it reaches `capacity`, releases
    /// all held packets in shuffled order and the buffer is empty again.
    pub fn push(&mut self, event: PacketEvent) -> Option<Vec<PacketEvent>> {
        self.held.push(event);
        if self.held.len() >= self.capacity {
            let mut batch = std::mem::take(&mut self.held);
            batch.shuffle(&mut rand::thread_rng());
            Some(batch)
        } else {
            None
        }
    }

    /// Release whatever is currently held, in arrival order (used when
    /// the fault is disabled or the pipeline is shutting down).
    pub fn drain(&mut self) -> Vec<PacketEvent> {
        std::mem::take(&mut self.held)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::packet::{Direction, Protocol};

    fn sample(seq: u64) -> PacketEvent {
        PacketEvent::new(seq, Direction::Inbound, "127.0.0.1", 1, "127.0.0.1", 2, Protocol::RawTcp, vec![], "x")
    }

    #[test]
    fn releases_once_capacity_reached() {
        let mut buffer = ReorderBuffer::new(3);
        assert!(buffer.push(sample(1)).is_none());
        assert!(buffer.push(sample(2)).is_none());
        let released = buffer.push(sample(3)).unwrap();
        assert_eq!(released.len(), 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_returns_partial_buffer_in_arrival_order() {
        let mut buffer = ReorderBuffer::new(5);
        buffer.push(sample(1));
        buffer.push(sample(2));
        let drained = buffer.drain();
        assert_eq!(drained.iter().map(|p| p.seq).collect::<Vec<_>>(), vec![1, 2]);
        assert!(buffer.is_empty());
    }
}
