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

//! Recorder (§4.7): owns many named recording sessions, each an
//! append-only list of packets with a monotonic per-session sequence.
//! Session statistics are computed once, at stop, rather than maintained
//! incrementally.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use sim_core::packet::{PacketEvent, Protocol};
use tokio::sync::RwLock;

use crate::export;
use crate::{CaptureError, CaptureResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub packet_count: u64,
    pub byte_count: u64,
    pub duration_micros: u64,
    pub packets_per_sec: f64,
}

/// One append-only recording. `seq` on each stored packet is the
/// session-local recording order, independent of the originating
/// server's own `PacketEvent.seq`.
pub struct RecordingSession {
    pub name: String,
    packets: RwLock<Vec<PacketEvent>>,
    next_seq: AtomicU64,
    recording: AtomicBool,
    stats: RwLock<Option<SessionStats>>,
}

impl RecordingSession {
    fn new(name: impl Into<String>) -> Self {
        RecordingSession {
            name: name.into(),
            packets: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            recording: AtomicBool::new(true),
            stats: RwLock::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub async fn record(&self, event: PacketEvent) {
        if !self.is_recording() {
            return;
        }
        self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.packets.write().await.push(event);
    }

    pub async fn packets(&self) -> Vec<PacketEvent> {
        self.packets.read().await.clone()
    }

    /// Stop recording and compute final statistics. Idempotent: calling
    /// this again returns the same cached stats without recomputing.
    pub async fn stop(&self) -> SessionStats {
        self.recording.store(false, Ordering::SeqCst);
        if let Some(cached) = *self.stats.read().await {
            return cached;
        }

        let packets = self.packets.read().await;
        let packet_count = packets.len() as u64;
        let byte_count: u64 = packets.iter().map(|p| p.payload.len() as u64).sum();
        let duration_micros = match (packets.first(), packets.last()) {
            (Some(first), Some(last)) => last.timestamp.delta_since(first.timestamp),
            _ => 0,
        };
        let packets_per_sec = if duration_micros > 0 {
            packet_count as f64 / (duration_micros as f64 / 1_000_000.0)
        } else {
            0.0
        };

        let computed = SessionStats {
            packet_count,
            byte_count,
            duration_micros,
            packets_per_sec,
        };
        *self.stats.write().await = Some(computed);
        computed
    }

    pub async fn protocols(&self) -> HashSet<Protocol> {
        self.packets.read().await.iter().map(|p| p.protocol).collect()
    }
}

#[derive(Default)]
pub struct Recorder {
    sessions: RwLock<HashMap<String, RecordingSession>>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    pub async fn start_session(&self, name: impl Into<String>) -> String {
        let name = name.into();
        self.sessions.write().await.insert(name.clone(), RecordingSession::new(name.clone()));
        name
    }

    /// Feed a packet into every currently-recording session. Called from
    /// the same ingest path the capturer uses, so recording and live
    /// capture always see the same filtered stream.
    pub async fn record_all(&self, event: &PacketEvent) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            session.record(event.clone()).await;
        }
    }

    pub async fn stop_session(&self, name: &str) -> CaptureResult<SessionStats> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(name).ok_or_else(|| CaptureError::SessionNotFound(name.to_string()))?;
        Ok(session.stop().await)
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn delete_session(&self, name: &str) -> CaptureResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(name).ok_or_else(|| CaptureError::SessionNotFound(name.to_string()))?;
        if session.is_recording() {
            return Err(CaptureError::SessionStillRecording(name.to_string()));
        }
        sessions.remove(name);
        Ok(())
    }

    pub async fn export_json(&self, name: &str) -> CaptureResult<String> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(name).ok_or_else(|| CaptureError::SessionNotFound(name.to_string()))?;
        export::to_json(&session.packets().await)
    }

    pub async fn export_pcap(&self, name: &str) -> CaptureResult<Vec<u8>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(name).ok_or_else(|| CaptureError::SessionNotFound(name.to_string()))?;
        let mut buffer = Vec::new();
        export::to_pcap(&session.packets().await, &mut buffer)?;
        Ok(buffer)
    }

    pub async fn session_packets(&self, name: &str) -> CaptureResult<Vec<PacketEvent>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(name).ok_or_else(|| CaptureError::SessionNotFound(name.to_string()))?;
        Ok(session.packets().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::packet::Direction;

    fn sample(seq: u64, micros: u64) -> PacketEvent {
        let mut event = PacketEvent::new(seq, Direction::Inbound, "127.0.0.1", 51000, "127.0.0.1", 502, Protocol::Modbus, vec![0u8; 4], "read");
        event.timestamp = common_base::utils::time_util::Timestamp::from_micros(micros);
        event
    }

    #[tokio::test]
    async fn stop_computes_duration_and_rate() {
        let recorder = Recorder::new();
        recorder.start_session("s1").await;
        recorder.record_all(&sample(1, 0)).await;
        recorder.record_all(&sample(2, 1_000_000)).await;

        let stats = recorder.stop_session("s1").await.unwrap();
        assert_eq!(stats.packet_count, 2);
        assert_eq!(stats.byte_count, 8);
        assert_eq!(stats.duration_micros, 1_000_000);
        assert!((stats.packets_per_sec - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn delete_refuses_an_active_session() {
        let recorder = Recorder::new();
        recorder.start_session("s1").await;
        let err = recorder.delete_session("s1").await.unwrap_err();
        assert!(matches!(err, CaptureError::SessionStillRecording(_)));
    }

    #[tokio::test]
    async fn record_after_stop_is_a_noop() {
        let recorder = Recorder::new();
        recorder.start_session("s1").await;
        recorder.record_all(&sample(1, 0)).await;
        recorder.stop_session("s1").await.unwrap();
        recorder.record_all(&sample(2, 1)).await;

        let packets = recorder.session_packets("s1").await.unwrap();
        assert_eq!(packets.len(), 1);
    }
}
