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

//! The fault registry (§4.8): holds every configured `Fault`, runs the
//! ~100ms Bernoulli monitor, and answers `should_modify_packet` for the
//! capture/bridge path. Faults are evaluated in insertion order and the
//! first enabled fault whose `target` matches the packet decides —
//! mirroring the capturer's filter-rule evaluation in the `capture` crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use sim_core::hook::{PacketDecision, PacketHook};
use sim_core::packet::PacketEvent;
use tokio_util::sync::CancellationToken;

use crate::fault_type::FaultType;
use crate::{FaultError, FaultResult};

/// `target` is matched against a packet's protocol name (`"modbus"`,
/// `"mqtt"`, ...) or `"*"` for every protocol; connection-level faults
/// (`connection_drop`, `device_offline`) instead match a device/address
/// string supplied by the caller of `is_connection_dropped`/`is_device_offline`.
#[derive(Debug, Clone)]
pub struct Fault {
    pub id: String,
    pub fault_type: FaultType,
    pub target: String,
    pub enabled: bool,
    pub probability: f64,
    pub duration_seconds: Option<u64>,
}

impl Fault {
    pub fn new(id: impl Into<String>, fault_type: FaultType, target: impl Into<String>, probability: f64) -> Self {
        Fault {
            id: id.into(),
            fault_type,
            target: target.into(),
            enabled: true,
            probability: probability.clamp(0.0, 1.0),
            duration_seconds: None,
        }
    }

    fn matches_target(&self, candidate: &str) -> bool {
        self.target == "*" || self.target == candidate
    }
}

pub struct FaultRegistry {
    faults: std::sync::RwLock<Vec<Fault>>,
    affected: DashMap<String, AtomicU64>,
    fired: DashMap<String, AtomicU64>,
    stop: CancellationToken,
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultRegistry {
    pub fn new() -> Self {
        FaultRegistry {
            faults: std::sync::RwLock::new(Vec::new()),
            affected: DashMap::new(),
            fired: DashMap::new(),
            stop: CancellationToken::new(),
        }
    }

    pub fn register(&self, fault: Fault) -> FaultResult<()> {
        let mut faults = self.faults.write().unwrap();
        if faults.iter().any(|f| f.id == fault.id) {
            return Err(FaultError::AlreadyExists(fault.id));
        }
        self.affected.insert(fault.id.clone(), AtomicU64::new(0));
        self.fired.insert(fault.id.clone(), AtomicU64::new(0));
        faults.push(fault);
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> FaultResult<()> {
        let mut faults = self.faults.write().unwrap();
        let fault = faults.iter_mut().find(|f| f.id == id).ok_or_else(|| FaultError::NotFound(id.to_string()))?;
        fault.enabled = enabled;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> FaultResult<()> {
        let mut faults = self.faults.write().unwrap();
        let before = faults.len();
        faults.retain(|f| f.id != id);
        if faults.len() == before {
            return Err(FaultError::NotFound(id.to_string()));
        }
        self.affected.remove(id);
        self.fired.remove(id);
        Ok(())
    }

    pub fn list(&self) -> Vec<Fault> {
        self.faults.read().unwrap().clone()
    }

    pub fn packets_affected(&self, id: &str) -> u64 {
        self.affected.get(id).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn times_fired(&self, id: &str) -> u64 {
        self.fired.get(id).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Background Bernoulli monitor (§4.8: "periodically (~100ms) draws a
    /// Bernoulli(probability) and, on hit, fires the fault once"). This is
    /// independent of `should_modify_packet`: it accounts for faults that
    /// aren't tied to a specific packet crossing the pipeline (e.g.
    /// `connection_drop`, `device_offline`) by marking them fired so
    /// `is_connection_dropped`/`is_device_offline` observe the window.
    pub async fn run_monitor(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.stop.cancelled() => return,
            }

            let snapshot = self.list();
            for fault in snapshot.iter().filter(|f| f.enabled) {
                let hit = rand::thread_rng().gen::<f64>() < fault.probability;
                if hit {
                    if let Some(counter) = self.fired.get(&fault.id) {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!(fault_id = %fault.id, fault_type = fault.fault_type.name(), "fault fired");
                }
            }
        }
    }

    fn record_hit(&self, id: &str) {
        if let Some(counter) = self.affected.get(id) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// True while a `connection_drop` fault targeting `candidate` is
    /// enabled and probabilistically active for this query.
    pub fn is_connection_dropped(&self, candidate: &str) -> bool {
        self.hits_of_kind(candidate, |ft| matches!(ft, FaultType::ConnectionDrop { .. }))
    }

    /// True while a `device_offline` fault targeting `candidate` is
    /// enabled and probabilistically active for this query.
    pub fn is_device_offline(&self, candidate: &str) -> bool {
        self.hits_of_kind(candidate, |ft| matches!(ft, FaultType::DeviceOffline { .. }))
    }

    fn hits_of_kind(&self, candidate: &str, predicate: impl Fn(&FaultType) -> bool) -> bool {
        let faults = self.faults.read().unwrap();
        faults
            .iter()
            .filter(|f| f.enabled && predicate(&f.fault_type) && f.matches_target(candidate))
            .any(|f| rand::thread_rng().gen::<f64>() < f.probability)
    }
}

impl PacketHook for FaultRegistry {
    fn should_modify_packet(&self, event: &PacketEvent) -> PacketDecision {
        let protocol_name = event.protocol.to_string();
        let faults = self.faults.read().unwrap();

        for fault in faults.iter().filter(|f| f.enabled && f.matches_target(&protocol_name)) {
            let decision = match &fault.fault_type {
                FaultType::PacketLoss { percent } => {
                    let hit = rand::thread_rng().gen::<f64>() < (percent / 100.0).clamp(0.0, 1.0);
                    hit.then_some(PacketDecision::Drop)
                }
                FaultType::LatencySpike { delay_ms, .. } => {
                    let hit = rand::thread_rng().gen::<f64>() < fault.probability;
                    hit.then(|| PacketDecision::Delay(Duration::from_millis(*delay_ms)))
                }
                FaultType::Jitter { jitter_ms } => {
                    let hit = rand::thread_rng().gen::<f64>() < fault.probability;
                    hit.then(|| {
                        let amount = if *jitter_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=*jitter_ms) };
                        PacketDecision::Delay(Duration::from_millis(amount))
                    })
                }
                FaultType::Corruption { rate } => {
                    let hit = rand::thread_rng().gen::<f64>() < rate.clamp(0.0, 1.0);
                    hit.then_some(PacketDecision::Corrupt)
                }
                FaultType::Duplication { rate } => {
                    let hit = rand::thread_rng().gen::<f64>() < rate.clamp(0.0, 1.0);
                    hit.then_some(PacketDecision::Duplicate)
                }
                FaultType::ProtocolError { .. } => {
                    let hit = rand::thread_rng().gen::<f64>() < fault.probability;
                    hit.then_some(PacketDecision::Corrupt)
                }
                // Reordering is stateful across packets (see `ReorderBuffer`)
                // and connection-level faults are queried separately; neither
                // maps onto a single-packet decision here.
                FaultType::Reordering { .. } | FaultType::ConnectionDrop { .. } | FaultType::DeviceOffline { .. } => None,
            };

            if let Some(decision) = decision {
                self.record_hit(&fault.id);
                return decision;
            }
        }

        PacketDecision::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::packet::{Direction, Protocol};

    fn sample() -> PacketEvent {
        PacketEvent::new(1, Direction::Outbound, "127.0.0.1", 1883, "127.0.0.1", 51000, Protocol::Mqtt, vec![0u8; 4], "publish")
    }

    #[test]
    fn disabled_fault_never_fires() {
        let registry = FaultRegistry::new();
        let mut fault = Fault::new("f1", FaultType::PacketLoss { percent: 100.0 }, "mqtt", 1.0);
        fault.enabled = false;
        registry.register(fault).unwrap();
        assert_eq!(registry.should_modify_packet(&sample()), PacketDecision::Pass);
    }

    #[test]
    fn hundred_percent_packet_loss_always_drops() {
        let registry = FaultRegistry::new();
        registry.register(Fault::new("f1", FaultType::PacketLoss { percent: 100.0 }, "mqtt", 1.0)).unwrap();
        for _ in 0..50 {
            assert_eq!(registry.should_modify_packet(&sample()), PacketDecision::Drop);
        }
        assert_eq!(registry.packets_affected("f1"), 50);
    }

    #[test]
    fn target_mismatch_does_not_fire() {
        let registry = FaultRegistry::new();
        registry.register(Fault::new("f1", FaultType::PacketLoss { percent: 100.0 }, "modbus", 1.0)).unwrap();
        assert_eq!(registry.should_modify_packet(&sample()), PacketDecision::Pass);
    }

    #[test]
    fn four_sigma_probabilistic_bound() {
        let registry = FaultRegistry::new();
        let p = 0.3;
        registry.register(Fault::new("f1", FaultType::PacketLoss { percent: p * 100.0 }, "mqtt", 1.0)).unwrap();

        let n = 10_000;
        let mut drops = 0u64;
        for _ in 0..n {
            if registry.should_modify_packet(&sample()) == PacketDecision::Drop {
                drops += 1;
            }
        }

        let expected = p * n as f64;
        let sigma = (p * (1.0 - p) * n as f64).sqrt();
        let band = 4.0 * sigma;
        assert!((drops as f64 - expected).abs() <= band, "drops={drops} expected={expected} band={band}");
    }

    #[test]
    fn duplicate_and_corrupt_decisions_are_reachable() {
        let registry = FaultRegistry::new();
        registry.register(Fault::new("dup", FaultType::Duplication { rate: 1.0 }, "mqtt", 1.0)).unwrap();
        assert_eq!(registry.should_modify_packet(&sample()), PacketDecision::Duplicate);

        let registry = FaultRegistry::new();
        registry.register(Fault::new("corrupt", FaultType::Corruption { rate: 1.0 }, "mqtt", 1.0)).unwrap();
        assert_eq!(registry.should_modify_packet(&sample()), PacketDecision::Corrupt);
    }

    #[test]
    fn connection_drop_and_device_offline_are_queried_independently_of_packets() {
        let registry = FaultRegistry::new();
        registry
            .register(Fault::new("drop-conn", FaultType::ConnectionDrop { duration_seconds: 30 }, "device-1", 1.0))
            .unwrap();
        assert!(registry.is_connection_dropped("device-1"));
        assert!(!registry.is_connection_dropped("device-2"));

        registry
            .register(Fault::new("offline", FaultType::DeviceOffline { duration_seconds: 30 }, "device-2", 1.0))
            .unwrap();
        assert!(registry.is_device_offline("device-2"));
    }
}
