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

//! Binary entrypoint (SPEC_FULL §10/§11): loads configuration, starts
//! every protocol simulator under one `Orchestrator`, wires the capturer,
//! fault injector, bridge/rules engine and event bus onto the shared
//! `PacketEvent` stream, and shuts down cleanly on SIGINT/SIGTERM.

mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bridge::{BridgeEngine, Message, RulesEngine};
use capture::PacketCapturer;
use clap::Parser;
use common_config::ProtoSimConfig;
use eventbus::{EventBus, InMemoryEventBus};
use fault::FaultRegistry;
use simulators::Orchestrator;
use sim_core::hook::PacketHook;
use tokio_util::sync::CancellationToken;
use topology::{DeviceFleet, NetworkTopology};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sink::{BridgeActionSink, SharedState};

#[derive(Parser, Debug)]
#[command(name = "protosim", about = "IoT protocol simulation and debugging platform")]
struct Args {
    /// Path to a TOML configuration file. Missing file falls back to
    /// built-in defaults (SPEC_FULL §13); an unreadable-but-present file
    /// is a hard error.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Optional bridge mapping file (YAML or JSON, §6 top-level `bridges`
    /// key) loaded into the bridge engine at startup.
    #[arg(long)]
    mapping: Option<PathBuf>,

    /// Number of synthetic sensor devices to seed into the topology's
    /// device fleet for background load generation.
    #[arg(long, default_value_t = 0)]
    fleet_sensors: usize,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &PathBuf) -> anyhow::Result<ProtoSimConfig> {
    if path.exists() {
        common_config::load_config(path).map_err(anyhow::Error::from)
    } else {
        Ok(ProtoSimConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config).context("loading configuration")?;
    init_tracing(&config.log.level);

    info!(config = %args.config.display(), "starting protosim");

    let orchestrator = Arc::new(Orchestrator::new(&config));
    let capturer = Arc::new(PacketCapturer::new(config.capture.ring_capacity));
    let faults = Arc::new(FaultRegistry::new());
    let bridge = Arc::new(BridgeEngine::new());
    let state = Arc::new(SharedState::new());
    let sink = Arc::new(BridgeActionSink::new(bridge.clone(), state.clone()));
    let rules = Arc::new(RulesEngine::new(sink));
    let events_bus = Arc::new(InMemoryEventBus::new(config.eventbus.history_capacity));
    events_bus.start().await.ok();

    if let Some(path) = &args.mapping {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading mapping file {}", path.display()))?;
        bridge.load_mappings(&content).context("loading bridge mappings")?;
        info!(path = %path.display(), rules = bridge.rules().len(), "loaded bridge mappings");
    }

    let network_topology = NetworkTopology::with_default_topology();
    let topo_stats = network_topology.stats();
    info!(nodes = topo_stats.nodes, links = topo_stats.links, "network topology initialized");

    let mut fleet = DeviceFleet::new();
    if args.fleet_sensors > 0 {
        fleet.create_devices(args.fleet_sensors, topology::DeviceKind::Sensor);
    }

    let shutdown = CancellationToken::new();
    let mut tasks = orchestrator.start();

    tasks.spawn(forward_packet_events(
        orchestrator.clone(),
        capturer.clone(),
        faults.clone(),
        bridge.clone(),
        rules.clone(),
        shutdown.clone(),
    ));

    {
        let faults = faults.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = faults.run_monitor(Duration::from_millis(100)) => {}
            }
        });
    }

    if !fleet.is_empty() {
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = interval.tick() => fleet.tick(1.0),
                }
            }
        });
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    shutdown.cancel();
    orchestrator.stop();
    faults.stop();
    events_bus.stop().await.ok();

    tokio::time::timeout(Duration::from_secs(1), async {
        while tasks.join_next().await.is_some() {}
    })
    .await
    .ok();

    info!("protosim stopped");
    Ok(())
}

/// Derives the bridge's routing topic for a packet event. MQTT carries an
/// explicit topic in its decoded payload; the other protocols have no such
/// concept, so their protocol name stands in as a fixed topic, matching
/// how the seed mapping scenarios address them (`source_topic: modbus`).
fn topic_for(protocol: sim_core::packet::Protocol, decoded: &sim_core::Value) -> String {
    if protocol == sim_core::packet::Protocol::Mqtt {
        if let Some(topic) = decoded.get_path("topic").and_then(|v| v.as_str()) {
            return topic.to_string();
        }
    }
    protocol.to_string()
}

/// Drains the orchestrator's `PacketEvent` broadcast into the capturer,
/// fault injector and bridge/rules engine. One task owns the single
/// receiver so every downstream consumer sees the same ordered stream.
async fn forward_packet_events(
    orchestrator: Arc<Orchestrator>,
    capturer: Arc<PacketCapturer>,
    faults: Arc<FaultRegistry>,
    bridge: Arc<BridgeEngine>,
    rules: Arc<RulesEngine>,
    shutdown: CancellationToken,
) {
    let mut events = orchestrator.events.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            received = events.recv() => {
                let mut event = match received {
                    Ok(event) => event,
                    Err(_) => continue,
                };

                match faults.should_modify_packet(&event) {
                    sim_core::hook::PacketDecision::Drop => continue,
                    sim_core::hook::PacketDecision::Pass => {}
                    sim_core::hook::PacketDecision::Delay(d) => tokio::time::sleep(d).await,
                    sim_core::hook::PacketDecision::Duplicate => {
                        capturer.ingest(event.clone()).await;
                    }
                    sim_core::hook::PacketDecision::Corrupt => {
                        if let Some(byte) = event.payload.first_mut() {
                            *byte ^= 0xff;
                        }
                    }
                }

                capturer.ingest(event.clone()).await;

                let decoded = capture::decode::decode(event.protocol, &event.payload);
                let topic = topic_for(event.protocol, &decoded);
                let msg = Message::new(event.protocol.to_string(), topic, decoded.clone());
                bridge.publish(msg).await;
                rules.process(&decoded).await;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
