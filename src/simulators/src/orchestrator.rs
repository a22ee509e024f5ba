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

//! Starts and stops every protocol server together (SPEC_FULL §15),
//! replacing the original's `simulation_engine` global singleton with an
//! explicit struct owned by the binary crate (Design Notes: "Global
//! singletons").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common_config::ProtoSimConfig;
use sim_core::PacketEvent;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bacnet::BacnetServer;
use crate::coap::{CoapResource, CoapServer};
use crate::datasim::TICK_INTERVAL_SECS;
use crate::modbus::ModbusServer;
use crate::mqtt::MqttBroker;
use crate::opcua::OpcUaServer;
use crate::tcp::TcpEchoServer;

pub struct Orchestrator {
    pub modbus: Arc<ModbusServer>,
    pub mqtt: Arc<MqttBroker>,
    pub coap: Arc<CoapServer>,
    pub bacnet: Arc<BacnetServer>,
    pub opcua: Arc<OpcUaServer>,
    pub tcp: Arc<TcpEchoServer>,
    pub events: broadcast::Sender<PacketEvent>,
    stop: CancellationToken,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(config: &ProtoSimConfig) -> Self {
        let (events, _rx) = broadcast::channel(4096);

        let modbus = Arc::new(ModbusServer::new(
            config.modbus.bind_address.clone(),
            config.modbus.port,
            events.clone(),
        ));
        modbus.ensure_unit(1);

        let mqtt = Arc::new(MqttBroker::new(
            config.mqtt.bind_address.clone(),
            config.mqtt.port,
            events.clone(),
        ));

        let coap = Arc::new(CoapServer::new(
            config.coap.bind_address.clone(),
            config.coap.port,
            events.clone(),
        ));
        coap.register_resource(
            "/temperature",
            CoapResource::new(b"21.5".to_vec(), protocol::coap::ContentFormat::Json, true),
        );

        let bacnet = Arc::new(BacnetServer::new(
            config.bacnet.bind_address.clone(),
            config.bacnet.port,
            config.bacnet.device_instance,
            config.bacnet.vendor_id,
            events.clone(),
        ));

        let opcua = Arc::new(OpcUaServer::new(
            config.opcua.bind_address.clone(),
            config.opcua.port,
            events.clone(),
        ));

        let tcp = Arc::new(TcpEchoServer::new(
            config.raw_tcp.bind_address.clone(),
            config.raw_tcp.port,
            events.clone(),
        ));

        Orchestrator {
            modbus,
            mqtt,
            coap,
            bacnet,
            opcua,
            tcp,
            events,
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawns every enabled server's accept loop plus the shared 1 Hz data
    /// simulator tick. Returns the set so the caller can await shutdown.
    pub fn start(self: &Arc<Self>) -> JoinSet<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut tasks = JoinSet::new();

        let modbus = self.modbus.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = modbus.run(stop).await {
                warn!(%err, "modbus server exited");
            }
        });

        let mqtt = self.mqtt.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = mqtt.run(stop).await {
                warn!(%err, "mqtt broker exited");
            }
        });

        let coap = self.coap.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = coap.run(stop).await {
                warn!(%err, "coap server exited");
            }
        });

        let bacnet = self.bacnet.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = bacnet.run(stop).await {
                warn!(%err, "bacnet server exited");
            }
        });

        let opcua = self.opcua.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = opcua.run(stop).await {
                warn!(%err, "opcua server exited");
            }
        });

        let tcp = self.tcp.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move {
            if let Err(err) = tcp.run(stop).await {
                warn!(%err, "raw tcp server exited");
            }
        });

        let this = self.clone();
        let stop = self.stop.clone();
        tasks.spawn(async move { this.run_data_simulator(stop).await });

        info!("orchestrator started all protocol simulators");
        tasks
    }

    async fn run_data_simulator(&self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = interval.tick() => {
                    self.modbus.tick().await;
                    self.bacnet.tick().await;
                    self.opcua.address_space.tick().await;
                }
            }
        }
    }

    /// Signals every background task to stop; callers await the `JoinSet`
    /// returned by `start` to observe clean shutdown (§5: within 1s).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
