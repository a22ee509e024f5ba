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

//! BACnet/IP device simulator (§3, §4.1, §4.2): a single device instance
//! with an object table, answering Who-Is/Who-Has broadcasts and
//! ReadProperty/WriteProperty unicasts over UDP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::bacnet::{self, ApplicationTag, Frame, Service};
use sim_core::{Direction, PacketEvent, Protocol};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SequenceSource;

pub const PROPERTY_ID_PRESENT_VALUE: u32 = 85;
pub const PROPERTY_ID_OBJECT_NAME: u32 = 77;

#[derive(Debug, Clone)]
pub struct BacnetObject {
    pub object_name: String,
    pub present_value: f32,
    pub min: f32,
    pub max: f32,
    pub resolution: f32,
}

pub struct BacnetDevice {
    pub device_instance: u32,
    pub vendor_id: u16,
    pub objects: DashMap<u32, Mutex<BacnetObject>>,
}

pub struct BacnetServer {
    bind_addr: String,
    port: u16,
    device: Arc<BacnetDevice>,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl BacnetServer {
    pub fn new(
        bind_addr: impl Into<String>,
        port: u16,
        device_instance: u32,
        vendor_id: u16,
        events: broadcast::Sender<PacketEvent>,
    ) -> Self {
        let objects = DashMap::new();
        objects.insert(
            device_instance,
            Mutex::new(BacnetObject {
                object_name: format!("Device-{device_instance}"),
                present_value: device_instance as f32,
                min: 0.0,
                max: 0.0,
                resolution: 1.0,
            }),
        );
        BacnetServer {
            bind_addr: bind_addr.into(),
            port,
            device: Arc::new(BacnetDevice {
                device_instance,
                vendor_id,
                objects,
            }),
            events,
            seq: SequenceSource::new(),
        }
    }

    pub fn add_object(&self, instance: u32, object: BacnetObject) {
        self.device.objects.insert(instance, Mutex::new(object));
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let socket = Arc::new(UdpSocket::bind((self.bind_addr.as_str(), self.port)).await?);
        socket.set_broadcast(true).ok();
        info!(addr = %self.bind_addr, port = self.port, device_instance = self.device.device_instance, "bacnet server listening");
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = stop.cancelled() => { info!("bacnet server stopping"); return Ok(()); }
                received = socket.recv_from(&mut buf) => {
                    let (n, peer) = match received {
                        Ok(pair) => pair,
                        Err(err) => { warn!(%err, "bacnet recv failed"); continue; }
                    };
                    let local = socket.local_addr()?;
                    match bacnet::parse(&buf[..n]) {
                        Ok((frame, _)) => {
                            self.publish_event(Direction::Inbound, peer, local, &buf[..n], "bacnet request".to_string());
                            if let Some(reply) = self.handle_frame(&frame).await {
                                let encoded = bacnet::encode(&reply);
                                self.publish_event(Direction::Outbound, local, peer, &encoded, "bacnet reply".to_string());
                                let target = if reply.broadcast {
                                    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::BROADCAST), peer.port())
                                } else {
                                    peer
                                };
                                let _ = socket.send_to(&encoded, target).await;
                            }
                        }
                        Err(err) => warn!(%peer, %err, "malformed bacnet frame"),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, frame: &Frame) -> Option<Frame> {
        match &frame.service {
            Service::WhoIs { low_limit, high_limit } => {
                let in_range = match (low_limit, high_limit) {
                    (Some(low), Some(high)) => {
                        (*low..=*high).contains(&self.device.device_instance)
                    }
                    _ => true,
                };
                if !in_range {
                    return None;
                }
                Some(Frame {
                    broadcast: true,
                    service: Service::IAm {
                        device_instance: self.device.device_instance,
                        vendor_id: self.device.vendor_id,
                    },
                })
            }
            Service::WhoHas { object_name } => {
                for entry in self.device.objects.iter() {
                    let object = entry.value().lock().await;
                    if &object.object_name == object_name {
                        return Some(Frame {
                            broadcast: true,
                            service: Service::IHave {
                                device_instance: self.device.device_instance,
                                object_instance: *entry.key(),
                                object_name: object_name.clone(),
                            },
                        });
                    }
                }
                None
            }
            Service::ReadProperty {
                object_instance,
                property_id,
            } => {
                let Some(object) = self.device.objects.get(object_instance) else {
                    return None; // StateError: unknown object, no reply
                };
                let object = object.lock().await;
                let value = match *property_id {
                    PROPERTY_ID_PRESENT_VALUE => ApplicationTag::Real(object.present_value),
                    PROPERTY_ID_OBJECT_NAME => ApplicationTag::Null,
                    _ => ApplicationTag::Null,
                };
                Some(Frame {
                    broadcast: false,
                    service: Service::ReadPropertyAck {
                        object_instance: *object_instance,
                        property_id: *property_id,
                        value,
                    },
                })
            }
            Service::WriteProperty {
                object_instance,
                property_id,
                value,
            } => {
                let Some(object) = self.device.objects.get(object_instance) else {
                    return None;
                };
                if *property_id == PROPERTY_ID_PRESENT_VALUE {
                    if let ApplicationTag::Real(v) = value {
                        let mut object = object.lock().await;
                        object.present_value = v.clamp(object.min, object.max.max(object.min));
                    }
                }
                Some(Frame {
                    broadcast: false,
                    service: Service::SimpleAck,
                })
            }
            Service::IAm { .. } | Service::IHave { .. } | Service::ReadPropertyAck { .. } | Service::SimpleAck => {
                None
            }
        }
    }

    /// Per-tick data simulator (§4.2): evolves every analog present_value.
    pub async fn tick(&self) {
        for entry in self.device.objects.iter() {
            if *entry.key() == self.device.device_instance {
                continue;
            }
            let mut object = entry.value().lock().await;
            let sigma = crate::datasim::sigma_for_name(&object.object_name, object.resolution.max(0.1));
            object.present_value = crate::datasim::evolve_analog(
                object.present_value as f64,
                sigma,
                object.min as f64,
                object.max as f64,
            ) as f32;
        }
    }

    fn publish_event(&self, direction: Direction, src: SocketAddr, dst: SocketAddr, payload: &[u8], info: String) {
        let event = PacketEvent::new(
            self.seq.next(),
            direction,
            src.ip().to_string(),
            src.port(),
            dst.ip().to_string(),
            dst.port(),
            Protocol::Bacnet,
            payload.to_vec(),
            info,
        );
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_server() -> BacnetServer {
        let (tx, _rx) = broadcast::channel(16);
        BacnetServer::new("127.0.0.1", 0, 1001, 260, tx)
    }

    #[tokio::test]
    async fn who_is_with_no_range_returns_i_am_with_device_and_vendor_id() {
        let server = new_test_server();
        let frame = Frame {
            broadcast: true,
            service: Service::WhoIs {
                low_limit: None,
                high_limit: None,
            },
        };
        let reply = server.handle_frame(&frame).await.unwrap();
        assert_eq!(
            reply.service,
            Service::IAm {
                device_instance: 1001,
                vendor_id: 260
            }
        );
    }

    #[tokio::test]
    async fn read_property_on_unknown_object_returns_no_reply() {
        let server = new_test_server();
        let frame = Frame {
            broadcast: false,
            service: Service::ReadProperty {
                object_instance: 99,
                property_id: PROPERTY_ID_PRESENT_VALUE,
            },
        };
        assert!(server.handle_frame(&frame).await.is_none());
    }

    #[tokio::test]
    async fn write_property_then_read_property_round_trips() {
        let server = new_test_server();
        server.add_object(
            1,
            BacnetObject {
                object_name: "AI-1".to_string(),
                present_value: 0.0,
                min: 0.0,
                max: 100.0,
                resolution: 0.1,
            },
        );
        let write = Frame {
            broadcast: false,
            service: Service::WriteProperty {
                object_instance: 1,
                property_id: PROPERTY_ID_PRESENT_VALUE,
                value: ApplicationTag::Real(21.5),
            },
        };
        assert_eq!(server.handle_frame(&write).await.unwrap().service, Service::SimpleAck);

        let read = Frame {
            broadcast: false,
            service: Service::ReadProperty {
                object_instance: 1,
                property_id: PROPERTY_ID_PRESENT_VALUE,
            },
        };
        let reply = server.handle_frame(&read).await.unwrap();
        assert_eq!(
            reply.service,
            Service::ReadPropertyAck {
                object_instance: 1,
                property_id: PROPERTY_ID_PRESENT_VALUE,
                value: ApplicationTag::Real(21.5)
            }
        );
    }
}
