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

//! CoAP resource server simulator (§3, §4.1, §4.2). One UDP socket serves
//! GET/POST/PUT/DELETE against registered resources and pushes Observe
//! notifications when an observable resource's value changes.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::coap::{
    self, Code, ContentFormat, Message, MessageType, Option_, OPTION_NUMBER_CONTENT_FORMAT,
    OPTION_NUMBER_ETAG, OPTION_NUMBER_OBSERVE, OPTION_NUMBER_URI_PATH,
};
use rand::RngCore;
use sim_core::{Direction, PacketEvent, Protocol};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SequenceSource;

#[derive(Debug, Clone)]
pub struct CoapResource {
    pub content_format: ContentFormat,
    pub value: Vec<u8>,
    pub observable: bool,
    pub etag: [u8; 4],
    observers: Vec<(Vec<u8>, SocketAddr)>,
}

impl CoapResource {
    pub fn new(value: Vec<u8>, content_format: ContentFormat, observable: bool) -> Self {
        let mut etag = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut etag);
        CoapResource {
            content_format,
            value,
            observable,
            etag,
            observers: Vec::new(),
        }
    }
}

pub struct CoapServer {
    bind_addr: String,
    port: u16,
    resources: DashMap<String, Mutex<CoapResource>>,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl CoapServer {
    pub fn new(bind_addr: impl Into<String>, port: u16, events: broadcast::Sender<PacketEvent>) -> Self {
        CoapServer {
            bind_addr: bind_addr.into(),
            port,
            resources: DashMap::new(),
            events,
            seq: SequenceSource::new(),
        }
    }

    pub fn register_resource(&self, path: impl Into<String>, resource: CoapResource) {
        self.resources.insert(path.into(), Mutex::new(resource));
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let socket = Arc::new(UdpSocket::bind((self.bind_addr.as_str(), self.port)).await?);
        info!(addr = %self.bind_addr, port = self.port, "coap server listening");
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                _ = stop.cancelled() => { info!("coap server stopping"); return Ok(()); }
                received = socket.recv_from(&mut buf) => {
                    let (n, peer) = match received {
                        Ok(pair) => pair,
                        Err(err) => { warn!(%err, "coap recv failed"); continue; }
                    };
                    let local = socket.local_addr()?;
                    match coap::parse(&buf[..n]) {
                        Ok((message, _consumed)) => {
                            self.publish_event(Direction::Inbound, peer, local, &buf[..n], format!("coap {} {}", describe_code(message.code), message.uri_path()));
                            if let Some(reply) = self.handle_message(&message, peer).await {
                                let encoded = coap::encode(&reply);
                                self.publish_event(Direction::Outbound, local, peer, &encoded, "coap reply".to_string());
                                let _ = socket.send_to(&encoded, peer).await;
                            }
                        }
                        Err(err) => {
                            warn!(%peer, %err, "malformed coap message");
                        }
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: &Message, peer: SocketAddr) -> Option<Message> {
        let path = message.uri_path();
        let observe = message.option_value(OPTION_NUMBER_OBSERVE).map(|v| v.first().copied().unwrap_or(0));

        if message.code == Code::GET {
            let Some(resource) = self.resources.get(&path) else {
                return Some(self.response(message, Code::NOT_FOUND, vec![], ContentFormat::Json, None));
            };
            let mut resource = resource.lock().await;
            if resource.observable {
                if observe == Some(0) {
                    resource.observers.retain(|(_, addr)| *addr != peer);
                    resource.observers.push((message.token.clone(), peer));
                } else if observe.is_some() {
                    resource.observers.retain(|(_, addr)| *addr != peer);
                }
            }
            Some(self.response(
                message,
                Code::CONTENT,
                resource.value.clone(),
                resource.content_format,
                observe.and(Some(0)),
            ))
        } else if message.code == Code::PUT {
            let Some(resource) = self.resources.get(&path) else {
                return Some(self.response(message, Code::NOT_FOUND, vec![], ContentFormat::Json, None));
            };
            {
                let mut resource = resource.lock().await;
                resource.value = message.payload.clone();
            }
            self.notify_observers(&path).await;
            Some(self.response(message, Code::CHANGED, vec![], ContentFormat::Json, None))
        } else if message.code == Code::POST {
            if self.resources.contains_key(&path) {
                let resource = self.resources.get(&path).unwrap();
                resource.lock().await.value = message.payload.clone();
                self.notify_observers(&path).await;
            } else {
                self.register_resource(path.clone(), CoapResource::new(message.payload.clone(), ContentFormat::Json, false));
            }
            Some(self.response(message, Code::CHANGED, vec![], ContentFormat::Json, None))
        } else if message.code == Code::DELETE {
            if self.resources.remove(&path).is_some() {
                Some(self.response(message, Code::DELETED, vec![], ContentFormat::Json, None))
            } else {
                Some(self.response(message, Code::NOT_FOUND, vec![], ContentFormat::Json, None))
            }
        } else {
            Some(self.response(message, Code::BAD_REQUEST, vec![], ContentFormat::Json, None))
        }
    }

    fn response(
        &self,
        request: &Message,
        code: Code,
        payload: Vec<u8>,
        content_format: ContentFormat,
        observe_seq: Option<u8>,
    ) -> Message {
        let mut options = vec![Option_ {
            number: OPTION_NUMBER_CONTENT_FORMAT,
            value: (content_format.code() as u16).to_be_bytes().to_vec(),
        }];
        if let Some(seq) = observe_seq {
            options.push(Option_ {
                number: OPTION_NUMBER_OBSERVE,
                value: vec![seq],
            });
        }
        Message {
            msg_type: MessageType::Acknowledgement,
            code,
            message_id: request.message_id,
            token: request.token.clone(),
            options,
            payload,
        }
    }

    /// Notification cycle (§4.2, §8): push 2.05 Content to every observer of
    /// a changed resource, in registration order.
    async fn notify_observers(&self, path: &str) {
        let Some(resource) = self.resources.get(path) else { return };
        let (observers, value, content_format, etag) = {
            let resource = resource.lock().await;
            (
                resource.observers.clone(),
                resource.value.clone(),
                resource.content_format,
                resource.etag,
            )
        };
        if observers.is_empty() {
            return;
        }
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => return,
        };
        for (token, addr) in observers {
            let message = Message {
                msg_type: MessageType::NonConfirmable,
                code: Code::CONTENT,
                message_id: rand::thread_rng().next_u32() as u16,
                token,
                options: vec![
                    Option_ {
                        number: OPTION_NUMBER_CONTENT_FORMAT,
                        value: (content_format.code() as u16).to_be_bytes().to_vec(),
                    },
                    Option_ {
                        number: OPTION_NUMBER_ETAG,
                        value: etag.to_vec(),
                    },
                ],
                payload: value.clone(),
            };
            let encoded = coap::encode(&message);
            self.publish_event(
                Direction::Local,
                socket.local_addr().unwrap_or(addr),
                addr,
                &encoded,
                format!("coap observe notification path={path}"),
            );
            let _ = socket.send_to(&encoded, addr).await;
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
            Protocol::Coap,
            payload.to_vec(),
            info,
        );
        let _ = self.events.send(event);
    }
}

fn describe_code(code: Code) -> &'static str {
    match code {
        Code::GET => "GET",
        Code::POST => "POST",
        Code::PUT => "PUT",
        Code::DELETE => "DELETE",
        _ => "response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_server() -> CoapServer {
        let (tx, _rx) = broadcast::channel(16);
        CoapServer::new("127.0.0.1", 0, tx)
    }

    #[tokio::test]
    async fn get_on_registered_resource_returns_content() {
        let server = new_test_server();
        server.register_resource(
            "/temperature",
            CoapResource::new(b"21.5".to_vec(), ContentFormat::Json, true),
        );
        let request = Message {
            msg_type: MessageType::Confirmable,
            code: Code::GET,
            message_id: 1,
            token: vec![1],
            options: vec![Option_ {
                number: OPTION_NUMBER_URI_PATH,
                value: b"temperature".to_vec(),
            }],
            payload: vec![],
        };
        let reply = server
            .handle_message(&request, "127.0.0.1:1000".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.code, Code::CONTENT);
        assert_eq!(reply.payload, b"21.5");
    }

    #[tokio::test]
    async fn put_on_missing_resource_returns_not_found() {
        let server = new_test_server();
        let request = Message {
            msg_type: MessageType::Confirmable,
            code: Code::PUT,
            message_id: 2,
            token: vec![],
            options: vec![Option_ {
                number: OPTION_NUMBER_URI_PATH,
                value: b"missing".to_vec(),
            }],
            payload: vec![],
        };
        let reply = server
            .handle_message(&request, "127.0.0.1:1000".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(reply.code, Code::NOT_FOUND);
    }

    #[tokio::test]
    async fn observe_zero_registers_an_observer() {
        let server = new_test_server();
        server.register_resource("/x", CoapResource::new(b"1".to_vec(), ContentFormat::Json, true));
        let request = Message {
            msg_type: MessageType::Confirmable,
            code: Code::GET,
            message_id: 3,
            token: vec![9],
            options: vec![
                Option_ { number: OPTION_NUMBER_URI_PATH, value: b"x".to_vec() },
                Option_ { number: OPTION_NUMBER_OBSERVE, value: vec![0] },
            ],
            payload: vec![],
        };
        server
            .handle_message(&request, "127.0.0.1:2000".parse().unwrap())
            .await;
        let resource = server.resources.get("/x").unwrap();
        assert_eq!(resource.lock().await.observers.len(), 1);
    }
}
