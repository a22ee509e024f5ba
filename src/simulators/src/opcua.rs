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

//! OPC UA handshake-only server (§3, §4.1, §4.2). Answers HEL with a
//! negotiated ACK; anything else above the framing layer is out of scope.
//! The address space graph is kept as plain node-table state (Design
//! Notes: avoid parent back-pointers, resolve children by id through the
//! table) so the data simulator can still walk and evolve Variable nodes.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use protocol::opcua::{self, Acknowledge, Hello, Message};
use sim_core::{Direction, PacketEvent, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SequenceSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub class: NodeClass,
    pub browse_name: String,
    pub display_name: String,
    pub value: f64,
    pub data_type: String,
    pub children: Vec<String>,
    pub parent_id: Option<String>,
}

pub const ROOT_NODE_ID: &str = "i=84"; // Root/Objects folder

#[derive(Default)]
pub struct AddressSpace {
    nodes: DashMap<String, Mutex<Node>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(
            ROOT_NODE_ID.to_string(),
            Mutex::new(Node {
                id: ROOT_NODE_ID.to_string(),
                class: NodeClass::Object,
                browse_name: "Objects".to_string(),
                display_name: "Objects".to_string(),
                value: 0.0,
                data_type: "Object".to_string(),
                children: Vec::new(),
                parent_id: None,
            }),
        );
        AddressSpace { nodes }
    }

    /// Attaches a user node under `parent_id`. The Root/Objects folder MUST
    /// already exist (§3); returns `false` if the parent is unknown.
    pub fn attach(&self, parent_id: &str, node: Node) -> bool {
        if !self.nodes.contains_key(parent_id) {
            return false;
        }
        let child_id = node.id.clone();
        self.nodes.insert(child_id.clone(), Mutex::new(node));
        if let Some(parent) = self.nodes.get(parent_id) {
            // try_lock is safe here: attach runs before the server accepts
            // connections, never concurrently with a live session.
            if let Ok(mut parent) = parent.try_lock() {
                parent.children.push(child_id);
            }
        }
        true
    }

    pub async fn tick(&self) {
        for entry in self.nodes.iter() {
            let mut node = entry.value().lock().await;
            if node.class == NodeClass::Variable {
                let sigma = crate::datasim::sigma_for_name(&node.browse_name, 1.0);
                node.value = crate::datasim::evolve_analog(node.value, sigma, f64::MIN, f64::MAX);
            }
        }
    }
}

pub struct OpcUaServer {
    bind_addr: String,
    port: u16,
    pub address_space: Arc<AddressSpace>,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl OpcUaServer {
    pub fn new(bind_addr: impl Into<String>, port: u16, events: broadcast::Sender<PacketEvent>) -> Self {
        OpcUaServer {
            bind_addr: bind_addr.into(),
            port,
            address_space: Arc::new(AddressSpace::new()),
            events,
            seq: SequenceSource::new(),
        }
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.bind_addr.as_str(), self.port)).await?;
        info!(addr = %self.bind_addr, port = self.port, "opcua server listening");
        loop {
            tokio::select! {
                _ = stop.cancelled() => { info!("opcua server stopping"); return Ok(()); }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => { warn!(%err, "opcua accept failed"); continue; }
                    };
                    let server = self.clone();
                    let conn_stop = stop.clone();
                    tokio::spawn(async move {
                        let _ = server.handle_connection(socket, peer, conn_stop).await;
                    });
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        mut socket: TcpStream,
        peer: SocketAddr,
        stop: CancellationToken,
    ) -> std::io::Result<()> {
        let local = socket.local_addr()?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                read = socket.read(&mut chunk) => {
                    let n = read?;
                    if n == 0 { return Ok(()); }
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
            loop {
                match opcua::parse(&buf) {
                    Ok((message, consumed)) => {
                        self.publish_event(Direction::Inbound, peer, local, &buf[..consumed], "opcua hello".to_string());
                        if let Message::Hello(hello) = &message {
                            let reply = self.negotiate_ack(hello);
                            let encoded = opcua::encode(&Message::Acknowledge(reply));
                            self.publish_event(Direction::Outbound, local, peer, &encoded, "opcua ack".to_string());
                            socket.write_all(&encoded).await?;
                            socket.flush().await?;
                        }
                        buf.drain(..consumed);
                    }
                    Err(opcua::Error::InsufficientBytes) => break,
                    Err(_) => { buf.clear(); break; }
                }
            }
        }
    }

    fn negotiate_ack(&self, hello: &Hello) -> Acknowledge {
        opcua::negotiate(
            hello,
            &Acknowledge {
                protocol_version: 0,
                receive_buffer_size: 65536,
                send_buffer_size: 65536,
                max_message_size: 1 << 20,
                max_chunk_count: 0,
            },
        )
    }

    fn publish_event(&self, direction: Direction, src: SocketAddr, dst: SocketAddr, payload: &[u8], info: String) {
        let event = PacketEvent::new(
            self.seq.next(),
            direction,
            src.ip().to_string(),
            src.port(),
            dst.ip().to_string(),
            dst.port(),
            Protocol::OpcUa,
            payload.to_vec(),
            info,
        );
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_space_requires_existing_parent() {
        let space = AddressSpace::new();
        let attached = space.attach(
            ROOT_NODE_ID,
            Node {
                id: "ns=1;s=Temperature".to_string(),
                class: NodeClass::Variable,
                browse_name: "Temperature".to_string(),
                display_name: "Temperature".to_string(),
                value: 20.0,
                data_type: "Double".to_string(),
                children: vec![],
                parent_id: Some(ROOT_NODE_ID.to_string()),
            },
        );
        assert!(attached);

        let rejected = space.attach(
            "i=999",
            Node {
                id: "ns=1;s=Orphan".to_string(),
                class: NodeClass::Variable,
                browse_name: "Orphan".to_string(),
                display_name: "Orphan".to_string(),
                value: 0.0,
                data_type: "Double".to_string(),
                children: vec![],
                parent_id: Some("i=999".to_string()),
            },
        );
        assert!(!rejected);
    }

    #[tokio::test]
    async fn hello_negotiates_the_minimum_of_client_and_server_limits() {
        let (tx, _rx) = broadcast::channel(16);
        let server = OpcUaServer::new("127.0.0.1", 0, tx);
        let hello = Hello {
            protocol_version: 0,
            receive_buffer_size: 8192,
            send_buffer_size: 1 << 20,
            max_message_size: 1 << 22,
            max_chunk_count: 0,
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
        };
        let ack = server.negotiate_ack(&hello);
        assert_eq!(ack.receive_buffer_size, 8192);
        assert_eq!(ack.send_buffer_size, 65536);
    }
}
