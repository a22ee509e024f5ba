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

//! Raw TCP simulator (SPEC_FULL §15): a minimal echo server for exercising
//! clients against an unframed protocol. Named in the default-ports table
//! (raw TCP 8080) but undetailed by the wire-codec section, since it
//! carries no framing of its own.

use std::net::SocketAddr;
use std::sync::Arc;

use sim_core::{Direction, PacketEvent, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::SequenceSource;

pub struct TcpEchoServer {
    bind_addr: String,
    port: u16,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl TcpEchoServer {
    pub fn new(bind_addr: impl Into<String>, port: u16, events: broadcast::Sender<PacketEvent>) -> Self {
        TcpEchoServer {
            bind_addr: bind_addr.into(),
            port,
            events,
            seq: SequenceSource::new(),
        }
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.bind_addr.as_str(), self.port)).await?;
        info!(addr = %self.bind_addr, port = self.port, "raw tcp server listening");
        loop {
            tokio::select! {
                _ = stop.cancelled() => { info!("raw tcp server stopping"); return Ok(()); }
                accepted = listener.accept() => {
                    let (mut socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => { warn!(%err, "raw tcp accept failed"); continue; }
                    };
                    let server = self.clone();
                    let conn_stop = stop.clone();
                    tokio::spawn(async move {
                        let local = match socket.local_addr() { Ok(a) => a, Err(_) => return };
                        let mut buf = [0u8; 4096];
                        loop {
                            tokio::select! {
                                _ = conn_stop.cancelled() => return,
                                read = socket.read(&mut buf) => {
                                    let n = match read { Ok(n) => n, Err(_) => return };
                                    if n == 0 { return; }
                                    server.publish(Direction::Inbound, peer, local, &buf[..n]);
                                    server.publish(Direction::Outbound, local, peer, &buf[..n]);
                                    if socket.write_all(&buf[..n]).await.is_err() { return; }
                                }
                            }
                        }
                    });
                }
            }
        }
    }

    fn publish(&self, direction: Direction, src: SocketAddr, dst: SocketAddr, payload: &[u8]) {
        let event = PacketEvent::new(
            self.seq.next(),
            direction,
            src.ip().to_string(),
            src.port(),
            dst.ip().to_string(),
            dst.port(),
            Protocol::RawTcp,
            payload.to_vec(),
            "raw tcp echo",
        );
        let _ = self.events.send(event);
    }
}
