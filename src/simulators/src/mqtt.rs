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

//! MQTT 3.1.1 broker simulator (§3, §4.1, §4.2). Sessions, subscriptions,
//! retained messages and last wills live in `MqttBroker`; each connection is
//! driven by its own task and receives forwarded publishes over an mpsc
//! channel, per the Design Notes' "replace callbacks with channels" flag.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use protocol::mqtt::{
    self, ConnAck, ConnectReturnCode, Packet, PubAck, PubComp, PubRec, PubRel, Publish, QoS,
    SubAck, SubscribeReasonCode, UnsubAck,
};
use sim_core::{topic, Direction, PacketEvent, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SequenceSource;

#[derive(Debug, Clone)]
pub struct RetainedMessage {
    pub qos: QoS,
    pub payload: Bytes,
}

#[derive(Debug)]
struct Session {
    subscriptions: DashMap<String, QoS>,
    outbound: mpsc::UnboundedSender<Packet>,
    next_pkid: AtomicU16,
}

pub struct MqttBroker {
    bind_addr: String,
    port: u16,
    sessions: DashMap<String, Arc<Session>>,
    retained: DashMap<String, RetainedMessage>,
    events: broadcast::Sender<PacketEvent>,
    seq: SequenceSource,
}

impl MqttBroker {
    pub fn new(bind_addr: impl Into<String>, port: u16, events: broadcast::Sender<PacketEvent>) -> Self {
        MqttBroker {
            bind_addr: bind_addr.into(),
            port,
            sessions: DashMap::new(),
            retained: DashMap::new(),
            events,
            seq: SequenceSource::new(),
        }
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.bind_addr.as_str(), self.port)).await?;
        info!(addr = %self.bind_addr, port = self.port, "mqtt broker listening");
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("mqtt broker stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => { warn!(%err, "mqtt accept failed"); continue; }
                    };
                    let broker = self.clone();
                    let conn_stop = stop.clone();
                    tokio::spawn(async move {
                        if let Err(err) = broker.handle_connection(socket, peer, conn_stop).await {
                            debug!(%peer, %err, "mqtt connection closed with error");
                        }
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
        let (tx, mut rx) = mpsc::unbounded_channel::<Packet>();
        let mut client_id: Option<String> = None;
        let mut read_buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let result: std::io::Result<()> = loop {
            tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                forwarded = rx.recv() => {
                    let Some(packet) = forwarded else { break Ok(()) };
                    let mut buf = BytesMut::new();
                    if mqtt::write_packet(&packet, &mut buf).is_ok() {
                        self.publish_event(Direction::Outbound, local, peer, &buf, "mqtt forwarded publish".to_string());
                        if socket.write_all(&buf).await.is_err() {
                            break Ok(());
                        }
                    }
                }
                read = socket.read(&mut chunk) => {
                    let n = match read { Ok(n) => n, Err(e) => break Err(e) };
                    if n == 0 {
                        break Ok(());
                    }
                    read_buf.extend_from_slice(&chunk[..n]);
                    loop {
                        match mqtt::read_packet(&read_buf) {
                            Ok(Some((packet, consumed))) => {
                                self.publish_event(Direction::Inbound, peer, local, &read_buf[..consumed], describe(&packet));
                                let disconnect = matches!(packet, Packet::Disconnect);
                                if let Some(reply) = self.handle_packet(&mut client_id, &tx, packet).await {
                                    let mut out = BytesMut::new();
                                    if mqtt::write_packet(&reply, &mut out).is_ok() {
                                        self.publish_event(Direction::Outbound, local, peer, &out, "mqtt reply".to_string());
                                        socket.write_all(&out).await?;
                                        socket.flush().await?;
                                    }
                                }
                                read_buf.drain(..consumed);
                                if disconnect {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(_malformed) => { read_buf.clear(); break; }
                        }
                    }
                }
            }
        };

        if let Some(id) = client_id {
            self.sessions.remove(&id);
        }
        result
    }

    async fn handle_packet(
        &self,
        client_id: &mut Option<String>,
        outbound: &mpsc::UnboundedSender<Packet>,
        packet: Packet,
    ) -> Option<Packet> {
        match packet {
            Packet::Connect(connect) => {
                let session = Arc::new(Session {
                    subscriptions: DashMap::new(),
                    outbound: outbound.clone(),
                    next_pkid: AtomicU16::new(1),
                });
                self.sessions.insert(connect.client_id.clone(), session);
                *client_id = Some(connect.client_id);
                Some(Packet::ConnAck(ConnAck {
                    session_present: false,
                    code: ConnectReturnCode::Accepted,
                }))
            }
            Packet::Subscribe(subscribe) => {
                let Some(id) = client_id.as_ref() else { return None };
                let Some(session) = self.sessions.get(id).map(|s| s.clone()) else { return None };
                let mut codes = Vec::with_capacity(subscribe.filters.len());
                for (filter, qos) in &subscribe.filters {
                    if topic::is_valid_filter(filter) {
                        session.subscriptions.insert(filter.clone(), *qos);
                        codes.push(SubscribeReasonCode::Success(*qos));
                    } else {
                        codes.push(SubscribeReasonCode::Failure);
                    }
                }
                self.redeliver_retained(&session, &subscribe.filters);
                Some(Packet::SubAck(SubAck {
                    pkid: subscribe.pkid,
                    return_codes: codes,
                }))
            }
            Packet::Unsubscribe(unsubscribe) => {
                if let Some(id) = client_id.as_ref() {
                    if let Some(session) = self.sessions.get(id) {
                        for filter in &unsubscribe.filters {
                            session.subscriptions.remove(filter);
                        }
                    }
                }
                Some(Packet::UnsubAck(UnsubAck { pkid: unsubscribe.pkid }))
            }
            Packet::Publish(publish) => {
                self.forward_publish(&publish);
                match publish.qos {
                    QoS::AtMostOnce => None,
                    QoS::AtLeastOnce => Some(Packet::PubAck(PubAck { pkid: publish.pkid })),
                    QoS::ExactlyOnce => Some(Packet::PubRec(PubRec { pkid: publish.pkid })),
                }
            }
            Packet::PubRel(PubRel { pkid }) => Some(Packet::PubComp(PubComp { pkid })),
            Packet::PubAck(_) | Packet::PubRec(_) | Packet::PubComp(_) => None,
            Packet::PingReq => Some(Packet::PingResp),
            Packet::Disconnect => None,
            Packet::ConnAck(_) | Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => None,
        }
    }

    fn forward_publish(&self, publish: &Publish) {
        if publish.retain {
            if publish.payload.is_empty() {
                self.retained.remove(&publish.topic);
            } else {
                self.retained.insert(
                    publish.topic.clone(),
                    RetainedMessage {
                        qos: publish.qos,
                        payload: publish.payload.clone(),
                    },
                );
            }
        }
        for entry in self.sessions.iter() {
            let session = entry.value();
            for sub in session.subscriptions.iter() {
                if topic::matches(sub.key(), &publish.topic) {
                    let delivered_qos = min_qos(publish.qos, *sub.value());
                    let pkid = session.next_pkid.fetch_add(1, Ordering::Relaxed);
                    let outgoing = Publish {
                        dup: false,
                        qos: delivered_qos,
                        retain: false,
                        topic: publish.topic.clone(),
                        pkid,
                        payload: publish.payload.clone(),
                    };
                    let _ = session.outbound.send(Packet::Publish(outgoing));
                    break;
                }
            }
        }
    }

    fn redeliver_retained(&self, session: &Session, filters: &[(String, QoS)]) {
        for entry in self.retained.iter() {
            let retained_topic = entry.key();
            for (filter, sub_qos) in filters {
                if topic::matches(filter, retained_topic) {
                    let delivered_qos = min_qos(entry.value().qos, *sub_qos);
                    let pkid = session.next_pkid.fetch_add(1, Ordering::Relaxed);
                    let outgoing = Publish {
                        dup: false,
                        qos: delivered_qos,
                        retain: true,
                        topic: retained_topic.clone(),
                        pkid,
                        payload: entry.value().payload.clone(),
                    };
                    let _ = session.outbound.send(Packet::Publish(outgoing));
                    break;
                }
            }
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
            Protocol::Mqtt,
            payload.to_vec(),
            info,
        );
        let _ = self.events.send(event);
    }
}

fn min_qos(a: QoS, b: QoS) -> QoS {
    match (a as u8).min(b as u8) {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn describe(packet: &Packet) -> String {
    match packet {
        Packet::Connect(c) => format!("mqtt connect client_id={}", c.client_id),
        Packet::Publish(p) => format!("mqtt publish topic={}", p.topic),
        Packet::Subscribe(_) => "mqtt subscribe".to_string(),
        Packet::Unsubscribe(_) => "mqtt unsubscribe".to_string(),
        other => format!("mqtt {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_test_broker() -> MqttBroker {
        let (tx, _rx) = broadcast::channel(16);
        MqttBroker::new("127.0.0.1", 0, tx)
    }

    #[tokio::test]
    async fn connect_returns_accepted_connack_with_no_session_present() {
        let broker = new_test_broker();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client_id = None;
        let reply = broker
            .handle_packet(
                &mut client_id,
                &tx,
                Packet::Connect(mqtt::Connect {
                    keep_alive: 60,
                    client_id: "c1".to_string(),
                    clean_session: true,
                    username: None,
                    password: None,
                    will: None,
                }),
            )
            .await;
        assert_eq!(
            reply,
            Some(Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::Accepted
            }))
        );
        assert_eq!(client_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn subscribe_then_publish_delivers_to_matching_subscriber() {
        let broker = new_test_broker();
        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        let mut sub_client = Some("subscriber".to_string());
        broker.sessions.insert(
            "subscriber".to_string(),
            Arc::new(Session {
                subscriptions: DashMap::new(),
                outbound: sub_tx,
                next_pkid: AtomicU16::new(1),
            }),
        );
        broker
            .handle_packet(
                &mut sub_client,
                &mpsc::unbounded_channel().0,
                Packet::Subscribe(mqtt::Subscribe {
                    pkid: 1,
                    filters: vec![("sensors/+".to_string(), QoS::AtMostOnce)],
                }),
            )
            .await;

        broker.forward_publish(&Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "sensors/temp".to_string(),
            pkid: 0,
            payload: Bytes::from_static(b"21.5"),
        });

        let delivered = sub_rx.recv().await.unwrap();
        match delivered {
            Packet::Publish(p) => assert_eq!(p.topic, "sensors/temp"),
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
