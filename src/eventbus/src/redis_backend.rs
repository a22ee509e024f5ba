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

//! Redis-backed event bus (§4.5): publishes to channel `iot:<event_type>`;
//! priority>0 events are additionally LPUSHed onto `events:<event_type>`
//! and LTRIMed to the last 1,000. Subscription listens on the `iot:*`,
//! `events:*` and `alerts:*` patterns via a background PSUBSCRIBE task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::AsyncCommands;
use sim_core::{Event, EventType};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{invoke_handler, EventBus, EventBusError, EventBusResult, EventHandler, SubscriptionId};

const RETAINED_LIST_CAPACITY: isize = 1_000;

struct Subscription {
    event_type: EventType,
    priority: i32,
    handler: Arc<dyn EventHandler>,
}

pub struct RedisEventBus {
    client: redis::Client,
    subscriptions: Arc<DashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    running: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisEventBus {
    pub fn new(redis_url: &str) -> EventBusResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| EventBusError::Backend(e.to_string()))?;
        Ok(RedisEventBus {
            client,
            subscriptions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    fn channel_for(event_type: EventType) -> String {
        format!("iot:{}", event_type.as_str())
    }

    fn retained_list_for(event_type: EventType) -> String {
        format!("events:{}", event_type.as_str())
    }

    fn dispatch(subscriptions: &DashMap<SubscriptionId, Subscription>, event_type: EventType, event: &Event) {
        let mut matching: Vec<(i32, Arc<dyn EventHandler>)> = subscriptions
            .iter()
            .filter(|entry| entry.value().event_type == event_type)
            .map(|entry| (entry.value().priority, entry.value().handler.clone()))
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, handler) in matching {
            invoke_handler(handler.as_ref(), event);
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(EventBusError::NotRunning);
        }
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventBusError::Backend(e.to_string()))?;
        let payload = serde_json::to_string(&event).map_err(|e| EventBusError::Backend(e.to_string()))?;

        conn.publish::<_, _, ()>(Self::channel_for(event.event_type), &payload)
            .await
            .map_err(|e| EventBusError::Backend(e.to_string()))?;

        if event.priority > 0 {
            let list = Self::retained_list_for(event.event_type);
            conn.lpush::<_, _, ()>(&list, &payload)
                .await
                .map_err(|e| EventBusError::Backend(e.to_string()))?;
            conn.ltrim::<_, ()>(&list, 0, RETAINED_LIST_CAPACITY - 1)
                .await
                .map_err(|e| EventBusError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> EventBusResult<SubscriptionId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(
            id,
            Subscription {
                event_type,
                priority,
                handler,
            },
        );
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> EventBusResult<()> {
        self.subscriptions.remove(&id);
        Ok(())
    }

    async fn start(&self) -> EventBusResult<()> {
        self.running.store(true, Ordering::SeqCst);
        let client = self.client.clone();
        let subscriptions = self.subscriptions.clone();

        let handle = tokio::spawn(async move {
            loop {
                let conn = match client.get_async_connection().await {
                    Ok(c) => c,
                    Err(err) => {
                        error!(%err, "redis event bus: failed to open pubsub connection");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                let mut pubsub = conn.into_pubsub();
                if let Err(err) = pubsub.psubscribe("iot:*").await {
                    warn!(%err, "redis psubscribe iot:* failed");
                }
                if let Err(err) = pubsub.psubscribe("events:*").await {
                    warn!(%err, "redis psubscribe events:* failed");
                }
                if let Err(err) = pubsub.psubscribe("alerts:*").await {
                    warn!(%err, "redis psubscribe alerts:* failed");
                }

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let channel: String = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let Some(event): Option<Event> = serde_json::from_str(&payload).ok() else {
                        continue;
                    };
                    let Some(event_type) = channel.split(':').nth(1).and_then(event_type_from_topic_segment) else {
                        continue;
                    };
                    Self::dispatch(&subscriptions, event_type, &event);
                }
                // stream ended (connection dropped); loop to reconnect.
            }
        });
        *self.listener.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> EventBusResult<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

fn event_type_from_topic_segment(segment: &str) -> Option<EventType> {
    match segment {
        "data_change" => Some(EventType::DataChange),
        "device_online" => Some(EventType::DeviceOnline),
        "device_offline" => Some(EventType::DeviceOffline),
        "alert" => Some(EventType::Alert),
        "metric" => Some(EventType::Metric),
        "command" => Some(EventType::Command),
        "status" => Some(EventType::Status),
        "packet" => Some(EventType::Packet),
        _ => None,
    }
}
