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

//! In-memory event bus backend (§4.5): bounded history ring, subscribers
//! invoked in descending priority then insertion order, copy-on-iterate
//! subscriber lists so `unsubscribe` during delivery is safe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sim_core::{Event, EventType};
use tokio::sync::RwLock;

use crate::{invoke_handler, EventBus, EventBusError, EventBusResult, EventHandler, SubscriptionId};

struct Subscriber {
    id: SubscriptionId,
    priority: i32,
    insertion_seq: u64,
    handler: Arc<dyn EventHandler>,
}

pub struct InMemoryEventBus {
    subscribers: DashMap<EventType, RwLock<Vec<Subscriber>>>,
    history: RwLock<VecDeque<Event>>,
    history_capacity: usize,
    next_id: AtomicU64,
    next_insertion_seq: AtomicU64,
    running: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new(history_capacity: usize) -> Self {
        InMemoryEventBus {
            subscribers: DashMap::new(),
            history: RwLock::new(VecDeque::with_capacity(history_capacity.min(4096))),
            history_capacity,
            next_id: AtomicU64::new(1),
            next_insertion_seq: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub async fn history_snapshot(&self) -> Vec<Event> {
        self.history.read().await.iter().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(EventBusError::NotRunning);
        }

        {
            let mut history = self.history.write().await;
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // copy-on-iterate: collect owned (priority, insertion_seq, handler)
        // tuples before calling out, so a concurrent unsubscribe never
        // touches this bucket while a handler is running.
        let mut ordered: Vec<(i32, u64, Arc<dyn EventHandler>)> = Vec::new();
        if let Some(bucket) = self.subscribers.get(&event.event_type) {
            let guard = bucket.read().await;
            ordered.extend(guard.iter().map(|s| (s.priority, s.insertion_seq, s.handler.clone())));
        }
        ordered.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, _, handler) in ordered {
            invoke_handler(handler.as_ref(), &event);
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
        let insertion_seq = self.next_insertion_seq.fetch_add(1, Ordering::SeqCst);
        let subscriber = Subscriber {
            id,
            priority,
            insertion_seq,
            handler,
        };
        self.subscribers
            .entry(event_type)
            .or_insert_with(|| RwLock::new(Vec::new()))
            .write()
            .await
            .push(subscriber);
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> EventBusResult<()> {
        for bucket in self.subscribers.iter() {
            bucket.write().await.retain(|s| s.id != id);
        }
        Ok(())
    }

    async fn start(&self) -> EventBusResult<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> EventBusResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::Value;
    use std::sync::Mutex as StdMutex;

    fn sample_event() -> Event {
        Event::new(EventType::Alert, "test", Value::map())
    }

    #[tokio::test]
    async fn subscribers_see_descending_priority_then_insertion_order() {
        let bus = InMemoryEventBus::new(10);
        bus.start().await.unwrap();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for (label, priority) in [("low", 1), ("high", 10), ("mid", 5), ("high-later", 10)] {
            let order = order.clone();
            let label = label.to_string();
            bus.subscribe(
                EventType::Alert,
                Arc::new(move |_: &Event| order.lock().unwrap().push(label.clone())),
                priority,
            )
            .await
            .unwrap();
        }

        bus.publish(sample_event()).await.unwrap();
        let seen = order.lock().unwrap().clone();
        assert_eq!(seen, vec!["high", "high-later", "mid", "low"]);
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_block_others() {
        let bus = InMemoryEventBus::new(10);
        bus.start().await.unwrap();
        let reached = Arc::new(std::sync::atomic::AtomicBool::new(false));

        bus.subscribe(EventType::Alert, Arc::new(|_: &Event| panic!("boom")), 10)
            .await
            .unwrap();
        let reached2 = reached.clone();
        bus.subscribe(
            EventType::Alert,
            Arc::new(move |_: &Event| reached2.store(true, Ordering::SeqCst)),
            1,
        )
        .await
        .unwrap();

        bus.publish(sample_event()).await.unwrap();
        assert!(reached.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unsubscribe_stops_further_delivery() {
        let bus = InMemoryEventBus::new(10);
        bus.start().await.unwrap();
        let count = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let count2 = count.clone();
        let id = bus
            .subscribe(
                EventType::Alert,
                Arc::new(move |_: &Event| {
                    count2.fetch_add(1, Ordering::SeqCst);
                }),
                0,
            )
            .await
            .unwrap();

        bus.publish(sample_event()).await.unwrap();
        bus.unsubscribe(id).await.unwrap();
        bus.publish(sample_event()).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_ring_is_bounded() {
        let bus = InMemoryEventBus::new(3);
        bus.start().await.unwrap();
        for _ in 0..5 {
            bus.publish(sample_event()).await.unwrap();
        }
        assert_eq!(bus.history_snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn publish_before_start_is_rejected() {
        let bus = InMemoryEventBus::new(3);
        assert!(matches!(bus.publish(sample_event()).await, Err(EventBusError::NotRunning)));
    }
}
