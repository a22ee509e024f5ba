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

//! Three interchangeable event bus backends sharing one contract (§4.5):
//! in-memory (always available), Redis-backed and ZMQ-backed (both behind
//! Cargo features, since they each pull in a native client/library that a
//! pure simulator build shouldn't require by default).

pub mod in_memory;

#[cfg(feature = "redis-backend")]
pub mod redis_backend;

#[cfg(feature = "zmq-backend")]
pub mod zmq_backend;

use async_trait::async_trait;
use sim_core::{Event, EventType};
use std::sync::Arc;
use thiserror::Error;

pub use in_memory::InMemoryEventBus;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("event bus not running")]
    NotRunning,
    #[error("backend error: {0}")]
    Backend(String),
}

pub type EventBusResult<T> = Result<T, EventBusError>;
pub type SubscriptionId = u64;

/// Invoked synchronously for each delivered event. A handler that panics
/// MUST NOT affect delivery to other subscribers (§4.5); every backend
/// calls handlers through `invoke_handler` to guarantee that.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// Calls a handler, isolating the caller from a panicking subscriber.
pub(crate) fn invoke_handler(handler: &dyn EventHandler, event: &Event) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(event)));
    if let Err(_panic) = result {
        tracing::warn!(event_id = %event.id, event_type = event.event_type.as_str(), "event subscriber panicked");
    }
}

/// Shared contract every backend implements (§4.5). Delivery is best-effort:
/// no acknowledgement, no redelivery. `publish` is async-only, never a
/// fire-and-forget enqueue from a sync method (Design Notes: "cooperative
/// async with blocking escape hatches").
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        priority: i32,
    ) -> EventBusResult<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> EventBusResult<()>;

    async fn start(&self) -> EventBusResult<()>;

    async fn stop(&self) -> EventBusResult<()>;
}
