//! In-process bus for tests and single-process setups.
//!
//! Mirrors the Redis consumer-group semantics closely enough to exercise
//! the at-least-once paths: deliveries stay pending until acknowledged and
//! are handed out again on the next poll.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use vidflow_core::types::JobId;

use crate::error::BusError;
use crate::messages::BusMessage;
use crate::transport::{Delivery, Publisher, Subscriber};

/// How long an empty poll waits for a publish before returning.
const DEFAULT_POLL_WAIT: Duration = Duration::from_millis(50);

const STREAM_NAME: &str = "memory";

#[derive(Default)]
struct State {
    next_id: u64,
    queue: VecDeque<Delivery>,
    pending: Vec<Delivery>,
    published: Vec<Delivery>,
    acked: Vec<String>,
    fail_publishes: bool,
}

/// A single-topic, single-group in-memory bus. Clones share the topic.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A consumer of this bus. All subscribers share one consumer group.
    pub fn subscriber(&self) -> MemorySubscriber {
        MemorySubscriber {
            bus: self.clone(),
            poll_wait: DEFAULT_POLL_WAIT,
        }
    }

    /// Make subsequent publishes fail, simulating an unreachable bus.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().fail_publishes = unavailable;
    }

    /// Everything ever published, in publish order.
    pub fn published(&self) -> Vec<Delivery> {
        self.lock().published.clone()
    }

    /// Published messages decoded as `M`, skipping anything that does not
    /// decode.
    pub fn published_as<M: BusMessage>(&self) -> Vec<M> {
        self.published()
            .iter()
            .filter_map(|d| d.decode().ok())
            .collect()
    }

    /// Ids of acknowledged deliveries, in acknowledgement order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    /// Number of deliveries handed out but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Enqueue a raw payload, bypassing serialization. Useful for feeding
    /// malformed messages to consumers.
    pub fn push_raw(&self, key: &str, payload: impl Into<String>) -> Delivery {
        let delivery = {
            let mut state = self.lock();
            state.next_id += 1;
            let delivery = Delivery {
                stream: STREAM_NAME.to_string(),
                id: format!("{}-0", state.next_id),
                key: key.to_string(),
                payload: payload.into(),
            };
            state.queue.push_back(delivery.clone());
            state.published.push(delivery.clone());
            delivery
        };
        self.notify.notify_waiters();
        delivery
    }
}

#[async_trait]
impl Publisher for MemoryBus {
    async fn publish(&self, key: JobId, payload: String) -> Result<(), BusError> {
        if self.lock().fail_publishes {
            return Err(BusError::Unavailable("memory bus marked unavailable".into()));
        }
        self.push_raw(&key.to_string(), payload);
        Ok(())
    }
}

/// Consumer handle returned by [`MemoryBus::subscriber`].
pub struct MemorySubscriber {
    bus: MemoryBus,
    poll_wait: Duration,
}

impl MemorySubscriber {
    fn take_batch(&self) -> Vec<Delivery> {
        let mut state = self.bus.lock();
        if !state.pending.is_empty() {
            return state.pending.clone();
        }
        let batch: Vec<Delivery> = state.queue.drain(..).collect();
        state.pending.extend(batch.iter().cloned());
        batch
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn poll(&mut self) -> Result<Vec<Delivery>, BusError> {
        let batch = self.take_batch();
        if !batch.is_empty() {
            return Ok(batch);
        }

        let notified = self.bus.notify.notified();
        let _ = tokio::time::timeout(self.poll_wait, notified).await;
        Ok(self.take_batch())
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let mut state = self.bus.lock();
        if let Some(pos) = state.pending.iter().position(|d| d.id == delivery.id) {
            state.pending.remove(pos);
            state.acked.push(delivery.id.clone());
        }
        Ok(())
    }
}
