//! Publish/subscribe contract implemented by every bus backend.

use async_trait::async_trait;
use vidflow_core::types::JobId;

use crate::error::BusError;
use crate::messages::BusMessage;

/// One message handed to a consumer. It stays pending until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream (partition) the message was read from.
    pub stream: String,
    /// Backend-assigned message id, used for acknowledgement.
    pub id: String,
    /// Ordering key the message was published with.
    pub key: String,
    /// JSON body.
    pub payload: String,
}

impl Delivery {
    /// Decode the JSON body.
    pub fn decode<M: BusMessage>(&self) -> Result<M, BusError> {
        serde_json::from_str(&self.payload).map_err(|e| BusError::Malformed {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append `payload` to the topic, routed by `key`. Returns once the bus
    /// has durably accepted the message.
    async fn publish(&self, key: JobId, payload: String) -> Result<(), BusError>;
}

#[async_trait]
pub trait Subscriber: Send {
    /// Fetch the next batch of deliveries.
    ///
    /// Deliveries that were handed out earlier and never acknowledged are
    /// returned again before new ones. Returns an empty batch after a short
    /// wait when nothing is available.
    async fn poll(&mut self) -> Result<Vec<Delivery>, BusError>;

    /// Acknowledge a handled delivery so it is not delivered again.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError>;
}

/// Serialize `message` and publish it under its own key.
pub async fn send<M: BusMessage>(publisher: &dyn Publisher, message: &M) -> Result<(), BusError> {
    let payload = serde_json::to_string(message)?;
    publisher.publish(message.key(), payload).await
}
