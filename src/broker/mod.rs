//! Message broker seams
//!
//! Stages never talk to a broker directly; they go through two narrow traits:
//!
//! - [`MessagePublisher`]: send a payload to an exchange with a routing key
//! - [`MessageBroker`]: declare an input queue, receive deliveries one at a
//!   time, and settle each one with an ack or a reject
//!
//! [`InMemoryBroker`] implements both with AMQP-like semantics (routing keys,
//! requeue with the redelivered flag, dead-letter queues) for embedding and tests.

mod memory;

pub use memory::InMemoryBroker;

use crate::Result;
use crate::stage::Binding;
use async_trait::async_trait;
use serde::Serialize;

/// A message handed to a consumer, awaiting acknowledgement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned tag identifying this delivery attempt
    pub delivery_tag: u64,
    /// Queue the message was consumed from
    pub queue: String,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Raw payload
    pub body: Vec<u8>,
    /// Whether this message was delivered before and returned to the queue
    pub redelivered: bool,
}

/// Sends messages with at-least-once semantics
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `payload` to `exchange` with `routing_key`
    async fn publish(&self, payload: &[u8], exchange: &str, routing_key: &str) -> Result<()>;
}

/// Consumer side of a broker
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare the queue described by `binding` and bind it; safe to repeat
    async fn declare(&self, binding: &Binding) -> Result<()>;

    /// Wait for the next delivery on `queue`; `Ok(None)` once the broker is closed
    ///
    /// Waits while the queue already has `prefetch_count` unsettled deliveries.
    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledge a delivery
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Reject a delivery, returning it to its queue when `requeue` is set
    ///
    /// Without requeue the message goes to the queue's dead-letter queue if one
    /// was declared, and is discarded otherwise.
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()>;
}

/// Serialize `message` as JSON and publish it
pub async fn publish_json<T: Serialize + Sync>(
    publisher: &dyn MessagePublisher,
    message: &T,
    exchange: &str,
    routing_key: &str,
) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    publisher.publish(&payload, exchange, routing_key).await
}
