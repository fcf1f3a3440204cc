//! In-process broker

use super::{Delivery, MessageBroker, MessagePublisher};
use crate::stage::Binding;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    dead_letter_queue: Option<String>,
    /// Unsettled deliveries allowed at once; 0 means unlimited
    prefetch_count: u16,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    /// (exchange, routing key) -> bound queues
    routes: HashMap<(String, String), Vec<String>>,
    /// delivery tag -> delivery awaiting ack/reject
    unacked: HashMap<u64, Delivery>,
    next_tag: u64,
    closed: bool,
}

/// In-process broker with AMQP-like delivery semantics
///
/// - Messages are routed by exact `(exchange, routing_key)` match; unroutable
///   messages are dropped.
/// - Each delivery gets a fresh tag and must be settled exactly once.
/// - Requeued messages go back to the head of their queue flagged as redelivered.
/// - Rejected messages without requeue go to `<queue>.dead-letter` when the
///   binding enabled dead lettering.
/// - A queue hands out at most `prefetch_count` unsettled deliveries; further
///   consumers wait until one is acked or rejected.
///
/// ```
/// use release_dl::broker::{InMemoryBroker, MessageBroker, MessagePublisher};
/// use release_dl::stage::Binding;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker.declare(&Binding::new("download.http", "analysis", "download.http")).await?;
/// broker.publish(b"{}", "analysis", "download.http").await?;
///
/// let delivery = broker.next_delivery("download.http").await?.expect("message");
/// broker.ack(&delivery).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop handing out deliveries; waiting consumers receive `None`
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Number of messages ready for delivery on `queue`
    pub async fn queue_len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, |q| q.ready.len())
    }

    /// Payloads ready for delivery on `queue`, in delivery order
    pub async fn queued_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries handed out but not yet settled
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    fn take_unacked(state: &mut BrokerState, delivery: &Delivery) -> Result<Delivery> {
        state.unacked.remove(&delivery.delivery_tag).ok_or_else(|| {
            Error::Broker(format!(
                "unknown delivery tag {} (already settled?)",
                delivery.delivery_tag
            ))
        })
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, payload: &[u8], exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Broker("broker is closed".to_string()));
        }

        let targets = state
            .routes
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            debug!(exchange, routing_key, "unroutable message dropped");
            return Ok(());
        }

        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.ready.push_back(Delivery {
                    delivery_tag: 0,
                    queue: queue.clone(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: payload.to_vec(),
                    redelivered: false,
                });
            }
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, binding: &Binding) -> Result<()> {
        let mut state = self.state.lock().await;

        let dead_letter_queue = binding.dead_letter_queue();
        if let Some(dlq) = &dead_letter_queue {
            state.queues.entry(dlq.clone()).or_default();
        }

        let queue = state.queues.entry(binding.queue.clone()).or_default();
        queue.dead_letter_queue = dead_letter_queue;
        queue.prefetch_count = binding.options.prefetch_count;

        let bound = state
            .routes
            .entry((binding.exchange.clone(), binding.routing_key.clone()))
            .or_default();
        if !bound.contains(&binding.queue) {
            bound.push(binding.queue.clone());
        }

        debug!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            dead_lettering = binding.is_dead_lettering_enabled(),
            prefetch_count = binding.options.prefetch_count,
            "queue declared"
        );
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>> {
        loop {
            // Registered before the check so a publish between check and await is not missed
            let notified = self.notify.notified();

            {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                if state.closed {
                    return Ok(None);
                }

                let in_flight = state.unacked.values().filter(|d| d.queue == queue).count();
                let q = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| Error::Broker(format!("queue {} is not declared", queue)))?;

                let window_full =
                    q.prefetch_count > 0 && in_flight >= usize::from(q.prefetch_count);
                if !window_full {
                    if let Some(mut delivery) = q.ready.pop_front() {
                        state.next_tag += 1;
                        delivery.delivery_tag = state.next_tag;
                        state.unacked.insert(delivery.delivery_tag, delivery.clone());
                        return Ok(Some(delivery));
                    }
                }
            }

            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::take_unacked(&mut state, delivery)?;
        drop(state);

        // Frees a prefetch slot
        self.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut message = Self::take_unacked(&mut state, delivery)?;
        message.delivery_tag = 0;

        if requeue {
            message.redelivered = true;
            if let Some(queue) = state.queues.get_mut(&message.queue) {
                queue.ready.push_front(message);
            }
        } else {
            let dead_letter_queue = state
                .queues
                .get(&message.queue)
                .and_then(|q| q.dead_letter_queue.clone());
            match dead_letter_queue {
                Some(dlq) => {
                    debug!(queue = %message.queue, dead_letter_queue = %dlq, "message dead-lettered");
                    message.redelivered = false;
                    message.queue = dlq.clone();
                    if let Some(target) = state.queues.get_mut(&dlq) {
                        target.ready.push_back(message);
                    }
                }
                None => debug!(queue = %message.queue, "rejected message discarded"),
            }
        }
        drop(state);

        // Either a message became ready or a prefetch slot was freed
        self.notify.notify_waiters();
        Ok(())
    }
}
