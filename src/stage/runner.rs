//! Drives a [`Stage`] against a [`MessageBroker`]

use super::{Binding, Outcome, Stage};
use crate::broker::{Delivery, MessageBroker};
use crate::types::Event;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Consumes one queue on behalf of a stage, one message at a time
///
/// Every delivery is settled exactly once:
///
/// | Outcome | Settlement |
/// |---|---|
/// | undecodable payload | reject, no requeue |
/// | [`Outcome::Completed`] | ack |
/// | [`Outcome::Rejected`] | reject, no requeue (dead-lettered when enabled) |
/// | [`Outcome::FatalError`] | reject, requeue unless dead-lettering; then the runner halts |
///
/// Run several runners over the same stage for concurrency.
pub struct StageRunner<S: Stage> {
    stage: Arc<S>,
    broker: Arc<dyn MessageBroker>,
    binding: Binding,
    consumer_tag: String,
    event_tx: broadcast::Sender<Event>,
}

impl<S: Stage> StageRunner<S> {
    /// Create a runner; the binding is taken from the stage once
    pub fn new(stage: Arc<S>, broker: Arc<dyn MessageBroker>) -> Self {
        let binding = stage.binding();
        let consumer_tag = format!("{}@{}", stage.name(), std::process::id());
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            stage,
            broker,
            binding,
            consumer_tag,
            event_tx,
        }
    }

    /// Identifier of this consumer, stable for the process lifetime
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// The input queue binding
    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    /// The wrapped stage
    pub fn stage(&self) -> &Arc<S> {
        &self.stage
    }

    /// Subscribe to runner events
    ///
    /// Events sent while no receiver exists are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Declare and bind the input queue
    pub async fn bind(&self) -> Result<()> {
        self.broker.declare(&self.binding).await?;

        info!(
            stage = self.stage.name(),
            queue = %self.binding.queue,
            routing_key = %self.binding.routing_key,
            consumer_tag = %self.consumer_tag,
            "bound input queue"
        );
        self.emit_event(Event::Bound {
            queue: self.binding.queue.clone(),
            consumer_tag: self.consumer_tag.clone(),
        });
        Ok(())
    }

    /// Decode, process and settle a single delivery
    ///
    /// Returns the outcome after the delivery has been acknowledged or rejected.
    /// Errors are broker failures during settlement.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<Outcome> {
        self.emit_event(Event::Received {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
        });

        let message: S::Message = match serde_json::from_slice(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                let reason = format!("undecodable message: {}", e);
                warn!(
                    stage = self.stage.name(),
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "rejecting undecodable message"
                );
                self.settle(delivery, Outcome::Rejected(reason.clone()))
                    .await?;
                return Ok(Outcome::Rejected(reason));
            }
        };

        debug!(
            stage = self.stage.name(),
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            ?message,
            "processing message"
        );

        // A panicking stage still gets its delivery settled
        let stage = Arc::clone(&self.stage);
        let outcome = match tokio::spawn(async move { stage.process(message).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::FatalError(format!("stage task failed: {}", e)),
        };

        self.settle(delivery, outcome.clone()).await?;
        Ok(outcome)
    }

    async fn settle(&self, delivery: &Delivery, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Completed => {
                self.broker.ack(delivery).await?;
                self.emit_event(Event::Acknowledged {
                    delivery_tag: delivery.delivery_tag,
                });
            }
            Outcome::Rejected(reason) => {
                self.broker.reject(delivery, false).await?;
                self.emit_event(Event::Rejected {
                    delivery_tag: delivery.delivery_tag,
                    reason,
                    requeued: false,
                });
            }
            Outcome::FatalError(reason) => {
                let requeue = !self.binding.is_dead_lettering_enabled();
                self.broker.reject(delivery, requeue).await?;
                self.emit_event(Event::Rejected {
                    delivery_tag: delivery.delivery_tag,
                    reason,
                    requeued: requeue,
                });
            }
        }
        Ok(())
    }

    /// Bind, then consume until cancelled, the broker closes, or the stage fails fatally
    ///
    /// A message in flight when `cancel` fires is finished and settled first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.bind().await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(consumer_tag = %self.consumer_tag, "shutdown requested, stopping consumer");
                    return Ok(());
                }
                next = self.broker.next_delivery(&self.binding.queue) => next?,
            };

            let Some(delivery) = next else {
                info!(consumer_tag = %self.consumer_tag, "broker closed, stopping consumer");
                return Ok(());
            };

            if let Outcome::FatalError(reason) = self.handle_delivery(&delivery).await? {
                error!(
                    severity = "critical",
                    stage = self.stage.name(),
                    consumer_tag = %self.consumer_tag,
                    reason = %reason,
                    "stage halted"
                );
                self.emit_event(Event::Halted {
                    reason: reason.clone(),
                });
                return Err(Error::StageHalted {
                    stage: self.stage.name().to_string(),
                    reason,
                });
            }
        }
    }
}
