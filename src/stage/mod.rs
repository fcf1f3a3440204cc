//! Pipeline stage contract
//!
//! A stage is a named, self-describing worker bound to one input queue. It
//! receives decoded messages and reports an [`Outcome`] for each one; the
//! [`StageRunner`] turns outcomes into broker acknowledgements.

mod binding;
pub mod download;
mod runner;

pub use binding::{Binding, QueueOptions};
pub use download::DownloadStage;
pub use runner::StageRunner;

use crate::types::FailurePolicy;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Result of processing one message
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The message was handled (including the idempotent no-op); acknowledge it
    Completed,
    /// The message cannot be handled; reject it without requeue
    Rejected(String),
    /// The stage cannot continue; settle the message and stop consuming
    FatalError(String),
}

impl Outcome {
    /// Outcome for a failed message under `policy`
    pub fn failure(policy: FailurePolicy, reason: impl Into<String>) -> Self {
        match policy {
            FailurePolicy::FailFast => Outcome::FatalError(reason.into()),
            FailurePolicy::DeadLetter => Outcome::Rejected(reason.into()),
        }
    }

    /// Whether the message was handled successfully
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }
}

/// A pipeline stage
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Decoded message type; payloads that fail to decode are rejected before `process`
    type Message: DeserializeOwned + Send + std::fmt::Debug + 'static;

    /// Short stage name, also used as the consumer tag prefix
    fn name(&self) -> &str;

    /// One-line human readable description
    fn describe(&self) -> &str;

    /// Queue, exchange and routing key this stage consumes from
    fn binding(&self) -> Binding;

    /// Handle one message
    async fn process(&self, message: Self::Message) -> Outcome;
}
