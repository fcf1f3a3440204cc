//! Input queue declaration

use serde::{Deserialize, Serialize};

/// Suffix appended to a queue name to form its dead-letter queue
const DEAD_LETTER_SUFFIX: &str = ".dead-letter";

/// Declaration options for an input queue
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Survive broker restarts
    pub durable: bool,
    /// Unacknowledged deliveries a consumer may hold
    pub prefetch_count: u16,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            prefetch_count: 1,
        }
    }
}

/// Where a stage consumes from
///
/// Dead lettering is disabled unless the stage opts in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Input queue name
    pub queue: String,
    /// Exchange the queue is bound to
    pub exchange: String,
    /// Routing key of the binding
    pub routing_key: String,
    /// Declaration options
    pub options: QueueOptions,
    dead_letter: bool,
}

impl Binding {
    /// Binding with default options and dead lettering disabled
    pub fn new(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            options: QueueOptions::default(),
            dead_letter: false,
        }
    }

    /// Replace the declaration options
    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Route rejected messages to the dead-letter queue
    pub fn enable_dead_lettering(&mut self) {
        self.dead_letter = true;
    }

    /// Discard rejected messages
    pub fn disable_dead_lettering(&mut self) {
        self.dead_letter = false;
    }

    /// Whether rejected messages are dead-lettered
    pub fn is_dead_lettering_enabled(&self) -> bool {
        self.dead_letter
    }

    /// Name of the dead-letter queue, when dead lettering is enabled
    pub fn dead_letter_queue(&self) -> Option<String> {
        self.dead_letter
            .then(|| format!("{}{}", self.queue, DEAD_LETTER_SUFFIX))
    }
}
