//! Worker message types for async communication.

use std::fmt;

use crate::types::DeliveryId;
use crate::webhooks::TriggerEvent;

/// A classified delivery waiting for its repository's worker.
#[derive(Debug, Clone)]
pub struct Job {
    /// GitHub's `X-GitHub-Delivery` ID, when the request carried one.
    pub delivery: Option<DeliveryId>,
    pub event: TriggerEvent,
}

impl Job {
    pub fn new(delivery: Option<DeliveryId>, event: TriggerEvent) -> Self {
        Job { delivery, event }
    }

    /// The delivery ID for logging, or `-` when absent.
    pub fn delivery_label(&self) -> DeliveryLabel<'_> {
        DeliveryLabel(self.delivery.as_ref())
    }
}

/// Displays an optional delivery ID.
pub struct DeliveryLabel<'a>(Option<&'a DeliveryId>);

impl fmt::Display for DeliveryLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("-"),
        }
    }
}

/// Messages that can be sent to a per-repo worker.
///
/// Workers receive these via a bounded `tokio::sync::mpsc` channel and handle
/// them one at a time, in arrival order.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a delivery through the pipeline.
    Job(Job),

    /// Finish the current job, if any, and exit.
    Shutdown,
}
