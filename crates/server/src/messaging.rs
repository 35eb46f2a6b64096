//! In-process lifecycle event transport.
//!
//! Publishing never blocks the caller. Events are drained by an
//! [`EventDispatcher`] running on its own task, which hands each event to an
//! [`EventHandler`] with bounded concurrency and redelivers failed events a
//! limited number of times. Delivery is at-least-once; handlers must tolerate
//! duplicates.

use crate::consumers::ConsumerResult;
use crate::metrics;
use async_trait::async_trait;
use ember_core::LifecycleEvent;
use ember_core::config::MessagingConfig;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event channel closed")]
    Closed,
}

/// One-way, fire-and-forget event sink.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError>;
}

/// Receiving half of [`channel`].
pub type EventReceiver = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Publisher backed by an unbounded tokio channel.
#[derive(Clone, Debug)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: LifecycleEvent) -> Result<(), PublishError> {
        self.tx.send(event).map_err(|_| PublishError::Closed)
    }
}

/// Create a connected publisher and receiver.
pub fn channel() -> (ChannelPublisher, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPublisher { tx }, rx)
}

/// Consumer side of the transport.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivery. An error asks for redelivery.
    async fn handle(&self, event: &LifecycleEvent) -> ConsumerResult<()>;
}

/// Drains an [`EventReceiver`] into an [`EventHandler`].
pub struct EventDispatcher {
    handler: Arc<dyn EventHandler>,
    config: MessagingConfig,
}

impl EventDispatcher {
    pub fn new(handler: Arc<dyn EventHandler>, config: MessagingConfig) -> Self {
        Self { handler, config }
    }

    /// Run the dispatcher on a background task.
    pub fn spawn(self, rx: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Dispatch events until every publisher is dropped, then wait for
    /// in-flight deliveries to finish.
    pub async fn run(self, mut rx: EventReceiver) {
        let max_in_flight = self.config.max_in_flight.max(1);
        let permits = Arc::new(Semaphore::new(max_in_flight));

        while let Some(event) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let handler = self.handler.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                deliver(handler.as_ref(), &event, &config).await;
                drop(permit);
            });
        }

        let all = u32::try_from(max_in_flight).unwrap_or(u32::MAX);
        if permits.acquire_many(all).await.is_err() {
            tracing::warn!("Dispatcher semaphore closed before draining");
        }
        tracing::debug!("Event dispatcher stopped");
    }
}

/// Deliver one event, redelivering with linear backoff. Returns whether the
/// handler eventually succeeded.
pub async fn deliver(
    handler: &dyn EventHandler,
    event: &LifecycleEvent,
    config: &MessagingConfig,
) -> bool {
    let max_attempts = config.max_delivery_attempts.max(1);
    let kind = event.kind();
    let instance_id = event.instance_id();

    for attempt in 1..=max_attempts {
        let start = Instant::now();
        let result = handler.handle(event).await;
        metrics::HANDLER_DURATION
            .with_label_values(&[kind])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!(
                    event = kind,
                    instance_id = %instance_id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Lifecycle event handler failed"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(config.redelivery_backoff() * attempt).await;
                }
            }
        }
    }

    tracing::error!(
        event = kind,
        instance_id = %instance_id,
        "Dropping lifecycle event after exhausting redelivery"
    );
    metrics::HANDLER_FAILURES.with_label_values(&[kind]).inc();
    false
}
