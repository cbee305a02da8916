//! Status broadcasting.
//!
//! Every event the queue produces goes to an in-process
//! `tokio::sync::broadcast` channel and to the optional push-style
//! [`TransferEventEmitterPort`]. All subscribers see the same events; there
//! are no per-subscriber cursors.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ferry_core::{TransferEvent, TransferEventEmitterPort};

/// Fan-out for transfer events.
pub struct StatusBroadcaster {
    sender: broadcast::Sender<TransferEvent>,
    emitter: Arc<dyn TransferEventEmitterPort>,
}

impl StatusBroadcaster {
    pub fn new(capacity: usize, emitter: Arc<dyn TransferEventEmitterPort>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, emitter }
    }

    /// Publish an event to every subscriber.
    pub fn publish(&self, event: TransferEvent) {
        // No receivers is fine: the emitter port may be the only consumer.
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event.clone());
        }
        self.emitter.emit(event);
    }

    /// Subscribe to transfer events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    /// Get number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Deliver events to `callback` on a background task until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(TransferEvent) + Send + Sync + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let token = CancellationToken::new();
        let stop = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => callback(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "ferry.queue", skipped, "Event subscriber lagging, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(target: "ferry.queue", "Event subscription ended");
        });

        Subscription { token }
    }
}

/// Handle for a callback subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    token: CancellationToken,
}

impl Subscription {
    /// Stop delivering events.
    pub fn unsubscribe(self) {
        self.token.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
