//! Transfer event emitter port.
//!
//! This port abstracts event emission, allowing the queue to push events
//! without coupling to transport details (IPC bridge, SSE, etc.). In-process
//! consumers can also subscribe to the queue's broadcast channel directly.

use crate::transfer::TransferEvent;

/// Port for emitting transfer events.
///
/// Implementations handle the actual event delivery. `emit` is called from
/// inside the scheduler's critical section and must not block.
pub trait TransferEventEmitterPort: Send + Sync {
    /// Emit a transfer event.
    fn emit(&self, event: TransferEvent);

    /// Clone this emitter into a boxed trait object.
    fn clone_box(&self) -> Box<dyn TransferEventEmitterPort>;
}

/// A no-op emitter for tests and contexts without a push-style consumer.
#[derive(Debug, Clone, Default)]
pub struct NoopTransferEmitter;

impl NoopTransferEmitter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransferEventEmitterPort for NoopTransferEmitter {
    fn emit(&self, _event: TransferEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn TransferEventEmitterPort> {
        Box::new(self.clone())
    }
}
