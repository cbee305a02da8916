//! Completion notifier port.
//!
//! Invoked once per transfer on the `→ Completed` transition. Desktop
//! notifications, library registration and similar side effects hang off
//! this port.

use crate::transfer::TransferRecord;

/// Port for reacting to finished transfers.
///
/// Called from inside the scheduler's critical section, so implementations
/// must not block; hand the record off to a channel or task instead.
pub trait CompletionNotifierPort: Send + Sync {
    fn notify(&self, record: &TransferRecord);
}

/// A notifier that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl CompletionNotifierPort for NoopNotifier {
    fn notify(&self, _record: &TransferRecord) {
        // Intentionally do nothing
    }
}
