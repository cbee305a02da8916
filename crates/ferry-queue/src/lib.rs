//! Priority transfer queue and scheduler.
//!
//! - `registry` - pure state machine: records, priority buckets, active set
//! - `retry` - retry budget and backoff
//! - `scheduler` - [`TransferQueue`], the runner that drives backends
//! - `broadcaster` - event fan-out to subscribers and the emitter port

// Re-export core types for convenience
pub use ferry_core::{
    BackendHandle, BackendReport, BackendSignal, CompletionNotifierPort, DrainSummary, Lease,
    Priority, ProgressReporter, ProgressUpdate, QueueConfig, QueueSnapshot, QueueStats,
    RetryBackoff, StoreError, TransferBackend, TransferError, TransferEvent,
    TransferEventEmitterPort, TransferId, TransferKind, TransferRecord, TransferStatus,
    TransferStorePort,
};

// Internal modules (pub(crate) to keep implementation private)
pub(crate) mod buckets;
pub(crate) mod drain;
pub(crate) mod progress;
pub(crate) mod registry;
pub(crate) mod retry;

// Registry is usable on its own as a synchronous model of the queue
pub use registry::{
    AdmissionPass, Admitted, Finish, QueueError, Restored, TransferRegistry, Transition,
};
pub use retry::{RetryDecision, RetryPolicy};

mod broadcaster;
pub use broadcaster::{StatusBroadcaster, Subscription};

mod scheduler;
pub use scheduler::{TransferQueue, TransferQueueDeps, build_transfer_queue};

