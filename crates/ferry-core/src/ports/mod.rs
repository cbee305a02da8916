//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the queue expects from its collaborators.
//! They contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No HTTP client, swarm or filesystem types in any signature
//! - Synchronous ports (`TransferBackend`, notifier, emitter) must not block:
//!   the scheduler calls them while holding its write lock
//! - Persistence is async and runs outside the lock

pub mod backend;
pub mod event_emitter;
pub mod notifier;
pub mod store;

pub use backend::{
    BackendHandle, BackendReport, BackendSignal, Lease, ProgressReporter, ProgressUpdate,
    TransferBackend,
};
pub use event_emitter::{NoopTransferEmitter, TransferEventEmitterPort};
pub use notifier::{CompletionNotifierPort, NoopNotifier};
pub use store::{MemoryTransferStore, NoopTransferStore, StoreError, TransferStorePort};
