//! Core domain types and ports for the ferry transfer queue.
//!
//! This crate has no runtime I/O. It defines what a transfer is, how it
//! fails, what the queue broadcasts, and the ports the queue talks to.
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod ports;
pub mod transfer;

pub use config::{ConfigError, QueueConfig, RetryBackoff, validate_config};
pub use ports::{
    BackendHandle, BackendReport, BackendSignal, CompletionNotifierPort, Lease,
    MemoryTransferStore, NoopNotifier, NoopTransferEmitter, NoopTransferStore, ProgressReporter,
    ProgressUpdate, StoreError, TransferBackend, TransferEventEmitterPort, TransferStorePort,
};
pub use transfer::{
    DrainSummary, ErrorClass, ParsePriorityError, Priority, QueueSnapshot, QueueStats,
    TransferError, TransferEvent, TransferId, TransferKind, TransferRecord, TransferStatus,
};
