//! Transfer domain types, events and errors.
//!
//! This module contains pure data types for the transfer queue. No I/O,
//! networking, or runtime dependencies allowed.
//!
//! # Structure
//!
//! - `types` - Identifiers and enums (`TransferId`, `TransferKind`, `Priority`, `TransferStatus`)
//! - `record` - The `TransferRecord` entity
//! - `events` - Broadcast events and snapshot DTOs
//! - `errors` - Backend error taxonomy and retry classification

pub mod errors;
pub mod events;
pub mod record;
pub mod types;

pub use errors::{ErrorClass, TransferError};
pub use events::{DrainSummary, QueueSnapshot, QueueStats, TransferEvent};
pub use record::TransferRecord;
pub use types::{ParsePriorityError, Priority, TransferId, TransferKind, TransferStatus};
