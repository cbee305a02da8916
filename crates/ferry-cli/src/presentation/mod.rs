//! Terminal output for the CLI.

mod progress;

pub use progress::TransferProgress;
