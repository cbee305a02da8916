//! `ferry` command-line downloader.
//!
//! Wires the transfer queue to an HTTP backend and an optional JSON state
//! file, and renders progress on the terminal.
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the binary only
use anyhow as _;
use dotenvy as _;
use tracing_subscriber as _;

pub mod commands;
pub mod error;
pub mod handlers;
pub mod http_backend;
pub mod parser;
pub mod presentation;
pub mod store;

// Re-export primary types for convenient access
pub use commands::{Commands, GetArgs};
pub use error::CliError;
pub use handlers::get::GetReport;
pub use http_backend::HttpBackend;
pub use parser::Cli;
pub use store::JsonFileStore;
