//! CLI-specific error types and exit codes.

use ferry_core::{ConfigError, StoreError};
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Argument parsing error.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// Queue configuration rejected.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The state file could not be read or written.
    #[error("State file error: {0}")]
    State(#[from] StoreError),

    /// The HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    Http(String),
}

impl CliError {
    /// Map error to appropriate exit code.
    ///
    /// Exit codes follow `sysexits.h` where one fits.
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Arguments(_) => 2, // EX_USAGE
            Self::Config(_) => 78,   // EX_CONFIG
            Self::State(_) => 74,    // EX_IOERR
            Self::Http(_) => 71,     // EX_OSERR
        }
    }
}
