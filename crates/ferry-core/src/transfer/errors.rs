//! Transfer error types.
//!
//! These errors are serializable and do not depend on external error types
//! like `std::io::Error` or HTTP client errors. Backends convert their own
//! failures into one of these variants before reporting.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TransferKind;

/// Retry classification of a backend error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Likely to succeed on retry (network-level trouble).
    Transient,
    /// Retrying will not help.
    Permanent,
}

/// Error reported by a transfer backend.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferError {
    /// Network/HTTP error during transfer.
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// Connect or read timed out.
    #[error("Timed out: {message}")]
    Timeout { message: String },

    /// Peer refused or reset the connection.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// The remote resource does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// The locator could not be understood by the backend.
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// The destination could not be created or written.
    #[error("Destination error ({kind}): {message}")]
    Destination {
        /// The kind of I/O error (e.g., "`PermissionDenied`").
        kind: String,
        message: String,
    },

    /// The backend hit an unrecoverable protocol violation.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// No backend is registered for the transfer's kind.
    #[error("No backend registered for {kind} transfers")]
    UnsupportedKind { kind: TransferKind },

    /// General/uncategorized error.
    #[error("{message}")]
    Other { message: String },
}

impl TransferError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a network error carrying an HTTP status code.
    pub fn http_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Network {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid_locator(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Create a destination error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::Destination {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn unsupported_kind(kind: TransferKind) -> Self {
        Self::UnsupportedKind { kind }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Classify this error for the retry policy.
    ///
    /// HTTP statuses follow the usual split: 5xx, 408 and 429 are transient,
    /// every other status (the "resource does not exist" family) is permanent.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Network {
                status_code: Some(code),
                ..
            } => match *code {
                408 | 429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            Self::Network {
                status_code: None, ..
            }
            | Self::Timeout { .. }
            | Self::Connection { .. } => ErrorClass::Transient,
            Self::NotFound { .. }
            | Self::InvalidLocator { .. }
            | Self::Destination { .. }
            | Self::Protocol { .. }
            | Self::UnsupportedKind { .. }
            | Self::Other { .. } => ErrorClass::Permanent,
        }
    }

    /// Check if this error is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Convert to a user-friendly message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network {
                message,
                status_code: Some(code),
            } => format!("Network error (HTTP {code}): {message}"),
            Self::Network { message, .. } => format!("Network error: {message}"),
            Self::Timeout { .. } => "The connection timed out.".to_string(),
            Self::Connection { message } => format!("Could not connect: {message}"),
            Self::NotFound { message } => format!("Not found: {message}"),
            Self::InvalidLocator { locator, .. } => {
                format!("'{locator}' is not a valid download address.")
            }
            Self::Destination { message, .. } => {
                format!("Could not write to the destination: {message}")
            }
            Self::Protocol { message } => format!("Transfer protocol error: {message}"),
            Self::UnsupportedKind { kind } => {
                format!("{kind} transfers are not supported in this build.")
            }
            Self::Other { message } => message.clone(),
        }
    }
}
