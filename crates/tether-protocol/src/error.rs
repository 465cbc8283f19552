//! Tagged error type shared by plugins, the connection manager and its callers.
//!
//! Every failure carries an [`ErrorKind`] so callers can branch on category
//! without inspecting messages. Message inspection only happens once, at the
//! boundary where a plugin receives an untyped failure (see
//! [`crate::categorize`]).

use std::time::Duration;
use thiserror::Error;

use crate::categorize::{categorize_message, categorize_rpc_code};

/// A specialized `Result` type for tether operations.
pub type TetherResult<T> = std::result::Result<T, TetherError>;

/// Error categories that drive connection state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused, name resolution, network-level failure.
    Transport,
    /// An operation exceeded its time bound. Treated as a transport failure
    /// for state-transition purposes.
    Timeout,
    /// The remote end rejected a tool, its arguments, or the method.
    Tool,
    /// Malformed URI, missing plugin, bad plugin config. Never retried.
    Configuration,
}

impl ErrorKind {
    /// Returns `true` for failures that mean the connection itself is unusable.
    #[must_use]
    pub const fn is_connection_shaped(self) -> bool {
        matches!(self, Self::Transport | Self::Timeout)
    }

    /// Returns `true` if a caller may retry the operation that produced this error.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        self.is_connection_shaped()
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Tool => write!(f, "tool"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Represents every failure surfaced by the connection manager and its plugins.
///
/// The type is `Clone` so a single in-flight connection attempt can hand the
/// same outcome to every caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TetherError {
    /// The underlying channel failed or could not be opened.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation did not complete within its bound.
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The remote end reported an invalid tool, invalid arguments or an
    /// unknown method.
    #[error("Tool error: {message}")]
    Tool {
        /// JSON-RPC error code, when the remote end supplied one
        code: Option<i64>,
        /// Remote-supplied message
        message: String,
    },

    /// The caller supplied something that can never work as given.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Too many consecutive connection failures; wait for periodic recovery
    /// or force a reconnect.
    #[error(
        "Connection attempts exhausted after {failures} consecutive failures \
         (limit {limit}); waiting for periodic recovery or a forced reconnect"
    )]
    RetryBudgetExhausted {
        /// Current consecutive failure count
        failures: u32,
        /// Configured limit
        limit: u32,
    },

    /// The connection attempt was replaced by a newer one before it finished.
    #[error("Connection attempt superseded by a newer attempt")]
    Superseded,

    /// No connection exists and none can be established implicitly.
    #[error("Not connected")]
    NotConnected,
}

impl TetherError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a tool error without a protocol code
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool {
            code: None,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Build an error from an untyped failure message.
    ///
    /// Applies the tool-shaped / connection-shaped policy; ambiguous messages
    /// become tool errors.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match categorize_message(&message) {
            ErrorKind::Transport | ErrorKind::Timeout => Self::Transport(message),
            ErrorKind::Configuration => Self::Configuration(message),
            ErrorKind::Tool => Self::Tool {
                code: None,
                message,
            },
        }
    }

    /// Build an error from a JSON-RPC error object returned by the remote end.
    pub fn from_rpc_error(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = categorize_rpc_code(code).unwrap_or_else(|| categorize_message(&message));
        if kind.is_connection_shaped() {
            Self::Transport(format!("[{code}] {message}"))
        } else {
            Self::Tool {
                code: Some(code),
                message,
            }
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::RetryBudgetExhausted { .. } | Self::Superseded => {
                ErrorKind::Transport
            }
            Self::NotConnected => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Shorthand for `self.kind().is_connection_shaped()`.
    #[must_use]
    pub const fn is_connection_shaped(&self) -> bool {
        self.kind().is_connection_shaped()
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        // A payload we cannot decode is a protocol problem, not a dead link.
        Self::Tool {
            code: Some(crate::jsonrpc::PARSE_ERROR),
            message: format!("Malformed payload: {err}"),
        }
    }
}

impl From<std::io::Error> for TetherError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(format!("IO error: {err}"))
    }
}
