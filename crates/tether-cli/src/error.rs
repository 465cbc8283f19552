//! Error types for CLI operations

use std::fmt;

use tether_client::{ErrorKind, TetherError};
use thiserror::Error;

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Connection manager or transport errors
    #[error(transparent)]
    Tether(#[from] TetherError),

    /// Invalid command arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// No server URI in flags, environment or config file
    #[error("No server URI given; pass --uri or set connection.uri")]
    MissingUri,

    /// The tool ran but reported a failure
    #[error("Tool '{0}' reported an error")]
    ToolReportedError(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file or environment error
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging could not be initialized
    #[error("Logging error: {0}")]
    Logging(String),
}

impl CliError {
    /// User-facing hints for resolving the error
    pub fn suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Tether(TetherError::RetryBudgetExhausted { .. }) => vec![
                "The server failed too many times in a row",
                "Wait for periodic recovery or fix the server and run again",
            ],
            Self::Tether(e) => match e.kind() {
                ErrorKind::Transport => vec![
                    "Check if the server is running",
                    "Verify the connection URI",
                    "Use --transport to specify transport explicitly",
                ],
                ErrorKind::Timeout => vec![
                    "Raise manager.connect_timeout or manager.request_timeout",
                    "Check server responsiveness",
                ],
                ErrorKind::Configuration => vec![
                    "Check the URI scheme and --transport value",
                    "Check --plugin-config and the [connection] table",
                ],
                ErrorKind::Tool => vec!["Run 'tether list --kind tool' to see available tools"],
            },
            Self::MissingUri => vec!["Pass --uri or add a [connection] table to the config file"],
            Self::InvalidArguments(_) => vec![
                "Check argument format (must be a valid JSON object)",
                "Use --help to see expected format",
            ],
            _ => vec![],
        }
    }

    /// Error category for display
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Tether(e) => match e.kind() {
                ErrorKind::Transport | ErrorKind::Timeout => ErrorCategory::Connection,
                ErrorKind::Tool => ErrorCategory::Server,
                ErrorKind::Configuration => ErrorCategory::Config,
            },
            Self::ToolReportedError(_) => ErrorCategory::Server,
            Self::InvalidArguments(_) | Self::MissingUri => ErrorCategory::User,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::Config(_) | Self::Logging(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::System,
        }
    }
}

/// Error categories for colored output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    User,
    Server,
    Parsing,
    System,
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "Connection"),
            Self::User => write!(f, "User Input"),
            Self::Server => write!(f, "Server"),
            Self::Parsing => write!(f, "Parsing"),
            Self::System => write!(f, "System"),
            Self::Config => write!(f, "Configuration"),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
