//! Error types for the KC868 relay protocol.

use std::io;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while talking to a relay controller.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The socket could not be established, or an established socket failed
    /// and could not be recovered by the single reconnect attempt.
    #[error("Connection error: {reason}")]
    Connection {
        /// Description of the connectivity failure.
        reason: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A reply did not match the grammar expected for the command that was sent.
    #[error("Unexpected reply to '{command}': {reply:?}")]
    Parse {
        /// Command that produced the reply.
        command: String,
        /// Raw reply as received.
        reply: String,
    },

    /// The transport has been shut down and cannot be reused.
    #[error("Transport is closed")]
    Closed,

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A blocking worker task panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl RelayError {
    /// Creates a new `Connection` error.
    ///
    /// # Example
    ///
    /// ```
    /// use kc868_relay::RelayError;
    /// use std::io;
    ///
    /// let err = RelayError::connection(
    ///     "cannot connect socket",
    ///     io::Error::from(io::ErrorKind::ConnectionRefused),
    /// );
    /// assert!(err.is_connection());
    /// ```
    pub fn connection(reason: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            reason: reason.into(),
            source,
        }
    }

    /// Creates a new `Parse` error.
    ///
    /// # Example
    ///
    /// ```
    /// use kc868_relay::RelayError;
    ///
    /// let err = RelayError::parse("RELAY-READ-255,1", "garbage");
    /// ```
    pub fn parse(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::Parse {
            command: command.into(),
            reply: reply.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for connectivity failures.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Returns `true` when a reply could not be parsed.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}
