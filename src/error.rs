//! Error types for the driver
//!
//! Every fallible operation in the crate returns [`Result<T>`]. The variants
//! are grouped the way callers need to react to them: connection-class
//! failures (retry or reconnect), data errors reported by the server, batch
//! partial failures (which carry the per-row outcome vector), conversion
//! errors raised by the coercion layer, and local validation failures for
//! bind and cursor operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::batch::Outcome;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the driver
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Invalid packet type received
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),

    /// Invalid message type received
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Packet too short to contain valid header
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    /// General protocol error (desynchronised exchange, unexpected reply)
    #[error("protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Buffer Errors
    // =========================================================================
    /// Buffer underflow - not enough data to read
    #[error("buffer underflow: need {needed} bytes but only {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    /// Buffer overflow - not enough space to write
    #[error("buffer overflow: need {needed} bytes but only {available} available")]
    BufferOverflow { needed: usize, available: usize },

    /// Invalid length indicator
    #[error("invalid length indicator: {0}")]
    InvalidLengthIndicator(u8),

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// The connection was closed by the application
    #[error("No operations allowed after connection closed.")]
    ConnectionClosed,

    /// The link to the server broke while an operation was in flight
    #[error("communications link failure: {0}")]
    ConnectionLost(String),

    /// The statement was closed by the application
    #[error("No operations allowed after statement closed.")]
    StatementClosed,

    /// The result set was closed by the application
    #[error("Operation not allowed after ResultSet closed")]
    ResultSetClosed,

    /// The statement ran longer than its query timeout and was interrupted
    #[error("statement cancelled due to timeout after {0:?}")]
    QueryTimeout(Duration),

    /// The statement was interrupted through a cancel handle
    #[error("statement cancelled by user request")]
    Cancelled,

    /// Invalid connection property string
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Error reported by the server
    #[error("ERROR {code} ({sql_state}): {message}")]
    Server {
        code: u32,
        sql_state: String,
        message: String,
    },

    /// A batch failed; `outcomes` holds every row attempted up to the failure
    #[error("batch update failed after {} attempted rows: {source}", outcomes.len())]
    BatchUpdate {
        outcomes: Vec<Outcome>,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Bind Errors
    // =========================================================================
    /// Positional and named binds were used in the same execution
    #[error("Ordinal binding and Named binding cannot be combined!")]
    BindMixing,

    /// A bind index outside `1..=count`
    #[error("Parameter index out of range ({index} > number of parameters, which is {count}).")]
    ParameterIndexOutOfRange { index: usize, count: usize },

    /// Registered parameters disagree with the placeholders of the call
    #[error("The number of parameter names does not match the number of registered parameters: statement declares {expected}, {actual} registered")]
    ParameterCountMismatch { expected: usize, actual: usize },

    /// An IN parameter was never set before execute
    #[error("Missing IN or OUT parameter at index:: {0}")]
    MissingParameter(usize),

    /// A named bind that does not occur in the statement
    #[error("no parameter named ':{0}' in statement")]
    UnknownParameterName(String),

    /// Reading an OUT value from a slot that was not registered
    #[error("parameter {0} was not registered as an OUT parameter")]
    OutParameterNotRegistered(usize),

    // =========================================================================
    // Cursor Errors
    // =========================================================================
    /// Positioning method other than `next()` on a forward-only cursor
    #[error("invalid operation on forward-only cursor: {0}()")]
    ForwardOnly(&'static str),

    /// Invalid cursor state (not on a row, wrong kind, ...)
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The current row vanished server-side before a refresh
    #[error("refreshRow() called on row that has been deleted or had primary key changed.")]
    RowDeleted,

    /// The result set cannot be refreshed or updated
    #[error("result set is not updatable: {0}")]
    NotUpdatable(String),

    // =========================================================================
    // Data Type Errors
    // =========================================================================
    /// A value cannot be coerced to the requested type
    #[error("cannot convert {value} to {target}")]
    Conversion { target: &'static str, value: String },

    /// NULL value encountered where not expected
    #[error("unexpected NULL value")]
    UnexpectedNull,

    // =========================================================================
    // Usage Errors
    // =========================================================================
    /// Invalid argument passed to an API call
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Rejected before reaching the server because of a syntax-level rule
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Feature not supported
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`], used to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection (or a resource on it) is unusable
    Connection {
        /// The operation may succeed when retried
        transient: bool,
    },
    /// A batch failed part way; the outcome vector is attached
    BatchPartial,
    /// A value could not be coerced
    Conversion,
    /// Invalid cursor positioning or state
    Position,
    /// Invalid parameter binding
    Bind,
    /// The server rejected the statement (syntax, constraint, ...)
    Data,
    /// Misuse of the API detected locally
    Usage,
    /// Wire or internal failure
    Internal,
}

impl Error {
    /// Create a new server error
    pub fn server(code: u32, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            sql_state: sql_state.into(),
            message: message.into(),
        }
    }

    /// Create a conversion error for a value shown with its debug shape
    pub fn conversion(target: &'static str, value: impl std::fmt::Display) -> Self {
        Error::Conversion {
            target,
            value: value.to_string(),
        }
    }

    /// SQLSTATE of a server error, if any
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server { sql_state, .. } => Some(sql_state),
            Error::BatchUpdate { source, .. } => source.sql_state(),
            _ => None,
        }
    }

    /// Vendor error code of a server error, if any
    pub fn code(&self) -> Option<u32> {
        match self {
            Error::Server { code, .. } => Some(*code),
            Error::BatchUpdate { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Partial outcomes carried by a batch failure
    pub fn batch_outcomes(&self) -> Option<&[Outcome]> {
        match self {
            Error::BatchUpdate { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }

    /// Classify the error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::ConnectionClosed
            | Error::StatementClosed
            | Error::ResultSetClosed
            | Error::ConnectionLost(_)
            | Error::Io(_) => ErrorClass::Connection { transient: false },
            Error::QueryTimeout(_) | Error::Cancelled => ErrorClass::Connection { transient: true },
            Error::Server { sql_state, .. } if sql_state.starts_with("08") => {
                ErrorClass::Connection { transient: false }
            }
            Error::Server { sql_state, .. } if sql_state == "40001" => {
                ErrorClass::Connection { transient: true }
            }
            Error::Server { .. } => ErrorClass::Data,
            Error::BatchUpdate { .. } => ErrorClass::BatchPartial,
            Error::Conversion { .. } | Error::UnexpectedNull => ErrorClass::Conversion,
            Error::ForwardOnly(_)
            | Error::InvalidCursor(_)
            | Error::RowDeleted
            | Error::NotUpdatable(_) => ErrorClass::Position,
            Error::BindMixing
            | Error::ParameterIndexOutOfRange { .. }
            | Error::ParameterCountMismatch { .. }
            | Error::MissingParameter(_)
            | Error::UnknownParameterName(_)
            | Error::OutParameterNotRegistered(_) => ErrorClass::Bind,
            Error::InvalidArgument(_)
            | Error::Syntax(_)
            | Error::FeatureNotSupported(_)
            | Error::InvalidConnectionString(_) => ErrorClass::Usage,
            _ => ErrorClass::Internal,
        }
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(self.class(), ErrorClass::Connection { .. })
    }

    /// Check if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.class(), ErrorClass::Connection { transient: true })
    }

    /// Check if the connection must be discarded
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConnectionLost(_) | Error::Io(_))
            || matches!(self, Error::Server { sql_state, .. } if sql_state.starts_with("08"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = Error::server(1062, "23000", "Duplicate entry '1' for key 'PRIMARY'");
        assert_eq!(
            err.to_string(),
            "ERROR 1062 (23000): Duplicate entry '1' for key 'PRIMARY'"
        );
        assert_eq!(err.class(), ErrorClass::Data);
        assert_eq!(err.code(), Some(1062));
    }

    #[test]
    fn test_closed_resources_are_non_transient() {
        for err in [Error::ConnectionClosed, Error::StatementClosed, Error::ResultSetClosed] {
            assert!(err.is_connection_error());
            assert!(!err.is_transient());
        }
        assert!(Error::StatementClosed.to_string().contains("statement"));
        assert!(Error::ConnectionClosed.to_string().contains("connection"));
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(Error::QueryTimeout(Duration::from_secs(1)).is_transient());
        assert!(Error::Cancelled.is_transient());
        assert!(!Error::ConnectionLost("reset".into()).is_transient());
    }

    #[test]
    fn test_batch_error_carries_outcomes() {
        let err = Error::BatchUpdate {
            outcomes: vec![Outcome::UpdateCount(1), Outcome::Failed],
            source: Box::new(Error::server(1366, "HY000", "Incorrect integer value")),
        };
        assert_eq!(err.batch_outcomes().map(|o| o.len()), Some(2));
        assert_eq!(err.class(), ErrorClass::BatchPartial);
        assert_eq!(err.sql_state(), Some("HY000"));
    }

    #[test]
    fn test_sqlstate_08_is_connection_class() {
        let err = Error::server(2013, "08S01", "Lost connection to server during query");
        assert!(err.is_connection_error());
        assert!(err.is_fatal());
    }

    #[test]
    fn test_refresh_deleted_message() {
        assert_eq!(
            Error::RowDeleted.to_string(),
            "refreshRow() called on row that has been deleted or had primary key changed."
        );
    }
}
