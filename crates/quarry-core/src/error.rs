//! Error types for Quarry operations.
//!
//! The taxonomy mirrors the layers of the system:
//!
//! - [`Error::InvalidArgument`]: malformed construction input, detected at the call
//!   that introduced it.
//! - [`Error::IllegalState`]: an operation attempted outside its state-machine state.
//! - [`Error::UnsupportedQueryConstruct`]: the query visitor met a construct it cannot
//!   translate. No partial query text is ever produced alongside this error.
//! - [`Error::Store`]: the underlying store (connection, begin, commit, rollback)
//!   failed.

use std::fmt;

/// The primary error type for all Quarry operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed construction inputs (empty identifiers, invalid expressions)
    InvalidArgument(ArgumentError),
    /// Operation attempted outside its valid state
    IllegalState(StateError),
    /// Query construct the target query language cannot express
    UnsupportedQueryConstruct(UnsupportedError),
    /// Failure at the store boundary
    Store(StoreError),
    /// Connection provider / pool errors
    Pool(PoolError),
    /// Row value conversion errors
    Type(TypeError),
    /// Operation was cancelled via asupersync
    Cancelled,
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct ArgumentError {
    /// Name of the offending argument
    pub argument: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct StateError {
    /// The operation that was rejected
    pub operation: &'static str,
    /// Human-readable name of the state the object was in
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct UnsupportedError {
    /// The clause or expression kind that could not be translated
    pub construct: String,
    pub message: String,
}

#[derive(Debug)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Failed to establish or reach the connection
    Connect,
    /// BEGIN failed
    Begin,
    /// COMMIT failed
    Commit,
    /// ROLLBACK failed
    Rollback,
    /// Query or statement execution failed
    Query,
    /// Deadlock or serialization failure (retry may succeed)
    Conflict,
}

impl StoreErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            StoreErrorKind::Connect => "connect",
            StoreErrorKind::Begin => "begin",
            StoreErrorKind::Commit => "commit",
            StoreErrorKind::Rollback => "rollback",
            StoreErrorKind::Query => "query",
            StoreErrorKind::Conflict => "conflict",
        }
    }
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// Pool exhausted (no available connections)
    Exhausted,
    /// Pool is closed
    Closed,
    /// Connection failed validation on checkout
    Validation,
}

#[derive(Debug, Clone)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Build an [`Error::InvalidArgument`].
    pub fn invalid_argument(argument: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidArgument(ArgumentError {
            argument,
            message: message.into(),
        })
    }

    /// Build an [`Error::IllegalState`].
    pub fn illegal_state(operation: &'static str, state: impl fmt::Display) -> Self {
        Error::IllegalState(StateError {
            operation,
            state: state.to_string(),
        })
    }

    /// Build an [`Error::UnsupportedQueryConstruct`].
    pub fn unsupported(construct: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UnsupportedQueryConstruct(UnsupportedError {
            construct: construct.into(),
            message: message.into(),
        })
    }

    /// Build an [`Error::Store`] without an underlying source.
    pub fn store(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Error::Store(StoreError {
            kind,
            message: message.into(),
            sql: None,
            source: None,
        })
    }

    /// Is this a failure reported by the underlying store?
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    /// Is this a state-machine violation?
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Error::IllegalState(_))
    }

    /// Is this a malformed-argument error?
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Is this an untranslatable query construct?
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::UnsupportedQueryConstruct(_))
    }

    /// Is this a retryable error (conflicts, pool exhaustion)?
    ///
    /// Retrying is the caller's policy; nothing in Quarry retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(s) => matches!(s.kind, StoreErrorKind::Conflict),
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Exhausted),
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Store(s) => s.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(e) => {
                write!(f, "Invalid argument '{}': {}", e.argument, e.message)
            }
            Error::IllegalState(e) => {
                write!(f, "Illegal state: cannot {} while {}", e.operation, e.state)
            }
            Error::UnsupportedQueryConstruct(e) => {
                write!(f, "Unsupported query construct {}: {}", e.construct, e.message)
            }
            Error::Store(e) => {
                write!(f, "Store failure ({}): {}", e.kind.as_str(), e.message)
            }
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Pool(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for Quarry operations.
pub type Result<T> = std::result::Result<T, Error>;
