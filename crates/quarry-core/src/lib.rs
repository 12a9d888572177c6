//! Core types and traits for Quarry.
//!
//! This crate provides the foundations shared by the query and session layers:
//!
//! - `Error` taxonomy and `Result` alias
//! - `Value` and `Row` for parameters and results
//! - `Dialect` for the target query language
//! - `Connection` and `ConnectionProvider` traits for the store boundary
//! - `Outcome` and `Cx` re-exports from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod connection;
pub mod dialect;
pub mod error;
pub mod row;
pub mod value;

pub use connection::{Connection, ConnectionProvider, IsolationLevel};
pub use dialect::Dialect;
pub use error::{
    ArgumentError, Error, PoolError, PoolErrorKind, Result, StateError, StoreError,
    StoreErrorKind, TypeError, UnsupportedError,
};
pub use row::{ColumnInfo, Row};
pub use value::Value;
