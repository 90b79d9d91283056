//! Catalog Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A catalog error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    /// Table or column name that cannot be safely used in a query.
    #[display("invalid identifier: {_0:?}")]
    InvalidIdentifier(#[error(not(source))] String),
    /// Filter is not a JSON object of scalar values.
    #[display("invalid filter: {_0}")]
    InvalidFilter(#[error(not(source))] String),
    /// A single record could not be read; other records are unaffected.
    #[display("undecodable record: {_0}")]
    Decode(#[error(not(source))] String),
}
