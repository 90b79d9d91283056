//! Reconciliation Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors from the catalog and the
//! object store are kept as children of these kinds.

use derive_more::{Display, Error};

/// A reconciliation error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The number of matching records could not be determined; the run never
    /// started.
    #[display("could not count catalog records")]
    SourceCount,
    /// A page could not be (fully) read from the catalog.
    #[display("could not fetch catalog page {_0}")]
    SourceFetch(#[error(not(source))] u64),
    /// A single record has no usable identifier.
    #[display("could not decode catalog record: {_0}")]
    RecordDecode(#[error(not(source))] String),
    /// Existence of an object could not be determined. A missing object is
    /// not an error.
    #[display("could not check object {_0:?}")]
    StoreCheck(#[error(not(source))] String),
    /// The report sink refused a write.
    #[display("could not write report")]
    Write,
    /// The caller cancelled the run.
    #[display("reconciliation cancelled")]
    Cancelled,
    #[display("invalid run configuration: {_0}")]
    Config(#[error(not(source))] String),
}

impl ErrorKind {
    /// Errors that end the run no matter how strict it is.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Self::SourceCount | Self::Write | Self::Cancelled | Self::Config(_))
    }
}
