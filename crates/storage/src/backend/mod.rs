//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for the object existence checks the reconciliation pipeline
//! issues (against S3-compatible services, or an in-memory store in tests).

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use async_trait::async_trait;

/// Unified interface for object stores.
///
/// All operations are asynchronous to efficiently handle network operations
/// and concurrent access. Implementations must tolerate concurrent calls from
/// many tasks at once: the verification pool shares a single handle between
/// all of its workers.
///
/// # Key Handling
/// Keys are object identifiers relative to the store root (or configured
/// prefix) and must be validated using [`validate_key`](crate::validate_key)
/// before use. Implementations should enforce this validation.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only, so it doesn't
    /// affect the functionality of this crate if it isn't unique.
    fn name(&self) -> &str;

    /// Check if an object exists.
    ///
    /// A missing object is a normal, negative answer: implementations
    /// **must** return `Ok(false)` for it and reserve `Err` for failures
    /// (transport, credentials, invalid keys) where the answer is unknown.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use stocktake_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// if !backend.exists("5f2b7c1e9a").await? {
    ///     println!("Object is missing!");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn exists(&self, key: &str) -> Result<bool>;
}
