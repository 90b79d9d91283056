//! Object store abstraction for stocktake.
//!
//! The reconciliation pipeline only ever asks one question of a blob store:
//! "does an object with this key exist?" This crate defines that question as
//! the [`StorageBackend`] trait and provides an S3-compatible implementation
//! (feature `s3`) and an in-memory implementation for tests (feature `mock`).

pub mod backend;
pub mod error;
mod key;

pub use crate::backend::StorageBackend;
pub use crate::key::validate as validate_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
