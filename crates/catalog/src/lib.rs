//! Record catalogs for stocktake.
//!
//! A catalog is the authoritative list of records, each of which names an
//! object that should exist in the blob store. The reconciliation pipeline
//! only needs two things from it: how many records match a [`Filter`], and
//! a way to read those records one page at a time.
//!
//! # Implementations
//! - [`SqliteCatalog`]: a table in a SQLite database, read with `sqlx`.
//! - [`MockCatalog`] (feature `mock`): in-memory records with failure
//!   injection, for tests.

mod db;
pub mod error;
mod filter;
#[cfg(feature = "mock")]
mod mock;
mod row;

pub use crate::db::SqliteCatalog;
pub use crate::filter::Filter;
#[cfg(feature = "mock")]
pub use crate::mock::MockCatalog;
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// A record as read from the catalog, before the pipeline decodes it.
///
/// Every raw record is expected to carry an identifier field; all other
/// fields are opaque payload.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;
pub type RecordStream<'a> = Pin<Box<dyn Stream<Item = Result<RawRecord>> + Send + 'a>>;
pub type CatalogHandle = Arc<dyn RecordSource + Send + Sync>;

/// Unified interface for record catalogs.
///
/// Implementations must tolerate concurrent calls: pages are fetched in
/// parallel with each other by the pipeline.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Name of the configured catalog (used for logging only).
    fn name(&self) -> &str;

    /// Count the records matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// Stream one page of records matching `filter`.
    ///
    /// Page `page` holds at most `limit` records, skipping the first
    /// `page * limit` matches. Records must be returned in a stable order so
    /// that pages never overlap.
    ///
    /// # Errors
    /// Errors are yielded as stream items. An item with
    /// [`ErrorKind::Decode`](crate::error::ErrorKind::Decode) concerns a single
    /// record and the stream carries on after it; any other error ends the
    /// page.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use futures::StreamExt;
    /// # use stocktake_catalog::{Filter, RecordSource, error::Result};
    /// # async fn example(catalog: &dyn RecordSource) -> Result<()> {
    /// let filter = Filter::default();
    /// let mut page = catalog.fetch_page(&filter, 100, 0);
    /// while let Some(record) = page.next().await {
    ///     println!("{:?}", record?.get("id"));
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn fetch_page<'a>(&'a self, filter: &'a Filter, limit: u64, page: u64) -> RecordStream<'a>;
}
