use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::time::Duration;
use stocktake_catalog::{Filter, RecordSource};
use tracing::instrument;

/// What a run reconciles, fixed before any page is fetched.
///
/// `expected_count` is the single source of truth for when a run is complete.
/// It is never recomputed: records added to or removed from the catalog while
/// a run is in progress are not observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationQuery {
    pub filter: Filter,
    pub page_size: u64,
    pub expected_count: u64,
}

impl ReconciliationQuery {
    /// Count the records matching `filter`.
    ///
    /// A failure here is a [`SourceCount`](ErrorKind::SourceCount) error: the
    /// run never begins.
    #[instrument(skip(catalog, filter, timeout), fields(catalog = catalog.name()))]
    pub async fn prepare(
        catalog: &dyn RecordSource,
        filter: Filter,
        page_size: u64,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        if page_size == 0 {
            exn::bail!(ErrorKind::Config("page size must be at least 1".to_string()));
        }
        let count = catalog.count(&filter);
        let counted = match timeout {
            Some(limit) => tokio::time::timeout(limit, count).await.or_raise(|| ErrorKind::SourceCount)?,
            None => count.await,
        };
        let expected_count = counted.or_raise(|| ErrorKind::SourceCount)?;
        tracing::debug!(expected_count, "Counted matching records");
        Ok(Self {
            filter,
            page_size,
            expected_count,
        })
    }

    /// Number of pages needed to cover every expected record.
    pub fn pages(&self) -> u64 {
        self.expected_count.div_ceil(self.page_size)
    }
}
