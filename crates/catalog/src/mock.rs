//! In-memory catalog for testing.

use crate::error::{ErrorKind, Result};
use crate::{Filter, RawRecord, RecordSource, RecordStream};
use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory catalog for testing.
///
/// Records are kept in insertion order, which is also the page order. Entries
/// can be made undecodable, pages can be made to fail, and the count can be
/// made to fail or to lie (to simulate records vanishing mid-run).
///
/// # Examples
///
/// ```
/// use stocktake_catalog::{Filter, MockCatalog, RecordSource};
/// use futures::TryStreamExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = MockCatalog::with_ids(["a", "b", "c"]);
/// assert_eq!(catalog.count(&Filter::default()).await.unwrap(), 3);
/// let page: Vec<_> = catalog.fetch_page(&Filter::default(), 2, 1).try_collect().await.unwrap();
/// assert_eq!(page.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MockCatalog {
    records: Vec<Entry>,
    fail_count: bool,
    count_offset: i64,
    failing_pages: HashSet<u64>,
    stalling_pages: HashSet<u64>,
    pages_fetched: AtomicUsize,
}

enum Entry {
    Record(RawRecord),
    Undecodable(String),
}

impl MockCatalog {
    /// Create a mock catalog from JSON objects.
    ///
    /// Panics if any value is not a JSON object. If test setup is wrong, then
    /// test should not pass.
    pub fn with_records(records: impl IntoIterator<Item = Value>) -> Self {
        let records = records
            .into_iter()
            .map(|value| match value {
                Value::Object(record) => Entry::Record(record),
                // The panic here is DELIBERATE. MockCatalog is intended to be
                // used in tests; panics are expected. There is no error result.
                other => panic!("MockCatalog::with_records: not an object: {other}"),
            })
            .collect();
        Self {
            records,
            fail_count: false,
            count_offset: 0,
            failing_pages: HashSet::new(),
            stalling_pages: HashSet::new(),
            pages_fetched: AtomicUsize::new(0),
        }
    }

    /// Create a mock catalog of records that only have an `id` field.
    pub fn with_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let records = ids.into_iter().map(|id| {
            let mut record = RawRecord::new();
            record.insert("id".to_string(), Value::String(id.into()));
            Value::Object(record)
        });
        Self::with_records(records)
    }

    /// Insert an entry at `position` (clamped to the end) that yields a
    /// [`Decode`](ErrorKind::Decode) error instead of a record. It still
    /// counts, and still occupies a page slot.
    pub fn with_undecodable(mut self, position: usize, reason: impl Into<String>) -> Self {
        let position = position.min(self.records.len());
        self.records.insert(position, Entry::Undecodable(reason.into()));
        self
    }

    /// Make [`count()`](RecordSource::count) fail.
    pub fn with_failing_count(mut self) -> Self {
        self.fail_count = true;
        self
    }

    /// Report `offset` more (or fewer) records than actually match.
    pub fn with_count_offset(mut self, offset: i64) -> Self {
        self.count_offset = offset;
        self
    }

    /// Make fetching page `page` fail before any record is returned.
    pub fn with_failing_page(mut self, page: u64) -> Self {
        self.failing_pages.insert(page);
        self
    }

    /// Make page `page` hang after its last record instead of ending.
    pub fn with_stalling_page(mut self, page: u64) -> Self {
        self.stalling_pages.insert(page);
        self
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Entry> + 'a {
        self.records.iter().filter(move |entry| match entry {
            Entry::Record(record) => filter.matches(record),
            Entry::Undecodable(_) => true,
        })
    }
}

#[async_trait]
impl RecordSource for MockCatalog {
    fn name(&self) -> &str {
        "mock"
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        if self.fail_count {
            exn::bail!(ErrorKind::Database);
        }
        let actual = i64::try_from(self.matching(filter).count()).unwrap_or(i64::MAX);
        Ok(u64::try_from(actual.saturating_add(self.count_offset)).unwrap_or(0))
    }

    fn fetch_page<'a>(&'a self, filter: &'a Filter, limit: u64, page: u64) -> RecordStream<'a> {
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        let fails = self.failing_pages.contains(&page);
        let stalls = self.stalling_pages.contains(&page);
        let skip = usize::try_from(page.saturating_mul(limit)).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Box::pin(stream! {
            if fails {
                yield Err(exn::Exn::from(ErrorKind::Database));
                return;
            }
            for entry in self.matching(filter).skip(skip).take(take) {
                match entry {
                    Entry::Record(record) => yield Ok(record.clone()),
                    Entry::Undecodable(reason) => yield Err(exn::Exn::from(ErrorKind::Decode(reason.clone()))),
                }
            }
            if stalls {
                futures::future::pending::<()>().await;
            }
        })
    }
}
