//! The page scanner: reads every page of the catalog and turns raw records
//! into keys for the verification pool.

use crate::ReconciliationQuery;
use crate::error::{ErrorKind, Result};
use crate::forward;
use crate::record::{CheckResult, RecordKey};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::time::Duration;
use stocktake_catalog::error::{ErrorKind as CatalogErrorKind, Result as CatalogResult};
use stocktake_catalog::{CatalogHandle, RawRecord, RecordStream};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

pub(crate) struct Scanner {
    pub(crate) catalog: CatalogHandle,
    pub(crate) query: ReconciliationQuery,
    pub(crate) page_concurrency: usize,
    pub(crate) id_field: String,
    pub(crate) include_record: bool,
    pub(crate) call_timeout: Option<Duration>,
}

impl Scanner {
    /// Fetch every page, up to `page_concurrency` at a time.
    ///
    /// The pages are interleaved inside this one task rather than spawned:
    /// reading a page is I/O bound, and a slow page only holds back its own
    /// records.
    ///
    /// Decoded records go to `keys`. Records that cannot be decoded, and pages
    /// that cannot be fetched, go straight to `results` as failed checks. A
    /// page that produces nothing within the call timeout counts as a failed
    /// page.
    #[instrument(skip_all, fields(catalog = self.catalog.name(), pages = self.query.pages()))]
    pub(crate) async fn scan(self, keys: Sender<RecordKey>, results: Sender<CheckResult>, cancel: CancellationToken) {
        let mut pages = 0..self.query.pages();
        let mut processing = FuturesUnordered::new();
        processing.extend(
            pages.by_ref().take(self.page_concurrency).map(|page| self.scan_page(page, &keys, &results, &cancel)),
        );
        while processing.next().await.is_some() {
            if cancel.is_cancelled() {
                break;
            }
            // Pop-n-push: start the next page as soon as one finishes.
            if let Some(page) = pages.next() {
                processing.push(self.scan_page(page, &keys, &results, &cancel));
            }
        }
        debug!("Page scanner finished");
    }

    async fn scan_page(
        &self,
        page: u64,
        keys: &Sender<RecordKey>,
        results: &Sender<CheckResult>,
        cancel: &CancellationToken,
    ) {
        debug!(page, "Fetching page");
        let mut records = self.catalog.fetch_page(&self.query.filter, self.query.page_size, page);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = self.next_record(&mut records, page) => next,
            };
            let sent = match next {
                Ok(None) => return,
                Ok(Some(Ok(record))) => match RecordKey::decode(record, &self.id_field, self.include_record) {
                    Ok(key) => forward(keys, key, cancel).await,
                    Err(e) => forward(results, CheckResult::failed(e), cancel).await,
                },
                Ok(Some(Err(e))) => match &*e {
                    CatalogErrorKind::Decode(reason) => {
                        let reason = reason.clone();
                        let e = e.raise(ErrorKind::RecordDecode(reason));
                        forward(results, CheckResult::failed(e), cancel).await
                    },
                    _ => {
                        let e = e.raise(ErrorKind::SourceFetch(page));
                        forward(results, CheckResult::failed(e), cancel).await;
                        return;
                    },
                },
                Err(e) => {
                    forward(results, CheckResult::failed(e), cancel).await;
                    return;
                },
            };
            if !sent {
                return;
            }
        }
    }

    /// The next item of a page, bounded by the call timeout.
    async fn next_record(
        &self,
        records: &mut RecordStream<'_>,
        page: u64,
    ) -> Result<Option<CatalogResult<RawRecord>>> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, records.next()).await.or_raise(|| ErrorKind::SourceFetch(page)),
            None => Ok(records.next().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use stocktake_catalog::{Filter, MockCatalog};
    use tokio::sync::mpsc;

    struct Scanned {
        keys: Vec<RecordKey>,
        failures: Vec<CheckResult>,
    }

    async fn scan(catalog: MockCatalog, page_size: u64, expected_count: u64) -> Scanned {
        let scanner = Scanner {
            catalog: Arc::new(catalog),
            query: ReconciliationQuery { filter: Filter::default(), page_size, expected_count },
            page_concurrency: 2,
            id_field: "id".to_string(),
            include_record: false,
            call_timeout: None,
        };
        let (keys_tx, mut keys_rx) = mpsc::channel(64);
        let (results_tx, mut results_rx) = mpsc::channel(64);
        scanner.scan(keys_tx, results_tx, CancellationToken::new()).await;
        let mut scanned = Scanned { keys: Vec::new(), failures: Vec::new() };
        while let Some(key) = keys_rx.recv().await {
            scanned.keys.push(key);
        }
        while let Some(result) = results_rx.recv().await {
            scanned.failures.push(result);
        }
        scanned
    }

    fn ids(keys: &[RecordKey]) -> Vec<String> {
        let mut ids: Vec<_> = keys.iter().map(|k| k.id.clone()).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_every_page_is_scanned() {
        let scanned = scan(MockCatalog::with_ids(["a", "b", "c", "d", "e"]), 2, 5).await;
        assert_eq!(ids(&scanned.keys), ["a", "b", "c", "d", "e"]);
        assert!(scanned.failures.is_empty());
    }

    #[tokio::test]
    async fn test_decode_errors_bypass_verification() {
        let catalog = MockCatalog::with_records([json!({"id": "a"}), json!({"name": "no id"}), json!({"id": "c"})])
            .with_undecodable(3, "bad column");
        let scanned = scan(catalog, 10, 4).await;
        assert_eq!(ids(&scanned.keys), ["a", "c"]);
        assert_eq!(scanned.failures.len(), 2);
        for failure in &scanned.failures {
            assert_eq!(failure.id, None);
            assert!(matches!(&**failure.outcome.as_ref().unwrap_err(), ErrorKind::RecordDecode(_)));
        }
    }

    #[tokio::test]
    async fn test_failed_page_stops_only_that_page() {
        let catalog = MockCatalog::with_ids(["a", "b", "c", "d", "e", "f"]).with_failing_page(1);
        let scanned = scan(catalog, 2, 6).await;
        assert_eq!(ids(&scanned.keys), ["a", "b", "e", "f"]);
        assert_eq!(scanned.failures.len(), 1);
        assert!(matches!(&**scanned.failures[0].outcome.as_ref().unwrap_err(), ErrorKind::SourceFetch(1)));
    }

    #[tokio::test]
    async fn test_only_counted_pages_are_fetched() {
        let catalog = Arc::new(MockCatalog::with_ids(["a", "b", "c", "d", "e"]));
        let scanner = Scanner {
            catalog: catalog.clone(),
            query: ReconciliationQuery { filter: Filter::default(), page_size: 2, expected_count: 4 },
            page_concurrency: 4,
            id_field: "id".to_string(),
            include_record: false,
            call_timeout: None,
        };
        let (keys_tx, _keys_rx) = mpsc::channel(64);
        let (results_tx, _results_rx) = mpsc::channel(64);
        scanner.scan(keys_tx, results_tx, CancellationToken::new()).await;
        assert_eq!(catalog.pages_fetched(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_page_times_out() {
        let catalog = MockCatalog::with_ids(["a", "b", "c", "d"]).with_stalling_page(0);
        let scanner = Scanner {
            catalog: Arc::new(catalog),
            query: ReconciliationQuery { filter: Filter::default(), page_size: 2, expected_count: 4 },
            page_concurrency: 2,
            id_field: "id".to_string(),
            include_record: false,
            call_timeout: Some(Duration::from_secs(5)),
        };
        let (keys_tx, mut keys_rx) = mpsc::channel(64);
        let (results_tx, mut results_rx) = mpsc::channel(64);
        let started = tokio::time::Instant::now();
        scanner.scan(keys_tx, results_tx, CancellationToken::new()).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{elapsed:?}");

        let mut keys = Vec::new();
        while let Some(key) = keys_rx.recv().await {
            keys.push(key);
        }
        assert_eq!(ids(&keys), ["a", "b", "c", "d"]);
        let failure = results_rx.recv().await.unwrap();
        assert!(matches!(&**failure.outcome.as_ref().unwrap_err(), ErrorKind::SourceFetch(0)));
        assert!(results_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops() {
        let catalog = Arc::new(MockCatalog::with_ids(["a", "b", "c", "d"]));
        let scanner = Scanner {
            catalog: catalog.clone(),
            query: ReconciliationQuery { filter: Filter::default(), page_size: 1, expected_count: 4 },
            page_concurrency: 1,
            id_field: "id".to_string(),
            include_record: false,
            call_timeout: None,
        };
        // Nobody reads the keys: the scanner is parked on a full channel.
        let (keys_tx, _keys_rx) = mpsc::channel(1);
        let (results_tx, _results_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let scanning = tokio::spawn(scanner.scan(keys_tx, results_tx, cancel.clone()));
        tokio::task::yield_now().await;
        cancel.cancel();
        scanning.await.unwrap();
        assert!(catalog.pages_fetched() < 4);
    }
}
