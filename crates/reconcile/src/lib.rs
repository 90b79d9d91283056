//! The reconciliation pipeline.
//!
//! For every record in a catalog, determine whether the object it references
//! exists in the object store, and write a report of the missing ones.
//!
//! ```text
//!  catalog ─▶ page scanner ─▶ keys ─▶ verification pool ─▶ results ─▶ aggregator ─▶ sink
//!                  │                    (N workers,           ▲            │
//!                  └── undecodable ─────  rate limiter) ──────┘       coordinator
//! ```
//!
//! The number of matching records is counted once, before anything else
//! happens, and the run is complete when that many results have been
//! observed. Every stage watches one cancellation token; the coordinator
//! cancels it when the run completes or fails, then waits for every task to
//! finish before finalizing the report.

mod coordinator;
pub mod error;
mod limiter;
mod query;
mod record;
mod report;
mod scanner;
mod verify;

pub use crate::limiter::RateLimiter;
pub use crate::query::ReconciliationQuery;
pub use crate::record::{CheckResult, RecordKey};
pub use crate::report::{Output, Report, ReportEntry, Summary};
use crate::coordinator::Coordinator;
use crate::error::{ErrorKind, Result};
use crate::report::Aggregator;
use crate::scanner::Scanner;
use crate::verify::Verifier;
use std::time::Duration;
use stocktake_catalog::{CatalogHandle, Filter};
use stocktake_storage::BackendHandle;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Channel slots per verification worker, for both keys and results.
const CHANNEL_DEPTH_PER_WORKER: usize = 2;

/// Everything that shapes a run. Fixed for the lifetime of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Only records matching the filter are reconciled.
    pub filter: Filter,
    /// Records requested per catalog page.
    pub page_size: u64,
    /// Catalog pages fetched at the same time.
    pub page_concurrency: usize,
    /// Existence checks in flight at the same time.
    pub workers: usize,
    /// Existence checks per second across all workers; `0` disables.
    pub rate_limit_per_second: u64,
    /// Record field holding the object identifier.
    pub id_field: String,
    /// Report objects that exist, not only the missing ones.
    pub include_existing: bool,
    /// Copy each record into its report entry.
    pub include_record: bool,
    /// Write each report entry as soon as it is accepted, instead of the
    /// whole report at the end.
    pub stream: bool,
    /// Indent the report. Streamed reports have a fixed layout.
    pub pretty: bool,
    /// Fail the run on the first failed page, record or check. Otherwise
    /// those are counted and logged.
    pub strict: bool,
    /// Deadline for each catalog call and each existence check.
    pub call_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: Filter::default(),
            page_size: 100,
            page_concurrency: 4,
            workers: 16,
            rate_limit_per_second: 0,
            id_field: "id".to_string(),
            include_existing: false,
            include_record: false,
            stream: false,
            pretty: false,
            strict: true,
            call_timeout: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        let problem = if self.page_size == 0 {
            "page size must be at least 1"
        } else if self.workers == 0 {
            "worker count must be at least 1"
        } else if self.page_concurrency == 0 {
            "page concurrency must be at least 1"
        } else if self.id_field.is_empty() {
            "identifier field must not be empty"
        } else {
            return Ok(());
        };
        exn::bail!(ErrorKind::Config(problem.to_string()))
    }

    pub fn output(&self) -> Output {
        match self.stream {
            true => Output::Streamed,
            false => Output::Buffered { pretty: self.pretty },
        }
    }
}

/// Reconcile every record of `catalog` matching the configured filter against
/// `store`, writing the report to `sink`.
///
/// Cancelling `cancel` stops the run with [`Cancelled`](ErrorKind::Cancelled).
/// On failure, a buffered report is never written; a streamed report is left
/// incomplete.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use stocktake_catalog::MockCatalog;
/// use stocktake_reconcile::{RunConfig, reconcile};
/// use stocktake_storage::backend::MockBackend;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = Arc::new(MockCatalog::with_ids(["a", "b", "c"]));
/// let store = Arc::new(MockBackend::with_objects(["a", "c"]));
/// let mut report = Vec::new();
/// let summary = reconcile(catalog, store, &RunConfig::default(), &mut report, &CancellationToken::new()).await?;
/// assert_eq!((summary.total, summary.missing), (3, 1));
/// assert!(String::from_utf8(report)?.contains(r#"{"id":"b","exists":false}"#));
/// # Ok(())
/// # }
/// ```
pub async fn reconcile<W>(
    catalog: CatalogHandle,
    store: BackendHandle,
    config: &RunConfig,
    sink: W,
    cancel: &CancellationToken,
) -> Result<Summary>
where
    W: AsyncWrite + Unpin + Send,
{
    config.validate()?;
    let prepare =
        ReconciliationQuery::prepare(catalog.as_ref(), config.filter.clone(), config.page_size, config.call_timeout);
    let query = tokio::select! {
        biased;
        _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        query = prepare => query?,
    };
    info!(
        catalog = catalog.name(),
        store = store.name(),
        expected = query.expected_count,
        pages = query.pages(),
        "Starting reconciliation"
    );

    let mut aggregator = Aggregator::new(sink, config.output(), config.include_existing);
    aggregator.begin().await?;
    let mut coordinator = Coordinator::new(query.expected_count, config.strict);
    if coordinator.is_running() {
        run_pipeline(catalog, store, config, query, &mut aggregator, &mut coordinator, cancel).await;
    }

    let failure = coordinator.conclude();
    debug!(
        state = ?coordinator.state(),
        observed = coordinator.observed(),
        accepted = aggregator.summary().total,
        "Reconciliation concluded"
    );
    if let Some(failure) = failure {
        return Err(failure);
    }
    let summary = aggregator.finish().await?;
    info!(total = summary.total, missing = summary.missing, errors = summary.errors, "Reconciliation complete");
    Ok(summary)
}

/// Start the scanner and the verification pool, consume results until the
/// coordinator stops running, then shut everything down.
async fn run_pipeline<W>(
    catalog: CatalogHandle,
    store: BackendHandle,
    config: &RunConfig,
    query: ReconciliationQuery,
    aggregator: &mut Aggregator<W>,
    coordinator: &mut Coordinator,
    cancel: &CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    // Cancelling the run must not cancel the caller's token.
    let run = cancel.child_token();
    let tracker = TaskTracker::new();
    let depth = config.workers.saturating_mul(CHANNEL_DEPTH_PER_WORKER);
    let (keys_tx, keys_rx) = mpsc::channel(depth);
    let (results_tx, mut results_rx) = mpsc::channel(depth);

    let scanner = Scanner {
        catalog,
        query,
        page_concurrency: config.page_concurrency,
        id_field: config.id_field.clone(),
        include_record: config.include_record,
        call_timeout: config.call_timeout,
    };
    tracker.spawn(scanner.scan(keys_tx, results_tx.clone(), run.clone()));
    Verifier::new(store, RateLimiter::per_second(config.rate_limit_per_second), config.call_timeout).spawn_pool(
        &tracker,
        config.workers,
        keys_rx,
        results_tx,
        run.clone(),
    );

    while coordinator.is_running() {
        tokio::select! {
            biased;
            _ = run.cancelled() => coordinator.fail(exn::Exn::from(ErrorKind::Cancelled)),
            next = results_rx.recv() => match next {
                Some(result) => {
                    let failure = aggregator.accept(result).await.err();
                    coordinator.observe(failure);
                },
                // Every sender is gone: the scanner and all workers finished.
                None => coordinator.exhausted(),
            },
        }
    }

    run.cancel();
    // Unblocks any worker still trying to hand over a result.
    drop(results_rx);
    tracker.close();
    tracker.wait().await;
    debug!("Every pipeline task has finished");
}

/// Send `value`, giving up if the run is cancelled first. Returns `false` if
/// the value was not delivered.
pub(crate) async fn forward<T>(channel: &Sender<T>, value: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = channel.send(value) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::page_size(RunConfig { page_size: 0, ..RunConfig::default() })]
    #[case::workers(RunConfig { workers: 0, ..RunConfig::default() })]
    #[case::page_concurrency(RunConfig { page_concurrency: 0, ..RunConfig::default() })]
    #[case::id_field(RunConfig { id_field: String::new(), ..RunConfig::default() })]
    fn test_invalid_config(#[case] config: RunConfig) {
        let err = config.validate().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Config(_)));
    }

    #[test]
    fn test_output() {
        assert_eq!(RunConfig::default().output(), Output::Buffered { pretty: false });
        let config = RunConfig { stream: true, pretty: true, ..RunConfig::default() };
        assert_eq!(config.output(), Output::Streamed);
    }

    #[tokio::test]
    async fn test_forward_gives_up_when_cancelled() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        assert!(forward(&tx, 1, &cancel).await);
        cancel.cancel();
        // The channel is full; only cancellation can end this.
        assert!(!forward(&tx, 2, &cancel).await);
    }
}
