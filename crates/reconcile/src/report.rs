//! The aggregator: the single consumer of check results, and the only writer
//! of the report.

use crate::error::{ErrorKind, Result};
use crate::record::CheckResult;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use stocktake_catalog::RawRecord;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One reported object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: String,
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RawRecord>,
}

/// The document a successful run produces.
///
/// `elements` holds the missing objects (and, if requested, the existing
/// ones too) in no particular order. `total` counts every record a result was
/// observed for, failed checks included. `errors` only appears when failed
/// checks were tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub elements: Vec<ReportEntry>,
    pub total: u64,
    pub missing: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub errors: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// Counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: u64,
    pub missing: u64,
    pub errors: u64,
}

/// How the report reaches the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Written once, when the run completes.
    Buffered { pretty: bool },
    /// Written entry by entry as results arrive. The envelope is written
    /// before the first entry and the counts after the last; if the run fails
    /// in between, the sink is left holding an incomplete document.
    Streamed,
}

const STREAM_HEADER: &[u8] = b"{\n    \"elements\": [";
const STREAM_ENTRY_INDENT: &str = "\n        ";

pub(crate) struct Aggregator<W> {
    sink: W,
    output: Output,
    include_existing: bool,
    summary: Summary,
    elements: Vec<ReportEntry>,
    streamed: u64,
}

impl<W: AsyncWrite + Unpin + Send> Aggregator<W> {
    pub(crate) fn new(sink: W, output: Output, include_existing: bool) -> Self {
        Self {
            sink,
            output,
            include_existing,
            summary: Summary::default(),
            elements: Vec::new(),
            streamed: 0,
        }
    }

    pub(crate) fn summary(&self) -> Summary {
        self.summary
    }

    /// Write anything that has to precede the first entry.
    pub(crate) async fn begin(&mut self) -> Result<()> {
        if self.output == Output::Streamed {
            self.write(STREAM_HEADER).await?;
        }
        Ok(())
    }

    /// Account for one result.
    ///
    /// A failed check is counted and then handed back as the error, for the
    /// coordinator to decide on. A sink failure is a [`Write`](ErrorKind::Write)
    /// error.
    pub(crate) async fn accept(&mut self, result: CheckResult) -> Result<()> {
        self.summary.total += 1;
        let exists = match result.outcome {
            Ok(exists) => exists,
            Err(e) => {
                self.summary.errors += 1;
                return Err(e);
            },
        };
        if exists && !self.include_existing {
            return Ok(());
        }
        if !exists {
            self.summary.missing += 1;
        }
        let entry = ReportEntry {
            // A successful check always has an id.
            id: result.id.unwrap_or_default(),
            exists,
            record: result.record,
        };
        match self.output {
            Output::Buffered { .. } => self.elements.push(entry),
            Output::Streamed => self.stream_entry(&entry).await?,
        }
        Ok(())
    }

    async fn stream_entry(&mut self, entry: &ReportEntry) -> Result<()> {
        let json = serde_json::to_string(entry).or_raise(|| ErrorKind::Write)?;
        let separator = if self.streamed == 0 { "" } else { "," };
        self.write(format!("{separator}{STREAM_ENTRY_INDENT}{json}").as_bytes()).await?;
        self.streamed += 1;
        Ok(())
    }

    /// Write the rest of the report and return the final counts.
    pub(crate) async fn finish(mut self) -> Result<Summary> {
        let summary = self.summary;
        match self.output {
            Output::Buffered { pretty } => {
                let report = Report {
                    elements: std::mem::take(&mut self.elements),
                    total: summary.total,
                    missing: summary.missing,
                    errors: summary.errors,
                };
                let mut bytes = match pretty {
                    true => serde_json::to_vec_pretty(&report),
                    false => serde_json::to_vec(&report),
                }
                .or_raise(|| ErrorKind::Write)?;
                bytes.push(b'\n');
                self.write(&bytes).await?;
            },
            Output::Streamed => {
                let mut trailer = format!("\n    ],\n    \"total\": {},", summary.total);
                trailer.push_str(&format!("\n    \"missing\": {}", summary.missing));
                if summary.errors > 0 {
                    trailer.push_str(&format!(",\n    \"errors\": {}", summary.errors));
                }
                trailer.push_str("\n}\n");
                self.write(trailer.as_bytes()).await?;
            },
        }
        Ok(summary)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes).await.or_raise(|| ErrorKind::Write)?;
        self.sink.flush().await.or_raise(|| ErrorKind::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKey;
    use rstest::rstest;
    use serde_json::json;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn checked(id: &str, exists: bool) -> CheckResult {
        CheckResult::checked(RecordKey { id: id.to_string(), record: None }, Ok(exists))
    }

    async fn aggregate(output: Output, include_existing: bool, results: Vec<CheckResult>) -> (Summary, String) {
        let mut sink = Vec::new();
        let mut aggregator = Aggregator::new(&mut sink, output, include_existing);
        aggregator.begin().await.unwrap();
        for result in results {
            let _ = aggregator.accept(result).await;
        }
        let summary = aggregator.finish().await.unwrap();
        (summary, String::from_utf8(sink).unwrap())
    }

    #[rstest]
    #[case::buffered(Output::Buffered { pretty: false })]
    #[case::pretty(Output::Buffered { pretty: true })]
    #[case::streamed(Output::Streamed)]
    #[tokio::test]
    async fn test_inclusion_policy(#[case] output: Output) {
        let results = vec![checked("A", false), checked("B", true), checked("C", false), checked("D", true)];
        let (summary, written) = aggregate(output, false, results).await;
        assert_eq!(summary, Summary { total: 4, missing: 2, errors: 0 });
        let report: Report = serde_json::from_str(&written).unwrap();
        assert_eq!(
            report,
            Report {
                elements: vec![
                    ReportEntry { id: "A".to_string(), exists: false, record: None },
                    ReportEntry { id: "C".to_string(), exists: false, record: None },
                ],
                total: 4,
                missing: 2,
                errors: 0,
            }
        );
    }

    #[rstest]
    #[case::buffered(Output::Buffered { pretty: false })]
    #[case::streamed(Output::Streamed)]
    #[tokio::test]
    async fn test_include_existing_and_errors(#[case] output: Output) {
        let failed = CheckResult::failed(exn::Exn::from(ErrorKind::SourceFetch(0)));
        let (summary, written) = aggregate(output, true, vec![checked("A", true), failed, checked("B", false)]).await;
        assert_eq!(summary, Summary { total: 3, missing: 1, errors: 1 });
        let report: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(
            report,
            json!({
                "elements": [{"id": "A", "exists": true}, {"id": "B", "exists": false}],
                "total": 3,
                "missing": 1,
                "errors": 1
            })
        );
    }

    #[tokio::test]
    async fn test_failed_check_is_handed_back() {
        let mut sink = Vec::new();
        let mut aggregator = Aggregator::new(&mut sink, Output::Buffered { pretty: false }, false);
        let err = aggregator
            .accept(CheckResult::failed(exn::Exn::from(ErrorKind::StoreCheck("a".to_string()))))
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreCheck(_)));
        assert_eq!(aggregator.summary(), Summary { total: 1, missing: 0, errors: 1 });
    }

    #[tokio::test]
    async fn test_streamed_layout() {
        let (_, written) = aggregate(Output::Streamed, false, vec![checked("A", false), checked("C", false)]).await;
        assert_eq!(
            written,
            concat!(
                "{\n",
                "    \"elements\": [\n",
                "        {\"id\":\"A\",\"exists\":false},\n",
                "        {\"id\":\"C\",\"exists\":false}\n",
                "    ],\n",
                "    \"total\": 2,\n",
                "    \"missing\": 2\n",
                "}\n",
            )
        );
    }

    #[rstest]
    #[case::buffered(Output::Buffered { pretty: false })]
    #[case::streamed(Output::Streamed)]
    #[tokio::test]
    async fn test_empty_report(#[case] output: Output) {
        let (summary, written) = aggregate(output, false, Vec::new()).await;
        assert_eq!(summary, Summary::default());
        let report: Report = serde_json::from_str(&written).unwrap();
        assert_eq!(report, Report { elements: Vec::new(), total: 0, missing: 0, errors: 0 });
    }

    #[tokio::test]
    async fn test_record_is_carried() {
        let record = match json!({"id": "A", "size": 10}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let result = CheckResult::checked(RecordKey { id: "A".to_string(), record: Some(record.clone()) }, Ok(false));
        let (_, written) = aggregate(Output::Buffered { pretty: false }, false, vec![result]).await;
        let report: Report = serde_json::from_str(&written).unwrap();
        assert_eq!(report.elements[0].record, Some(record));
    }

    #[tokio::test]
    async fn test_streamed_entries_are_written_as_they_arrive() {
        let mut sink = Vec::new();
        let mut aggregator = Aggregator::new(&mut sink, Output::Streamed, false);
        aggregator.begin().await.unwrap();
        aggregator.accept(checked("A", false)).await.unwrap();
        drop(aggregator);
        let written = String::from_utf8(sink).unwrap();
        assert!(written.ends_with("{\"id\":\"A\",\"exists\":false}"));
    }

    struct BrokenSink;
    impl AsyncWrite for BrokenSink {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_sink_failure_is_write_error() {
        let mut aggregator = Aggregator::new(BrokenSink, Output::Streamed, false);
        let err = aggregator.begin().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Write));
        let aggregator = Aggregator::new(BrokenSink, Output::Buffered { pretty: true }, false);
        let err = aggregator.finish().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Write));
    }
}
