mod cli;
mod error;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::{OptionExt, ResultExt};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use stocktake_catalog::SqliteCatalog;
use stocktake_config::Config;
use stocktake_reconcile::{RunConfig, reconcile};
use stocktake_storage::backend::S3Backend;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

/// Logs go to stderr: stdout is reserved for the report.
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    cli.apply(&mut config).or_raise(|| ErrorKind::Config)?;
    config.validate().or_raise(|| ErrorKind::Config)?;
    tracing::debug!(?config, "Configuration loaded");

    let connect_timeout = config.run.connect_timeout_secs;
    let (catalog, store) = tokio::time::timeout(Duration::from_secs(connect_timeout), connect(&config))
        .await
        .or_raise(|| ErrorKind::ConnectTimeout(connect_timeout))??;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    let result = reconcile(catalog.clone(), Arc::new(store), &run_config(&config), tokio::io::stdout(), &cancel).await;
    catalog.close().await;
    let summary = result.or_raise(|| ErrorKind::Reconcile)?;
    if summary.errors > 0 {
        tracing::warn!(errors = summary.errors, "Some records could not be reconciled");
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<(Arc<SqliteCatalog>, S3Backend)> {
    let path = config.catalog.path.as_ref().ok_or_raise(|| ErrorKind::Config)?;
    // One connection per page read at once.
    let connections = u32::try_from(config.run.page_concurrency).unwrap_or(u32::MAX);
    let catalog = SqliteCatalog::connect(path, &config.catalog.table, &config.catalog.id_column, connections)
        .await
        .or_raise(|| ErrorKind::Catalog)?;
    let storage = &config.storage;
    let store = S3Backend::new(
        storage.name.clone(),
        storage.bucket.clone(),
        storage.prefix.clone(),
        storage.region.clone(),
        storage.endpoint.clone(),
        storage.key_id.clone(),
        storage.key_secret.clone(),
    )
    .await
    .or_raise(|| ErrorKind::Storage)?
    .with_max_concurrent_requests(storage.max_concurrent_requests);
    Ok((Arc::new(catalog), store))
}

fn run_config(config: &Config) -> RunConfig {
    let run = &config.run;
    RunConfig {
        filter: config.catalog.filter.clone(),
        page_size: run.page_size,
        page_concurrency: run.page_concurrency,
        workers: run.workers,
        rate_limit_per_second: run.rate_limit,
        id_field: config.catalog.id_column.clone(),
        include_existing: run.include_existing,
        include_record: run.include_record,
        stream: run.stream,
        pretty: run.pretty,
        strict: run.strict,
        call_timeout: run.timeout_secs.map(Duration::from_secs),
    }
}
