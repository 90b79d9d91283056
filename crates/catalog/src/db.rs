//! SQLite catalog: connection, pool management and paged queries.

use crate::error::{ErrorKind, Result};
use crate::row::to_raw_record;
use crate::{Filter, RecordSource, RecordStream};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use serde_json::Value;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::path::Path;
use tracing::instrument;

/// A catalog backed by a single table (or view) of a SQLite database.
///
/// Every row of the table is a record. The identifier column doubles as the
/// sort key that keeps `LIMIT`/`OFFSET` pages from overlapping.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
    table: String,
    id_column: String,
}

impl SqliteCatalog {
    async fn new(
        options: SqliteConnectOptions,
        max_connections: u32,
        table: &str,
        id_column: &str,
        query_only: bool,
    ) -> Result<Self> {
        let table = quote_identifier(table)?;
        let id_column = quote_identifier(id_column)?;
        let pool = SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to EVERY connection (set by max
            // connections) instead of only the first one returned by the pool.
            .after_connect(move |conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta, query_only).await }))
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Self {
            pool,
            table,
            id_column,
        })
    }

    /// Connect to the catalog database at the given path.
    ///
    /// The database is opened read-only: reconciliation never modifies the
    /// catalog.
    ///
    /// A page holds its connection until its last row has been consumed, so
    /// `max_connections` must be at least the number of pages read at once.
    /// Otherwise the surplus pages wait for a connection, and fail once the
    /// pool's acquire timeout runs out.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>, table: &str, id_column: &str, max_connections: u32) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).read_only(true);
        Self::new(options, max_connections, table, id_column, true).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory(table: &str, id_column: &str) -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // In-memory database must either use the same cache `.shared_cache(true)`,
        // or be limited to one connection. Otherwise parallel connections will
        // see different databases that contain different data.
        Self::new(options, 1, table, id_column, false).await
    }

    /// Base connection options shared between file and in-memory databases.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // PRAGMA busy_timeout = 1500ms
            // The catalog may be written to by its owner while a run reads it.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(
        conn: &mut SqliteConnection,
        _meta: PoolConnectionMetadata,
        query_only: bool,
    ) -> sqlx::Result<()> {
        sqlx::query("PRAGMA temp_store = MEMORY; PRAGMA cache_size = -8192;").execute(&mut *conn).await?;
        if query_only {
            sqlx::query("PRAGMA query_only = ON;").execute(&mut *conn).await?;
        }
        Ok(())
    }

    /// Get a reference to the underlying connection pool.
    ///
    /// This is useful for running custom queries (seeding test tables, etc.).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn count_query<'q>(&self, filter: &'q Filter) -> Result<QueryBuilder<'q, Sqlite>> {
        let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", self.table));
        push_where(&mut builder, filter)?;
        Ok(builder)
    }

    fn page_query<'q>(&self, filter: &'q Filter, limit: u64, page: u64) -> Result<QueryBuilder<'q, Sqlite>> {
        let limit = i64::try_from(limit).or_raise(|| ErrorKind::InvalidFilter("page size out of range".to_string()))?;
        let offset = i64::try_from(page)
            .ok()
            .and_then(|page| page.checked_mul(limit))
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidFilter("page offset out of range".to_string())))?;
        let mut builder = QueryBuilder::new(format!("SELECT * FROM {}", self.table));
        push_where(&mut builder, filter)?;
        builder.push(format!(" ORDER BY {} LIMIT ", self.id_column));
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);
        Ok(builder)
    }
}

/// Quote a table/column name for use in a query, refusing anything that
/// isn't a plain identifier.
///
/// ```text
/// objects      -> "objects"
/// object_id    -> "object_id"
/// id; DROP ... -> InvalidIdentifier
/// ```
fn quote_identifier(name: &str) -> Result<String> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    match valid {
        true => Ok(format!("\"{name}\"")),
        false => exn::bail!(ErrorKind::InvalidIdentifier(name.to_string())),
    }
}

fn push_where<'q>(builder: &mut QueryBuilder<'q, Sqlite>, filter: &'q Filter) -> Result<()> {
    for (index, (field, value)) in filter.conditions().enumerate() {
        builder.push(if index == 0 { " WHERE " } else { " AND " });
        builder.push(quote_identifier(field)?);
        match value {
            Value::Null => {
                builder.push(" IS NULL");
            },
            Value::Bool(b) => {
                builder.push(" = ").push_bind(*b);
            },
            Value::Number(n) => match n.as_i64() {
                Some(i) => {
                    builder.push(" = ").push_bind(i);
                },
                None => {
                    let f = n.as_f64().ok_or_else(|| exn::Exn::from(ErrorKind::InvalidFilter(field.to_string())))?;
                    builder.push(" = ").push_bind(f);
                },
            },
            Value::String(s) => {
                builder.push(" = ").push_bind(s.as_str());
            },
            Value::Array(_) | Value::Object(_) => exn::bail!(ErrorKind::InvalidFilter(field.to_string())),
        }
    }
    Ok(())
}

#[async_trait]
impl RecordSource for SqliteCatalog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let mut builder = self.count_query(filter)?;
        let (count,): (i64,) = builder.build_query_as().fetch_one(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::Database)
    }

    fn fetch_page<'a>(&'a self, filter: &'a Filter, limit: u64, page: u64) -> RecordStream<'a> {
        Box::pin(stream! {
            let mut builder = match self.page_query(filter, limit, page) {
                Ok(builder) => builder,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let mut rows = builder.build().fetch(&self.pool);
            while let Some(row) = rows.next().await {
                match row {
                    Ok(row) => yield to_raw_record(&row),
                    Err(e) => {
                        yield Err::<crate::RawRecord, _>(e).or_raise(|| ErrorKind::Database);
                        return;
                    },
                }
            }
        })
    }
}
