//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`], later layers overriding earlier
//! ones:
//!
//! 1. Built-in defaults ([`Config::default()`]).
//! 2. `config.toml`, `config.yaml`/`config.yml` and `config.json` in the
//!    user configuration directory (e.g. `~/.config/stocktake/` on Linux).
//! 3. An explicitly requested file (format chosen by extension).
//! 4. Environment variables prefixed with `STOCKTAKE_`, using `__` to reach
//!    into sections: `STOCKTAKE_STORAGE__BUCKET=uploads`.
//!
//! Command-line flags are applied on top by the binary, which then calls
//! [`Config::validate()`].

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stocktake_catalog::Filter;

const ENV_PREFIX: &str = "STOCKTAKE_";
const DEFAULT_FILES: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    pub run: RunSettings,
}

/// Where the records come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// SQLite database file holding the catalog table.
    pub path: Option<PathBuf>,
    pub table: String,
    /// Column holding each record's object identifier.
    pub id_column: String,
    /// Only records matching every condition are reconciled.
    pub filter: Filter,
}
impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            table: "objects".to_string(),
            id_column: "id".to_string(),
            filter: Filter::default(),
        }
    }
}

/// Which bucket the objects should be in.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Used for logging only.
    pub name: String,
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: String,
    /// Custom endpoint for S3-compatible services that aren't AWS.
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
    pub max_concurrent_requests: usize,
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: "s3".to_string(),
            bucket: String::new(),
            prefix: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            key_id: String::new(),
            key_secret: String::new(),
            max_concurrent_requests: 100,
        }
    }
}
// Hand-written so the secret never ends up in logs.
impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("name", &self.name)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

/// How the reconciliation run behaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Records requested per catalog page.
    pub page_size: u64,
    /// Concurrent existence checks.
    pub workers: usize,
    /// Catalog pages fetched at the same time.
    pub page_concurrency: usize,
    /// Existence checks per second across all workers; `0` disables.
    pub rate_limit: u64,
    /// Report objects that exist too, not just the missing ones.
    pub include_existing: bool,
    /// Copy each record's other fields into its report entry.
    pub include_record: bool,
    /// Write report entries as they are produced.
    pub stream: bool,
    /// Indent the (buffered) report.
    pub pretty: bool,
    /// Abort on the first failed page, record or check.
    pub strict: bool,
    /// Deadline in seconds for each page fetch and each existence check.
    pub timeout_secs: Option<u64>,
    /// Deadline in seconds for connecting to the catalog and the bucket.
    pub connect_timeout_secs: u64,
}
impl Default for RunSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            workers: 16,
            page_concurrency: 4,
            rate_limit: 0,
            include_existing: false,
            include_record: false,
            stream: false,
            pretty: false,
            strict: true,
            timeout_secs: None,
            connect_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from every layer, including the user configuration
    /// directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "stocktake");
        Self::load_from(dirs.as_ref().map(|d| d.config_dir()), explicit)
    }

    /// Load configuration, looking for default files in `config_dir` (if any)
    /// instead of the user configuration directory.
    pub fn load_from(config_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dir) = config_dir {
            for file in DEFAULT_FILES {
                let path = dir.join(file);
                if path.is_file() {
                    tracing::debug!(path = %path.display(), "Loading configuration file");
                    figment = merge_file(figment, &path)?;
                }
            }
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            tracing::debug!(path = %path.display(), "Loading configuration file");
            figment = merge_file(figment, path)?;
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| exn::Exn::from(ErrorKind::Load(e.to_string())))
    }

    /// Check values that would make a run impossible.
    pub fn validate(&self) -> Result<()> {
        let run = &self.run;
        let problem = if run.page_size == 0 {
            Some("run.page_size must be at least 1")
        } else if run.workers == 0 {
            Some("run.workers must be at least 1")
        } else if run.page_concurrency == 0 {
            Some("run.page_concurrency must be at least 1")
        } else if self.storage.max_concurrent_requests == 0 {
            Some("storage.max_concurrent_requests must be at least 1")
        } else if self.storage.bucket.trim().is_empty() {
            Some("storage.bucket is required")
        } else if self.catalog.table.trim().is_empty() {
            Some("catalog.table is required")
        } else if self.catalog.path.is_none() {
            Some("catalog.path is required")
        } else {
            None
        };
        match problem {
            Some(problem) => exn::bail!(ErrorKind::Invalid(problem.to_string())),
            None => Ok(()),
        }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
