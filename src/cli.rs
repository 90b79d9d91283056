use clap::{ArgAction, Parser};
use std::path::PathBuf;
use stocktake_catalog::Filter;
use stocktake_catalog::error::Result as FilterResult;
use stocktake_config::Config;

/// Find the records in a catalog whose objects are missing from an
/// S3-compatible bucket.
///
/// The JSON report is written to stdout; logs go to stderr. Every option can
/// also be set in a configuration file or with `STOCKTAKE_*` environment
/// variables, and options given here take precedence.
#[derive(Debug, Parser)]
#[command(name = "stocktake", version, about, long_about)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database holding the catalog
    #[arg(short = 'd', long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,
    /// Catalog table
    #[arg(short = 'c', long)]
    pub table: Option<String>,
    /// Column holding each record's object key
    #[arg(long, value_name = "COLUMN")]
    pub id_column: Option<String>,
    /// Only reconcile records matching every field, e.g. '{"status": "active"}'
    #[arg(long, value_name = "JSON")]
    pub filter: Option<String>,
    /// Records per catalog page
    #[arg(short = 'l', long, value_name = "RECORDS")]
    pub limit: Option<u64>,

    /// Bucket the objects should be in
    #[arg(short = 'b', long)]
    pub bucket: Option<String>,
    /// Key prefix inside the bucket
    #[arg(long)]
    pub prefix: Option<String>,
    #[arg(short = 'r', long)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    #[arg(short = 'e', long, value_name = "URL")]
    pub endpoint: Option<String>,
    /// Access key ID
    #[arg(short = 'k', long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub key: Option<String>,
    /// Secret access key
    #[arg(short = 's', long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret: Option<String>,

    /// Maximum existence checks per second (0 for unlimited)
    #[arg(long, value_name = "PER_SECOND")]
    pub ratelimit: Option<u64>,
    /// Concurrent existence checks
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,
    /// Report every object, not only the missing ones
    #[arg(short = 'a', long)]
    pub printall: bool,
    /// Include each catalog record in its report entry
    #[arg(long)]
    pub print_record: bool,
    /// Write report entries as they are found
    #[arg(short = 't', long)]
    pub stream: bool,
    /// Indent the report
    #[arg(long)]
    pub pretty: bool,
    /// Count failed checks instead of stopping at the first one
    #[arg(long)]
    pub lenient: bool,
    /// Deadline for each catalog page and each existence check
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// More logging (repeat for even more); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Override loaded configuration with whatever was given on the command
    /// line.
    pub fn apply(&self, config: &mut Config) -> FilterResult<()> {
        let catalog = &mut config.catalog;
        if let Some(path) = &self.catalog {
            catalog.path = Some(path.clone());
        }
        set(&mut catalog.table, &self.table);
        set(&mut catalog.id_column, &self.id_column);
        if let Some(filter) = &self.filter {
            catalog.filter = filter.parse::<Filter>()?;
        }

        let storage = &mut config.storage;
        set(&mut storage.bucket, &self.bucket);
        set(&mut storage.region, &self.region);
        set(&mut storage.key_id, &self.key);
        set(&mut storage.key_secret, &self.secret);
        if self.prefix.is_some() {
            storage.prefix = self.prefix.clone();
        }
        if self.endpoint.is_some() {
            storage.endpoint = self.endpoint.clone();
        }

        let run = &mut config.run;
        set(&mut run.page_size, &self.limit);
        set(&mut run.workers, &self.workers);
        set(&mut run.rate_limit, &self.ratelimit);
        if self.timeout.is_some() {
            run.timeout_secs = self.timeout;
        }
        // Flags can only switch these on; turning them off is left to the
        // configuration file.
        run.include_existing |= self.printall;
        run.include_record |= self.print_record;
        run.stream |= self.stream;
        run.pretty |= self.pretty;
        if self.lenient {
            run.strict = false;
        }
        Ok(())
    }
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("stocktake").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = parse(&[
            "-d", "catalog.db", "-c", "uploads", "--id-column", "object_key", "--filter", r#"{"owner": "ann"}"#,
            "-l", "50", "-b", "bucket", "--prefix", "media", "-r", "eu-west-1", "-e", "http://localhost:9000",
            "-k", "AKIA", "-s", "shh", "--ratelimit", "20", "-w", "8", "-a", "--print-record", "-t", "--lenient",
            "--timeout", "30", "-vv",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config).unwrap();

        assert_eq!(config.catalog.path, Some(PathBuf::from("catalog.db")));
        assert_eq!(config.catalog.table, "uploads");
        assert_eq!(config.catalog.id_column, "object_key");
        assert_eq!(config.catalog.filter, r#"{"owner": "ann"}"#.parse().unwrap());
        assert_eq!(config.storage.bucket, "bucket");
        assert_eq!(config.storage.prefix.as_deref(), Some("media"));
        assert_eq!(config.storage.region, "eu-west-1");
        assert_eq!(config.storage.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!((config.storage.key_id.as_str(), config.storage.key_secret.as_str()), ("AKIA", "shh"));
        assert_eq!(config.run.page_size, 50);
        assert_eq!(config.run.rate_limit, 20);
        assert_eq!(config.run.workers, 8);
        assert!(config.run.include_existing && config.run.include_record && config.run.stream);
        assert!(!config.run.strict);
        assert_eq!(config.run.timeout_secs, Some(30));
        assert_eq!(cli.verbose, 2);
        config.validate().unwrap();
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let mut config = Config::default();
        config.storage.bucket = "from-file".to_string();
        config.run.workers = 3;
        config.run.pretty = true;
        parse(&[]).apply(&mut config).unwrap();
        assert_eq!(config.storage.bucket, "from-file");
        assert_eq!(config.run.workers, 3);
        assert!(config.run.pretty);
        assert!(config.run.strict);
    }

    #[rstest]
    #[case(r#"["not", "an", "object"]"#)]
    #[case(r#"{"tags": ["nested"]}"#)]
    fn test_invalid_filter(#[case] filter: &str) {
        let cli = parse(&["--filter", filter]);
        assert!(cli.apply(&mut Config::default()).is_err());
    }
}
