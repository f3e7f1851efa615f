use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vesta_core::{validate_date_key, Query};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "vesta")]
#[command(
    author,
    version,
    about = "Incremental, versioned archive of Socrata open data"
)]
#[command(after_help = "Examples:
  vesta --dir /srv/socrata download --domain data.cityofnewyork.us
  vesta snapshot --date 20240115 --stats
  vesta du --domain data.cityofnewyork.us
  vesta remove --failed --report")]
pub struct Config {
    /// Archive base directory (default: current directory)
    #[arg(long, global = true, env = "VESTA_ARCHIVE_DIR", value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Custom path to the config.toml file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Domain / dataset / date restriction shared by most commands.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Only this catalog domain
    #[arg(long, env = "VESTA_DOMAIN")]
    pub domain: Option<String>,

    /// Only this dataset identifier
    #[arg(long)]
    pub dataset: Option<String>,

    /// Download date as YYYYMMDD
    #[arg(long, value_parser = parse_date_key)]
    pub date: Option<String>,
}

impl FilterArgs {
    /// The query described by these flags, falling back to `default_domain`
    /// when no domain was given.
    pub fn query(&self, default_domain: Option<&str>) -> Query {
        Query::from_parts(
            self.domain
                .clone()
                .or_else(|| default_domain.map(str::to_string)),
            self.dataset.clone(),
            self.date.clone(),
        )
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download new, modified, and previously failed datasets
    #[command(after_help = "Examples:
  vesta download                                  # Crawl today's catalog snapshot
  vesta download --domain data.example.org        # Restrict to one domain
  vesta download --catalog ./catalog.jsonl        # Use a specific snapshot file
  vesta download --date 20240115 --workers 12     # Explicit run date and pool size")]
    Download {
        #[command(flatten)]
        filter: FilterArgs,

        /// Number of concurrent fetch workers
        #[arg(long, env = "VESTA_WORKERS")]
        workers: Option<usize>,

        /// Catalog snapshot file (default: catalog/<date>/catalog.jsonl[.gz])
        #[arg(long, value_name = "PATH")]
        catalog: Option<PathBuf>,
    },
    /// Compare a catalog snapshot with the archive as of a date (default: last download)
    Snapshot {
        #[command(flatten)]
        filter: FilterArgs,

        /// Catalog snapshot file (default: catalog/<date>/catalog.jsonl[.gz])
        #[arg(long, value_name = "PATH")]
        catalog: Option<PathBuf>,

        /// Print only the summary counts
        #[arg(long)]
        stats: bool,
    },
    /// List download records
    Datasets {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// List download dates with their record counts
    Dates,
    /// Disk usage of downloaded files (per date unless --date is given)
    Du {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Remove download records and their files
    #[command(after_help = "Examples:
  vesta remove --domain data.example.org --date 20240101 --report
  vesta remove --failed")]
    Remove {
        #[command(flatten)]
        filter: FilterArgs,

        /// Only failed downloads without a successful retry on the same day
        #[arg(long)]
        failed: bool,

        /// List what would be removed without removing it
        #[arg(long)]
        report: bool,
    },
}

fn parse_date_key(value: &str) -> Result<String, String> {
    validate_date_key(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download() {
        let config = Config::try_parse_from([
            "vesta",
            "--dir",
            "/srv/archive",
            "download",
            "--domain",
            "d1",
            "--date",
            "20240115",
            "--workers",
            "3",
        ])
        .unwrap();

        assert_eq!(config.dir, Some(PathBuf::from("/srv/archive")));
        match config.command {
            Command::Download {
                filter, workers, ..
            } => {
                assert_eq!(filter.domain.as_deref(), Some("d1"));
                assert_eq!(filter.date.as_deref(), Some("20240115"));
                assert_eq!(workers, Some(3));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_date_rejected() {
        let result = Config::try_parse_from(["vesta", "datasets", "--date", "2024-01-15"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_dir_after_subcommand() {
        let config = Config::try_parse_from(["vesta", "dates", "--dir", "x"]).unwrap();
        assert_eq!(config.dir, Some(PathBuf::from("x")));
    }

    #[test]
    fn test_filter_query_default_domain() {
        let filter = FilterArgs {
            dataset: Some("ds1".to_string()),
            ..FilterArgs::default()
        };
        assert_eq!(
            filter.query(Some("d1")),
            Query::new().domain("d1").dataset("ds1")
        );

        let explicit = FilterArgs {
            domain: Some("d2".to_string()),
            ..FilterArgs::default()
        };
        assert_eq!(explicit.query(Some("d1")), Query::new().domain("d2"));
    }
}
