//! Vesta Core - Archive records, snapshot replay, change detection, and configuration.

pub mod config;
pub mod crawl;
pub mod date;
pub mod diff;
pub mod error;
pub mod models;
pub mod query;
pub mod snapshot;

pub use config::{
    default_config_path, load_config, CrawlConfig, FileConfig, HttpConfig, DEFAULT_WORKERS,
};
pub use crawl::{CrawlStats, CrawlSummary, FetchOutcome};
pub use date::{catalog_day, today_key, validate_date_key};
pub use diff::{needs_download, CatalogDiff, DiffOutcome, DiffStats, DownloadDecision};
pub use error::AppError;
pub use models::{validate_path_component, CatalogEntry, DatasetKey, Record, RecordKey};
pub use query::Query;
pub use snapshot::SnapshotIndex;
