//! Vesta CLI - Crawl orchestration and the `vesta` command-line interface
//!
//! This crate ties the archive log, the catalog reader, and the HTTP fetcher
//! together into crawl runs and reporting commands.

pub mod config;
pub mod crawl;
pub mod report;

pub use config::{Command, Config, FilterArgs};
pub use crawl::{run_crawl, CrawlParams, FetchWorkerPool};
pub use report::{snapshot_report, SnapshotReport, SnapshotRow};
