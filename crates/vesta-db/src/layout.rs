//! On-disk layout of an archive directory.
//!
//! ```text
//! <base>/db.tsv                                 download log
//! <base>/catalog/<date>/catalog.jsonl[.gz]       catalog snapshot of a run
//! <base>/<domain>/<date>/tsv/<dataset>.tsv.gz    downloaded resources
//! <base>/logs/<date>.log                         run diagnostics
//! ```
//!
//! Dataset paths are partitioned by `(domain, date, dataset)`, so two workers
//! of the same run never write to the same file. Each of the three must be a
//! single plain file name; anything else is rejected before it reaches
//! [`Path::join`].

use std::fs;
use std::path::{Path, PathBuf};

use vesta_core::error::AppError;
use vesta_core::models::{validate_path_component, Record};

/// File name of the download log.
pub const LOG_FILE: &str = "db.tsv";

#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    base_dir: PathBuf,
}

impl ArchiveLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates the base directory if needed and checks that it is a directory.
    pub fn ensure_base_dir(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.base_dir)?;
        if !self.base_dir.is_dir() {
            return Err(AppError::Generic(format!(
                "{} is not a directory",
                self.base_dir.display()
            )));
        }
        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE)
    }

    /// Catalog snapshot of `date`: the gzipped file when present, the plain
    /// one otherwise.
    pub fn catalog_file(&self, date: &str) -> PathBuf {
        let dir = self.base_dir.join("catalog").join(date);
        let gzipped = dir.join("catalog.jsonl.gz");
        if gzipped.is_file() {
            gzipped
        } else {
            dir.join("catalog.jsonl")
        }
    }

    /// # Errors
    ///
    /// Returns `AppError::UnsafeName` if any argument is not a single plain
    /// file name.
    pub fn dataset_file(
        &self,
        domain: &str,
        date: &str,
        dataset_id: &str,
    ) -> Result<PathBuf, AppError> {
        for component in [domain, date, dataset_id] {
            validate_path_component(component)?;
        }
        Ok(self
            .base_dir
            .join(domain)
            .join(date)
            .join("tsv")
            .join(format!("{}.tsv.gz", dataset_id)))
    }

    pub fn record_file(&self, record: &Record) -> Result<PathBuf, AppError> {
        self.dataset_file(&record.domain, &record.download_date, &record.dataset_id)
    }

    pub fn run_log_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn run_log_name(date: &str) -> String {
        format!("{}.log", date)
    }
}
