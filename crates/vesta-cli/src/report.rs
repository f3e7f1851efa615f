//! Catalog-versus-archive snapshot report.

use std::path::PathBuf;

use vesta_core::{AppError, CatalogEntry, Query};
use vesta_db::Archive;

/// One catalog entry and the archived file that covers it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub entry: CatalogEntry,
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotReport {
    pub date: String,
    pub rows: Vec<SnapshotRow>,
}

impl SnapshotReport {
    pub fn archived(&self) -> usize {
        self.rows.iter().filter(|r| r.file.is_some()).count()
    }

    pub fn missing(&self) -> usize {
        self.rows.len() - self.archived()
    }
}

/// Checks every catalog entry in scope of `query` against the archive as
/// it stood on `date`.
///
/// An entry counts as archived when its latest record on or before `date`
/// is a success.
pub fn snapshot_report(
    archive: &Archive,
    entries: Vec<CatalogEntry>,
    query: &Query,
    date: &str,
) -> Result<SnapshotReport, AppError> {
    let index = archive
        .log()
        .snapshot(&query.with_date(Some(date.to_string())))?;

    let rows = entries
        .into_iter()
        .filter(|e| query.matches_dataset(&e.domain, &e.dataset_id))
        .map(|entry| {
            let file = index
                .get(&entry.domain, &entry.dataset_id)
                .filter(|r| r.succeeded)
                .and_then(|r| archive.layout().record_file(r).ok());
            SnapshotRow { entry, file }
        })
        .collect();

    Ok(SnapshotReport {
        date: date.to_string(),
        rows,
    })
}
