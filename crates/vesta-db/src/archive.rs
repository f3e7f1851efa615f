//! Archive-level maintenance over the log and the dataset files.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{info, warn};
use vesta_core::error::AppError;
use vesta_core::models::{Record, RecordKey};
use vesta_core::query::Query;

use crate::layout::ArchiveLayout;
use crate::log::{ArchiveLog, CompactionStats};

/// File count and size of a set of archived datasets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub file_count: usize,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn add(&mut self, other: DiskUsage) {
        self.file_count += other.file_count;
        self.total_bytes += other.total_bytes;
    }
}

/// Result of [`Archive::delete_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteStats {
    pub log: CompactionStats,
    pub files_removed: usize,
}

/// An archive directory: its layout plus its download log.
///
/// # Examples
///
/// ```no_run
/// use vesta_core::Query;
/// use vesta_db::Archive;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let archive = Archive::open("/srv/archive")?;
/// let usage = archive.disk_usage(&Query::new().domain("data.example.org"))?;
/// println!("{} files", usage.file_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Archive {
    layout: ArchiveLayout,
    log: ArchiveLog,
}

impl Archive {
    /// Opens (and if needed creates) the archive directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or is not a directory.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let layout = ArchiveLayout::new(base_dir);
        layout.ensure_base_dir()?;
        let log = ArchiveLog::open(layout.log_file());
        Ok(Self { layout, log })
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn log(&self) -> &ArchiveLog {
        &self.log
    }

    /// Deletes the dataset files of `records` and compacts their keys out of
    /// the log.
    ///
    /// Every log record sharing a `(domain, dataset, date)` key with one of
    /// `records` is removed, since they all refer to the same file.
    pub fn delete_records(&mut self, records: &[Record]) -> Result<DeleteStats, AppError> {
        let excluded: HashSet<RecordKey> = records.iter().map(Record::record_key).collect();

        let mut files_removed = 0;
        for key in &excluded {
            let file = match self
                .layout
                .dataset_file(&key.domain, &key.download_date, &key.dataset_id)
            {
                Ok(file) => file,
                Err(e) => {
                    warn!("Not removing a file for {:?}: {}", key, e);
                    continue;
                }
            };
            match fs::remove_file(&file) {
                Ok(()) => files_removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Could not remove {}: {}", file.display(), e);
                }
            }
        }

        let log = self.log.compact(&excluded)?;
        info!(
            records = log.removed,
            files = files_removed,
            "Deleted archived datasets"
        );

        Ok(DeleteStats { log, files_removed })
    }

    /// Failed records matching `query` that can be removed without touching a
    /// successful download of the same dataset on the same day.
    pub fn removable_failures(&self, query: &Query) -> Result<Vec<Record>, AppError> {
        let matching = self.log.records_matching(query)?;
        let succeeded: HashSet<RecordKey> = matching
            .iter()
            .filter(|r| r.succeeded)
            .map(Record::record_key)
            .collect();

        Ok(matching
            .into_iter()
            .filter(|r| !r.succeeded && !succeeded.contains(&r.record_key()))
            .collect())
    }

    /// Counts the existing dataset files of the records matching `query`.
    ///
    /// Each file is counted once even if several records point at it.
    pub fn disk_usage(&self, query: &Query) -> Result<DiskUsage, AppError> {
        let mut usage = DiskUsage::default();
        for day in self.disk_usage_by_date(query)?.into_values() {
            usage.add(day);
        }
        Ok(usage)
    }

    /// Same as [`Archive::disk_usage`], broken down by download date.
    ///
    /// Dates that have records but no files left report zero usage.
    pub fn disk_usage_by_date(
        &self,
        query: &Query,
    ) -> Result<BTreeMap<String, DiskUsage>, AppError> {
        let layout = &self.layout;
        self.log.replay(|records| {
            let mut seen = HashSet::new();
            let mut usage: BTreeMap<String, DiskUsage> = BTreeMap::new();

            for record in records.filter(|r| query.matches(r)) {
                if !seen.insert(record.record_key()) {
                    continue;
                }
                let day = usage.entry(record.download_date.clone()).or_default();
                let Ok(file) = layout.record_file(&record) else {
                    continue;
                };
                if let Ok(meta) = fs::metadata(file) {
                    if meta.is_file() {
                        day.file_count += 1;
                        day.total_bytes += meta.len();
                    }
                }
            }
            usage
        })
    }
}

/// Formats a byte count with binary units, e.g. `1.5 KiB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_with(records: &[Record]) -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let writer = archive.log().writer().unwrap();
        for record in records {
            writer.append(record).unwrap();
            if record.succeeded {
                let file = archive.layout().record_file(record).unwrap();
                fs::create_dir_all(file.parent().unwrap()).unwrap();
                fs::write(&file, vec![b'x'; 100]).unwrap();
            }
        }
        (dir, archive)
    }

    #[test]
    fn test_disk_usage() {
        let (_dir, archive) = archive_with(&[
            Record::success("d1", "ds1", "20240101"),
            Record::success("d1", "ds2", "20240101"),
            Record::failure("d1", "ds3", "20240101"),
            Record::success("d2", "ds1", "20240102"),
        ]);

        let all = archive.disk_usage(&Query::new()).unwrap();
        assert_eq!(all, DiskUsage { file_count: 3, total_bytes: 300 });

        let d1 = archive.disk_usage(&Query::new().domain("d1")).unwrap();
        assert_eq!(d1.file_count, 2);

        let day = archive.disk_usage(&Query::new().date("20240102")).unwrap();
        assert_eq!(day.total_bytes, 100);
    }

    #[test]
    fn test_disk_usage_counts_shared_file_once() {
        let (_dir, archive) = archive_with(&[
            Record::failure("d1", "ds1", "20240101"),
            Record::success("d1", "ds1", "20240101"),
        ]);
        assert_eq!(archive.disk_usage(&Query::new()).unwrap().file_count, 1);
    }

    #[test]
    fn test_delete_records() {
        let (_dir, mut archive) = archive_with(&[
            Record::success("d1", "ds1", "20240101"),
            Record::success("d1", "ds2", "20240101"),
            Record::success("d1", "ds1", "20240102"),
        ]);
        let doomed = Record::success("d1", "ds1", "20240101");
        let doomed_file = archive.layout().record_file(&doomed).unwrap();
        assert!(doomed_file.exists());

        let stats = archive.delete_records(&[doomed]).unwrap();
        assert_eq!(stats.files_removed, 1);
        assert_eq!(stats.log.removed, 1);
        assert_eq!(stats.log.kept, 2);
        assert!(!doomed_file.exists());

        let index = archive.log().latest_index().unwrap();
        assert_eq!(index.get("d1", "ds1").unwrap().download_date, "20240102");
    }

    #[test]
    fn test_delete_records_never_leaves_archive() {
        let outer = tempfile::tempdir().unwrap();
        // where <archive>/../20240101/tsv/victim.tsv.gz resolves to
        let victim_dir = outer.path().join("20240101").join("tsv");
        fs::create_dir_all(&victim_dir).unwrap();
        let victim = victim_dir.join("victim.tsv.gz");
        fs::write(&victim, b"keep").unwrap();

        let base = outer.path().join("archive");
        let mut archive = Archive::open(&base).unwrap();
        let hostile = Record::failure("..", "victim", "20240101");
        archive.log().append(&hostile).unwrap();
        archive
            .log()
            .append(&Record::success("d1", "ds1", "20240101"))
            .unwrap();

        let stats = archive.delete_records(&[hostile]).unwrap();
        assert_eq!(stats.files_removed, 0);
        assert_eq!(stats.log.removed, 1);
        assert!(victim.exists());
        assert_eq!(archive.disk_usage(&Query::new()).unwrap().file_count, 0);
    }

    #[test]
    fn test_removable_failures_spare_same_day_success() {
        let (_dir, archive) = archive_with(&[
            Record::failure("d1", "ds1", "20240101"),
            Record::success("d1", "ds1", "20240101"),
            Record::failure("d1", "ds2", "20240101"),
            Record::failure("d2", "ds1", "20240101"),
        ]);

        let removable = archive
            .removable_failures(&Query::new().domain("d1"))
            .unwrap();
        assert_eq!(removable, vec![Record::failure("d1", "ds2", "20240101")]);
    }

    #[test]
    fn test_disk_usage_by_date() {
        let (_dir, archive) = archive_with(&[
            Record::success("d1", "ds1", "20240101"),
            Record::failure("d1", "ds2", "20240101"),
            Record::failure("d1", "ds2", "20240102"),
            Record::success("d1", "ds1", "20240103"),
        ]);

        let by_date = archive.disk_usage_by_date(&Query::new()).unwrap();
        let dates: Vec<_> = by_date.keys().map(String::as_str).collect();
        assert_eq!(dates, vec!["20240101", "20240102", "20240103"]);
        assert_eq!(by_date["20240101"].file_count, 1);
        assert_eq!(by_date["20240102"], DiskUsage::default());
        assert_eq!(by_date["20240103"].total_bytes, 100);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
