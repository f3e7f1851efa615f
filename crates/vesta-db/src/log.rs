//! Append-only download log.
//!
//! The log is a plain file of tab-separated lines
//! `domain \t dataset_id \t download_date \t S|F`, one per download attempt.
//! It only grows by appending, except for compaction, which rewrites it
//! without a set of keys.
//!
//! # Concurrency
//!
//! All fetch workers of a run share one [`LogWriter`]. Its
//! [`append`](LogWriter::append) is the only synchronized entry point: the
//! lock covers formatting, writing, and flushing one line. Compaction must
//! never run while a writer is alive; the caller enforces this.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::{debug, error, warn};
use vesta_core::error::AppError;
use vesta_core::models::{Record, RecordKey};
use vesta_core::query::Query;
use vesta_core::snapshot::SnapshotIndex;

/// Handle on the log file of one archive.
///
/// Opening a handle performs no I/O; a missing file reads as an empty log.
///
/// # Examples
///
/// ```no_run
/// use vesta_core::Record;
/// use vesta_db::ArchiveLog;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = ArchiveLog::open("/srv/archive/db.tsv");
/// log.append(&Record::success("data.example.org", "abcd-1234", "20240101"))?;
///
/// let index = log.latest_index()?;
/// println!("{} datasets archived", index.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveLog {
    path: PathBuf,
}

/// Counters reported by [`ArchiveLog::compact`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub kept: usize,
    pub removed: usize,
}

impl ArchiveLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the shared append handle, creating the file if needed.
    ///
    /// If a previous process died halfway through a line, the dangling
    /// fragment is terminated first so the next record starts on its own line.
    pub fn writer(&self) -> Result<LogWriter, AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if !ends_with_newline(&self.path)? {
            warn!(
                "Terminating partial trailing line in {}",
                self.path.display()
            );
            file.write_all(b"\n")?;
            file.flush()?;
        }

        Ok(LogWriter {
            path: self.path.clone(),
            file: Mutex::new(file),
        })
    }

    /// Appends a single record through a short-lived writer.
    ///
    /// Prefer [`ArchiveLog::writer`] when appending many records.
    pub fn append(&self, record: &Record) -> Result<(), AppError> {
        self.writer()?.append(record)
    }

    /// Lazily replays the log in append order.
    ///
    /// Every call reopens the file, so the sequence can be restarted. Lines
    /// that do not parse are skipped with a warning. A read error ends the
    /// sequence early and is kept for [`Records::take_error`]; prefer
    /// [`ArchiveLog::replay`] when a truncated replay must not go unnoticed.
    pub fn records(&self) -> Result<Records, AppError> {
        match File::open(&self.path) {
            Ok(file) => Ok(Records::new(
                self.path.clone(),
                Some(Box::new(BufReader::new(file))),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Records::new(self.path.clone(), None)),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `f` over the whole log and fails if the log could not be read
    /// to its end.
    pub fn replay<T>(&self, f: impl FnOnce(&mut Records) -> T) -> Result<T, AppError> {
        let mut records = self.records()?;
        let value = f(&mut records);
        records.finish()?;
        Ok(value)
    }

    /// Records matching `query` exactly, in append order.
    pub fn records_matching(&self, query: &Query) -> Result<Vec<Record>, AppError> {
        self.replay(|records| records.filter(|r| query.matches(r)).collect())
    }

    /// Latest-wins snapshot over the whole log.
    pub fn latest_index(&self) -> Result<SnapshotIndex, AppError> {
        self.replay(|records| SnapshotIndex::latest(records))
    }

    /// Snapshot of the datasets matching `query` as they stood on the
    /// query's date (or now, if the query has no date).
    pub fn snapshot(&self, query: &Query) -> Result<SnapshotIndex, AppError> {
        self.replay(|records| SnapshotIndex::matching(records, query))
    }

    /// Rewrites the log without the records whose key is in `excluded`.
    ///
    /// The surviving lines go to a temporary file next to the log, which then
    /// atomically replaces it. Unparseable lines are dropped. If the log
    /// cannot be read to its end it is left untouched.
    ///
    /// Takes `&mut self` as a reminder that no [`LogWriter`] may be in use.
    pub fn compact(&mut self, excluded: &HashSet<RecordKey>) -> Result<CompactionStats, AppError> {
        if !self.path.exists() {
            return Ok(CompactionStats::default());
        }
        let records = self.records()?;
        self.rewrite(records, excluded)
    }

    fn rewrite(
        &self,
        mut records: Records,
        excluded: &HashSet<RecordKey>,
    ) -> Result<CompactionStats, AppError> {
        let mut stats = CompactionStats::default();

        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;

        for record in records.by_ref() {
            if excluded.contains(&record.record_key()) {
                stats.removed += 1;
            } else {
                writeln!(tmp, "{}", record.to_tsv_line())?;
                stats.kept += 1;
            }
        }
        records.finish()?;

        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::Io(e.error))?;

        debug!(
            kept = stats.kept,
            removed = stats.removed,
            "Compacted {}",
            self.path.display()
        );
        Ok(stats)
    }

    /// Distinct download dates, ascending.
    pub fn download_dates(&self) -> Result<Vec<String>, AppError> {
        let dates: BTreeSet<String> =
            self.replay(|records| records.map(|r| r.download_date).collect())?;
        Ok(dates.into_iter().collect())
    }

    /// Number of records per download date, ascending by date.
    pub fn download_date_stats(&self) -> Result<BTreeMap<String, usize>, AppError> {
        self.replay(|records| {
            let mut stats = BTreeMap::new();
            for record in records {
                *stats.entry(record.download_date).or_insert(0) += 1;
            }
            stats
        })
    }

    /// Most recent download date in the log, if any.
    pub fn last_download_date(&self) -> Result<Option<String>, AppError> {
        self.replay(|records| records.map(|r| r.download_date).max())
    }
}

fn ends_with_newline(path: &Path) -> Result<bool, AppError> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Synchronized append handle shared by concurrent workers.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record as one line and flushes it.
    ///
    /// When this returns `Ok` the line has been handed to the OS; a process
    /// crash afterwards cannot lose it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CorruptLogLine` without writing anything if a field
    /// contains a tab or line break, and `AppError::Io` if the write fails.
    pub fn append(&self, record: &Record) -> Result<(), AppError> {
        if !record.is_encodable() {
            return Err(AppError::CorruptLogLine(record.to_tsv_line()));
        }
        let line = format!("{}\n", record.to_tsv_line());

        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Lazy iterator over the records of a log file.
pub struct Records {
    path: PathBuf,
    reader: Option<Box<dyn BufRead + Send>>,
    line_no: usize,
    buf: Vec<u8>,
    error: Option<io::Error>,
}

impl Records {
    fn new(path: PathBuf, reader: Option<Box<dyn BufRead + Send>>) -> Self {
        Self {
            path,
            reader,
            line_no: 0,
            buf: Vec::new(),
            error: None,
        }
    }

    /// The read error that ended the iteration early, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Fails with the read error that ended the iteration early, if any.
    pub fn finish(&mut self) -> Result<(), AppError> {
        match self.take_error() {
            Some(e) => Err(AppError::Io(e)),
            None => Ok(()),
        }
    }
}

impl Iterator for Records {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();

            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "Stopped reading {} at line {}: {}",
                        self.path.display(),
                        self.line_no + 1,
                        e
                    );
                    self.reader = None;
                    self.error = Some(e);
                    return None;
                }
            }
            self.line_no += 1;

            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line,
                Err(_) => {
                    warn!(
                        "Skipping non UTF-8 line {} in {}",
                        self.line_no,
                        self.path.display()
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match Record::from_tsv_line(line) {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!("{}:{}: {}", self.path.display(), self.line_no, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;
    use std::thread;

    /// Reader that fails on every call, standing in for a disk error.
    struct BrokenDisk;

    impl Read for BrokenDisk {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("input/output error"))
        }
    }

    /// Records whose reader yields `head` and then fails.
    fn failing_records(path: &Path, head: &str) -> Records {
        let reader = Cursor::new(head.as_bytes().to_vec()).chain(BrokenDisk);
        Records::new(path.to_path_buf(), Some(Box::new(BufReader::new(reader))))
    }

    fn temp_log() -> (tempfile::TempDir, ArchiveLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = ArchiveLog::open(dir.path().join("db.tsv"));
        (dir, log)
    }

    fn sample_records() -> Vec<Record> {
        vec![
            Record::success("d1", "ds1", "20240101"),
            Record::failure("d1", "ds2", "20240101"),
            Record::success("d2", "ds1", "20240102"),
            Record::success("d1", "ds2", "20240102"),
            Record::success("d1", "ds1", "20231231"),
        ]
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, log) = temp_log();
        assert_eq!(log.records().unwrap().count(), 0);
        assert!(log.latest_index().unwrap().is_empty());
        assert_eq!(log.last_download_date().unwrap(), None);
    }

    #[test]
    fn test_append_then_replay_in_order() {
        let (_dir, log) = temp_log();
        let writer = log.writer().unwrap();
        for record in sample_records() {
            writer.append(&record).unwrap();
        }

        let replayed: Vec<Record> = log.records().unwrap().collect();
        assert_eq!(replayed, sample_records());

        // restartable
        assert_eq!(log.records().unwrap().count(), 5);
    }

    #[test]
    fn test_file_format() {
        let (_dir, log) = temp_log();
        log.append(&Record::success("d1", "ds1", "20240101")).unwrap();
        log.append(&Record::failure("d1", "ds2", "20240101")).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw, "d1\tds1\t20240101\tS\nd1\tds2\t20240101\tF\n");
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let (_dir, log) = temp_log();
        fs::write(
            log.path(),
            "d1\tds1\t20240101\tS\ngarbage\n\nd1\tds2\t20240101\tQ\nd2\tds1\t20240102\tF\n",
        )
        .unwrap();

        let replayed: Vec<Record> = log.records().unwrap().collect();
        assert_eq!(
            replayed,
            vec![
                Record::success("d1", "ds1", "20240101"),
                Record::failure("d2", "ds1", "20240102"),
            ]
        );
    }

    #[test]
    fn test_writer_terminates_partial_line() {
        let (_dir, log) = temp_log();
        fs::write(log.path(), "d1\tds1\t20240101\tS\nd1\tds2\t2024").unwrap();

        log.append(&Record::success("d1", "ds3", "20240101")).unwrap();

        let replayed: Vec<Record> = log.records().unwrap().collect();
        assert_eq!(
            replayed,
            vec![
                Record::success("d1", "ds1", "20240101"),
                Record::success("d1", "ds3", "20240101"),
            ]
        );
    }

    #[test]
    fn test_append_rejects_unencodable_record() {
        let (_dir, log) = temp_log();
        let result = log.append(&Record::success("d1", "bad\tid", "20240101"));
        assert!(matches!(result, Err(AppError::CorruptLogLine(_))));
        assert_eq!(log.records().unwrap().count(), 0);
    }

    #[test]
    fn test_concurrent_appends_keep_every_line() {
        let (_dir, log) = temp_log();
        let writer = Arc::new(log.writer().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for i in 0..250 {
                        let id = format!("w{}-{}", worker, i);
                        writer
                            .append(&Record::success("d1", id, "20240101"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let index = log.latest_index().unwrap();
        assert_eq!(log.records().unwrap().count(), 1000);
        assert_eq!(index.len(), 1000);
    }

    #[test]
    fn test_latest_index_append_order_wins() {
        let (_dir, log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }

        let index = log.latest_index().unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.get("d1", "ds1").unwrap().download_date, "20231231");
        assert!(index.get("d1", "ds2").unwrap().succeeded);
    }

    #[test]
    fn test_snapshot_as_of_query_date() {
        let (_dir, log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }

        let index = log.snapshot(&Query::new().domain("d1").date("20240101")).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("d1", "ds1").unwrap().download_date, "20231231");
        assert!(!index.get("d1", "ds2").unwrap().succeeded);
    }

    #[test]
    fn test_records_matching() {
        let (_dir, log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }

        let matched = log
            .records_matching(&Query::new().date("20240102"))
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|r| r.download_date == "20240102"));
    }

    #[test]
    fn test_compact_removes_excluded_keys_in_order() {
        let (_dir, mut log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }

        let excluded: HashSet<RecordKey> = [
            Record::failure("d1", "ds2", "20240101").record_key(),
            Record::success("d2", "ds1", "20240102").record_key(),
            Record::success("zz", "absent", "20240102").record_key(),
        ]
        .into_iter()
        .collect();

        let stats = log.compact(&excluded).unwrap();
        assert_eq!(stats, CompactionStats { kept: 3, removed: 2 });

        let replayed: Vec<Record> = log.records().unwrap().collect();
        assert_eq!(
            replayed,
            vec![
                Record::success("d1", "ds1", "20240101"),
                Record::success("d1", "ds2", "20240102"),
                Record::success("d1", "ds1", "20231231"),
            ]
        );
    }

    #[test]
    fn test_read_error_is_kept() {
        let (_dir, log) = temp_log();
        let mut records = failing_records(log.path(), "d1\tds1\t20240101\tS\n");

        let replayed: Vec<Record> = records.by_ref().collect();
        assert_eq!(replayed, vec![Record::success("d1", "ds1", "20240101")]);
        assert!(matches!(records.finish(), Err(AppError::Io(_))));
        assert!(records.take_error().is_none());
    }

    #[test]
    fn test_failed_compaction_leaves_log_untouched() {
        let (dir, log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }
        let before = fs::read_to_string(log.path()).unwrap();

        let records = failing_records(log.path(), "d1\tds1\t20240101\tS\n");
        let excluded: HashSet<RecordKey> =
            [Record::failure("d1", "ds2", "20240101").record_key()].into_iter().collect();
        let result = log.rewrite(records, &excluded);

        assert!(matches!(result, Err(AppError::Io(_))));
        assert_eq!(fs::read_to_string(log.path()).unwrap(), before);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_compact_missing_log_is_noop() {
        let (_dir, mut log) = temp_log();
        let stats = log.compact(&HashSet::new()).unwrap();
        assert_eq!(stats, CompactionStats::default());
        assert!(!log.path().exists());
    }

    #[test]
    fn test_date_reporting() {
        let (_dir, log) = temp_log();
        for record in sample_records() {
            log.append(&record).unwrap();
        }

        assert_eq!(
            log.download_dates().unwrap(),
            vec!["20231231", "20240101", "20240102"]
        );
        let stats = log.download_date_stats().unwrap();
        assert_eq!(stats.get("20240101"), Some(&2));
        assert_eq!(stats.get("20240102"), Some(&2));
        assert_eq!(stats.get("20231231"), Some(&1));
        assert_eq!(log.last_download_date().unwrap().as_deref(), Some("20240102"));
    }
}
