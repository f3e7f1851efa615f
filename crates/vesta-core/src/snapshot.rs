//! Point-in-time views derived by replaying the archive log.
//!
//! A [`SnapshotIndex`] is never persisted. It is rebuilt from the log with a
//! single linear pass whenever it is needed and dropped after use. Callers
//! may keep one for the duration of a run but never across runs, since the
//! log grows in between.

use std::collections::HashMap;

use crate::models::{DatasetKey, Record};
use crate::query::Query;

/// Latest record per `(domain, dataset_id)`.
///
/// Precedence follows append order. A record seen later replaces any earlier
/// one for the same key even if its download date is older.
///
/// # Examples
///
/// ```
/// use vesta_core::{Record, SnapshotIndex};
///
/// let log = vec![
///     Record::success("d1", "ds1", "20240105"),
///     Record::failure("d1", "ds1", "20240101"),
/// ];
///
/// let latest = SnapshotIndex::latest(log.clone());
/// assert!(!latest.get("d1", "ds1").unwrap().succeeded);
///
/// let as_of = SnapshotIndex::as_of(log, "20240103");
/// assert_eq!(as_of.get("d1", "ds1").unwrap().download_date, "20240101");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotIndex {
    entries: HashMap<DatasetKey, Record>,
}

impl SnapshotIndex {
    /// Latest-wins replay over every record.
    pub fn latest<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        Self::replay(records, |_| true)
    }

    /// Latest-wins replay over records downloaded on or before `cutoff`.
    pub fn as_of<I>(records: I, cutoff: &str) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        Self::replay(records, |record| record.download_date.as_str() <= cutoff)
    }

    /// Latest-wins replay over records accepted by
    /// [`Query::matches_at_or_before`].
    ///
    /// Without a date on the query this is a scoped [`SnapshotIndex::latest`];
    /// with one it is a scoped [`SnapshotIndex::as_of`].
    pub fn matching<I>(records: I, query: &Query) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        Self::replay(records, |record| query.matches_at_or_before(record))
    }

    fn replay<I, F>(records: I, accept: F) -> Self
    where
        I: IntoIterator<Item = Record>,
        F: Fn(&Record) -> bool,
    {
        let mut entries = HashMap::new();
        for record in records.into_iter().filter(|r| accept(r)) {
            entries.insert(record.key(), record);
        }
        Self { entries }
    }

    pub fn get(&self, domain: &str, dataset_id: &str) -> Option<&Record> {
        self.entries.get(&DatasetKey::new(domain, dataset_id))
    }

    pub fn get_key(&self, key: &DatasetKey) -> Option<&Record> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &DatasetKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys whose current record is a success.
    pub fn successful(&self) -> usize {
        self.entries.values().filter(|r| r.succeeded).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DatasetKey, &Record)> {
        self.entries.iter()
    }

    /// Records ordered by domain, then dataset.
    pub fn into_sorted_records(self) -> Vec<Record> {
        let mut records: Vec<Record> = self.entries.into_values().collect();
        records.sort_by(|a, b| {
            (a.domain.as_str(), a.dataset_id.as_str())
                .cmp(&(b.domain.as_str(), b.dataset_id.as_str()))
        });
        records
    }
}
