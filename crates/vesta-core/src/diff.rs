//! Change detection between the remote catalog and the archive.
//!
//! This module provides pure business logic for deciding which catalog
//! entries need a (re)download, decoupled from I/O and worker orchestration.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::date::catalog_day;
use crate::models::{CatalogEntry, Record};
use crate::query::Query;
use crate::snapshot::SnapshotIndex;

/// Classification of one catalog entry during diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Never recorded in the archive
    New,
    /// Last recorded attempt failed
    RetryFailed,
    /// Modified in the catalog after the last successful download day
    Modified,
    /// Successfully downloaded on or after the last modification day
    UpToDate,
    /// Filtered out by the crawl scope
    OutOfScope,
    /// Last-modified timestamp could not be interpreted
    InvalidTimestamp,
    /// Permalink cannot be turned into a download URL
    MalformedLink,
    /// Domain or identifier cannot name a file inside the archive
    UnsafeName,
    /// Same dataset already selected earlier in this catalog
    Duplicate,
}

/// Result of comparing one catalog entry with its archive record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDecision {
    /// Whether the dataset must be fetched in this run
    pub needs_download: bool,
    /// The outcome classification for this entry
    pub outcome: DiffOutcome,
    /// Human-readable reason for the decision
    pub reason: &'static str,
}

/// Decides whether a dataset needs downloading.
///
/// # Arguments
/// * `existing` - The latest archive record for the dataset (None if never seen)
/// * `modified_day` - The catalog's last-modified day as `YYYYMMDD`
///
/// # Returns
/// A `DownloadDecision`. Failed records always qualify; successful ones only
/// when the catalog day is strictly after the recorded download day.
pub fn needs_download(existing: Option<&Record>, modified_day: &str) -> DownloadDecision {
    match existing {
        None => DownloadDecision {
            needs_download: true,
            outcome: DiffOutcome::New,
            reason: "not in archive",
        },
        Some(record) if !record.succeeded => DownloadDecision {
            needs_download: true,
            outcome: DiffOutcome::RetryFailed,
            reason: "last download failed",
        },
        Some(record) if modified_day > record.download_date.as_str() => DownloadDecision {
            needs_download: true,
            outcome: DiffOutcome::Modified,
            reason: "modified after last download",
        },
        Some(_) => DownloadDecision {
            needs_download: false,
            outcome: DiffOutcome::UpToDate,
            reason: "archive copy is current",
        },
    }
}

/// Per-outcome counters for one diff pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffStats {
    pub new: usize,
    pub retry_failed: usize,
    pub modified: usize,
    pub up_to_date: usize,
    pub out_of_scope: usize,
    pub invalid_timestamp: usize,
    pub malformed_link: usize,
    pub unsafe_name: usize,
    pub duplicate: usize,
}

impl DiffStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: DiffOutcome) {
        match outcome {
            DiffOutcome::New => self.new += 1,
            DiffOutcome::RetryFailed => self.retry_failed += 1,
            DiffOutcome::Modified => self.modified += 1,
            DiffOutcome::UpToDate => self.up_to_date += 1,
            DiffOutcome::OutOfScope => self.out_of_scope += 1,
            DiffOutcome::InvalidTimestamp => self.invalid_timestamp += 1,
            DiffOutcome::MalformedLink => self.malformed_link += 1,
            DiffOutcome::UnsafeName => self.unsafe_name += 1,
            DiffOutcome::Duplicate => self.duplicate += 1,
        }
    }

    /// Number of entries selected for download.
    pub fn candidates(&self) -> usize {
        self.new + self.retry_failed + self.modified
    }

    /// Number of in-scope entries skipped because their metadata is unusable.
    pub fn malformed(&self) -> usize {
        self.invalid_timestamp + self.malformed_link + self.unsafe_name
    }

    /// Returns the total number of catalog entries inspected.
    pub fn total(&self) -> usize {
        self.candidates()
            + self.up_to_date
            + self.out_of_scope
            + self.malformed()
            + self.duplicate
    }
}

/// Candidates selected for download plus the statistics of the pass.
#[derive(Debug, Clone, Default)]
pub struct CatalogDiff {
    pub candidates: Vec<CatalogEntry>,
    pub stats: DiffStats,
}

impl CatalogDiff {
    /// Classifies a single entry against the index.
    ///
    /// Does not detect duplicates; [`CatalogDiff::compute`] does that across
    /// the whole catalog.
    pub fn classify(entry: &CatalogEntry, index: &SnapshotIndex, scope: &Query) -> DiffOutcome {
        if !scope.matches_dataset(&entry.domain, &entry.dataset_id) {
            return DiffOutcome::OutOfScope;
        }

        let modified_day = match catalog_day(&entry.last_modified_at) {
            Ok(day) => day,
            Err(e) => {
                warn!(
                    domain = %entry.domain,
                    dataset = %entry.dataset_id,
                    "Skipping entry: {}",
                    e
                );
                return DiffOutcome::InvalidTimestamp;
            }
        };

        let decision = needs_download(index.get(&entry.domain, &entry.dataset_id), &modified_day);
        if !decision.needs_download {
            return decision.outcome;
        }

        if let Err(e) = entry.validate_names() {
            warn!(
                domain = %entry.domain,
                dataset = %entry.dataset_id,
                "Skipping entry: {}",
                e
            );
            return DiffOutcome::UnsafeName;
        }

        if let Err(e) = entry.resource_url() {
            warn!(
                domain = %entry.domain,
                dataset = %entry.dataset_id,
                "Skipping entry: {}",
                e
            );
            return DiffOutcome::MalformedLink;
        }

        debug!(
            domain = %entry.domain,
            dataset = %entry.dataset_id,
            "Selected for download: {}",
            decision.reason
        );
        decision.outcome
    }

    /// Runs the diff over a whole catalog.
    ///
    /// # Arguments
    /// * `entries` - Every entry of the catalog snapshot, in any order
    /// * `index` - Latest-wins snapshot of the archive log
    /// * `scope` - Domain/dataset filter of this crawl (its date is ignored)
    ///
    /// # Returns
    /// Each qualifying dataset exactly once, in catalog order.
    pub fn compute<I>(entries: I, index: &SnapshotIndex, scope: &Query) -> Self
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let mut diff = CatalogDiff::default();
        let mut selected = HashSet::new();

        for entry in entries {
            let mut outcome = Self::classify(&entry, index, scope);
            let is_candidate = matches!(
                outcome,
                DiffOutcome::New | DiffOutcome::RetryFailed | DiffOutcome::Modified
            );

            if is_candidate && !selected.insert(entry.key()) {
                outcome = DiffOutcome::Duplicate;
            }

            diff.stats.record(outcome);
            if is_candidate && outcome != DiffOutcome::Duplicate {
                diff.candidates.push(entry);
            }
        }

        diff
    }
}
