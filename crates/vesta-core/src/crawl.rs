//! Outcome bookkeeping for one crawl run.

use crate::diff::DiffStats;

/// Outcome of fetching a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Resource streamed to disk and recorded as a success
    Downloaded,
    /// Destination already existed from an earlier run; only the record was written
    Reused,
    /// Fetch or filesystem error; recorded as a failure
    Failed,
}

impl FetchOutcome {
    /// Whether the record appended for this outcome is a success.
    pub fn succeeded(self) -> bool {
        !matches!(self, FetchOutcome::Failed)
    }
}

/// Statistics for the fetch phase of a crawl.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub downloaded: usize,
    pub reused: usize,
    pub failed: usize,
    /// Candidates whose record could not be appended to the log
    pub unlogged: usize,
    /// Candidates dropped before fetching because no URL could be derived
    pub skipped: usize,
    /// Bytes streamed in this run
    pub bytes: u64,
}

impl CrawlStats {
    /// Creates a new empty stats tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an outcome, incrementing the appropriate counter.
    pub fn record(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Downloaded => self.downloaded += 1,
            FetchOutcome::Reused => self.reused += 1,
            FetchOutcome::Failed => self.failed += 1,
        }
    }

    /// Adds another worker's counters to this one.
    pub fn merge(&mut self, other: &CrawlStats) {
        self.downloaded += other.downloaded;
        self.reused += other.reused;
        self.failed += other.failed;
        self.unlogged += other.unlogged;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }

    /// Returns the number of candidates that reached the append step.
    pub fn total(&self) -> usize {
        self.downloaded + self.reused + self.failed
    }

    /// Returns the number of successful records written or attempted.
    pub fn successful(&self) -> usize {
        self.downloaded + self.reused
    }

    /// Returns the number of records actually appended to the log.
    pub fn logged(&self) -> usize {
        self.total() - self.unlogged
    }
}

/// Summary of a complete diff-and-fetch cycle.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    /// Download date key used for this run.
    pub date: String,
    pub diff: DiffStats,
    pub fetch: CrawlStats,
}

impl CrawlSummary {
    /// True when every candidate ended in a logged success.
    pub fn is_clean(&self) -> bool {
        self.fetch.failed == 0 && self.fetch.unlogged == 0 && self.fetch.skipped == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_stats_default() {
        let stats = CrawlStats::new();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.logged(), 0);
    }

    #[test]
    fn test_crawl_stats_record() {
        let mut stats = CrawlStats::new();
        stats.record(FetchOutcome::Downloaded);
        stats.record(FetchOutcome::Reused);
        stats.record(FetchOutcome::Failed);
        stats.record(FetchOutcome::Failed);

        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total(), 4);
        assert_eq!(stats.successful(), 2);
    }

    #[test]
    fn test_crawl_stats_merge() {
        let mut a = CrawlStats {
            downloaded: 2,
            failed: 1,
            bytes: 100,
            ..CrawlStats::default()
        };
        let b = CrawlStats {
            downloaded: 1,
            reused: 3,
            unlogged: 1,
            bytes: 50,
            ..CrawlStats::default()
        };
        a.merge(&b);

        assert_eq!(a.downloaded, 3);
        assert_eq!(a.reused, 3);
        assert_eq!(a.failed, 1);
        assert_eq!(a.bytes, 150);
        assert_eq!(a.total(), 7);
        assert_eq!(a.logged(), 6);
    }

    #[test]
    fn test_fetch_outcome_succeeded() {
        assert!(FetchOutcome::Downloaded.succeeded());
        assert!(FetchOutcome::Reused.succeeded());
        assert!(!FetchOutcome::Failed.succeeded());
    }

    #[test]
    fn test_summary_is_clean() {
        let mut summary = CrawlSummary::default();
        assert!(summary.is_clean());
        summary.fetch.failed = 1;
        assert!(!summary.is_clean());
    }
}
