//! Crawl orchestration: diff the catalog against the archive, then drain the
//! candidates with a fixed pool of fetch workers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vesta_client::{read_catalog, ResourceFetcher};
use vesta_core::{
    today_key, AppError, CatalogDiff, CatalogEntry, CrawlConfig, CrawlStats, CrawlSummary,
    FetchOutcome, Query, Record,
};
use vesta_db::{Archive, ArchiveLayout, LogWriter};

/// Parameters of one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlParams {
    pub base_dir: PathBuf,
    /// Domain/dataset restriction; its date is ignored
    pub scope: Query,
    /// Download date key of the run, today when absent
    pub date: Option<String>,
    /// Catalog snapshot to read instead of `catalog/<date>/catalog.jsonl[.gz]`
    pub catalog: Option<PathBuf>,
    pub crawl: CrawlConfig,
}

/// Fixed-size pool of workers draining one crawl's candidate queue.
///
/// Every candidate that gets as far as the fetch step produces exactly one
/// appended [`Record`], success or failure. The log writer is the only state
/// the workers share besides the queue.
pub struct FetchWorkerPool<F: ResourceFetcher> {
    fetcher: Arc<F>,
    writer: Arc<LogWriter>,
    layout: ArchiveLayout,
    date: String,
    config: CrawlConfig,
}

impl<F: ResourceFetcher> FetchWorkerPool<F> {
    pub fn new(
        fetcher: F,
        writer: LogWriter,
        layout: ArchiveLayout,
        date: impl Into<String>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            writer: Arc::new(writer),
            layout,
            date: date.into(),
            config,
        }
    }

    /// Drains `candidates` and returns the merged worker statistics.
    ///
    /// Workers are tokio tasks on the multi-threaded runtime. If the drain
    /// outlasts `drain_timeout` the remaining workers are aborted and the
    /// statistics gathered so far are returned.
    pub async fn run(&self, candidates: Vec<CatalogEntry>) -> CrawlStats {
        if candidates.is_empty() {
            info!("No candidates to fetch");
            return CrawlStats::new();
        }

        let total = candidates.len();
        let workers = self.config.effective_workers().min(total);
        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let stats = Arc::new(Mutex::new(CrawlStats::new()));

        info!("Fetching {} datasets with {} workers", total, workers);

        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    fetcher: Arc::clone(&self.fetcher),
                    writer: Arc::clone(&self.writer),
                    layout: self.layout.clone(),
                    date: self.date.clone(),
                    queue: Arc::clone(&queue),
                    stats: Arc::clone(&stats),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(self.config.drain_timeout, join_all(handles)).await {
            Ok(results) => {
                for (id, result) in results.into_iter().enumerate() {
                    if let Err(e) = result {
                        error!("Fetch worker {} terminated abnormally: {}", id, e);
                    }
                }
            }
            Err(_) => {
                let remaining = lock(&queue).len();
                error!(
                    "Workers did not finish within {:?}; aborting with {} candidates left",
                    self.config.drain_timeout, remaining
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        let stats = lock(&stats).clone();
        stats
    }
}

struct Worker<F> {
    id: usize,
    fetcher: Arc<F>,
    writer: Arc<LogWriter>,
    layout: ArchiveLayout,
    date: String,
    queue: Arc<Mutex<VecDeque<CatalogEntry>>>,
    stats: Arc<Mutex<CrawlStats>>,
}

impl<F: ResourceFetcher> Worker<F> {
    async fn run(self) {
        debug!("Fetch worker {} started", self.id);
        loop {
            let next = lock(&self.queue).pop_front();
            let Some(entry) = next else {
                break;
            };
            let item = self.process(&entry).await;
            lock(&self.stats).merge(&item);
        }
        debug!("Fetch worker {} finished", self.id);
    }

    async fn process(&self, entry: &CatalogEntry) -> CrawlStats {
        let mut stats = CrawlStats::new();

        let target = entry.resource_url().and_then(|url| {
            let destination =
                self.layout
                    .dataset_file(&entry.domain, &self.date, &entry.dataset_id)?;
            Ok((url, destination))
        });
        let (url, destination) = match target {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    domain = %entry.domain,
                    dataset = %entry.dataset_id,
                    "Skipping candidate: {}",
                    e
                );
                stats.skipped += 1;
                return stats;
            }
        };

        let outcome = if destination.is_file() {
            debug!(
                "Reusing {} downloaded earlier today",
                destination.display()
            );
            FetchOutcome::Reused
        } else {
            match self.fetcher.fetch(&url, &destination).await {
                Ok(bytes) => {
                    stats.bytes += bytes;
                    info!(
                        domain = %entry.domain,
                        dataset = %entry.dataset_id,
                        bytes,
                        "Downloaded"
                    );
                    FetchOutcome::Downloaded
                }
                Err(e) => {
                    warn!(
                        domain = %entry.domain,
                        dataset = %entry.dataset_id,
                        retryable = e.is_retryable(),
                        "Download failed: {}",
                        e
                    );
                    FetchOutcome::Failed
                }
            }
        };

        stats.record(outcome);
        let record = Record::new(
            entry.domain.as_str(),
            entry.dataset_id.as_str(),
            self.date.as_str(),
            outcome.succeeded(),
        );
        if let Err(e) = self.writer.append(&record) {
            error!("Could not log {}: {}", record, e);
            stats.unlogged += 1;
        }

        stats
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs one complete crawl: diff the catalog snapshot against the archive
/// and fetch every candidate.
///
/// # Errors
///
/// Only setup failures are returned: the archive directory cannot be opened,
/// the catalog snapshot cannot be read, or the log cannot be replayed or
/// opened for appending. Per-dataset problems end up in the summary.
pub async fn run_crawl<F: ResourceFetcher>(
    params: CrawlParams,
    fetcher: F,
) -> Result<CrawlSummary, AppError> {
    let archive = Archive::open(&params.base_dir)?;
    let date = params.date.clone().unwrap_or_else(today_key);
    let catalog_path = params
        .catalog
        .clone()
        .unwrap_or_else(|| archive.layout().catalog_file(&date));
    let scope = params.scope.with_date(None);

    info!(
        "Crawl {} of {} into {}",
        date,
        scope,
        archive.layout().base_dir().display()
    );

    let entries = read_catalog(&catalog_path)?;
    let index = archive.log().latest_index()?;
    debug!("Archive index holds {} datasets", index.len());

    let diff = CatalogDiff::compute(entries, &index, &scope);
    info!(
        "{} candidates ({} new, {} retried, {} modified), {} up to date, {} skipped",
        diff.stats.candidates(),
        diff.stats.new,
        diff.stats.retry_failed,
        diff.stats.modified,
        diff.stats.up_to_date,
        diff.stats.malformed()
    );

    let writer = archive.log().writer()?;
    let pool = FetchWorkerPool::new(
        fetcher,
        writer,
        archive.layout().clone(),
        date.as_str(),
        params.crawl,
    );
    let fetch = pool.run(diff.candidates).await;

    info!(
        "Crawl {} complete: {} downloaded, {} reused, {} failed, {} unlogged",
        date, fetch.downloaded, fetch.reused, fetch.failed, fetch.unlogged
    );

    Ok(CrawlSummary {
        date,
        diff: diff.stats,
        fetch,
    })
}
