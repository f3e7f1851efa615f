use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use dotenvy::dotenv;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vesta_cli::{run_crawl, snapshot_report, Command, Config, CrawlParams};
use vesta_client::{read_catalog, HttpFetcher};
use vesta_core::{
    load_config, today_key, CrawlConfig, CrawlSummary, HttpConfig, Query, Record, DEFAULT_WORKERS,
};
use vesta_db::{human_bytes, Archive, ArchiveLayout, DiskUsage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::parse();
    let file = load_config(config.config.as_deref()).context("Failed to load configuration")?;
    let base_dir = config
        .dir
        .clone()
        .or_else(|| file.archive_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let default_domain = file.domain.as_deref();

    // Download runs also log to <archive>/logs/<date>.log
    let run_date = match &config.command {
        Command::Download { filter, .. } => Some(filter.date.clone().unwrap_or_else(today_key)),
        _ => None,
    };
    let run_log = run_date.as_ref().map(|date| {
        (
            ArchiveLayout::new(&base_dir).run_log_dir(),
            ArchiveLayout::run_log_name(date),
        )
    });
    let _guard = init_logging(run_log)?;

    match config.command {
        Command::Download {
            filter,
            workers,
            catalog,
        } => {
            let params = CrawlParams {
                base_dir,
                scope: filter.query(default_domain),
                date: run_date,
                catalog,
                crawl: CrawlConfig {
                    workers: workers.or(file.workers).unwrap_or(DEFAULT_WORKERS),
                    ..CrawlConfig::default()
                },
            };
            download(params, file.http_config(HttpConfig::default())).await?;
        }
        Command::Snapshot {
            filter,
            catalog,
            stats,
        } => {
            let archive = open_archive(base_dir)?;
            snapshot(&archive, filter.query(default_domain), catalog, stats)?;
        }
        Command::Datasets { filter } => {
            let archive = open_archive(base_dir)?;
            for record in archive.log().records_matching(&filter.query(default_domain))? {
                println!("{}", record);
            }
        }
        Command::Dates => {
            let archive = open_archive(base_dir)?;
            for (date, count) in archive.log().download_date_stats()? {
                println!("{} : {}", date, count);
            }
        }
        Command::Du { filter } => {
            let archive = open_archive(base_dir)?;
            disk_usage(&archive, filter.query(default_domain))?;
        }
        Command::Remove {
            filter,
            failed,
            report,
        } => {
            let mut archive = open_archive(base_dir)?;
            let query = filter.query(default_domain);
            if !failed && query == Query::new() {
                bail!("Refusing to remove every download; restrict with --domain, --dataset, or --date");
            }
            let records = if failed {
                archive.removable_failures(&query)?
            } else {
                archive.log().records_matching(&query)?
            };
            remove(&mut archive, records, report)?;
        }
    }

    Ok(())
}

/// Installs the tracing subscriber: stderr always, plus a plain-text file
/// layer when `run_log` names a directory and file.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(run_log: Option<(PathBuf, String)>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log filter")?;

    // stderr keeps stdout clean for listings
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let (file_layer, guard) = match run_log {
        Some((dir, name)) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn open_archive(base_dir: PathBuf) -> anyhow::Result<Archive> {
    let display = base_dir.display().to_string();
    Archive::open(base_dir).with_context(|| format!("Failed to open archive at {}", display))
}

/// Run one crawl and print its summary
async fn download(params: CrawlParams, http: HttpConfig) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new(&http).context("Failed to build HTTP client")?;
    let summary = run_crawl(params, fetcher)
        .await
        .map_err(|e| anyhow!("Crawl aborted: {}", e.user_message()))?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &CrawlSummary) {
    let diff = &summary.diff;
    let fetch = &summary.fetch;

    println!("\nCrawl {}\n", summary.date);
    println!("  Catalog entries:       {}", diff.total());
    println!("  Out of scope:          {}", diff.out_of_scope);
    println!("  Up to date:            {}", diff.up_to_date);
    println!(
        "  Candidates:            {} ({} new, {} retried, {} modified)",
        diff.candidates(),
        diff.new,
        diff.retry_failed,
        diff.modified
    );
    println!(
        "  Skipped:               {} ({} bad timestamps, {} bad links, {} unsafe names, {} duplicates)",
        diff.malformed() + diff.duplicate + fetch.skipped,
        diff.invalid_timestamp,
        diff.malformed_link + fetch.skipped,
        diff.unsafe_name,
        diff.duplicate
    );
    println!(
        "  Downloaded:            {} ({})",
        fetch.downloaded,
        human_bytes(fetch.bytes)
    );
    println!("  Reused:                {}", fetch.reused);
    println!("  Failed:                {}", fetch.failed);
    if fetch.unlogged > 0 {
        println!("  Not logged:            {}", fetch.unlogged);
    }
    println!();
}

/// Compare the catalog of a date with the archive as of that date
fn snapshot(
    archive: &Archive,
    query: Query,
    catalog: Option<PathBuf>,
    stats_only: bool,
) -> anyhow::Result<()> {
    let date = match query.date_filter() {
        Some(date) => date.to_string(),
        None => match archive.log().last_download_date()? {
            Some(date) => date,
            None => {
                println!("No downloads in the archive yet.");
                return Ok(());
            }
        },
    };

    let catalog_path = catalog.unwrap_or_else(|| archive.layout().catalog_file(&date));
    let entries = read_catalog(&catalog_path)
        .with_context(|| format!("Failed to read catalog {}", catalog_path.display()))?;
    let report = snapshot_report(archive, entries, &query, &date)?;

    if !stats_only {
        for row in &report.rows {
            match &row.file {
                Some(file) => println!(
                    "{}\t{}\ttrue\t{}",
                    row.entry.domain,
                    row.entry.dataset_id,
                    file.display()
                ),
                None => println!(
                    "{}\t{}\tfalse\t{}",
                    row.entry.domain, row.entry.dataset_id, row.entry.link
                ),
            }
        }
        println!();
    }
    println!("Catalog entries on {}: {}", report.date, report.rows.len());
    println!("Downloaded files           : {}", report.archived());
    println!("Missing files              : {}", report.missing());

    Ok(())
}

/// Show disk usage, per download date unless the query names one
fn disk_usage(archive: &Archive, query: Query) -> anyhow::Result<()> {
    if query.date_filter().is_some() {
        print_usage(&query.to_string(), archive.disk_usage(&query)?);
        return Ok(());
    }

    let mut total = DiskUsage::default();
    for (date, usage) in archive.disk_usage_by_date(&query)? {
        print_usage(&query.with_date(Some(date)).to_string(), usage);
        total.add(usage);
    }
    print_usage("all downloaded files", total);
    Ok(())
}

fn print_usage(label: &str, usage: DiskUsage) {
    println!("-- Disk usage for {}", label);
    println!("   Number of files     : {}", usage.file_count);
    println!("   Total size on disk  : {}", human_bytes(usage.total_bytes));
    println!();
}

/// List `records` and, unless `report_only`, delete them with their files
fn remove(archive: &mut Archive, records: Vec<Record>, report_only: bool) -> anyhow::Result<()> {
    for record in &records {
        println!(
            "{}\t{}\t{}",
            record.domain, record.dataset_id, record.download_date
        );
    }
    println!("{} datasets", records.len());

    if report_only || records.is_empty() {
        return Ok(());
    }

    let stats = archive
        .delete_records(&records)
        .context("Failed to remove datasets")?;
    info!(
        "Removed {} log records and {} files ({} records kept)",
        stats.log.removed, stats.files_removed, stats.log.kept
    );
    Ok(())
}
