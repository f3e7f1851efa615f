//! Configuration types for Vesta components.
//!
//! Values are layered: built-in defaults, then the optional TOML file
//! (`~/.config/vesta/config.toml`), then environment variables and CLI flags
//! (resolved by the CLI crate).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Default number of concurrent fetch workers.
pub const DEFAULT_WORKERS: usize = 6;

/// Upper bound on how long a crawl waits for its workers to drain the queue.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// HTTP client configuration for resource downloads.
///
/// There is no whole-request timeout by default: exports of large datasets
/// stream for a long time, and a hung transfer only stalls its own worker.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: Duration::from_secs(30),
            user_agent: format!("Vesta/{} (open-data-archiver)", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Crawl worker pool configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub workers: usize,
    pub drain_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl CrawlConfig {
    /// Worker count clamped to at least one.
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}

/// Contents of the optional `config.toml`.
///
/// # Examples
///
/// ```
/// use vesta_core::FileConfig;
///
/// let config: FileConfig = toml::from_str(r#"
///     archive_dir = "/srv/socrata"
///     workers = 12
/// "#).unwrap();
/// assert_eq!(config.workers, Some(12));
/// assert!(config.domain.is_none());
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub archive_dir: Option<PathBuf>,
    pub domain: Option<String>,
    pub workers: Option<usize>,
    pub user_agent: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Applies the file's HTTP settings on top of `base`.
    pub fn http_config(&self, base: HttpConfig) -> HttpConfig {
        let mut http = base;
        if let Some(secs) = self.connect_timeout_secs {
            http.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(user_agent) = &self.user_agent {
            http.user_agent = user_agent.clone();
        }
        http
    }
}

/// Returns the default config file location, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vesta").join("config.toml"))
}

/// Loads the configuration file.
///
/// With an explicit `path` the file must exist. Without one the default
/// location is tried and a missing file yields the empty configuration.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig, AppError> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(FileConfig::default()),
        },
    };

    if !required && !path.exists() {
        return Ok(FileConfig::default());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&raw).map_err(|e| AppError::ConfigError(format!("{}: {}", path.display(), e)))
}
