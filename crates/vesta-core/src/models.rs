//! Archive domain types.

use std::fmt;
use std::path::{Component, Path};

use url::Url;

use crate::error::AppError;

/// Status token written for a successful download.
pub const STATUS_SUCCESS: &str = "S";
/// Status token written for a failed download.
pub const STATUS_FAILED: &str = "F";

/// Checks that `value` can be used as one file name below the archive
/// directory.
///
/// Domains, dataset identifiers and dates all become path components, so
/// each must be non-empty, relative, and free of separators, `..` and NUL.
///
/// # Examples
///
/// ```
/// use vesta_core::models::validate_path_component;
///
/// assert!(validate_path_component("data.example.org").is_ok());
/// assert!(validate_path_component("../etc").is_err());
/// assert!(validate_path_component("/tmp/x").is_err());
/// ```
pub fn validate_path_component(value: &str) -> Result<(), AppError> {
    let unsafe_name = value.is_empty()
        || value.contains(['/', '\\', '\0'])
        || value.contains("..")
        || !matches!(
            Path::new(value).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );

    if unsafe_name {
        return Err(AppError::UnsafeName(value.to_string()));
    }
    Ok(())
}

/// Identity of a dataset across downloads: `(domain, dataset_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    pub domain: String,
    pub dataset_id: String,
}

impl DatasetKey {
    pub fn new(domain: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            dataset_id: dataset_id.into(),
        }
    }
}

/// Identity of one download attempt: `(domain, dataset_id, download_date)`.
///
/// Compaction removes records by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub domain: String,
    pub dataset_id: String,
    pub download_date: String,
}

/// One immutable download fact in the archive log.
///
/// Several records may share a [`DatasetKey`]. During replay the one appended
/// last wins, whatever its `download_date`.
///
/// # Examples
///
/// ```
/// use vesta_core::Record;
///
/// let record = Record::success("data.example.org", "abcd-1234", "20240101");
/// assert_eq!(record.to_tsv_line(), "data.example.org\tabcd-1234\t20240101\tS");
///
/// let parsed = Record::from_tsv_line("data.example.org\tabcd-1234\t20240101\tF").unwrap();
/// assert!(!parsed.succeeded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub domain: String,
    pub dataset_id: String,
    /// Day of the download as `YYYYMMDD`.
    pub download_date: String,
    pub succeeded: bool,
}

impl Record {
    pub fn new(
        domain: impl Into<String>,
        dataset_id: impl Into<String>,
        download_date: impl Into<String>,
        succeeded: bool,
    ) -> Self {
        Self {
            domain: domain.into(),
            dataset_id: dataset_id.into(),
            download_date: download_date.into(),
            succeeded,
        }
    }

    pub fn success(
        domain: impl Into<String>,
        dataset_id: impl Into<String>,
        download_date: impl Into<String>,
    ) -> Self {
        Self::new(domain, dataset_id, download_date, true)
    }

    pub fn failure(
        domain: impl Into<String>,
        dataset_id: impl Into<String>,
        download_date: impl Into<String>,
    ) -> Self {
        Self::new(domain, dataset_id, download_date, false)
    }

    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.domain.clone(), self.dataset_id.clone())
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey {
            domain: self.domain.clone(),
            dataset_id: self.dataset_id.clone(),
            download_date: self.download_date.clone(),
        }
    }

    pub fn status_token(&self) -> &'static str {
        if self.succeeded {
            STATUS_SUCCESS
        } else {
            STATUS_FAILED
        }
    }

    /// True if no field contains a tab or line break, i.e. the record
    /// survives a round trip through one log line.
    pub fn is_encodable(&self) -> bool {
        [&self.domain, &self.dataset_id, &self.download_date]
            .iter()
            .all(|field| !field.contains(['\t', '\n', '\r']))
    }

    /// Formats the record as one log line, without the line terminator.
    pub fn to_tsv_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.domain,
            self.dataset_id,
            self.download_date,
            self.status_token()
        )
    }

    /// Parses one log line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CorruptLogLine` unless the line holds exactly four
    /// tab-separated fields and ends with a known status token.
    pub fn from_tsv_line(line: &str) -> Result<Self, AppError> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = trimmed.split('\t').collect();

        let [domain, dataset_id, download_date, status] = fields.as_slice() else {
            return Err(AppError::CorruptLogLine(line.to_string()));
        };
        let succeeded = match *status {
            STATUS_SUCCESS => true,
            STATUS_FAILED => false,
            _ => return Err(AppError::CorruptLogLine(line.to_string())),
        };

        Ok(Self::new(*domain, *dataset_id, *download_date, succeeded))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tsv_line())
    }
}

/// One dataset listed in the remote catalog.
///
/// Produced by the catalog reader; this crate interprets only these four fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub domain: String,
    pub dataset_id: String,
    /// Raw last-modified timestamp as published, e.g. `2024-01-02T10:00:00.000Z`.
    pub last_modified_at: String,
    /// Dataset permalink, e.g. `https://data.example.org/d/abcd-1234`.
    pub link: String,
}

impl CatalogEntry {
    pub fn new(
        domain: impl Into<String>,
        dataset_id: impl Into<String>,
        last_modified_at: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            dataset_id: dataset_id.into(),
            last_modified_at: last_modified_at.into(),
            link: link.into(),
        }
    }

    pub fn key(&self) -> DatasetKey {
        DatasetKey::new(self.domain.clone(), self.dataset_id.clone())
    }

    /// Checks that the domain and identifier can name archive files.
    pub fn validate_names(&self) -> Result<(), AppError> {
        validate_path_component(&self.domain)?;
        validate_path_component(&self.dataset_id)
    }

    /// Rewrites the permalink into the row export endpoint.
    ///
    /// `https://host/d/<id>` becomes
    /// `https://host/api/views/<id>/rows.tsv?accessType=DOWNLOAD`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedLink` if the permalink is not an absolute
    /// URL or has no `d` path segment followed by an identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use vesta_core::CatalogEntry;
    ///
    /// let entry = CatalogEntry::new(
    ///     "data.example.org",
    ///     "abcd-1234",
    ///     "2024-01-02T10:00:00.000Z",
    ///     "https://data.example.org/d/abcd-1234",
    /// );
    /// assert_eq!(
    ///     entry.resource_url().unwrap(),
    ///     "https://data.example.org/api/views/abcd-1234/rows.tsv?accessType=DOWNLOAD"
    /// );
    /// ```
    pub fn resource_url(&self) -> Result<String, AppError> {
        let malformed = || AppError::MalformedLink(self.link.clone());

        let mut url = Url::parse(&self.link).map_err(|_| malformed())?;
        let segments: Vec<String> = url
            .path_segments()
            .map(|segments| segments.map(str::to_string).collect())
            .unwrap_or_default();

        let marker = segments
            .iter()
            .position(|segment| segment == "d")
            .filter(|&pos| segments.get(pos + 1).is_some_and(|id| !id.is_empty()))
            .ok_or_else(malformed)?;

        {
            let mut path = url.path_segments_mut().map_err(|_| malformed())?;
            path.clear();
            path.extend(&segments[..marker]);
            path.extend(["api", "views"]);
            path.extend(segments[marker + 1..].iter().filter(|s| !s.is_empty()));
            path.push("rows.tsv");
        }
        url.set_query(Some("accessType=DOWNLOAD"));
        url.set_fragment(None);

        Ok(url.to_string())
    }
}
