//! Reader for catalog snapshot files.
//!
//! A snapshot holds one catalog document per line as returned by the Socrata
//! discovery API. A JSON array of the same documents is accepted too, and
//! files ending in `.gz` are decompressed while reading. Only four fields are
//! extracted:
//!
//! ```json
//! {
//!     "resource": { "id": "abcd-1234", "data_updated_at": "2024-01-02T10:00:00.000Z", ... },
//!     "metadata": { "domain": "data.example.org", ... },
//!     "permalink": "https://data.example.org/d/abcd-1234",
//!     ...
//! }
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use vesta_core::error::AppError;
use vesta_core::models::CatalogEntry;

use crate::fetch::is_gzip;

#[derive(Deserialize, Debug)]
struct CatalogDocument {
    resource: ResourceSection,
    metadata: MetadataSection,
    permalink: String,
}

#[derive(Deserialize, Debug)]
struct ResourceSection {
    id: String,
    data_updated_at: Option<String>,
}

#[derive(Deserialize, Debug)]
struct MetadataSection {
    domain: String,
}

impl From<CatalogDocument> for CatalogEntry {
    fn from(doc: CatalogDocument) -> Self {
        CatalogEntry::new(
            doc.metadata.domain,
            doc.resource.id,
            doc.resource.data_updated_at.unwrap_or_default(),
            doc.permalink,
        )
    }
}

/// Parses one catalog document.
///
/// A document without `data_updated_at` yields an entry with an empty
/// timestamp, which the diff step reports and skips.
///
/// # Examples
///
/// ```
/// use vesta_client::catalog::parse_catalog_document;
///
/// let entry = parse_catalog_document(r#"{
///     "resource": {"id": "abcd-1234", "name": "Permits", "data_updated_at": "2024-01-02T10:00:00.000Z"},
///     "metadata": {"domain": "data.example.org"},
///     "permalink": "https://data.example.org/d/abcd-1234"
/// }"#).unwrap();
///
/// assert_eq!(entry.dataset_id, "abcd-1234");
/// assert_eq!(entry.domain, "data.example.org");
/// ```
pub fn parse_catalog_document(json: &str) -> Result<CatalogEntry, AppError> {
    let doc: CatalogDocument = serde_json::from_str(json)?;
    Ok(doc.into())
}

/// Reads every entry of a catalog snapshot file.
///
/// Documents that do not have the expected shape are skipped with a
/// warning; they never abort the read.
///
/// # Errors
///
/// Returns `AppError::CatalogNotFound` if the file does not exist, and
/// `AppError::Io` / `AppError::SerializationError` if it cannot be read at all.
pub fn read_catalog(path: &Path) -> Result<Vec<CatalogEntry>, AppError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AppError::CatalogNotFound(path.to_path_buf()),
        _ => AppError::Io(e),
    })?;
    let raw: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut reader = BufReader::new(raw);

    let is_array = loop {
        let buf = reader.fill_buf()?;
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => {
                let first = buf[pos];
                reader.consume(pos);
                break first == b'[';
            }
            None if buf.is_empty() => break false,
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    };

    let (entries, skipped) = if is_array {
        read_array(reader)?
    } else {
        read_lines(reader, path)?
    };

    if skipped > 0 {
        warn!(
            "Skipped {} malformed catalog documents in {}",
            skipped,
            path.display()
        );
    }
    info!("Read {} catalog entries from {}", entries.len(), path.display());
    Ok(entries)
}

fn read_array<R: Read>(reader: R) -> Result<(Vec<CatalogEntry>, usize), AppError> {
    let docs: Vec<Value> = serde_json::from_reader(reader)?;
    let mut entries = Vec::with_capacity(docs.len());
    let mut skipped = 0;

    for (i, doc) in docs.into_iter().enumerate() {
        match serde_json::from_value::<CatalogDocument>(doc) {
            Ok(doc) => entries.push(doc.into()),
            Err(e) => {
                warn!("Catalog document {}: {}", i, e);
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}

fn read_lines<R: BufRead>(reader: R, path: &Path) -> Result<(Vec<CatalogEntry>, usize), AppError> {
    let mut entries = Vec::new();
    let mut skipped = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_catalog_document(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!("{}:{}: {}", path.display(), i + 1, e);
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}
