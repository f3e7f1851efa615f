//! Record filter used for reporting, snapshot bounding and crawl scoping.

use std::fmt;

use crate::models::Record;

/// Conjunctive filter over the optional domain, dataset and date fields.
///
/// Unset fields match anything. A query never mutates what it inspects and
/// can be reused freely.
///
/// # Examples
///
/// ```
/// use vesta_core::{Query, Record};
///
/// let query = Query::new().domain("d1").date("20240115");
/// let record = Record::success("d1", "ds1", "20240101");
///
/// assert!(!query.matches(&record));
/// assert!(query.matches_at_or_before(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    domain: Option<String>,
    dataset_id: Option<String>,
    date: Option<String>,
}

impl Query {
    /// Creates a query that matches every record.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn dataset(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    pub fn date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builds a query from optional CLI values in one go.
    pub fn from_parts(
        domain: Option<String>,
        dataset_id: Option<String>,
        date: Option<String>,
    ) -> Self {
        Self {
            domain,
            dataset_id,
            date,
        }
    }

    /// Same query with the date bound replaced.
    pub fn with_date(&self, date: Option<String>) -> Self {
        Self {
            date,
            ..self.clone()
        }
    }

    pub fn domain_filter(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn dataset_filter(&self) -> Option<&str> {
        self.dataset_id.as_deref()
    }

    pub fn date_filter(&self) -> Option<&str> {
        self.date.as_deref()
    }

    /// True if domain and dataset match, ignoring the date.
    pub fn matches_dataset(&self, domain: &str, dataset_id: &str) -> bool {
        self.domain.as_deref().is_none_or(|d| d == domain)
            && self.dataset_id.as_deref().is_none_or(|id| id == dataset_id)
    }

    /// Exact match on every set field, including download date equality.
    pub fn matches(&self, record: &Record) -> bool {
        self.matches_dataset(&record.domain, &record.dataset_id)
            && self
                .date
                .as_deref()
                .is_none_or(|date| record.download_date == date)
    }

    /// Domain and dataset equality, download date on or before the query date.
    ///
    /// Date keys are fixed-width and zero padded, so string order is date order.
    pub fn matches_at_or_before(&self, record: &Record) -> bool {
        self.matches_dataset(&record.domain, &record.dataset_id)
            && self
                .date
                .as_deref()
                .is_none_or(|date| record.download_date.as_str() <= date)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(domain) = &self.domain {
            parts.push(domain.clone());
        }
        if let Some(id) = &self.dataset_id {
            parts.push(format!("dataset {}", id));
        }
        if let Some(date) = &self.date {
            parts.push(format!("download on {}", date));
        }

        if parts.is_empty() {
            f.write_str("all downloads")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}
