//! Day-granularity date keys.
//!
//! Download dates are stored as fixed-width `YYYYMMDD` strings so that plain
//! lexicographic comparison orders them chronologically.

use chrono::{Local, NaiveDate};

use crate::error::AppError;

/// `chrono` format of a date key.
pub const DATE_KEY_FORMAT: &str = "%Y%m%d";

/// Returns today's local date as a date key.
pub fn today_key() -> String {
    Local::now().format(DATE_KEY_FORMAT).to_string()
}

/// Checks that `value` is an eight digit calendar date and returns it owned.
///
/// # Examples
///
/// ```
/// use vesta_core::date::validate_date_key;
///
/// assert_eq!(validate_date_key("20240229").unwrap(), "20240229");
/// assert!(validate_date_key("20230229").is_err());
/// assert!(validate_date_key("2024-02-29").is_err());
/// ```
pub fn validate_date_key(value: &str) -> Result<String, AppError> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidDate(value.to_string()));
    }
    NaiveDate::parse_from_str(value, DATE_KEY_FORMAT)
        .map_err(|_| AppError::InvalidDate(value.to_string()))?;
    Ok(value.to_string())
}

/// Truncates a catalog timestamp such as `2024-01-02T10:00:00.000Z` to the
/// date key of its day.
///
/// Only the part before the `T` separator is interpreted; time of day and
/// zone are discarded.
pub fn catalog_day(timestamp: &str) -> Result<String, AppError> {
    let invalid = || AppError::InvalidTimestamp(timestamp.to_string());

    let (day, _) = timestamp.split_once('T').ok_or_else(invalid)?;
    let date = NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d").map_err(|_| invalid())?;

    Ok(date.format(DATE_KEY_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_today_key_is_valid() {
        let today = today_key();
        assert_eq!(today.len(), 8);
        assert!(validate_date_key(&today).is_ok());
    }

    #[test]
    fn test_validate_date_key_rejects_garbage() {
        assert!(validate_date_key("").is_err());
        assert!(validate_date_key("2024011").is_err());
        assert!(validate_date_key("202401011").is_err());
        assert!(validate_date_key("2024O101").is_err());
        assert!(validate_date_key("20241301").is_err());
    }

    #[test]
    fn test_catalog_day() {
        assert_eq!(catalog_day("2024-01-01T00:00:00").unwrap(), "20240101");
        assert_eq!(catalog_day("2024-01-02T10:00:00.000Z").unwrap(), "20240102");
    }

    #[test]
    fn test_catalog_day_invalid() {
        assert!(matches!(
            catalog_day("2024-01-02"),
            Err(AppError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            catalog_day("not a dateTime"),
            Err(AppError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            catalog_day("2024-02-30T00:00:00"),
            Err(AppError::InvalidTimestamp(_))
        ));
    }
}
