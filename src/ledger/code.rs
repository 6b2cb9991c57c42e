//! Partition keys, record dates and human-readable record codes.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};

use crate::models::FieldValue;

/// Ordinals are unique per record type and calendar year.
pub fn partition_key(record_type: &str, date: NaiveDate) -> String {
    format!("{record_type}/{}", date.year())
}

/// `<PREFIX><YYYYMMDD>-<ordinal>`, ordinal zero-padded to four digits.
pub fn record_code(prefix: &str, date: NaiveDate, ordinal: i64) -> String {
    format!("{prefix}{}-{ordinal:04}", date.format("%Y%m%d"))
}

/// First configured date field holding a date, else `fallback`.
pub fn record_date(
    fields: &BTreeMap<String, FieldValue>,
    date_fields: &[String],
    fallback: NaiveDate,
) -> NaiveDate {
    date_fields
        .iter()
        .find_map(|name| fields.get(name).and_then(FieldValue::as_date))
        .unwrap_or(fallback)
}
