//! Field-map decoding helpers and the timestamp codec
//!
//! The log stores every value as a byte-string. Decoding is strict: a missing
//! or malformed field is reported with a discriminated error naming the field
//! so poison entries are diagnosable from logs alone.

use crate::entry::EntryFields;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why an entry failed to decode into a typed event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{0}` is not valid UTF-8")]
    NotUtf8(&'static str),

    #[error("field `{0}` is not a valid integer")]
    BadInt(&'static str),

    #[error("invalid timestamp `{value}`")]
    BadTimestamp { value: String },
}

pub(crate) fn bytes_field(fields: &EntryFields, name: &'static str) -> Result<Vec<u8>, DecodeError> {
    fields
        .get(name)
        .cloned()
        .ok_or(DecodeError::MissingField(name))
}

pub(crate) fn str_field(fields: &EntryFields, name: &'static str) -> Result<String, DecodeError> {
    let raw = fields.get(name).ok_or(DecodeError::MissingField(name))?;
    String::from_utf8(raw.clone()).map_err(|_| DecodeError::NotUtf8(name))
}

pub(crate) fn int_field(fields: &EntryFields, name: &'static str) -> Result<i64, DecodeError> {
    str_field(fields, name)?
        .parse()
        .map_err(|_| DecodeError::BadInt(name))
}

/// Render a timestamp in the upstream node's wall-clock format:
/// `2024-05-01 12:33:44.123456789 +0000 UTC`.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    format!("{} UTC", ts.format("%Y-%m-%d %H:%M:%S%.9f %z"))
}

/// Parse a timestamp in that format. The trailing zone abbreviation is
/// informational only; the numeric offset decides the instant.
pub fn decode_timestamp(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    let trimmed = match s.rfind(' ') {
        Some(idx) if s[idx + 1..].chars().all(|c| c.is_ascii_alphabetic()) && idx + 1 < s.len() => {
            s[..idx].trim_end()
        }
        _ => s,
    };
    DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f %z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DecodeError::BadTimestamp {
            value: s.to_string(),
        })
}
