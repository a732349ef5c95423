use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{FileType, InsightType};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_optional_u64(value: Option<i64>, field: &str) -> Result<Option<u64>> {
    value.map(|raw| to_u64(raw, field)).transpose()
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_file_type(value: &str) -> Result<FileType> {
    match value {
        "code" => Ok(FileType::Code),
        "documentation" => Ok(FileType::Documentation),
        "configuration" => Ok(FileType::Configuration),
        "other" => Ok(FileType::Other),
        other => Err(anyhow!("unknown file type {other}")),
    }
}

pub fn parse_insight_type(value: &str) -> Result<InsightType> {
    InsightType::ALL
        .into_iter()
        .find(|kind| kind.as_str() == value)
        .ok_or_else(|| anyhow!("unknown insight type {value}"))
}
