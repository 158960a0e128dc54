//! Shared row mapping helpers for the SQLite store.
//!
//! Timestamps are persisted as Unix milliseconds and JSON documents as TEXT.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use tiering_core::{TieringError, TieringResult};

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_millis(ts: DateTime<Utc>) -> i64 {
        ts.timestamp_millis()
    }

    pub fn from_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    pub fn timestamp(row: &SqliteRow, field_name: &str) -> TieringResult<DateTime<Utc>> {
        let ms: i64 = row.try_get(field_name)?;
        Ok(Self::from_millis(ms))
    }

    pub fn optional_timestamp(
        row: &SqliteRow,
        field_name: &str,
    ) -> TieringResult<Option<DateTime<Utc>>> {
        let ms: Option<i64> = row.try_get(field_name)?;
        Ok(ms.map(Self::from_millis))
    }

    pub fn json(row: &SqliteRow, field_name: &str) -> TieringResult<serde_json::Value> {
        let json_str: String = row.try_get(field_name)?;
        json_str
            .parse()
            .map_err(|e| TieringError::Serialization(format!("解析{field_name}失败: {e}")))
    }

    pub fn optional_json(
        row: &SqliteRow,
        field_name: &str,
    ) -> TieringResult<Option<serde_json::Value>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => json_str
                .parse()
                .map(Some)
                .map_err(|e| TieringError::Serialization(format!("解析{field_name}失败: {e}"))),
            None => Ok(None),
        }
    }
}
