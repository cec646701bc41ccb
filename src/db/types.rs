//! Row decoding for the SQL backends.
//!
//! # Architecture
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders extract the value as JSON
//!
//! SQLite columns computed from expressions carry no declared type, so the
//! SQLite decoder falls back to the storage class of the value itself.

use crate::models::{BackendKind, Row};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, backend: BackendKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity holds floats
        if backend == BackendKind::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp")
        || lower == "datetime"
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // Prepared statements return NUMERIC in binary form, so decode it properly.
        let d = <sqlx::types::BigDecimal as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(d.to_string()))
    }
}

/// Binary data is surfaced as base64.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Conversion of a driver row into an ordered JSON map.
pub trait RowToJson {
    fn column_names(&self) -> Vec<String>;
    fn to_json_map(&self) -> Row;
}

impl RowToJson for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), BackendKind::MySql);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), BackendKind::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }

    fn to_json_map(&self) -> Row {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = col.type_info();
                (
                    col.name().to_string(),
                    sqlite::decode_column(self, idx, declared.name(), declared.is_null()),
                )
            })
            .collect()
    }
}

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        match row.try_get_raw(idx) {
            Ok(value) if value.is_null() => return JsonValue::Null,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read MySQL column");
                return JsonValue::Null;
            }
        }
        match category {
            TypeCategory::Decimal => row
                .try_get::<RawDecimal, _>(idx)
                .map(|v| JsonValue::String(v.0))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or_else(|_| decode_integer(row, idx)),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<JsonValue, _>(idx)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        decode_text(row, idx)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return JsonValue::String(v);
        }
        // VARBINARY-backed text, e.g. results of some string functions
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| match String::from_utf8(bytes) {
                Ok(s) => JsonValue::String(s),
                Err(e) => encode_binary_value(e.as_bytes()),
            })
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        match row.try_get_raw(idx) {
            Ok(value) if value.is_null() => return JsonValue::Null,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read PostgreSQL column");
                return JsonValue::Null;
            }
        }
        match category {
            TypeCategory::Decimal => match row.try_get::<RawDecimal, _>(idx) {
                Ok(v) => JsonValue::String(v.0),
                Err(e) => {
                    tracing::error!("Failed to decode NUMERIC: {:?}", e);
                    JsonValue::Null
                }
            },
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Binary => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Json => row
                .try_get::<JsonValue, _>(idx)
                .unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => row
                .try_get::<uuid::Uuid, _>(idx)
                .map(|v| JsonValue::String(v.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => decode_temporal(row, idx),
            _ => row
                .try_get::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<DateTime<Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return JsonValue::String(v.to_string());
        }
        JsonValue::Null
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        declared: &str,
        declared_is_null: bool,
    ) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(value) if value.is_null() => return JsonValue::Null,
            Ok(value) => value.type_info().name().to_string(),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read SQLite column");
                return JsonValue::Null;
            }
        };

        let type_name = if declared_is_null { storage.as_str() } else { declared };
        match categorize_type(type_name, BackendKind::Sqlite) {
            TypeCategory::Boolean => row
                .try_get::<bool, _>(idx)
                .map(JsonValue::Bool)
                .unwrap_or_else(|_| decode_by_storage(row, idx, &storage)),
            TypeCategory::Json => row
                .try_get::<String, _>(idx)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_else(|| decode_by_storage(row, idx, &storage)),
            _ => decode_by_storage(row, idx, &storage),
        }
    }

    /// Decode by the value's storage class; SQLite lets any column hold any class.
    fn decode_by_storage(row: &SqliteRow, idx: usize, storage: &str) -> JsonValue {
        match storage {
            "INTEGER" => row
                .try_get::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => row
                .try_get::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get::<String, _>(idx)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        }
    }
}
