//! Result shapes and row decoding.
//!
//! Rows from every backend are decoded into JSON maps so that interceptors and
//! callers see one representation regardless of the driver. Decoding is done
//! in two steps: [`categorize_type`] classifies the column's type name, then a
//! backend-specific decoder extracts the value for that category.

use crate::descriptor::DatabaseType;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Uuid;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};

/// One decoded row, keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

/// Name and database type of a result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    fn of<C: Column>(col: &C) -> Self {
        Self::new(col.name(), col.type_info().name())
    }
}

/// Result of a row-returning statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    /// Empty when the statement returned no rows.
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl Rows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }

    pub(crate) fn from_rows<R: RowToJson>(rows: Vec<R>) -> Self {
        let columns = rows.first().map(RowToJson::column_info).unwrap_or_default();
        let rows = rows.iter().map(RowToJson::to_json_map).collect();
        Self { columns, rows }
    }
}

/// Result of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Populated by MySQL and SQLite; PostgreSQL needs `RETURNING` instead.
    pub last_insert_id: Option<i64>,
}

/// Description of a prepared statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementInfo {
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
    /// Number of bind parameters the statement expects.
    pub parameter_count: usize,
}

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
    /// Dates, times and timestamps, rendered as ISO 8601 text
    Temporal,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // checked before floats because "numeric" overlaps
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    // sqlite keeps dates as text
    let temporal = matches!(lower.as_str(), "date" | "time" | "datetime")
        || lower.contains("timestamp");
    if temporal && db != DatabaseType::SQLite {
        return TypeCategory::Temporal;
    }

    match lower.as_str() {
        "bool" | "boolean" => TypeCategory::Boolean,
        "real" | "float4" | "float8" => TypeCategory::Float,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" => TypeCategory::Binary,
        _ if lower.contains("float") || lower.contains("double") => TypeCategory::Float,
        _ if lower.contains("blob") || lower.contains("binary") => TypeCategory::Binary,
        // varchar, text, char, enum, ...
        _ => TypeCategory::Text,
    }
}

/// DECIMAL/NUMERIC values kept in their exact textual form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        matches!(
            categorize_type(ty.name(), DatabaseType::MySQL),
            TypeCategory::Decimal
        )
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
        matches!(
            categorize_type(ty.name(), DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        )
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary values are always base64 encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Text that might hold JSON when the declared type says so.
fn text_value(v: String, type_name: &str) -> JsonValue {
    if type_name.to_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
            return json;
        }
    }
    JsonValue::String(v)
}

/// Try the chrono types from most to least specific.
macro_rules! temporal {
    ($row:expr, $idx:expr) => {{
        if let Ok(Some(v)) = $row.try_get::<Option<DateTime<Utc>>, _>($idx) {
            JsonValue::String(v.to_rfc3339())
        } else if let Ok(Some(v)) = $row.try_get::<Option<NaiveDateTime>, _>($idx) {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        } else if let Ok(Some(v)) = $row.try_get::<Option<NaiveDate>, _>($idx) {
            JsonValue::String(v.to_string())
        } else if let Ok(Some(v)) = $row.try_get::<Option<NaiveTime>, _>($idx) {
            JsonValue::String(v.to_string())
        } else {
            JsonValue::Null
        }
    }};
}

/// Conversion of driver rows into the crate's row representation.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
    fn column_info(&self) -> Vec<ColumnInfo>;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decode:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> Row {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        (col.name().to_string(), $decode(self, idx, type_name, category))
                    })
                    .collect()
            }

            fn column_info(&self) -> Vec<ColumnInfo> {
                self.columns().iter().map(ColumnInfo::of).collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, decode_mysql);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, decode_postgres);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, decode_sqlite);

/// Column helpers for the statement description path.
pub(crate) fn column_infos<C: Column>(columns: &[C]) -> Vec<ColumnInfo> {
    columns.iter().map(ColumnInfo::of).collect()
}

/// Try each integer width in turn; the first that decodes wins.
macro_rules! first_int {
    ($row:expr, $idx:expr, $($ty:ty),+) => {{
        let mut out = JsonValue::Null;
        $(
            if out.is_null() {
                if let Ok(Some(v)) = $row.try_get::<Option<$ty>, _>($idx) {
                    out = JsonValue::Number(v.into());
                }
            }
        )+
        out
    }};
}

fn decode_mysql(row: &MySqlRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::error!(error = ?e, column = idx, "Failed to decode DECIMAL");
                JsonValue::Null
            }
        },
        // unsigned columns only decode into the unsigned widths
        TypeCategory::Integer => first_int!(row, idx, i8, i16, i32, i64, u8, u16, u32, u64),
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::Bool),
        TypeCategory::Float => match row.try_get::<Option<f64>, _>(idx) {
            Ok(Some(v)) => float_value(v),
            _ => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, |v| float_value(v.into())),
        },
        TypeCategory::Binary => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| encode_binary(&v)),
        TypeCategory::Json => row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        TypeCategory::Temporal => temporal!(row, idx),
        TypeCategory::Text | TypeCategory::Uuid => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| text_value(v, type_name)),
    }
}

fn decode_postgres(row: &PgRow, idx: usize, _type_name: &str, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(v) => v.map(|d| JsonValue::String(d.0)).unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::error!(error = ?e, column = idx, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        },
        TypeCategory::Integer => first_int!(row, idx, i16, i32, i64),
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::Bool),
        TypeCategory::Float => match row.try_get::<Option<f64>, _>(idx) {
            Ok(Some(v)) => float_value(v),
            _ => row
                .try_get::<Option<f32>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, |v| float_value(v.into())),
        },
        TypeCategory::Binary => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| encode_binary(&v)),
        TypeCategory::Json => row
            .try_get::<Option<JsonValue>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        TypeCategory::Temporal => temporal!(row, idx),
        TypeCategory::Uuid => row
            .try_get::<Option<Uuid>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        TypeCategory::Text => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::String),
    }
}

fn decode_sqlite(row: &SqliteRow, idx: usize, type_name: &str, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => first_int!(row, idx, i64, i32),
        TypeCategory::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::Bool),
        TypeCategory::Float | TypeCategory::Decimal => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, float_value),
        TypeCategory::Binary => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| encode_binary(&v)),
        // expression columns report NULL as their type; fall back on the value itself
        TypeCategory::Text | TypeCategory::Json | TypeCategory::Uuid | TypeCategory::Temporal => {
            if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
                return text_value(v, type_name);
            }
            if let Ok(Some(v)) = row.try_get_unchecked::<Option<i64>, _>(idx) {
                return JsonValue::Number(v.into());
            }
            row.try_get_unchecked::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map_or(JsonValue::Null, float_value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("SERIAL", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("DOUBLE PRECISION", DatabaseType::PostgreSQL),
            TypeCategory::Float
        );
        assert_eq!(
            categorize_type("VARBINARY", DatabaseType::MySQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Temporal
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::SQLite),
            TypeCategory::Text
        );
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(
            encode_binary(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
        assert_eq!(encode_binary(&[]), JsonValue::String(String::new()));
    }

    #[test]
    fn test_text_value_parses_json_columns() {
        let v = text_value(r#"{"a":1}"#.to_string(), "JSON");
        assert_eq!(v["a"], 1);
        let v = text_value("{not json".to_string(), "json");
        assert_eq!(v, JsonValue::String("{not json".to_string()));
        let v = text_value(r#"{"a":1}"#.to_string(), "TEXT");
        assert!(v.is_string());
    }
}
