//! Conversion of SQLite rows into raw records.
//!
//! Catalog tables are arbitrary, so rows are decoded column by column using
//! the storage class SQLite reports for each *value* (not the declared column
//! type, which SQLite does not enforce).

use crate::RawRecord;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde_json::{Number, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

pub(crate) fn to_raw_record(row: &SqliteRow) -> Result<RawRecord> {
    let mut record = RawRecord::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let value = column_value(row, index).or_raise(|| ErrorKind::Decode(format!("column {name:?}")))?;
        record.insert(name.to_string(), value);
    }
    Ok(record)
}

fn column_value(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index).or_raise(|| ErrorKind::Database)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_ascii_uppercase();
    // `try_get_unchecked` skips the declared-type compatibility check; the
    // storage class of the value itself has already been inspected.
    let value = match storage_class.as_str() {
        "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => {
            Value::from(row.try_get_unchecked::<i64, _>(index).or_raise(|| ErrorKind::Database)?)
        },
        "REAL" | "FLOAT" | "DOUBLE" => {
            let real = row.try_get_unchecked::<f64, _>(index).or_raise(|| ErrorKind::Database)?;
            // NaN/Infinity have no JSON representation.
            Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null)
        },
        "TEXT" => Value::from(row.try_get_unchecked::<String, _>(index).or_raise(|| ErrorKind::Database)?),
        "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(index).or_raise(|| ErrorKind::Database)?),
        other => exn::bail!(ErrorKind::Decode(format!("unsupported storage class {other}"))),
    };
    Ok(value)
}
