//! Dynamically typed value binding and decoding
//!
//! The tracking tables store attribute values in untyped columns, letting
//! SQLite keep the original storage class. Decoding probes the common
//! classes in order, the same way the API's generic table viewer does.

use super::result::ResultEntry;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Bind a [`ResultEntry`] as the next query argument
pub(crate) fn bind_entry<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    entry: &'q ResultEntry,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match entry {
        ResultEntry::None => query.bind(Option::<i64>::None),
        ResultEntry::Text(v) => query.bind(v.as_str()),
        ResultEntry::Blob(v) => query.bind(v.as_slice()),
        ResultEntry::Int(v) => query.bind(*v),
        ResultEntry::Float(v) => query.bind(*v),
    }
}

/// Decode a dynamically typed column back into a [`ResultEntry`]
pub(crate) fn column_entry(row: &SqliteRow, index: usize) -> ResultEntry {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return ResultEntry::Int(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return ResultEntry::Float(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return ResultEntry::Text(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return ResultEntry::Blob(v);
    }

    ResultEntry::None
}
