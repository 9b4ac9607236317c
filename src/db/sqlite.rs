use super::{Backend, Dialect, ResultSet, SqlValue};
use crate::errors::{AppError, AppResult};
use crate::query::{format_timestamp, parse_stored_timestamp};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// SQLite file treated as a database server. The file must already exist;
/// a missing file is reported as a connection failure.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> AppResult<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|error| AppError::Connection(format!("{}: {}", self.path.display(), error)))
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(value) => ToSqlOutput::Owned(Value::Integer(*value)),
            SqlValue::Real(value) => ToSqlOutput::Owned(Value::Real(*value)),
            SqlValue::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            SqlValue::Timestamp(value) => ToSqlOutput::Owned(Value::Text(format_timestamp(value))),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(value) => SqlValue::Integer(value),
        ValueRef::Real(value) => SqlValue::Real(value),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            // SQLite has no datetime storage class; timestamps live in TEXT.
            match parse_stored_timestamp(&text) {
                Some(timestamp) => SqlValue::Timestamp(timestamp),
                None => SqlValue::Text(text.into_owned()),
            }
        }
    }
}

impl Backend for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn ping(&self) -> AppResult<()> {
        let conn = self.open()?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|error| AppError::Connection(format!("{}: {}", self.path.display(), error)))?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> AppResult<ResultSet> {
        let conn = self.open()?;
        let mut statement = conn.prepare(sql)?;
        let columns: Vec<String> = statement.column_names().into_iter().map(ToString::to_string).collect();
        let width = columns.len();

        let mut rows = statement.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_value_ref(row.get_ref(index)?));
            }
            result.push(values);
        }

        Ok(ResultSet { columns, rows: result })
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AppResult<u64> {
        let conn = self.open()?;
        let changed = conn.execute(sql, params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn execute_batch(&self, statements: &[String]) -> AppResult<()> {
        let conn = self.open()?;
        for statement in statements {
            conn.execute_batch(statement)?;
        }
        Ok(())
    }
}
