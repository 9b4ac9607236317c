#[cfg(feature = "mysql")]
pub mod mysql;
pub mod sqlite;

use crate::errors::{AppError, AppResult};
use crate::models::{ColumnType, Credentials, Driver};
use crate::query::{format_timestamp, parse_numeric_text, parse_timestamp_text};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single database value as the core sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "value")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The column type a sampled value implies.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Integer(_) | Self::Real(_) => Some(ColumnType::Numeric),
            Self::Text(_) => Some(ColumnType::Text),
            Self::Timestamp(_) => Some(ColumnType::Timestamp),
        }
    }

    /// Converts the value to a plottable coordinate. Timestamps become OLE
    /// automation dates; text is parsed according to `column_type`.
    pub fn to_plot_value(&self, column_type: ColumnType) -> Option<f64> {
        match (self, column_type) {
            (Self::Null, _) => None,
            (_, ColumnType::Text) => None,
            (Self::Integer(value), ColumnType::Numeric) => Some(*value as f64),
            (Self::Real(value), ColumnType::Numeric) => Some(*value),
            (Self::Timestamp(value), _) => Some(to_ole_date(value)),
            (Self::Text(text), ColumnType::Numeric) => parse_numeric_text(text),
            (Self::Text(text), ColumnType::Timestamp) => parse_timestamp_text(text).map(|value| to_ole_date(&value)),
            (Self::Integer(value), ColumnType::Timestamp) => Some(*value as f64),
            (Self::Real(value), ColumnType::Timestamp) => Some(*value),
        }
    }

    /// Text used for CSV export; nulls render as `NULL`.
    pub fn to_export_string(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Timestamp(value) => format_timestamp(value),
        }
    }
}

/// Days since 1899-12-30, with the time of day as the fractional part.
pub fn to_ole_date(value: &NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (*value - epoch).num_milliseconds() as f64 / 86_400_000.0
}

pub type Row = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.eq_ignore_ascii_case(name))
    }

    /// First column of every row rendered as text, skipping nulls.
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first())
            .filter(|value| !value.is_null())
            .map(SqlValue::to_export_string)
            .collect()
    }

    pub fn into_records(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    Mysql,
    Sqlite,
}

impl Dialect {
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", name.replace('`', "``")),
            Self::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn list_tables_sql(self) -> &'static str {
        match self {
            Self::Mysql => {
                "SELECT table_name FROM information_schema.tables WHERE table_schema = DATABASE() ORDER BY table_name"
            }
            Self::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        }
    }

    /// Takes the table name as its only parameter.
    pub fn list_columns_sql(self) -> &'static str {
        match self {
            Self::Mysql => {
                "SELECT column_name FROM information_schema.columns WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position"
            }
            Self::Sqlite => "SELECT name FROM pragma_table_info(?) ORDER BY cid",
        }
    }

    pub fn current_host_sql(self) -> Option<&'static str> {
        match self {
            Self::Mysql => Some("SELECT SUBSTRING_INDEX(CURRENT_USER(), '@', -1) AS host"),
            Self::Sqlite => None,
        }
    }

    pub fn truncate_sql(self, table: &str) -> String {
        match self {
            Self::Mysql => format!("TRUNCATE TABLE {}", self.quote_ident(table)),
            Self::Sqlite => format!("DELETE FROM {}", self.quote_ident(table)),
        }
    }

    pub fn supports_accounts(self) -> bool {
        matches!(self, Self::Mysql)
    }
}

/// Escapes a value for use inside a single-quoted SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// The only thing the core asks of a database: run SQL, get rows or an error.
/// Implementations open a short-lived connection per call.
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Connection target for logs; never includes the password.
    fn describe(&self) -> String;

    fn ping(&self) -> AppResult<()>;

    fn query(&self, sql: &str, params: &[SqlValue]) -> AppResult<ResultSet>;

    fn execute(&self, sql: &str, params: &[SqlValue]) -> AppResult<u64>;

    /// Runs statements in order on one connection, stopping at the first failure.
    fn execute_batch(&self, statements: &[String]) -> AppResult<()>;
}

pub fn open_backend(credentials: &Credentials) -> AppResult<Box<dyn Backend>> {
    match credentials.driver {
        Driver::Sqlite => Ok(Box::new(sqlite::SqliteBackend::new(&credentials.server))),
        #[cfg(feature = "mysql")]
        Driver::Mysql => Ok(Box::new(mysql::MySqlBackend::new(credentials))),
        #[cfg(not(feature = "mysql"))]
        Driver::Mysql => Err(AppError::Unsupported(
            "this build was compiled without MySQL support".to_string(),
        )),
    }
}


#[cfg(test)]
mod tests {
    use super::{quote_literal, to_ole_date, Dialect, ResultSet, SqlValue};
    use crate::models::ColumnType;
    use chrono::NaiveDate;

    #[test]
    fn ole_date_matches_known_serials() {
        let new_year = NaiveDate::from_ymd_opt(2020, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("date");
        assert_eq!(to_ole_date(&new_year), 43831.0);

        let noon = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("date");
        assert_eq!(to_ole_date(&noon), 43832.5);
    }

    #[test]
    fn plot_values_follow_column_type() {
        assert_eq!(SqlValue::Integer(4).to_plot_value(ColumnType::Numeric), Some(4.0));
        assert_eq!(SqlValue::Text("1,250.5".to_string()).to_plot_value(ColumnType::Numeric), Some(1250.5));
        assert_eq!(
            SqlValue::Text("2020-01-01 00:00:00".to_string()).to_plot_value(ColumnType::Timestamp),
            Some(43831.0)
        );
        assert_eq!(SqlValue::Text("abc".to_string()).to_plot_value(ColumnType::Numeric), None);
        assert_eq!(SqlValue::Null.to_plot_value(ColumnType::Numeric), None);
        assert_eq!(SqlValue::Real(1.0).to_plot_value(ColumnType::Text), None);
    }

    #[test]
    fn identifiers_and_literals_are_escaped() {
        assert_eq!(Dialect::Mysql.quote_ident("we`ird"), "`we``ird`");
        assert_eq!(Dialect::Sqlite.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }

    #[test]
    fn result_set_converts_to_records() {
        let set = ResultSet {
            columns: vec!["ts".to_string(), "temp".to_string()],
            rows: vec![vec![SqlValue::Integer(1), SqlValue::Null]],
        };
        assert_eq!(set.column_index("TEMP"), Some(1));
        let records = set.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("ts"), Some(&SqlValue::Integer(1)));
        assert_eq!(records[0].get("temp"), Some(&SqlValue::Null));
    }
}
